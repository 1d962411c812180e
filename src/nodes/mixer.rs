/*
 * ModularRack - Patchable Modular Synthesizer Core
 * Copyright (c) 2025 MACHIKO LAB
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

use std::sync::Mutex;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::define_parameters;
use crate::graph::PortType;
use crate::nodes::junction::SummingJunction;
use crate::parameters::{AtomicParam, BasicParameter, ParameterRamp, Parameterizable};
use crate::processing::{try_lock_audio, NodeCategory, NodeInfo, PortInfo, ProcessContext, SignalNode};

pub const MIXER_CHANNELS: usize = 4;

const INPUT_PORTS: [&str; MIXER_CHANNELS] = ["in1", "in2", "in3", "in4"];

struct MixerState {
    channel_gains: [ParameterRamp; MIXER_CHANNELS],
    master_gain: ParameterRamp,
    scratch: Vec<f32>,
}

/// 4チャンネルミキサー
pub struct MixerNode {
    node_info: NodeInfo,

    inputs: [SummingJunction; MIXER_CHANNELS],

    vol1: AtomicParam,
    vol2: AtomicParam,
    vol3: AtomicParam,
    vol4: AtomicParam,
    vol_out: AtomicParam,

    state: Mutex<MixerState>,
}

impl MixerNode {
    pub fn new(name: String, config: &EngineConfig) -> Self {
        let input_ports = INPUT_PORTS
            .iter()
            .enumerate()
            .map(|(i, port)| {
                PortInfo::new(port, PortType::AudioMono)
                    .with_label(&format!("IN {}", i + 1))
                    .with_description(&format!("Channel {} input", i + 1))
                    .optional()
            })
            .collect();

        let node_info = NodeInfo {
            id: Uuid::new_v4(),
            name,
            node_type: "mixer".to_string(),
            category: NodeCategory::Mixing,
            description: "4-channel mixer with per-channel and master level".to_string(),
            input_ports,
            output_ports: vec![
                PortInfo::new("out", PortType::AudioMono)
                    .with_label("OUT")
                    .with_description("Mixed output"),
            ],
        };

        let sample_rate = config.sample_rate_f32();
        let ramp = || ParameterRamp::new(1.0, config.parameter_ramp_seconds, sample_rate);

        Self {
            node_info,
            inputs: INPUT_PORTS.map(|port| SummingJunction::new(port, config.max_block_size)),
            vol1: AtomicParam::new(1.0),
            vol2: AtomicParam::new(1.0),
            vol3: AtomicParam::new(1.0),
            vol4: AtomicParam::new(1.0),
            vol_out: AtomicParam::new(1.0),
            state: Mutex::new(MixerState {
                channel_gains: [ramp(), ramp(), ramp(), ramp()],
                master_gain: ramp(),
                scratch: vec![0.0; config.max_block_size.max(1)],
            }),
        }
    }

    pub fn node_info(&self) -> &NodeInfo {
        &self.node_info
    }

    pub fn input(&self, port: &str) -> Option<&SummingJunction> {
        self.inputs.iter().find(|junction| junction.name() == port)
    }

    fn channel_level(&self, index: usize) -> Option<&AtomicParam> {
        match index {
            0 => Some(&self.vol1),
            1 => Some(&self.vol2),
            2 => Some(&self.vol3),
            3 => Some(&self.vol4),
            _ => None,
        }
    }

    /// チャンネル音量を設定（0始まり、0.0 - 2.0）
    pub fn set_channel_volume(&self, index: usize, level: f32) {
        if let Some(param) = self.channel_level(index) {
            if level.is_finite() {
                param.store(level.clamp(0.0, 2.0));
            }
        }
    }

    pub fn channel_volume(&self, index: usize) -> Option<f32> {
        self.channel_level(index).map(AtomicParam::load)
    }

    pub fn set_master_volume(&self, level: f32) {
        let _ = self.set_parameter("vol_out", level);
    }
}

impl Parameterizable for MixerNode {
    define_parameters! {
        vol1: BasicParameter::new("vol1", 0.0, 2.0, 1.0),
        vol2: BasicParameter::new("vol2", 0.0, 2.0, 1.0),
        vol3: BasicParameter::new("vol3", 0.0, 2.0, 1.0),
        vol4: BasicParameter::new("vol4", 0.0, 2.0, 1.0),
        vol_out: BasicParameter::new("vol_out", 0.0, 2.0, 1.0),
    }
}

impl SignalNode for MixerNode {
    fn process(&self, out: &mut [f32], ctx: &ProcessContext) {
        let Some(mut guard) = try_lock_audio(&self.state) else {
            out.fill(0.0);
            return;
        };
        let MixerState { channel_gains, master_gain, scratch } = &mut *guard;

        for (index, ramp) in channel_gains.iter_mut().enumerate() {
            if let Some(level) = self.channel_level(index) {
                ramp.set_target(level.load());
            }
        }
        master_gain.set_target(self.vol_out.load());

        for chunk in out.chunks_mut(scratch.len()) {
            chunk.fill(0.0);

            for (input, gain) in self.inputs.iter().zip(channel_gains.iter_mut()) {
                let temp = &mut scratch[..chunk.len()];
                temp.fill(0.0);
                input.pull(temp, ctx);

                // フェーダーはブロック内でもサンプル単位で動く
                for (sample, value) in chunk.iter_mut().zip(temp.iter()) {
                    *sample += *value * gain.next_value();
                }
            }

            for sample in chunk.iter_mut() {
                *sample *= master_gain.next_value();
            }
        }
    }
}
