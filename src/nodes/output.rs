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

pub const DEFAULT_OUTPUT_VOLUME: f32 = 0.2;

/// 出力ノード - グラフの終端、オーディオデバイスに接続される
pub struct TerminalOutputNode {
    node_info: NodeInfo,
    input: SummingJunction,
    volume: AtomicParam,
    volume_ramp: Mutex<ParameterRamp>,
}

impl TerminalOutputNode {
    pub fn new(name: String, config: &EngineConfig) -> Self {
        let node_info = NodeInfo {
            id: Uuid::new_v4(),
            name,
            node_type: "output".to_string(),
            category: NodeCategory::Output,
            description: "Main audio output".to_string(),
            input_ports: vec![
                PortInfo::new("in", PortType::AudioMono)
                    .with_label("MAIN IN")
                    .with_description("Signal sent to the audio device"),
            ],
            output_ports: vec![],
        };

        Self {
            node_info,
            input: SummingJunction::new("in", config.max_block_size),
            volume: AtomicParam::new(DEFAULT_OUTPUT_VOLUME),
            volume_ramp: Mutex::new(ParameterRamp::new(
                DEFAULT_OUTPUT_VOLUME,
                config.parameter_ramp_seconds,
                config.sample_rate_f32(),
            )),
        }
    }

    pub fn node_info(&self) -> &NodeInfo {
        &self.node_info
    }

    pub fn input(&self, port: &str) -> Option<&SummingJunction> {
        (port == self.input.name()).then_some(&self.input)
    }

    pub fn main_input(&self) -> &SummingJunction {
        &self.input
    }

    pub fn set_volume(&self, volume: f32) {
        let _ = self.set_parameter("volume", volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }
}

impl Parameterizable for TerminalOutputNode {
    define_parameters! {
        volume: BasicParameter::new("volume", 0.0, 1.0, DEFAULT_OUTPUT_VOLUME),
    }
}

impl SignalNode for TerminalOutputNode {
    fn process(&self, out: &mut [f32], ctx: &ProcessContext) {
        out.fill(0.0);
        let Some(mut ramp) = try_lock_audio(&self.volume_ramp) else {
            return;
        };
        ramp.set_target(self.volume.load());

        self.input.pull(out, ctx);
        for sample in out.iter_mut() {
            *sample *= ramp.next_value();
        }
    }
}
