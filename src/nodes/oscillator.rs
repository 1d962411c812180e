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

use std::f32::consts::{PI, TAU};
use std::str::FromStr;
use std::sync::Mutex;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::define_parameters;
use crate::graph::PortType;
use crate::parameters::{AtomicParam, BasicParameter, ParameterRamp, Parameterizable};
use crate::processing::{try_lock_audio, NodeCategory, NodeInfo, PortInfo, ProcessContext, SignalNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine = 0,
    Square = 1,
    Sawtooth = 2,
    Triangle = 3,
}

impl Waveform {
    pub fn from_f32(value: f32) -> Self {
        match value.round() as i32 {
            1 => Waveform::Square,
            2 => Waveform::Sawtooth,
            3 => Waveform::Triangle,
            _ => Waveform::Sine,
        }
    }

    pub fn as_f32(self) -> f32 {
        self as i32 as f32
    }

    /// 位相 `[0, 2π)` における波形値
    #[inline]
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => phase.sin(),
            Waveform::Square => {
                if phase < PI {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * (phase / TAU) - 1.0,
            Waveform::Triangle => (phase / PI - 1.0).abs() * 2.0 - 1.0,
        }
    }
}

impl FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sine" | "sin" => Ok(Waveform::Sine),
            "square" | "sq" => Ok(Waveform::Square),
            "sawtooth" | "saw" => Ok(Waveform::Sawtooth),
            "triangle" | "tri" => Ok(Waveform::Triangle),
            other => Err(format!("Unknown waveform: {}", other)),
        }
    }
}

struct OscillatorState {
    phase: f32,
    frequency: ParameterRamp,
    sample_rate: f32,
}

/// VCO - 位相アキュムレーター方式のオシレーター
pub struct OscillatorNode {
    node_info: NodeInfo,

    frequency: AtomicParam,
    waveform: AtomicParam,

    state: Mutex<OscillatorState>,
}

impl OscillatorNode {
    pub fn new(name: String, config: &EngineConfig) -> Self {
        let node_info = NodeInfo {
            id: Uuid::new_v4(),
            name,
            node_type: "oscillator".to_string(),
            category: NodeCategory::Generator,
            description: "Phase-accumulator oscillator with sine, square, saw and triangle shapes".to_string(),
            input_ports: vec![],
            output_ports: vec![
                PortInfo::new("out", PortType::AudioMono)
                    .with_label("OUT")
                    .with_description("Audio output (-1 to +1)"),
            ],
        };

        let sample_rate = config.sample_rate_f32();
        Self {
            node_info,
            frequency: AtomicParam::new(440.0),
            waveform: AtomicParam::new(Waveform::Sine.as_f32()),
            state: Mutex::new(OscillatorState {
                phase: 0.0,
                frequency: ParameterRamp::new(440.0, config.parameter_ramp_seconds, sample_rate),
                sample_rate,
            }),
        }
    }

    pub fn node_info(&self) -> &NodeInfo {
        &self.node_info
    }

    /// 周波数を設定 (Hz)
    pub fn set_frequency(&self, hz: f32) {
        if hz.is_finite() {
            self.frequency.store(hz.clamp(0.0, 20000.0));
        }
    }

    pub fn frequency(&self) -> f32 {
        self.frequency.load()
    }

    pub fn set_waveform(&self, waveform: Waveform) {
        self.waveform.store(waveform.as_f32());
    }

    pub fn waveform(&self) -> Waveform {
        Waveform::from_f32(self.waveform.load())
    }
}

impl Parameterizable for OscillatorNode {
    define_parameters! {
        frequency: BasicParameter::new("frequency", 0.0, 20000.0, 440.0).with_unit("Hz"),
        waveform: BasicParameter::new("waveform", 0.0, 3.0, 0.0),
    }
}

impl SignalNode for OscillatorNode {
    fn process(&self, out: &mut [f32], _ctx: &ProcessContext) {
        let Some(mut guard) = try_lock_audio(&self.state) else {
            out.fill(0.0);
            return;
        };
        let state = &mut *guard;

        // 1サンプルの位相増分が 2π 未満になるようナイキストで制限
        let nyquist = state.sample_rate * 0.5;
        state.frequency.set_target(self.frequency.load().clamp(0.0, nyquist));

        let waveform = self.waveform();
        let phase_per_hz = TAU / state.sample_rate;

        for sample in out.iter_mut() {
            let frequency = state.frequency.next_value();
            *sample = waveform.sample(state.phase);

            state.phase += phase_per_hz * frequency;
            if state.phase >= TAU {
                state.phase -= TAU;
            }
        }
    }
}
