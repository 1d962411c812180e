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

/// CVとレベルの合成方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvMode {
    /// gain = level × cv（CV未接続なら cv = 1）
    Multiplicative = 0,
    /// gain = level + cv
    Additive = 1,
}

impl CvMode {
    pub fn from_f32(value: f32) -> Self {
        if value >= 0.5 {
            CvMode::Additive
        } else {
            CvMode::Multiplicative
        }
    }

    #[inline]
    fn gain(self, level: f32, cv: Option<f32>) -> f32 {
        let gain = match self {
            CvMode::Multiplicative => level * cv.unwrap_or(1.0),
            CvMode::Additive => level + cv.unwrap_or(0.0),
        };
        // 負のゲインで位相を反転させない
        gain.max(0.0)
    }
}

struct AmplifierState {
    level: ParameterRamp,
    audio: Vec<f32>,
    cv: Vec<f32>,
}

/// VCA - CVで制御されるアンプ
pub struct AmplifierNode {
    node_info: NodeInfo,

    audio_in: SummingJunction,
    cv_in: SummingJunction,

    level: AtomicParam,
    cv_mode: AtomicParam,

    state: Mutex<AmplifierState>,
}

impl AmplifierNode {
    pub fn new(name: String, config: &EngineConfig) -> Self {
        let node_info = NodeInfo {
            id: Uuid::new_v4(),
            name,
            node_type: "amplifier".to_string(),
            category: NodeCategory::Processor,
            description: "Voltage controlled amplifier".to_string(),
            input_ports: vec![
                PortInfo::new("audio", PortType::AudioMono)
                    .with_label("IN")
                    .with_description("Audio input"),
                PortInfo::new("cv", PortType::CV)
                    .with_label("CV")
                    .with_description("Gain control (1.0 when unpatched)")
                    .optional(),
            ],
            output_ports: vec![
                PortInfo::new("out", PortType::AudioMono)
                    .with_label("OUT")
                    .with_description("Amplified audio output"),
            ],
        };

        let block = config.max_block_size.max(1);
        Self {
            node_info,
            audio_in: SummingJunction::new("audio", config.max_block_size),
            cv_in: SummingJunction::new("cv", config.max_block_size),
            level: AtomicParam::new(1.0),
            cv_mode: AtomicParam::new(CvMode::Multiplicative as i32 as f32),
            state: Mutex::new(AmplifierState {
                level: ParameterRamp::new(1.0, config.parameter_ramp_seconds, config.sample_rate_f32()),
                audio: vec![0.0; block],
                cv: vec![0.0; block],
            }),
        }
    }

    pub fn node_info(&self) -> &NodeInfo {
        &self.node_info
    }

    pub fn input(&self, port: &str) -> Option<&SummingJunction> {
        match port {
            "audio" => Some(&self.audio_in),
            "cv" => Some(&self.cv_in),
            _ => None,
        }
    }

    pub fn audio_input(&self) -> &SummingJunction {
        &self.audio_in
    }

    pub fn cv_input(&self) -> &SummingJunction {
        &self.cv_in
    }

    pub fn set_level(&self, level: f32) {
        let _ = self.set_parameter("level", level);
    }

    pub fn set_cv_mode(&self, mode: CvMode) {
        self.cv_mode.store(mode as i32 as f32);
    }

    pub fn cv_mode(&self) -> CvMode {
        CvMode::from_f32(self.cv_mode.load())
    }
}

impl Parameterizable for AmplifierNode {
    define_parameters! {
        level: BasicParameter::new("level", 0.0, 2.0, 1.0),
        cv_mode: BasicParameter::new("cv_mode", 0.0, 1.0, 0.0),
    }
}

impl SignalNode for AmplifierNode {
    fn process(&self, out: &mut [f32], ctx: &ProcessContext) {
        let Some(mut guard) = try_lock_audio(&self.state) else {
            out.fill(0.0);
            return;
        };
        let AmplifierState { level, audio, cv } = &mut *guard;

        level.set_target(self.level.load());
        let mode = self.cv_mode();

        for chunk in out.chunks_mut(audio.len()) {
            let len = chunk.len();
            let audio = &mut audio[..len];
            let cv = &mut cv[..len];

            audio.fill(0.0);
            self.audio_in.pull(audio, ctx);
            cv.fill(0.0);
            let cv_connected = self.cv_in.pull(cv, ctx) > 0;

            for ((sample, input), control) in chunk.iter_mut().zip(audio.iter()).zip(cv.iter()) {
                let control = cv_connected.then_some(*control);
                *sample = *input * mode.gain(level.next_value(), control);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::junction::tests::source;

    fn amplifier() -> AmplifierNode {
        let config = EngineConfig {
            parameter_ramp_seconds: 0.0,
            max_block_size: 32,
            ..EngineConfig::default()
        };
        AmplifierNode::new("VCA".to_string(), &config)
    }

    fn render(amp: &AmplifierNode, count: usize) -> Vec<f32> {
        let ctx = ProcessContext::new(44100);
        let mut out = vec![0.0; count];
        amp.process(&mut out, &ctx);
        out
    }

    #[test]
    fn test_unpatched_cv_passes_audio_at_level() {
        let amp = amplifier();
        let (id, node) = source(0.5);
        amp.audio_input().add_source(id, &node);
        amp.set_level(1.5);

        assert!(render(&amp, 50).iter().all(|&s| s == 0.75));
    }

    #[test]
    fn test_zero_cv_silences() {
        let amp = amplifier();
        let (audio_id, audio) = source(0.5);
        let (cv_id, cv) = source(0.0);
        amp.audio_input().add_source(audio_id, &audio);
        amp.cv_input().add_source(cv_id, &cv);

        for level in [0.0, 1.0, 2.0] {
            amp.set_level(level);
            assert!(render(&amp, 16).iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_cv_scales_level() {
        let amp = amplifier();
        let (audio_id, audio) = source(0.5);
        let (cv_id, cv) = source(0.5);
        amp.audio_input().add_source(audio_id, &audio);
        amp.cv_input().add_source(cv_id, &cv);
        amp.set_level(2.0);

        assert!(render(&amp, 16).iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_negative_gain_does_not_invert() {
        let amp = amplifier();
        let (audio_id, audio) = source(0.5);
        let (cv_id, cv) = source(-1.0);
        amp.audio_input().add_source(audio_id, &audio);
        amp.cv_input().add_source(cv_id, &cv);

        assert!(render(&amp, 16).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_additive_mode() {
        let amp = amplifier();
        let (audio_id, audio) = source(1.0);
        amp.audio_input().add_source(audio_id, &audio);
        amp.set_cv_mode(CvMode::Additive);
        amp.set_level(0.5);

        // CV未接続なら level のみ
        assert!(render(&amp, 8).iter().all(|&s| s == 0.5));

        let (cv_id, cv) = source(0.25);
        amp.cv_input().add_source(cv_id, &cv);
        assert!(render(&amp, 8).iter().all(|&s| s == 0.75));

        // 床は0
        amp.cv_input().remove_source(cv_id);
        let (neg_id, neg) = source(-1.0);
        amp.cv_input().add_source(neg_id, &neg);
        assert!(render(&amp, 8).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_no_audio_is_silent() {
        let amp = amplifier();
        let (cv_id, cv) = source(1.0);
        amp.cv_input().add_source(cv_id, &cv);
        let ctx = ProcessContext::new(44100);
        let mut out = vec![1.0; 70];
        amp.process(&mut out, &ctx);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_cv_mode_parameter() {
        let amp = amplifier();
        assert_eq!(amp.cv_mode(), CvMode::Multiplicative);
        assert_eq!(amp.set_parameter("cv_mode", 1.0), Ok(1.0));
        assert_eq!(amp.cv_mode(), CvMode::Additive);
        assert_eq!(amp.input("gate").map(|j| j.name()), None);
    }
}
