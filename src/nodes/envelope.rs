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

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::define_parameters;
use crate::graph::PortType;
use crate::parameters::{AtomicParam, BasicParameter, Parameterizable};
use crate::processing::{try_lock_audio, NodeCategory, NodeInfo, PortInfo, ProcessContext, SignalNode};

/// これ以下の時間は即時（レート1）として扱う
const TIME_EPSILON: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Idle = 0,    // 待機状態
    Attack = 1,  // アタック段階
    Decay = 2,   // ディケイ段階
    Sustain = 3, // サステイン段階
    Release = 4, // リリース段階
}

impl EnvelopeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EnvelopeState::Attack,
            2 => EnvelopeState::Decay,
            3 => EnvelopeState::Sustain,
            4 => EnvelopeState::Release,
            _ => EnvelopeState::Idle,
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, EnvelopeState::Idle)
    }
}

struct EnvelopeCore {
    stage: EnvelopeState,
    value: f32,
    // リリース開始時のレベル
    release_level: f32,
    sample_rate: f32,
}

impl EnvelopeCore {
    /// ブロック先頭でゲートを評価
    fn apply_gate(&mut self, gate_open: bool) {
        match (gate_open, self.stage) {
            (true, EnvelopeState::Idle | EnvelopeState::Release) => {
                self.stage = EnvelopeState::Attack;
            }
            (false, EnvelopeState::Attack | EnvelopeState::Decay | EnvelopeState::Sustain) => {
                self.stage = EnvelopeState::Release;
                self.release_level = self.value;
            }
            _ => {}
        }
    }

    fn rate(&self, seconds: f32, span: f32) -> f32 {
        if seconds > TIME_EPSILON {
            span / (seconds * self.sample_rate)
        } else {
            1.0
        }
    }
}

/// ADSRエンベロープジェネレーター
///
/// ゲートが開くとアタックで1.0まで上昇し、ディケイでサステインレベルまで
/// 下降して保持する。ゲートが閉じるとリリースで0へ戻る。
/// 出力は 0.0 - 1.0 のCV。
pub struct EnvelopeNode {
    node_info: NodeInfo,

    attack: AtomicParam,  // 秒
    decay: AtomicParam,   // 秒
    sustain: AtomicParam, // レベル 0.0 - 1.0
    release: AtomicParam, // 秒
    gate: AtomicParam,

    // 表示用に公開する値
    published_value: AtomicParam,
    published_state: AtomicU8,

    core: Mutex<EnvelopeCore>,
}

impl EnvelopeNode {
    pub fn new(name: String, config: &EngineConfig) -> Self {
        let node_info = NodeInfo {
            id: Uuid::new_v4(),
            name,
            node_type: "envelope".to_string(),
            category: NodeCategory::Controller,
            description: "Gated ADSR envelope generator".to_string(),
            input_ports: vec![],
            output_ports: vec![
                PortInfo::new("out", PortType::CV)
                    .with_label("OUT")
                    .with_description("Envelope CV output (0 to 1)"),
            ],
        };

        Self {
            node_info,
            attack: AtomicParam::new(0.1),
            decay: AtomicParam::new(0.1),
            sustain: AtomicParam::new(0.8),
            release: AtomicParam::new(0.5),
            gate: AtomicParam::new(0.0),
            published_value: AtomicParam::new(0.0),
            published_state: AtomicU8::new(EnvelopeState::Idle as u8),
            core: Mutex::new(EnvelopeCore {
                stage: EnvelopeState::Idle,
                value: 0.0,
                release_level: 0.0,
                sample_rate: config.sample_rate_f32(),
            }),
        }
    }

    pub fn node_info(&self) -> &NodeInfo {
        &self.node_info
    }

    /// ゲートを開閉。次のブロック先頭で反映される
    pub fn set_gate(&self, open: bool) {
        self.gate.store(if open { 1.0 } else { 0.0 });
    }

    pub fn gate(&self) -> bool {
        self.gate.load() > 0.5
    }

    pub fn set_attack(&self, seconds: f32) {
        let _ = self.set_parameter("attack", seconds);
    }

    pub fn set_decay(&self, seconds: f32) {
        let _ = self.set_parameter("decay", seconds);
    }

    pub fn set_sustain(&self, level: f32) {
        let _ = self.set_parameter("sustain", level);
    }

    pub fn set_release(&self, seconds: f32) {
        let _ = self.set_parameter("release", seconds);
    }

    /// 直近のブロック終了時の出力値
    pub fn current_value(&self) -> f32 {
        self.published_value.load()
    }

    /// 直近のブロック終了時の状態
    pub fn state(&self) -> EnvelopeState {
        EnvelopeState::from_u8(self.published_state.load(Ordering::Relaxed))
    }
}

impl Parameterizable for EnvelopeNode {
    define_parameters! {
        attack: BasicParameter::new("attack", 0.0, 5.0, 0.1).with_unit("s"),
        decay: BasicParameter::new("decay", 0.0, 5.0, 0.1).with_unit("s"),
        sustain: BasicParameter::new("sustain", 0.0, 1.0, 0.8),
        release: BasicParameter::new("release", 0.0, 5.0, 0.5).with_unit("s"),
        gate: BasicParameter::new("gate", 0.0, 1.0, 0.0),
    }
}

impl SignalNode for EnvelopeNode {
    fn process(&self, out: &mut [f32], _ctx: &ProcessContext) {
        let Some(mut guard) = try_lock_audio(&self.core) else {
            out.fill(0.0);
            return;
        };
        let core = &mut *guard;

        core.apply_gate(self.gate());

        // レートはブロックごとに1回計算
        let sustain = self.sustain.load();
        let attack_rate = core.rate(self.attack.load(), 1.0);
        let decay_rate = core.rate(self.decay.load(), 1.0 - sustain);
        let release_rate = core.rate(self.release.load(), core.release_level);

        for sample in out.iter_mut() {
            match core.stage {
                EnvelopeState::Idle => {
                    core.value = 0.0;
                }
                EnvelopeState::Attack => {
                    core.value += attack_rate;
                    if core.value >= 1.0 {
                        core.value = 1.0;
                        core.stage = EnvelopeState::Decay;
                    }
                }
                EnvelopeState::Decay => {
                    core.value -= decay_rate;
                    if core.value <= sustain {
                        core.value = sustain;
                        core.stage = EnvelopeState::Sustain;
                    }
                }
                EnvelopeState::Sustain => {
                    core.value = sustain;
                }
                EnvelopeState::Release => {
                    core.value -= release_rate;
                    if core.value <= 0.0 {
                        core.value = 0.0;
                        core.stage = EnvelopeState::Idle;
                    }
                }
            }
            *sample = core.value;
        }

        self.published_value.store(core.value);
        self.published_state.store(core.stage as u8, Ordering::Relaxed);
    }
}
