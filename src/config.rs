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

//! エンジン設定
//!
//! ```toml
//! sample_rate = 48000
//! max_block_size = 1024
//! parameter_ramp_seconds = 0.05
//! device_latency_ms = 50
//! device_name = "USB"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::processing::ProcessContext;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_RAMP_SECONDS: f32 = 0.05;
pub const DEFAULT_LATENCY_MS: u32 = 50;

/// エンジン設定
///
/// サンプリングレートはノード生成時に取り込まれ、後から変更しても
/// 既存のノードには反映されない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// サンプリングレート (Hz)
    pub sample_rate: u32,
    /// 1回の処理で扱う最大サンプル数（スクラッチバッファのサイズ）
    pub max_block_size: usize,
    /// パラメーターランプ時間（秒）。0でスムージング無効
    pub parameter_ramp_seconds: f32,
    /// デバイスの目標レイテンシー (ms)
    pub device_latency_ms: u32,
    /// 出力デバイス名（部分一致）。未指定ならデフォルトデバイス
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            parameter_ramp_seconds: DEFAULT_RAMP_SECONDS,
            device_latency_ms: DEFAULT_LATENCY_MS,
            device_name: None,
        }
    }
}

impl EngineConfig {
    /// TOML文字列から読み込み（検証込み）
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// TOMLファイルから読み込み（検証込み）
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} is outside 8000..=192000",
                self.sample_rate
            )));
        }
        if !(1..=65_536).contains(&self.max_block_size) {
            return Err(ConfigError::Invalid(format!(
                "max_block_size {} is outside 1..=65536",
                self.max_block_size
            )));
        }
        if !self.parameter_ramp_seconds.is_finite()
            || !(0.0..=10.0).contains(&self.parameter_ramp_seconds)
        {
            return Err(ConfigError::Invalid(format!(
                "parameter_ramp_seconds {} is outside 0..=10",
                self.parameter_ramp_seconds
            )));
        }
        if !(1..=2_000).contains(&self.device_latency_ms) {
            return Err(ConfigError::Invalid(format!(
                "device_latency_ms {} is outside 1..=2000",
                self.device_latency_ms
            )));
        }
        Ok(())
    }

    /// ノードが取り込むサンプリングレート。未検証の設定でも 0 除算にならないよう 1 Hz 以上
    pub fn sample_rate_f32(&self) -> f32 {
        self.sample_rate.max(1) as f32
    }

    /// デバイスバッファのフレーム数（レイテンシーから算出）
    pub fn device_buffer_frames(&self) -> u32 {
        let frames = u64::from(self.sample_rate) * u64::from(self.device_latency_ms) / 1000;
        frames.clamp(1, self.max_block_size as u64) as u32
    }

    /// 初期処理コンテキスト
    pub fn context(&self) -> ProcessContext {
        ProcessContext::new(self.sample_rate)
    }

    /// TOML文字列へ書き出し
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
