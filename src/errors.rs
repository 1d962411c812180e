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

use std::path::PathBuf;

use thiserror::Error;

use crate::parameters::ParameterError;
use crate::processing::NodeId;

/// パッチ編集（コントロールスレッド）のエラー型
///
/// UI起因の競合（存在しないノードへの接続、二重接続など）はエラーではなく
/// `Ok(false)` として扱う。ここに並ぶのは呼び出し側のプログラミングミス。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// 入力ポートが見つからない
    #[error("Port '{port}' not found on node {node}")]
    PortNotFound { node: NodeId, port: String },

    /// 出力を持たないノードを接続元にしようとした
    #[error("Node {0} has no output to connect from")]
    NoOutputPort(NodeId),

    /// 削除できないノード（出力ノード）
    #[error("Node {0} is the patch output and cannot be removed")]
    ProtectedNode(NodeId),

    /// 循環参照の検出
    #[error("Connecting {from} -> {to}:{port} would create a feedback cycle")]
    CycleDetected { from: NodeId, to: NodeId, port: String },

    /// パラメーターエラー
    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// 設定ファイルのエラー型
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// ModularRack全体のエラー型
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 出力デバイスが見つからない、または開けない
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// ストリームの構築・開始・停止に失敗
    #[error("Audio stream error: {0}")]
    Stream(String),
}

/// 結果型のエイリアス
pub type EngineResult<T> = Result<T, EngineError>;
