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

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use serde::Serialize;
use uuid::Uuid;

use crate::graph::PortType;

/// ノードID
pub type NodeId = Uuid;

/// オーディオ処理のコンテキスト
///
/// 1回の `process()` 呼び出しの間は不変。ノードは参照で受け取り、書き換えない。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    /// サンプリングレート
    pub sample_rate: u32,
    /// 処理タイムスタンプ（ブロック先頭のサンプル番号）
    pub sample_index: u64,
}

impl ProcessContext {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            sample_index: 0,
        }
    }
}

/// 信号ノード - プル型グラフの処理単位
///
/// `out` の全サンプルを書き込む。バッファを呼び出し後に保持してはならない。
/// 上流エッジごとに1ブロック1回呼ばれても安全であること。
/// オーディオスレッドから呼ばれるため、ブロック・ヒープ確保・パニックは禁止。
pub trait SignalNode: Send + Sync {
    /// オーディオ処理を実行
    fn process(&self, out: &mut [f32], ctx: &ProcessContext);

    /// `buffer[offset..offset + count]` を処理する
    ///
    /// 範囲がバッファを超える場合は有効な部分だけを処理する。
    fn process_range(&self, buffer: &mut [f32], offset: usize, count: usize, ctx: &ProcessContext) {
        let end = offset.saturating_add(count).min(buffer.len());
        if offset < end {
            self.process(&mut buffer[offset..end], ctx);
        }
    }
}

/// ノード情報の詳細版
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub node_type: String,
    pub category: NodeCategory,
    pub description: String,
    pub input_ports: Vec<PortInfo>,
    pub output_ports: Vec<PortInfo>,
}

impl NodeInfo {
    pub fn input_port(&self, name: &str) -> Option<&PortInfo> {
        self.input_ports.iter().find(|port| port.name == name)
    }
}

/// ノードカテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeCategory {
    Generator,
    Processor,
    Controller,
    Mixing,
    Output,
}

/// ポート情報の詳細版
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub label: String,
    pub port_type: PortType,
    pub description: String,
    pub is_optional: bool,
}

impl PortInfo {
    pub fn new(name: &str, port_type: PortType) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_uppercase(),
            port_type,
            description: String::new(),
            is_optional: false,
        }
    }

    /// パネル表示用のラベル
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }
}

/// オーディオスレッド用のロック取得
///
/// 待たずに失敗する。取得できない場合（再入・フィードバック）は `None`。
/// 以前のブロックでパニックしたロックは回復して使い続ける。
pub(crate) fn try_lock_audio<T>(state: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match state.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// コントロールスレッド用のロック取得
pub(crate) fn lock_control<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
