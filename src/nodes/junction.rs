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

use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwap;

use crate::processing::{lock_control, try_lock_audio, NodeId, ProcessContext, SignalNode};

#[derive(Clone)]
struct Source {
    id: NodeId,
    node: Weak<dyn SignalNode>,
}

/// サミングジャンクション - モジュールの入力ポート
///
/// 接続された上流ノードの出力を足し合わせる。ソースは弱参照で保持し、
/// ノードの寿命はパッチが管理する。
///
/// コントロールスレッドは編集用リストを更新し、新しいスナップショットを
/// `ArcSwap` で公開する。オーディオスレッドは `pull()` の先頭で
/// スナップショットを1回だけ読み、そのまま走査する。
pub struct SummingJunction {
    name: &'static str,
    editable: Mutex<Vec<Source>>,
    active: ArcSwap<Vec<Source>>,
    scratch: Mutex<Vec<f32>>,
}

impl SummingJunction {
    pub fn new(name: &'static str, max_block_size: usize) -> Self {
        Self {
            name,
            editable: Mutex::new(Vec::new()),
            active: ArcSwap::from_pointee(Vec::new()),
            scratch: Mutex::new(vec![0.0; max_block_size.max(1)]),
        }
    }

    /// ポート名
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// ソースを追加。既に接続済みなら `false`
    pub fn add_source(&self, id: NodeId, node: &Arc<dyn SignalNode>) -> bool {
        let mut sources = lock_control(&self.editable);
        if sources.iter().any(|source| source.id == id) {
            return false;
        }
        sources.push(Source {
            id,
            node: Arc::downgrade(node),
        });
        self.active.store(Arc::new(sources.clone()));
        true
    }

    /// ソースを削除。接続されていなければ `false`
    pub fn remove_source(&self, id: NodeId) -> bool {
        let mut sources = lock_control(&self.editable);
        let before = sources.len();
        sources.retain(|source| source.id != id);
        if sources.len() == before {
            return false;
        }
        self.active.store(Arc::new(sources.clone()));
        true
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.active.load().iter().any(|source| source.id == id)
    }

    pub fn source_ids(&self) -> Vec<NodeId> {
        self.active.load().iter().map(|source| source.id).collect()
    }

    pub fn source_count(&self) -> usize {
        self.active.load().len()
    }

    pub fn is_connected(&self) -> bool {
        self.source_count() > 0
    }

    /// 全ソースを合算して `out` に加算し、描画できたソース数を返す
    ///
    /// 生きているソースが無ければ `out` を無音にする。ソースがある場合
    /// `out` は事前にクリアしない（呼び出し側の責任）。
    pub fn pull(&self, out: &mut [f32], ctx: &ProcessContext) -> usize {
        let sources = self.active.load();
        if sources.is_empty() {
            out.fill(0.0);
            return 0;
        }

        // 再入（フィードバック）時は何も加算しない
        let Some(mut scratch) = try_lock_audio(&self.scratch) else {
            return 0;
        };
        let block_size = scratch.len();

        let mut rendered = 0;
        for source in sources.iter() {
            let Some(node) = source.node.upgrade() else {
                continue;
            };
            rendered += 1;

            for chunk in out.chunks_mut(block_size) {
                let temp = &mut scratch[..chunk.len()];
                temp.fill(0.0);
                node.process(temp, ctx);
                for (sample, value) in chunk.iter_mut().zip(temp.iter()) {
                    *sample += *value;
                }
            }
        }

        if rendered == 0 {
            out.fill(0.0);
        }
        rendered
    }
}

impl SignalNode for SummingJunction {
    fn process(&self, out: &mut [f32], ctx: &ProcessContext) {
        self.pull(out, ctx);
    }
}

impl std::fmt::Debug for SummingJunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummingJunction")
            .field("name", &self.name)
            .field("sources", &self.source_ids())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use uuid::Uuid;

    /// 一定値を出力するテスト用ソース
    pub(crate) struct ConstantSource(pub f32);

    impl SignalNode for ConstantSource {
        fn process(&self, out: &mut [f32], _ctx: &ProcessContext) {
            out.fill(self.0);
        }
    }

    /// サンプル番号に比例した値を出力するテスト用ソース
    struct RampSource(f32);

    impl SignalNode for RampSource {
        fn process(&self, out: &mut [f32], _ctx: &ProcessContext) {
            for (i, sample) in out.iter_mut().enumerate() {
                *sample = self.0 * i as f32;
            }
        }
    }

    pub(crate) fn source(value: f32) -> (NodeId, Arc<dyn SignalNode>) {
        (Uuid::new_v4(), Arc::new(ConstantSource(value)))
    }

    fn ctx() -> ProcessContext {
        ProcessContext::new(44100)
    }

    #[test]
    fn test_empty_junction_is_silent() {
        let junction = SummingJunction::new("in", 64);
        for count in [1, 7, 64, 300] {
            let mut out = vec![0.5; count];
            assert_eq!(junction.pull(&mut out, &ctx()), 0);
            assert!(out.iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_sources_are_summed() {
        let junction = SummingJunction::new("in", 64);
        let (a_id, a) = source(0.25);
        let b_id = Uuid::new_v4();
        let b: Arc<dyn SignalNode> = Arc::new(RampSource(0.5));
        junction.add_source(a_id, &a);
        junction.add_source(b_id, &b);

        let mut out = vec![0.0; 16];
        assert_eq!(junction.pull(&mut out, &ctx()), 2);
        for (i, sample) in out.iter().enumerate() {
            assert_eq!(*sample, 0.25 + 0.5 * i as f32);
        }
    }

    #[test]
    fn test_pull_accumulates_into_destination() {
        let junction = SummingJunction::new("in", 64);
        let (id, node) = source(1.0);
        junction.add_source(id, &node);

        let mut out = vec![2.0; 8];
        junction.pull(&mut out, &ctx());
        assert!(out.iter().all(|&s| s == 3.0));
    }

    #[test]
    fn test_add_and_remove_are_idempotent() {
        let junction = SummingJunction::new("in", 64);
        let (id, node) = source(1.0);

        assert!(junction.add_source(id, &node));
        assert!(!junction.add_source(id, &node));
        assert_eq!(junction.source_count(), 1);

        assert!(junction.remove_source(id));
        assert!(!junction.remove_source(id));
        assert!(!junction.is_connected());
    }

    #[test]
    fn test_dropped_source_is_skipped() {
        let junction = SummingJunction::new("in", 64);
        let (live_id, live) = source(1.0);
        let (dead_id, dead) = source(5.0);
        junction.add_source(live_id, &live);
        junction.add_source(dead_id, &dead);
        drop(dead);

        let mut out = vec![0.0; 4];
        assert_eq!(junction.pull(&mut out, &ctx()), 1);
        assert!(out.iter().all(|&s| s == 1.0));

        // 生きているソースが無ければ無音
        drop(live);
        let mut out = vec![9.0; 4];
        assert_eq!(junction.pull(&mut out, &ctx()), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_blocks_larger_than_scratch() {
        let junction = SummingJunction::new("in", 8);
        let (id, node) = source(0.5);
        junction.add_source(id, &node);

        let mut out = vec![0.0; 21];
        junction.pull(&mut out, &ctx());
        assert!(out.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_concurrent_topology_edits() {
        let junction = Arc::new(SummingJunction::new("in", 128));
        let sources: Vec<(NodeId, Arc<dyn SignalNode>)> = (0..4).map(|_| source(1.0)).collect();
        let running = Arc::new(AtomicBool::new(true));

        let editor = {
            let junction = Arc::clone(&junction);
            let sources = sources.clone();
            let running = Arc::clone(&running);
            thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    for (id, node) in &sources {
                        junction.add_source(*id, node);
                    }
                    for (id, _) in &sources {
                        junction.remove_source(*id);
                    }
                }
            })
        };

        let mut out = vec![0.0; 128];
        for _ in 0..2000 {
            out.fill(0.0);
            let rendered = junction.pull(&mut out, &ctx());
            // 1つのスナップショット内では全サンプルが同じ値
            let expected = rendered as f32;
            assert!(out.iter().all(|&s| s == expected));
            assert!(rendered <= sources.len());
        }

        running.store(false, Ordering::Relaxed);
        editor.join().unwrap();
    }
}
