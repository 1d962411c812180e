use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::errors::{ConfigError, GraphError};
use crate::nodes::{
    create_module, AmplifierNode, EnvelopeNode, MixerNode, Module, ModuleType, OscillatorNode,
    TerminalOutputNode,
};
use crate::processing::{NodeId, NodeInfo};

/// ポートの信号種別（表示用。接続時に型は検査しない）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PortType {
    AudioMono,
    CV,
}

/// ケーブル: `source_node` の出力 → `target_node` の入力ポート
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Connection {
    pub source_node: NodeId,
    pub target_node: NodeId,
    pub target_port: String,
}

/// パッチ - グラフ編集の境界（コントロールスレッド専用）
///
/// モジュールの所有者。オーディオスレッドは出力ノードから弱参照を辿るだけで、
/// `Patch` そのものには触れない。出力ノードは常に存在し、削除できない。
pub struct Patch {
    config: EngineConfig,
    modules: HashMap<NodeId, Module>,
    connections: Vec<Connection>,
    output: Arc<TerminalOutputNode>,
}

impl Patch {
    /// 出力ノードだけを持つパッチを作成（設定は検証される）
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let output = Arc::new(TerminalOutputNode::new("AUDIO OUT".to_string(), config));
        let mut modules = HashMap::new();
        modules.insert(output.node_info().id, Module::Output(Arc::clone(&output)));

        Ok(Self {
            config: config.clone(),
            modules,
            connections: Vec::new(),
            output,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 出力ノード（レンダラーに渡す）
    pub fn output(&self) -> Arc<TerminalOutputNode> {
        Arc::clone(&self.output)
    }

    pub fn output_id(&self) -> NodeId {
        self.output.node_info().id
    }

    /// モジュールを追加
    pub fn add_module(&mut self, module_type: ModuleType) -> NodeId {
        let module = create_module(module_type, &self.config);
        let id = module.id();
        debug!(%id, module = %module_type, "module added");
        self.modules.insert(id, module);
        id
    }

    /// モジュールを削除
    ///
    /// 接続されている全ケーブルを外してからノードを破棄する。
    /// 存在しないIDは `Ok(false)`。
    pub fn remove_module(&mut self, id: NodeId) -> Result<bool, GraphError> {
        if id == self.output_id() {
            warn!(%id, "refusing to remove the patch output");
            return Err(GraphError::ProtectedNode(id));
        }
        if !self.modules.contains_key(&id) {
            debug!(%id, "remove_module: unknown node");
            return Ok(false);
        }

        let attached: Vec<Connection> = self
            .connections
            .iter()
            .filter(|conn| conn.source_node == id || conn.target_node == id)
            .cloned()
            .collect();
        for conn in &attached {
            if let Some(junction) = self
                .modules
                .get(&conn.target_node)
                .and_then(|target| target.input(&conn.target_port))
            {
                junction.remove_source(conn.source_node);
            }
        }
        self.connections
            .retain(|conn| conn.source_node != id && conn.target_node != id);

        if let Some(module) = self.modules.remove(&id) {
            debug!(%id, node_type = %module.node_info().node_type, cables = attached.len(), "module removed");
        }
        Ok(true)
    }

    /// `source` の出力を `target` の入力ポート `port` に接続
    ///
    /// 存在しないノードや既存のケーブルは `Ok(false)`（UI側の競合）。
    pub fn connect(&mut self, source: NodeId, target: NodeId, port: &str) -> Result<bool, GraphError> {
        let (Some(source_module), Some(target_module)) = (self.modules.get(&source), self.modules.get(&target)) else {
            debug!(%source, %target, port, "connect: unknown node");
            return Ok(false);
        };

        let junction = target_module.input(port).ok_or_else(|| GraphError::PortNotFound {
            node: target,
            port: port.to_string(),
        })?;
        if !source_module.has_output() {
            return Err(GraphError::NoOutputPort(source));
        }

        let connection = Connection {
            source_node: source,
            target_node: target,
            target_port: port.to_string(),
        };
        if self.connections.contains(&connection) {
            debug!(%source, %target, port, "connect: already connected");
            return Ok(false);
        }

        if source == target || self.feeds_into(target, source) {
            warn!(%source, %target, port, "connect: rejected feedback cycle");
            return Err(GraphError::CycleDetected {
                from: source,
                to: target,
                port: port.to_string(),
            });
        }

        junction.add_source(source, &source_module.as_signal());
        self.connections.push(connection);
        debug!(%source, %target, port, "connected");
        Ok(true)
    }

    /// ケーブルを外す。接続されていなければ `Ok(false)`
    pub fn disconnect(&mut self, source: NodeId, target: NodeId, port: &str) -> Result<bool, GraphError> {
        let Some(target_module) = self.modules.get(&target) else {
            debug!(%source, %target, port, "disconnect: unknown node");
            return Ok(false);
        };
        let junction = target_module.input(port).ok_or_else(|| GraphError::PortNotFound {
            node: target,
            port: port.to_string(),
        })?;

        let before = self.connections.len();
        self.connections.retain(|conn| {
            !(conn.source_node == source && conn.target_node == target && conn.target_port == port)
        });
        let removed = junction.remove_source(source) || self.connections.len() != before;

        debug!(%source, %target, port, removed, "disconnect");
        Ok(removed)
    }

    /// パラメーターを設定し、クランプ後の値を返す。ノードが無ければ `None`
    pub fn set_parameter(&self, id: NodeId, name: &str, value: f32) -> Result<Option<f32>, GraphError> {
        let Some(module) = self.modules.get(&id) else {
            debug!(%id, name, "set_parameter: unknown node");
            return Ok(None);
        };
        let applied = module.parameters().set_parameter(name, value)?;
        trace!(%id, name, value, applied, "parameter set");
        Ok(Some(applied))
    }

    pub fn get_parameter(&self, id: NodeId, name: &str) -> Result<Option<f32>, GraphError> {
        match self.modules.get(&id) {
            Some(module) => Ok(Some(module.parameters().get_parameter(name)?)),
            None => Ok(None),
        }
    }

    pub fn module(&self, id: NodeId) -> Option<&Module> {
        self.modules.get(&id)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn node_info(&self, id: NodeId) -> Option<&NodeInfo> {
        self.modules.get(&id).map(Module::node_info)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Module> {
        self.modules.values().find(|module| module.node_info().name == name)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn oscillator(&self, id: NodeId) -> Option<Arc<OscillatorNode>> {
        match self.modules.get(&id) {
            Some(Module::Oscillator(node)) => Some(Arc::clone(node)),
            _ => None,
        }
    }

    pub fn envelope(&self, id: NodeId) -> Option<Arc<EnvelopeNode>> {
        match self.modules.get(&id) {
            Some(Module::Envelope(node)) => Some(Arc::clone(node)),
            _ => None,
        }
    }

    pub fn mixer(&self, id: NodeId) -> Option<Arc<MixerNode>> {
        match self.modules.get(&id) {
            Some(Module::Mixer(node)) => Some(Arc::clone(node)),
            _ => None,
        }
    }

    pub fn amplifier(&self, id: NodeId) -> Option<Arc<AmplifierNode>> {
        match self.modules.get(&id) {
            Some(Module::Amplifier(node)) => Some(Arc::clone(node)),
            _ => None,
        }
    }

    /// `from` の出力が（間接的に）`to` に届くか
    fn feeds_into(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];

        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            stack.extend(
                self.connections
                    .iter()
                    .filter(|conn| conn.source_node == node)
                    .map(|conn| conn.target_node),
            );
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::Waveform;
    use crate::processing::{ProcessContext, SignalNode};

    fn patch() -> Patch {
        let config = EngineConfig {
            parameter_ramp_seconds: 0.0,
            ..EngineConfig::default()
        };
        Patch::new(&config).unwrap()
    }

    fn render(patch: &Patch, count: usize) -> Vec<f32> {
        let ctx = ProcessContext::new(patch.config().sample_rate);
        let mut out = vec![0.0; count];
        patch.output().process(&mut out, &ctx);
        out
    }

    #[test]
    fn test_new_patch_has_output() {
        let patch = patch();
        assert_eq!(patch.len(), 1);
        let info = patch.node_info(patch.output_id()).unwrap();
        assert_eq!(info.node_type, "output");
        assert!(patch.find_by_name("AUDIO OUT").is_some());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            sample_rate: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(Patch::new(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_output_is_protected() {
        let mut patch = patch();
        let id = patch.output_id();
        assert_eq!(patch.remove_module(id), Err(GraphError::ProtectedNode(id)));
        assert_eq!(patch.len(), 1);
    }

    #[test]
    fn test_add_and_remove_module() {
        let mut patch = patch();
        let vco = patch.add_module(ModuleType::Oscillator);
        assert_eq!(patch.len(), 2);
        assert!(patch.oscillator(vco).is_some());
        assert_eq!(patch.module(vco).and_then(Module::module_type), Some(ModuleType::Oscillator));
        assert!(patch.mixer(vco).is_none());

        assert_eq!(patch.remove_module(vco), Ok(true));
        assert_eq!(patch.remove_module(vco), Ok(false));
        assert_eq!(patch.len(), 1);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut patch = patch();
        let vco = patch.add_module(ModuleType::Oscillator);
        let out = patch.output_id();

        assert_eq!(patch.connect(vco, out, "in"), Ok(true));
        assert_eq!(patch.connect(vco, out, "in"), Ok(false));
        assert_eq!(patch.connections().len(), 1);
        assert_eq!(patch.output().main_input().source_count(), 1);

        assert_eq!(patch.disconnect(vco, out, "in"), Ok(true));
        assert_eq!(patch.disconnect(vco, out, "in"), Ok(false));
        assert!(patch.connections().is_empty());
        assert!(!patch.output().main_input().is_connected());
    }

    #[test]
    fn test_connect_unknown_node_is_noop() {
        let mut patch = patch();
        let vco = patch.add_module(ModuleType::Oscillator);
        let ghost = uuid::Uuid::new_v4();

        assert_eq!(patch.connect(ghost, patch.output_id(), "in"), Ok(false));
        assert_eq!(patch.connect(vco, ghost, "in"), Ok(false));
        assert_eq!(patch.disconnect(vco, ghost, "in"), Ok(false));
    }

    #[test]
    fn test_connect_unknown_port() {
        let mut patch = patch();
        let vco = patch.add_module(ModuleType::Oscillator);
        let out = patch.output_id();
        assert!(matches!(
            patch.connect(vco, out, "in2"),
            Err(GraphError::PortNotFound { .. })
        ));

        // 出力ノードは接続元になれない
        let vca = patch.add_module(ModuleType::Amplifier);
        assert_eq!(patch.connect(out, vca, "audio"), Err(GraphError::NoOutputPort(out)));
    }

    #[test]
    fn test_cycles_are_rejected() {
        let mut patch = patch();
        let a = patch.add_module(ModuleType::Amplifier);
        let b = patch.add_module(ModuleType::Amplifier);
        let c = patch.add_module(ModuleType::Mixer);

        assert!(matches!(patch.connect(a, a, "audio"), Err(GraphError::CycleDetected { .. })));

        assert_eq!(patch.connect(a, b, "audio"), Ok(true));
        assert_eq!(patch.connect(b, c, "in1"), Ok(true));
        assert!(matches!(patch.connect(c, a, "cv"), Err(GraphError::CycleDetected { .. })));

        // 枝分かれ（ファンアウト）は循環ではない
        assert_eq!(patch.connect(a, c, "in2"), Ok(true));
    }

    #[test]
    fn test_remove_module_detaches_cables() {
        let mut patch = patch();
        let vco = patch.add_module(ModuleType::Oscillator);
        let mixer = patch.add_module(ModuleType::Mixer);
        let out = patch.output_id();
        patch.connect(vco, mixer, "in1").unwrap();
        patch.connect(mixer, out, "in").unwrap();

        assert_eq!(patch.remove_module(mixer), Ok(true));
        assert!(patch.connections().is_empty());
        assert!(!patch.output().main_input().is_connected());
        assert!(render(&patch, 32).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_set_parameter() {
        let patch = {
            let mut patch = patch();
            patch.add_module(ModuleType::Envelope);
            patch
        };
        let env = patch.modules().find(|m| m.module_type() == Some(ModuleType::Envelope)).unwrap().id();

        assert_eq!(patch.set_parameter(env, "sustain", 0.3), Ok(Some(0.3)));
        assert_eq!(patch.set_parameter(env, "attack", 99.0), Ok(Some(5.0)));
        assert_eq!(patch.get_parameter(env, "attack"), Ok(Some(5.0)));
        assert!(matches!(
            patch.set_parameter(env, "cutoff", 1.0),
            Err(GraphError::Parameter(_))
        ));
        assert_eq!(patch.set_parameter(uuid::Uuid::new_v4(), "attack", 1.0), Ok(None));
    }

    #[test]
    fn test_sine_to_output() {
        let mut patch = patch();
        let vco = patch.add_module(ModuleType::Oscillator);
        let out = patch.output_id();
        patch.connect(vco, out, "in").unwrap();
        patch.set_parameter(out, "volume", 1.0).unwrap();

        let samples = render(&patch, 100);
        for (k, sample) in samples.iter().enumerate() {
            let expected = (std::f32::consts::TAU * 440.0 * k as f32 / 44100.0).sin();
            assert!((sample - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn test_vco_vca_envelope_chain() {
        let mut patch = patch();
        let vco = patch.add_module(ModuleType::Oscillator);
        let vca = patch.add_module(ModuleType::Amplifier);
        let env = patch.add_module(ModuleType::Envelope);
        let out = patch.output_id();

        patch.oscillator(vco).unwrap().set_waveform(Waveform::Square);
        patch.connect(vco, vca, "audio").unwrap();
        patch.connect(env, vca, "cv").unwrap();
        patch.connect(vca, out, "in").unwrap();
        patch.set_parameter(out, "volume", 1.0).unwrap();

        // ゲートが閉じていればエンベロープは0なので無音
        assert!(render(&patch, 64).iter().all(|&s| s == 0.0));

        patch.envelope(env).unwrap().set_gate(true);
        let gated = render(&patch, 64);
        assert!(gated.iter().any(|&s| s != 0.0));
        assert!(gated.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_fan_out() {
        let mut patch = patch();
        let env = patch.add_module(ModuleType::Envelope);
        let mixer = patch.add_module(ModuleType::Mixer);
        let out = patch.output_id();
        patch.set_parameter(env, "attack", 0.0).unwrap();
        patch.set_parameter(env, "decay", 0.0).unwrap();
        patch.set_parameter(env, "sustain", 0.25).unwrap();
        patch.set_parameter(env, "gate", 1.0).unwrap();

        patch.connect(env, mixer, "in1").unwrap();
        patch.connect(env, mixer, "in2").unwrap();
        patch.connect(mixer, out, "in").unwrap();
        patch.set_parameter(out, "volume", 1.0).unwrap();

        let samples = render(&patch, 16);
        assert!(samples[4..].iter().all(|&s| s == 0.5));
    }
}
