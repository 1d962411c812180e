pub mod amplifier;
pub mod envelope;
pub mod junction;
pub mod mixer;
pub mod oscillator;
pub mod output;

pub use amplifier::{AmplifierNode, CvMode};
pub use envelope::{EnvelopeNode, EnvelopeState};
pub use junction::SummingJunction;
pub use mixer::{MixerNode, MIXER_CHANNELS};
pub use oscillator::{OscillatorNode, Waveform};
pub use output::TerminalOutputNode;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::parameters::Parameterizable;
use crate::processing::{NodeId, NodeInfo, SignalNode};

/// ユーザーが追加できるモジュールの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleType {
    Oscillator,
    Envelope,
    Mixer,
    Amplifier,
}

impl ModuleType {
    pub const ALL: [ModuleType; 4] = [
        ModuleType::Oscillator,
        ModuleType::Envelope,
        ModuleType::Mixer,
        ModuleType::Amplifier,
    ];

    /// パネル表示名
    pub fn display_name(self) -> &'static str {
        match self {
            ModuleType::Oscillator => "VCO",
            ModuleType::Envelope => "ADSR",
            ModuleType::Mixer => "Mixer 4CH",
            ModuleType::Amplifier => "VCA",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oscillator" | "vco" | "osc" => Ok(ModuleType::Oscillator),
            "envelope" | "adsr" | "env" => Ok(ModuleType::Envelope),
            "mixer" | "mix" => Ok(ModuleType::Mixer),
            "amplifier" | "vca" | "amp" => Ok(ModuleType::Amplifier),
            other => Err(format!("Unknown module type: {}", other)),
        }
    }
}

/// パッチ上のモジュール（固定されたノードの集合）
#[derive(Clone)]
pub enum Module {
    Oscillator(Arc<OscillatorNode>),
    Envelope(Arc<EnvelopeNode>),
    Mixer(Arc<MixerNode>),
    Amplifier(Arc<AmplifierNode>),
    Output(Arc<TerminalOutputNode>),
}

impl Module {
    pub fn node_info(&self) -> &NodeInfo {
        match self {
            Module::Oscillator(node) => node.node_info(),
            Module::Envelope(node) => node.node_info(),
            Module::Mixer(node) => node.node_info(),
            Module::Amplifier(node) => node.node_info(),
            Module::Output(node) => node.node_info(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.node_info().id
    }

    /// 追加可能なモジュールなら種類を返す（出力ノードは `None`）
    pub fn module_type(&self) -> Option<ModuleType> {
        match self {
            Module::Oscillator(_) => Some(ModuleType::Oscillator),
            Module::Envelope(_) => Some(ModuleType::Envelope),
            Module::Mixer(_) => Some(ModuleType::Mixer),
            Module::Amplifier(_) => Some(ModuleType::Amplifier),
            Module::Output(_) => None,
        }
    }

    /// 入力ポート名からジャンクションを取得
    pub fn input(&self, port: &str) -> Option<&SummingJunction> {
        match self {
            Module::Oscillator(_) | Module::Envelope(_) => None,
            Module::Mixer(node) => node.input(port),
            Module::Amplifier(node) => node.input(port),
            Module::Output(node) => node.input(port),
        }
    }

    /// 他のモジュールの入力に接続できる出力を持つか
    pub fn has_output(&self) -> bool {
        !self.node_info().output_ports.is_empty()
    }

    pub fn as_signal(&self) -> Arc<dyn SignalNode> {
        match self {
            Module::Oscillator(node) => node.clone(),
            Module::Envelope(node) => node.clone(),
            Module::Mixer(node) => node.clone(),
            Module::Amplifier(node) => node.clone(),
            Module::Output(node) => node.clone(),
        }
    }

    pub fn parameters(&self) -> &dyn Parameterizable {
        match self {
            Module::Oscillator(node) => node.as_ref(),
            Module::Envelope(node) => node.as_ref(),
            Module::Mixer(node) => node.as_ref(),
            Module::Amplifier(node) => node.as_ref(),
            Module::Output(node) => node.as_ref(),
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.node_info();
        f.debug_struct("Module")
            .field("id", &info.id)
            .field("type", &info.node_type)
            .field("name", &info.name)
            .finish()
    }
}

/// モジュールファクトリー
pub fn create_module(module_type: ModuleType, config: &EngineConfig) -> Module {
    let name = module_type.display_name().to_string();
    match module_type {
        ModuleType::Oscillator => Module::Oscillator(Arc::new(OscillatorNode::new(name, config))),
        ModuleType::Envelope => Module::Envelope(Arc::new(EnvelopeNode::new(name, config))),
        ModuleType::Mixer => Module::Mixer(Arc::new(MixerNode::new(name, config))),
        ModuleType::Amplifier => Module::Amplifier(Arc::new(AmplifierNode::new(name, config))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_all_module_types() {
        let config = EngineConfig::default();
        for module_type in ModuleType::ALL {
            let module = create_module(module_type, &config);
            assert_eq!(module.module_type(), Some(module_type));
            assert_eq!(module.node_info().name, module_type.display_name());
            assert!(module.has_output());
            assert!(!module.parameters().get_all_parameters().is_empty());
        }
    }

    #[test]
    fn test_module_inputs() {
        let config = EngineConfig::default();
        let mixer = create_module(ModuleType::Mixer, &config);
        assert!(mixer.input("in1").is_some());
        assert!(mixer.input("audio").is_none());

        let vca = create_module(ModuleType::Amplifier, &config);
        assert!(vca.input("audio").is_some());
        assert!(vca.input("cv").is_some());

        let vco = create_module(ModuleType::Oscillator, &config);
        assert!(vco.input("in").is_none());
    }

    #[test]
    fn test_module_type_parsing() {
        assert_eq!("VCO".parse::<ModuleType>(), Ok(ModuleType::Oscillator));
        assert_eq!("adsr".parse::<ModuleType>(), Ok(ModuleType::Envelope));
        assert_eq!("vca".parse::<ModuleType>(), Ok(ModuleType::Amplifier));
        assert!("filter".parse::<ModuleType>().is_err());
        assert_eq!(ModuleType::Mixer.to_string(), "Mixer 4CH");
    }
}
