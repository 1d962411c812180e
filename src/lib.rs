pub mod audio;
pub mod config;
pub mod errors;
pub mod graph;
pub mod nodes;
pub mod parameters;
pub mod processing;

pub use audio::{AudioEngine, Renderer, RenderStats, StatsSnapshot};
pub use config::EngineConfig;
pub use errors::{ConfigError, EngineError, EngineResult, GraphError};
pub use graph::{Connection, Patch, PortType};
pub use nodes::{create_module, Module, ModuleType, SummingJunction};
pub use parameters::{AtomicParam, ParameterError, ParameterRamp, Parameterizable};
pub use processing::{NodeCategory, NodeId, NodeInfo, PortInfo, ProcessContext, SignalNode};
