//! Domain-agnostic core types shared by every other `recon-*` crate: the
//! event model, the scan target and its scope rules, module descriptors, the
//! error taxonomy, and environment-driven configuration.

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod module;
pub mod target;
pub mod type_registry;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use event::{Event, EventBuilder, ParentRef, ROOT_SENTINEL};
pub use metrics::{MetricsCollector, ModuleMetrics};
pub use module::{ModuleDescriptor, CONSUMES_ALL};
pub use target::{Alias, Target, TargetType};
pub use type_registry::{TypeClassification, TypeRegistry};
