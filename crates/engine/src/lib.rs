//! Hooked-browser control core: session registry, command queue, autorun
//! rule engine and the bootstrap payloads that tie an agent to them.

pub mod autorun;
pub mod bootstrap;
pub mod queue;
pub mod registry;

pub use autorun::{AutorunEngine, LoadResult, RuleLoader};
pub use queue::CommandQueue;
pub use registry::SessionRegistry;
