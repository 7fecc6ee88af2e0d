//! Autorun rule engine: declarative rules matched against a hooked
//! browser's environment, composed into instruction chains on check-in.

pub mod engine;
pub mod loader;
pub mod matcher;
pub mod parser;
pub mod versions;
pub mod wrapper;

pub use engine::AutorunEngine;
pub use loader::{LoadResult, RuleLoader};
