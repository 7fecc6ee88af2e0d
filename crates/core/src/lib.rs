pub mod config;
pub mod constants;
pub mod error;
pub mod filters;
pub mod paths;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
