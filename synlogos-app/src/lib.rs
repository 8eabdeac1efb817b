pub mod config;
pub mod logging;
pub mod render;
pub mod repl;

pub use config::{Config, ResolvedAgent};
pub use repl::Repl;
