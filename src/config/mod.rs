pub mod env;
mod loader;

pub use env::{AppConfig, DirectoryConfig, PerspectiveConfig, PipelineConfig};
pub use loader::load_config;
