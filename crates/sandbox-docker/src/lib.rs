mod config;
mod engine;
mod host;

pub use config::DockerConfig;
pub use engine::DockerEngine;
pub use host::{container_config, host_config};
