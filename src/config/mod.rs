//! Configuration loading for the Host and Runner binaries

mod common;
mod host;
mod runner;

pub use common::{ApiConfiguration, DockerConfiguration, HeartbeatConfiguration, SharedStorageConfiguration};
pub use host::{HostConfiguration, ProxyConfiguration};
pub use runner::{RegistrationConfiguration, RunnerConfiguration};
