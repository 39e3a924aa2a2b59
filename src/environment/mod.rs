//! Environment artifact registry/sync and the two execution backends

pub mod docker;
pub mod registry;
pub mod scoped;
pub mod sync;
pub mod traits;

pub use docker::{connect as connect_docker, ContainerBackend};
pub use registry::{ArtifactVersion, EnvironmentRegistry, RegistryError};
pub use scoped::ScopedProcessBackend;
pub use sync::{EnvironmentSync, SyncError};
pub use traits::{BackendError, BackendResult, BackendStatus, LaunchSpec, ProcessBackend};
