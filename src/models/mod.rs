//! Domain models shared across the store, services, and API layers.

pub mod artifact;
pub mod deployment;
pub mod readme;
pub mod registry;

pub use artifact::{
    ArtifactDescriptor, ArtifactKind, ArtifactStatus, Argument, EnvironmentVariable, Header,
    Icon, OfficialMeta, Package, Remote, Repository, StoredVersion, Transport, SOURCE_META_KEY,
};
pub use deployment::{partition_config, DeployableKind, Deployment, PartitionedConfig};
pub use readme::Readme;
pub use registry::ImportRegistry;
