//! In-process repository implementations.

mod artifact;
mod delivery_config;
mod resource;
mod support;

pub use artifact::InMemoryArtifactRepository;
pub use delivery_config::InMemoryDeliveryConfigRepository;
pub use resource::InMemoryResourceRepository;
pub use support::{
    InMemoryAgentLockRepository, InMemoryDiffFingerprintRepository, InMemoryPausedRepository,
    InMemoryUnhappyVetoRepository,
};
