pub mod archive;
pub mod command;
pub mod docker;
pub mod locker;

// Trait-based abstractions for testability
pub mod docker_ops;
pub mod executor;

// Re-export commonly used types and traits (used by test crate)
#[allow(unused_imports)]
pub use archive::{Archiver, TarArchiver};
#[allow(unused_imports)]
pub use docker_ops::{ContainerRuntime, RealDockerOps};
#[allow(unused_imports)]
pub use executor::{CommandExecutor, RealExecutor};
