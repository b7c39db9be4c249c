pub mod build_system;
pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod detection;
pub mod device;
pub mod error;
pub mod execution;
pub mod jobs;
pub mod logging;
pub mod podman;
pub mod runtime;
pub mod supervisor;

pub use crate::build_system::{BuildSystem, BuildSystemRegistry};
pub use crate::detection::DiscoveryCoordinator;
pub use crate::device::DeviceManager;
pub use crate::error::{FoundryError, Result};
pub use crate::runtime::{Runtime, RuntimeManager, RuntimeProvider, RuntimeRegistry};
pub use crate::supervisor::{BuildOptions, Console, Supervisor};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
