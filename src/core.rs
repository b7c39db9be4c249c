use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Id of the device that represents the machine running the build.
pub const LOCAL_DEVICE_ID: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Local,
    Remote,
}

/// A deployment/build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub display_name: String,
    pub system_type: String,
    pub kind: DeviceKind,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        system_type: impl Into<String>,
        kind: DeviceKind,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            system_type: system_type.into(),
            kind,
        }
    }

    /// The device for the machine we are running on.
    pub fn local() -> Self {
        Self::new(
            LOCAL_DEVICE_ID,
            "My Computer",
            host_system_type(),
            DeviceKind::Local,
        )
    }
}

pub fn host_system_type() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// A build-system candidate offered by one discovery backend.
///
/// Lower priorities win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryVote {
    pub build_system_id: String,
    pub priority: i32,
}

impl DiscoveryVote {
    pub fn new(build_system_id: impl Into<String>, priority: i32) -> Self {
        Self {
            build_system_id: build_system_id.into(),
            priority,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildPhase {
    Prebuild,
    Clean,
    Configure,
    Build,
    Postbuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VcsKind {
    Git,
    Directory,
}

impl VcsKind {
    pub fn detect(root: &Path) -> Self {
        if root.join(".git").exists() {
            VcsKind::Git
        } else {
            VcsKind::Directory
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::Directory => "directory",
        }
    }
}

/// Final report of one build attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub build_id: Uuid,
    pub build_system: String,
    pub device_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub elapsed_usec: u64,
    pub completed_at: DateTime<Utc>,
}

impl BuildOutcome {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_usec as f64 / 1_000_000.0
    }
}
