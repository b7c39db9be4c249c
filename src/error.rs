use crate::config::ConfigError;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FoundryError {
    #[error("Failed to load project at {}: {reason}", path.display())]
    ProjectOpen { path: PathBuf, reason: String },

    #[error("Timed out while waiting for devices to settle.")]
    DeviceTimeout,

    #[error("No build system could be discovered for {}", .0.display())]
    DiscoveryNotSupported(PathBuf),

    #[error("Build system \"{0}\" is not available")]
    BuildSystemNotFound(String),

    #[error("{0}")]
    BuilderConstruction(String),

    #[error("Failed to locate provider for runtime: {0}")]
    RuntimeNotSupported(String),

    #[error("Runtime \"{0}\" is not available")]
    RuntimeNotFound(String),

    #[error("Failed to spawn {program}: {source}")]
    SubprocessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` {status}")]
    SubprocessExit { command: String, status: String },

    #[error("Malformed output from {program}: {reason}")]
    MalformedOutput { program: String, reason: String },

    #[error("{program} does not support {flag}")]
    UnsupportedProvider { program: String, flag: String },

    #[error("Runtime provider {0} is already loading")]
    ProviderBusy(String),

    #[error("A build is already in progress for device {0}")]
    BuildInProgress(String),

    #[error("Unknown build job {0}")]
    UnknownJob(Uuid),

    #[error("The builder exited without reporting a result")]
    BuildAbandoned,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, FoundryError>;

impl FoundryError {
    pub fn subprocess_exit(command: impl Into<String>, status: ExitStatus) -> Self {
        FoundryError::SubprocessExit {
            command: command.into(),
            status: describe_status(status),
        }
    }

    /// Whether a subprocess could not start because its program does not exist.
    pub fn is_missing_program(&self) -> bool {
        matches!(
            self,
            FoundryError::SubprocessSpawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FoundryError::Io {
            context: context.into(),
            source,
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with status {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("was terminated by signal {}", signal);
        }
    }

    "exited abnormally".to_string()
}
