use crate::core::LOCAL_DEVICE_ID;
use crate::supervisor::BuildOptions;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Build a project from the command line
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ide-build",
    version,
    about = "Build a project from the command line",
    long_about = "Discovers the build system of a project, waits for the target device to \
                  become available and runs the build, streaming the build tool's output.\n\n\
                  Examples:\n  \
                  ide-build\n  \
                  ide-build --rebuild /path/to/project\n  \
                  ide-build --device local --runtime podman:3f2a9c"
)]
pub struct CliArgs {
    #[arg(
        value_name = "PROJECT_PATH",
        default_value = ".",
        help = "Path to the project (defaults to current directory)"
    )]
    pub project_path: PathBuf,

    #[arg(
        short = 'd',
        long,
        value_name = "DEVICE_ID",
        default_value = LOCAL_DEVICE_ID,
        help = "The device to build for"
    )]
    pub device: String,

    #[arg(short = 'r', long, help = "Clean before building")]
    pub rebuild: bool,

    #[arg(long, value_name = "RUNTIME_ID", help = "Override the configured runtime")]
    pub runtime: Option<String>,

    #[arg(long, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    pub fn build_options(&self, settle_timeout: Duration) -> BuildOptions {
        BuildOptions {
            project_path: self.project_path.clone(),
            device_id: self.device.clone(),
            rebuild: self.rebuild,
            runtime_id: self.runtime.clone(),
            settle_timeout,
        }
    }
}
