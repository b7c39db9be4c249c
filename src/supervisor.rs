//! Single-shot build supervisor behind the `ide-build` command.
//!
//! The supervisor opens the project, waits for the requested device, runs the
//! build while draining both output streams on dedicated threads, and prints
//! a summary once every line of child output has been written.

use crate::build_system::BuildSystemRegistry;
use crate::context::ProjectContext;
use crate::core::{BuildOutcome, Device, LOCAL_DEVICE_ID};
use crate::detection::DiscoveryCoordinator;
use crate::device::{wait_for_device, DeviceManager};
use crate::error::{FoundryError, Result};
use crate::execution::{shared_writer, LogStream, SharedWriter};
use crate::jobs::JobManager;
use crate::runtime::{RuntimeManager, RuntimeProvider};
use chrono::Utc;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const BANNER_RULE: &str = "========================================";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Init,
    AwaitingContext,
    AwaitingDevice,
    TimedOut,
    Building,
    Draining,
    Done { success: bool },
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub project_path: PathBuf,
    pub device_id: String,
    pub rebuild: bool,
    /// Overrides the runtime of the active build configuration.
    pub runtime_id: Option<String>,
    pub settle_timeout: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            project_path: PathBuf::from("."),
            device_id: LOCAL_DEVICE_ID.to_string(),
            rebuild: false,
            runtime_id: None,
            settle_timeout: Duration::from_secs(60),
        }
    }
}

/// Where build output and status messages go.
#[derive(Clone)]
pub struct Console {
    pub stdout: SharedWriter,
    pub stderr: SharedWriter,
}

impl Console {
    pub fn new(stdout: SharedWriter, stderr: SharedWriter) -> Self {
        Self { stdout, stderr }
    }

    pub fn stdio() -> Self {
        Self::new(shared_writer(io::stdout()), shared_writer(io::stderr()))
    }

    fn message(&self, text: &str) {
        let mut err = self.stderr.lock();
        // Nowhere left to report a failing stderr.
        let _ = writeln!(err, "{}", text).and_then(|_| err.flush());
    }
}

pub struct Supervisor {
    options: BuildOptions,
    discovery: DiscoveryCoordinator,
    build_systems: BuildSystemRegistry,
    devices: DeviceManager,
    providers: Vec<Box<dyn RuntimeProvider>>,
    jobs: JobManager,
    console: Console,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            discovery: DiscoveryCoordinator::default(),
            build_systems: BuildSystemRegistry::with_defaults(),
            devices: DeviceManager::new(),
            providers: Vec::new(),
            jobs: JobManager::new(),
            console: Console::stdio(),
            state: SupervisorState::Init,
        }
    }

    pub fn with_discovery(mut self, discovery: DiscoveryCoordinator) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_build_systems(mut self, build_systems: BuildSystemRegistry) -> Self {
        self.build_systems = build_systems;
        self
    }

    pub fn with_devices(mut self, devices: DeviceManager) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_provider(mut self, provider: Box<dyn RuntimeProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_jobs(mut self, jobs: JobManager) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Runs one build and returns the process exit code.
    pub async fn run(&mut self) -> i32 {
        let mut runtimes = RuntimeManager::new(std::mem::take(&mut self.providers)).await;

        let code = match self.execute(&runtimes).await {
            Ok(outcome) if outcome.success => 0,
            Ok(_) => 1,
            Err(e) => {
                debug!(error = %e, "build supervisor failed");
                self.console.message(&e.to_string());
                1
            }
        };

        self.quit(&mut runtimes, code).await
    }

    async fn quit(&mut self, runtimes: &mut RuntimeManager, code: i32) -> i32 {
        runtimes.shutdown().await;
        self.transition(SupervisorState::Done { success: code == 0 });
        code
    }

    fn transition(&mut self, state: SupervisorState) {
        debug!(from = ?self.state, to = ?state, "supervisor state");
        self.state = state;
    }

    async fn execute(&mut self, runtimes: &RuntimeManager) -> Result<BuildOutcome> {
        self.transition(SupervisorState::AwaitingContext);
        let context = ProjectContext::open(
            &self.options.project_path,
            &self.discovery,
            &self.build_systems,
            self.devices.clone(),
        )
        .await?;

        self.transition(SupervisorState::AwaitingDevice);
        let device = match wait_for_device(
            context.device_manager(),
            &self.options.device_id,
            self.options.settle_timeout,
        )
        .await
        {
            Ok(device) => device,
            Err(e) => {
                if matches!(e, FoundryError::DeviceTimeout) {
                    self.transition(SupervisorState::TimedOut);
                }
                return Err(e);
            }
        };

        self.transition(SupervisorState::Building);
        self.print_build_info(&context, &device);

        let mut config = context.project_config().active_configuration(context.root());
        config.rebuild = self.options.rebuild;
        if let Some(runtime_id) = &self.options.runtime_id {
            config.runtime_id = runtime_id.clone();
        }

        let runtime = runtimes.ensure(&config.runtime_id)?;
        let builder = context
            .build_system()
            .get_builder(context.root(), &config, &device, &runtime)?;

        let job_id = self.jobs.begin(&device.id, context.build_system_kind())?;
        let build_id = builder.build_id;
        let started = Instant::now();

        let mut running = match builder.start() {
            Ok(running) => running,
            Err(e) => {
                let _ = self.jobs.fail(&job_id, e.to_string());
                return Err(e);
            }
        };

        self.transition(SupervisorState::Draining);
        let drains = [
            running.take_stdout().map(|s| spawn_drain(s, self.console.stdout.clone())),
            running.take_stderr().map(|s| spawn_drain(s, self.console.stderr.clone())),
        ];

        let result = running.wait().await;
        let elapsed = started.elapsed();

        for drain in drains.into_iter().flatten() {
            match drain.join() {
                Ok(Ok(lines)) => debug!(lines, "output drained"),
                Ok(Err(e)) => warn!(error = %e, "failed to write build output"),
                Err(_) => warn!("output drain thread panicked"),
            }
        }

        let outcome = BuildOutcome {
            build_id,
            build_system: context.build_system_kind().to_string(),
            device_id: device.id.clone(),
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
            elapsed_usec: elapsed.as_micros() as u64,
            completed_at: Utc::now(),
        };

        let recorded = match &outcome.error {
            None => self.jobs.complete(&job_id),
            Some(message) => self.jobs.fail(&job_id, message.clone()),
        };
        if let Err(e) = recorded {
            warn!(error = %e, "failed to record build result");
        }

        self.print_summary(&outcome);
        Ok(outcome)
    }

    fn print_build_info(&self, context: &ProjectContext, device: &Device) {
        let banner = [
            BANNER_RULE.to_string(),
            format!("           Project Name: {}", context.project_name()),
            format!("        Version Control: {}", context.vcs_kind().as_str()),
            format!("           Build System: {}", context.build_system_kind()),
            format!("    Build Date and Time: {}", Utc::now().to_rfc3339()),
            format!("    Building for Device: {} ({})", device.id, device.system_type),
            BANNER_RULE.to_string(),
        ];
        self.console.message(&banner.join("\n"));
    }

    fn print_summary(&self, outcome: &BuildOutcome) {
        let status = match &outcome.error {
            None => "Build Successful".to_string(),
            Some(message) => format!("Build Failure: {}", message),
        };
        self.console.message(&format!(
            "{}\n{}\nBuild ran for: {:.2} seconds\n{}",
            BANNER_RULE,
            status,
            outcome.elapsed_secs(),
            BANNER_RULE
        ));
    }
}

fn spawn_drain(stream: LogStream, writer: SharedWriter) -> JoinHandle<io::Result<usize>> {
    thread::spawn(move || stream.drain_into(writer))
}
