use clap::Parser;
use ide_build::cli::CliArgs;
use ide_build::config::FoundryConfig;
use ide_build::logging::{init_logging, parse_level, LoggingConfig};
use ide_build::podman::PodmanRuntimeProvider;
use ide_build::{Supervisor, VERSION};
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let config = match FoundryConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(LoggingConfig {
        use_json: config.log_json,
        ..LoggingConfig::with_level(parse_level(level))
    });

    debug!("ide-build v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let mut supervisor = Supervisor::new(args.build_options(config.settle_timeout));
    if let Some(program) = config.podman_program {
        supervisor = supervisor.with_provider(Box::new(PodmanRuntimeProvider::new(program)));
    }

    let exit_code = supervisor.run().await;
    std::process::exit(exit_code);
}
