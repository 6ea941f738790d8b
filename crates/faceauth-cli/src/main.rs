use std::process::ExitCode;

use clap::Parser;
use faceauth_cli::cli::Cli;
use faceauth_cli::commands::{CommandHandler, Invocation};
use faceauth_cli::config::ConfigSource;
use faceauth_cli::output::render_error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mode = cli.output_mode();
    init_tracing(cli.verbose);

    let handler: Box<dyn CommandHandler> = Invocation {
        command: cli.command,
        config: ConfigSource::new(cli.config),
    }
    .into();

    match handler.execute(mode, cli.verbose > 0) {
        Ok(code) => code,
        Err(err) => {
            render_error(&err, mode, &handler.failure_payload(&err));
            err.exit_code()
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(fmt_layer);
    if tracing::subscriber::set_global_default(registry).is_err() {
        // Already initialised (tests).
    }
}
