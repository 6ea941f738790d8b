use std::any::Any;
use std::process::ExitCode;

use serde_json::Value;

use crate::cli::{Commands, OutputMode};
use crate::config::ConfigSource;
use crate::errors::{AppError, AppResult};
use crate::output;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;

    /// JSON rendered when `execute` fails.
    fn failure_payload(&self, err: &AppError) -> Value {
        output::error_payload(err)
    }

    fn as_any(&self) -> &dyn Any;
}

mod authenticate;
mod doctor;
mod enroll;
mod photo;

pub use authenticate::{AuthenticateHandler, REJECTED_EXIT_CODE};
pub use doctor::DoctorHandler;
pub use enroll::EnrollHandler;
pub use photo::PhotoHandler;

/// A subcommand together with the global `--config` choice.
pub struct Invocation {
    pub command: Commands,
    pub config: ConfigSource,
}

impl From<Commands> for Invocation {
    fn from(command: Commands) -> Self {
        Self {
            command,
            config: ConfigSource::default(),
        }
    }
}

impl From<Invocation> for Box<dyn CommandHandler> {
    fn from(invocation: Invocation) -> Self {
        let config = invocation.config;
        match invocation.command {
            Commands::Enroll(args) => Box::new(EnrollHandler::new(args, config)),
            Commands::Authenticate(args) => Box::new(AuthenticateHandler::new(args, config)),
            Commands::Photo(args) => Box::new(PhotoHandler::new(args, config)),
            Commands::Doctor => Box::new(DoctorHandler::new(config)),
        }
    }
}
