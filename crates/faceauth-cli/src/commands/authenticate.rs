use std::any::Any;
use std::process::ExitCode;

use faceauth_core::faces::AuthenticationOutcome;

use crate::cli::{AuthenticateArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::config::ConfigSource;
use crate::errors::{AppError, AppResult};
use crate::operations;
use crate::output::{authenticate_error_payload, render_authenticate};

/// Exit status for a completed comparison that did not match.
pub const REJECTED_EXIT_CODE: u8 = 3;

type RunAuthenticate =
    dyn Fn(&AuthenticateArgs, &ConfigSource) -> AppResult<AuthenticationOutcome> + Send + Sync;

pub struct AuthenticateHandler {
    args: AuthenticateArgs,
    config: ConfigSource,
    run: Box<RunAuthenticate>,
    render: Box<dyn Fn(&AuthenticationOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl AuthenticateHandler {
    pub fn new(args: AuthenticateArgs, config: ConfigSource) -> Self {
        Self::with_dependencies(args, config, operations::run_authenticate, render_authenticate)
    }

    pub fn with_dependencies(
        args: AuthenticateArgs,
        config: ConfigSource,
        run: impl Fn(&AuthenticateArgs, &ConfigSource) -> AppResult<AuthenticationOutcome>
            + Send
            + Sync
            + 'static,
        render: impl Fn(&AuthenticationOutcome, OutputMode, bool) -> AppResult<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            args,
            config,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for AuthenticateHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args, &self.config)?;
        (self.render)(&outcome, mode, verbose)?;
        let exit = if outcome.accepted() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(REJECTED_EXIT_CODE)
        };
        Ok(exit)
    }

    fn failure_payload(&self, err: &AppError) -> serde_json::Value {
        authenticate_error_payload(err)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
