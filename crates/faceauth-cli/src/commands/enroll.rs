use std::any::Any;
use std::process::ExitCode;

use faceauth_core::faces::EnrollmentOutcome;

use crate::cli::{EnrollArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::config::ConfigSource;
use crate::errors::{AppError, AppResult};
use crate::operations;
use crate::output::{enroll_error_payload, render_enroll};

type RunEnroll = dyn Fn(&EnrollArgs, &ConfigSource) -> AppResult<EnrollmentOutcome> + Send + Sync;

pub struct EnrollHandler {
    args: EnrollArgs,
    config: ConfigSource,
    run: Box<RunEnroll>,
    render: Box<dyn Fn(&EnrollmentOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl EnrollHandler {
    pub fn new(args: EnrollArgs, config: ConfigSource) -> Self {
        Self::with_dependencies(args, config, operations::run_enroll, render_enroll)
    }

    pub fn with_dependencies(
        args: EnrollArgs,
        config: ConfigSource,
        run: impl Fn(&EnrollArgs, &ConfigSource) -> AppResult<EnrollmentOutcome>
            + Send
            + Sync
            + 'static,
        render: impl Fn(&EnrollmentOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            config,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for EnrollHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args, &self.config)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn failure_payload(&self, err: &AppError) -> serde_json::Value {
        enroll_error_payload(err)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
