use std::any::Any;
use std::process::ExitCode;

use crate::cli::OutputMode;
use crate::commands::CommandHandler;
use crate::config::ConfigSource;
use crate::doctor::{self, DoctorOutcome};
use crate::errors::AppResult;
use crate::output::render_doctor;

type RunDoctor = dyn Fn(&ConfigSource) -> AppResult<DoctorOutcome> + Send + Sync;

pub struct DoctorHandler {
    config: ConfigSource,
    run: Box<RunDoctor>,
    render: Box<dyn Fn(&DoctorOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl DoctorHandler {
    pub fn new(config: ConfigSource) -> Self {
        Self::with_dependencies(
            config,
            |config: &ConfigSource| doctor::run_doctor(config.explicit()),
            render_doctor,
        )
    }

    pub fn with_dependencies(
        config: ConfigSource,
        run: impl Fn(&ConfigSource) -> AppResult<DoctorOutcome> + Send + Sync + 'static,
        render: impl Fn(&DoctorOutcome, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for DoctorHandler {
    /// Warnings still exit 0; any failed check exits 1.
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.config)?;
        (self.render)(&outcome, mode)?;
        Ok(if outcome.ok {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
