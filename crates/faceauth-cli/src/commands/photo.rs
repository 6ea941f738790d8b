use std::any::Any;
use std::process::ExitCode;

use crate::cli::{OutputMode, PhotoArgs};
use crate::commands::CommandHandler;
use crate::config::ConfigSource;
use crate::errors::AppResult;
use crate::operations::{self, PhotoExport};
use crate::output::render_photo;

pub struct PhotoHandler {
    args: PhotoArgs,
    config: ConfigSource,
    run: Box<dyn Fn(&PhotoArgs, &ConfigSource) -> AppResult<PhotoExport> + Send + Sync>,
    render: Box<dyn Fn(&PhotoExport, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl PhotoHandler {
    pub fn new(args: PhotoArgs, config: ConfigSource) -> Self {
        Self::with_dependencies(args, config, operations::run_photo_export, render_photo)
    }

    pub fn with_dependencies(
        args: PhotoArgs,
        config: ConfigSource,
        run: impl Fn(&PhotoArgs, &ConfigSource) -> AppResult<PhotoExport> + Send + Sync + 'static,
        render: impl Fn(&PhotoExport, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            config,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for PhotoHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let export = (self.run)(&self.args, &self.config)?;
        (self.render)(&export, mode)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
