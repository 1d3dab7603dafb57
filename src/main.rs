use std::{panic, process::ExitCode};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info, LevelFilter};

use diskplan::{
    cli::Cli,
    commands,
    logging::{FileLog, MultiLogger},
};
use diskplan_api::error::{DiskPlanError, DiskPlanResultExt, InternalError};

fn setup_logging(args: &Cli) -> Result<(), Error> {
    let mut multilogger = MultiLogger::new().with_logger(
        Box::new(
            env_logger::builder()
                .format_timestamp(None)
                .filter_level(args.verbosity)
                .build(),
        ),
        args.verbosity,
    );

    if let Some(path) = &args.log_file {
        let file_log = FileLog::create(path)
            .with_context(|| format!("Failed to create log file '{}'", path.display()))?;
        multilogger.add_logger(file_log.into_logger(), LevelFilter::Trace);
    }

    multilogger.init().context("Logger already registered")
}

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    info!("diskplan version: {}", diskplan::DISKPLAN_VERSION);

    let result = match panic::catch_unwind(|| commands::run(&args.command)) {
        Ok(result) => result,
        Err(e) => Err(DiskPlanError::new(InternalError::Internal(format!(
            "panicked: {e:?}"
        )))),
    };

    if let Err(e) = result.message(format!("Failed to execute '{}' command", args.command)) {
        error!("diskplan failed: {e:?}");
        log::logger().flush();
        return ExitCode::from(2);
    }

    log::logger().flush();
    ExitCode::SUCCESS
}
