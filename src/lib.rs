pub mod checks;
pub mod cli;
pub mod data;
pub mod errors;
pub mod fields;
pub mod icd;
pub mod io_utils;
pub mod ranges;
pub mod report;
pub mod tokenizer;

use std::{cell::RefCell, env, rc::Rc, sync::OnceLock, time::Instant};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use log::{LevelFilter, error, info};

use crate::{
    cli::Cli,
    icd::{Icd, LogListener, output_delimiter},
    report::{SplitListener, SplitWriter, SummaryListener, ValidationSummary},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("icd_check", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

/// Runs the CLI. `Ok(true)` means every data row of every input was
/// accepted and all checks passed.
pub fn run() -> Result<bool> {
    init_logging();
    let cli = Cli::parse();
    run_operation("validate", || execute(&cli))
}

fn run_operation<T, F>(name: &str, op: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let start_clock = Utc::now();
    let start_instant = Instant::now();
    let result = op();
    let end_clock = Utc::now();
    let duration_secs = start_instant.elapsed().as_secs_f64();
    let start_str = start_clock.to_rfc3339_opts(SecondsFormat::Millis, true);
    let end_str = end_clock.to_rfc3339_opts(SecondsFormat::Millis, true);

    match &result {
        Ok(_) => info!(
            "Operation '{name}' completed (status=ok)\nstart: {start_str}\nend: {end_str}\nduration_secs: {duration_secs:.3}"
        ),
        Err(err) => error!(
            "Operation '{name}' failed (status=error)\nstart: {start_str}\nend: {end_str}\nduration_secs: {duration_secs:.3}\nerror: {err:?}"
        ),
    }

    result
}

fn execute(cli: &Cli) -> Result<bool> {
    let mut icd = Icd::new();
    let reader = io_utils::open_input(&cli.icd)?;
    icd.load(reader)
        .with_context(|| format!("Loading ICD from {:?}", cli.icd))?;
    if cli.data.is_empty() {
        info!("ICD {:?} is well-formed", cli.icd);
        return Ok(true);
    }

    let mut all_accepted = true;
    for (index, data_path) in cli.data.iter().enumerate() {
        if index > 0 {
            icd.reset();
        }
        icd.clear_listeners();
        icd.add_listener(Box::new(LogListener));
        let summary = Rc::new(RefCell::new(ValidationSummary::default()));
        icd.add_listener(Box::new(SummaryListener::new(Rc::clone(&summary))));
        let split_writer = if cli.split {
            let delimiter = icd.data_format().map(output_delimiter).unwrap_or(b',');
            let writer = Rc::new(RefCell::new(SplitWriter::create(data_path, delimiter)?));
            icd.add_listener(Box::new(SplitListener::new(Rc::clone(&writer))));
            Some(writer)
        } else {
            None
        };

        let reader = io_utils::open_input(data_path)?;
        icd.validate(reader)
            .with_context(|| format!("Validating {data_path:?}"))?;

        if let Some(writer) = split_writer {
            let mut writer = writer.borrow_mut();
            writer.finish()?;
            info!(
                "wrote {:?} and {:?}",
                writer.accepted_path(),
                writer.rejected_path()
            );
        }

        let summary = summary.borrow();
        info!(
            "{data_path:?}: {} data row(s), {} accepted, {} rejected, {} check failure(s) at end",
            summary.data_rows, summary.accepted, summary.rejected, summary.checks_failed_at_end
        );
        if cli.summary {
            println!("{}", serde_json::to_string(&*summary)?);
        }
        if !summary.all_accepted() {
            all_accepted = false;
        }
    }
    Ok(all_accepted)
}
