//! Reporting listeners: validation summaries and accepted/rejected
//! sidecar files.
//!
//! Listeners are owned by the [`crate::icd::Icd`] they observe, so the
//! state a caller wants to read afterwards lives behind `Rc<RefCell<...>>`
//! handles shared between the listener and the caller.

use std::{
    cell::RefCell,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Serialize;

use crate::{
    errors::{IcdError, ParserSyntaxError},
    icd::{Row, ValidationListener},
    io_utils,
};

/// Machine-readable outcome of one validation run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationSummary {
    pub data_rows: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub checks_failed_at_end: usize,
    pub data_format_failed: bool,
}

impl ValidationSummary {
    pub fn all_accepted(&self) -> bool {
        self.rejected == 0 && self.checks_failed_at_end == 0 && !self.data_format_failed
    }
}

/// Counts every event into a shared [`ValidationSummary`].
pub struct SummaryListener {
    summary: Rc<RefCell<ValidationSummary>>,
}

impl SummaryListener {
    pub fn new(summary: Rc<RefCell<ValidationSummary>>) -> Self {
        Self { summary }
    }
}

impl ValidationListener for SummaryListener {
    fn accepted_row(&mut self, _row: &Row) {
        let mut summary = self.summary.borrow_mut();
        summary.data_rows += 1;
        summary.accepted += 1;
    }

    fn rejected_row(&mut self, _row: &Row, _error: &IcdError) {
        let mut summary = self.summary.borrow_mut();
        summary.data_rows += 1;
        summary.rejected += 1;
    }

    fn check_failed_at_row(&mut self, _row: &Row, _error: &IcdError) {
        // Rows failing a check count as rejected: accepted + rejected
        // always equals the number of data rows consumed.
        let mut summary = self.summary.borrow_mut();
        summary.data_rows += 1;
        summary.rejected += 1;
    }

    fn check_failed_at_end(&mut self, _error: &IcdError) {
        self.summary.borrow_mut().checks_failed_at_end += 1;
    }

    fn data_format_failed(&mut self, _error: &ParserSyntaxError) {
        self.summary.borrow_mut().data_format_failed = true;
    }
}

/// Writes accepted rows to `<stem>_accepted.<ext>` and rejection
/// diagnostics to `<stem>_rejected.txt` alongside the input.
///
/// Write failures cannot surface through the listener interface, so the
/// first one is stored and reported by [`SplitWriter::finish`].
pub struct SplitWriter {
    accepted: csv::Writer<BufWriter<File>>,
    rejected: BufWriter<File>,
    accepted_path: PathBuf,
    rejected_path: PathBuf,
    first_error: Option<anyhow::Error>,
}

impl SplitWriter {
    pub fn create(data_path: &Path, delimiter: u8) -> Result<Self> {
        let stem = data_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("data");
        let extension = data_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("csv");
        let directory = data_path.parent().unwrap_or_else(|| Path::new("."));
        let accepted_path = directory.join(format!("{stem}_accepted.{extension}"));
        let rejected_path = directory.join(format!("{stem}_rejected.txt"));
        let accepted = io_utils::open_csv_writer(&accepted_path, delimiter)?;
        let rejected = BufWriter::new(
            File::create(&rejected_path)
                .with_context(|| format!("Creating rejected file {rejected_path:?}"))?,
        );
        Ok(Self {
            accepted,
            rejected,
            accepted_path,
            rejected_path,
            first_error: None,
        })
    }

    pub fn accepted_path(&self) -> &Path {
        &self.accepted_path
    }

    pub fn rejected_path(&self) -> &Path {
        &self.rejected_path
    }

    fn record<F>(&mut self, write: F)
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.first_error.is_none()
            && let Err(error) = write(self)
        {
            self.first_error = Some(error);
        }
    }

    fn write_accepted(&mut self, row: &Row) {
        self.record(|writer| {
            writer
                .accepted
                .write_record(&row.items)
                .context("Writing accepted row")
        });
    }

    fn write_rejected(&mut self, row: &Row, error: &IcdError) {
        self.record(|writer| {
            writeln!(
                writer.rejected,
                "row {}: {error} | data: {}",
                row.number,
                row.items.iter().map(|item| format!("{item:?}")).join(", ")
            )
            .context("Writing rejected row")
        });
    }

    fn write_failure(&mut self, error: &ParserSyntaxError) {
        self.record(|writer| {
            writeln!(writer.rejected, "cannot continue reading data: {error}")
                .context("Writing rejected row")
        });
    }

    /// Flushes both sidecars and surfaces the first write failure.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(error) = self.first_error.take() {
            return Err(error);
        }
        self.accepted.flush().context("Flushing accepted file")?;
        self.rejected.flush().context("Flushing rejected file")?;
        Ok(())
    }
}

/// Listener half of the splitter; see [`SplitWriter`].
pub struct SplitListener {
    writer: Rc<RefCell<SplitWriter>>,
}

impl SplitListener {
    pub fn new(writer: Rc<RefCell<SplitWriter>>) -> Self {
        Self { writer }
    }
}

impl ValidationListener for SplitListener {
    fn accepted_row(&mut self, row: &Row) {
        self.writer.borrow_mut().write_accepted(row);
    }

    fn rejected_row(&mut self, row: &Row, error: &IcdError) {
        self.writer.borrow_mut().write_rejected(row, error);
    }

    fn check_failed_at_row(&mut self, row: &Row, error: &IcdError) {
        self.writer.borrow_mut().write_rejected(row, error);
    }

    fn data_format_failed(&mut self, error: &ParserSyntaxError) {
        self.writer.borrow_mut().write_failure(error);
    }
}
