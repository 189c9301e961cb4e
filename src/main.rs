//! Entry point for the icd-check binary.
//!
//! Delegates to [`icd_check::run()`] and translates its result into
//! process exit codes: `0` when all data rows were accepted, `1` on any
//! rejection, check failure, or unrecoverable error. Usage errors exit
//! with `2` via clap.

fn main() {
    match icd_check::run() {
        Ok(true) => {}
        Ok(false) | Err(_) => std::process::exit(1),
    }
}
