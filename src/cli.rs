use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Validate tabular data files against an interface control document",
    long_about = None
)]
pub struct Cli {
    /// Interface control document describing the data ('-' for stdin)
    #[arg(value_name = "ICD_PATH")]
    pub icd: PathBuf,
    /// Data files to validate; with none, only the ICD itself is checked
    #[arg(value_name = "DATA_PATH")]
    pub data: Vec<PathBuf>,
    /// Write <data>_accepted.<ext> and <data>_rejected.txt next to each input
    #[arg(long)]
    pub split: bool,
    /// Print a JSON summary line per validated file to stdout
    #[arg(long)]
    pub summary: bool,
}
