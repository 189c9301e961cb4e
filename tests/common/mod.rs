#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// The customers interface used across the integration tests: a CSV data
/// format, six typed fields, a uniqueness check, and a distinct-count
/// bound on branches.
pub fn customers_icd() -> String {
    [
        ",Interface: customers,,,,",
        "D,Format,CSV,,,",
        "D,Line Delimiter,LF,,,",
        "D,Item Delimiter,\",\",,,",
        ",,,,,",
        ",Name,Type,Empty,Length,Rule",
        "F,branch_id,RegEx,,,38\\d\\d\\d",
        "F,customer_id,Integer,,,0:99999",
        "F,first_name,Text,X,,",
        "F,surname,Text,,1:60,",
        "F,gender,Choice,,,\"female,male,other,unknown\"",
        "F,date_of_birth,DateTime,,,DD.MM.YYYY",
        "C,customer must be unique,IsUnique,\"branch_id,customer_id\"",
        "C,distinct branches must be within limit,DistinctCount,branch_id < 10",
        "",
    ]
    .join("\n")
}
