// src/corpus.rs
//
// Corpus directory handling: deterministic discovery of run record
// files and fail-fast sample loading. The pipeline makes two full
// passes over the corpus; samples are loaded transiently per pass and
// discarded once folded into the accumulators.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::MarketConfig;
use crate::sample::{Sample, SampleError};

/// Extension of run record files.
const SAMPLE_EXTENSION: &str = "json";

/// A validated corpus directory with its record files listed in sorted
/// order, so every pass visits samples in the same sequence and report
/// output is reproducible across platforms.
#[derive(Debug, Clone)]
pub struct CorpusDir {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl CorpusDir {
    /// Opens a corpus directory, listing `*.json` record files sorted by
    /// file name. Fails if the directory is missing or holds no records.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, CorpusError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(CorpusError::MissingDir {
                path: dir.display().to_string(),
            });
        }

        let entries = fs::read_dir(&dir).map_err(|e| CorpusError::Unreadable {
            path: dir.display().to_string(),
            source: e.to_string(),
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CorpusError::Unreadable {
                path: dir.display().to_string(),
                source: e.to_string(),
            })?;
            let path = entry.path();
            let is_sample = path.is_file()
                && path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(SAMPLE_EXTENSION))
                    .unwrap_or(false);
            if is_sample {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(CorpusError::EmptyCorpus {
                path: dir.display().to_string(),
            });
        }

        Ok(Self { dir, files })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Record files in sorted order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Loads and validates one record file, attaching file context to
    /// any failure. The first malformed sample aborts the whole run.
    pub fn load(&self, path: &Path, cfg: &MarketConfig) -> Result<Sample, CorpusError> {
        Sample::from_json_file(path, cfg).map_err(|source| CorpusError::Sample {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Errors while discovering or loading corpus records.
#[derive(Debug, Clone, PartialEq)]
pub enum CorpusError {
    MissingDir { path: String },
    Unreadable { path: String, source: String },
    EmptyCorpus { path: String },
    Sample { path: String, source: SampleError },
}

impl fmt::Display for CorpusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusError::MissingDir { path } => {
                write!(f, "Samples directory '{}' does not exist", path)
            }
            CorpusError::Unreadable { path, source } => {
                write!(f, "Failed to list samples directory '{}': {}", path, source)
            }
            CorpusError::EmptyCorpus { path } => {
                write!(f, "Samples directory '{}' contains no record files", path)
            }
            CorpusError::Sample { path, source } => {
                write!(f, "Sample '{}': {}", path, source)
            }
        }
    }
}

impl std::error::Error for CorpusError {}
