//! Program line source
//!
//! Reads a G-code program lazily, one line per step, and yields only the
//! lines that should reach the controller. A fresh source is opened for
//! every job.

use cncstream_core::JobError;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Comment marker at the start of a line
pub const COMMENT_MARKER: char = ';';

/// One program line with its 1-based position in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramLine {
    pub number: usize,
    pub text: String,
}

/// Whether a line should be sent: not blank, not a `;` comment
pub fn is_dispatchable(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && !text.starts_with(COMMENT_MARKER)
}

/// Lazy iterator over the dispatchable lines of a program
pub struct ProgramSource<R> {
    reader: R,
    path: PathBuf,
    number: usize,
    buf: Vec<u8>,
    done: bool,
}

impl ProgramSource<BufReader<File>> {
    /// Open a program file
    pub fn open(path: &Path) -> Result<Self, JobError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => JobError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => JobError::FileRead {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        Ok(Self::from_reader(BufReader::new(file), path))
    }
}

impl<R: BufRead> ProgramSource<R> {
    /// Read a program from any buffered reader; `path` is used in errors
    pub fn from_reader(reader: R, path: impl Into<PathBuf>) -> Self {
        Self {
            reader,
            path: path.into(),
            number: 0,
            buf: Vec::new(),
            done: false,
        }
    }

    /// Program path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: BufRead> Iterator for ProgramSource<R> {
    type Item = Result<ProgramLine, JobError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.number += 1;
                    // Non-UTF-8 bytes are replaced rather than failing the job
                    let text = String::from_utf8_lossy(&self.buf);
                    if is_dispatchable(&text) {
                        return Some(Ok(ProgramLine {
                            number: self.number,
                            text: text.trim().to_string(),
                        }));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(JobError::FileRead {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    }));
                }
            }
        }
        None
    }
}
