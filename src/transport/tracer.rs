//! Exchange trace: request and response lines appended to a file.

use crate::debug_on_err;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use strum_macros::Display;

/// Side of an exchange a traced line belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Direction {
    #[strum(serialize = "<-")]
    Request,
    #[strum(serialize = "->")]
    Response,
}

/// Append-only trace of served exchanges, `<direction> <line>` per record.
pub struct ExchangeTracer {
    file: File,
}

impl ExchangeTracer {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open trace file {}", path.display()))?;
        Ok(Self { file })
    }

    /// Append a record. Each record goes out in a single append write.
    pub fn record(&self, direction: Direction, line: &str) {
        let record = format!("{direction} {line}\n");
        debug_on_err!(
            "bridge",
            "write trace record",
            (&self.file).write_all(record.as_bytes())
        );
    }
}
