//! Trace output. Records go over a channel to a writer thread that produces
//! CSV and, optionally, JSON lines, so the executor never blocks on disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, unbounded};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("trace writer thread panicked")]
    WriterPanicked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub replication: String,
    pub time: f64,
    pub kind: String,
    pub detail: String,
}

pub struct TraceWriter {
    sender: Sender<TraceRecord>,
    handle: JoinHandle<Result<usize, TraceError>>,
}

impl TraceWriter {
    /// Creates `<stem>.csv` (and `<stem>.jsonl` when asked) in `dir`.
    pub fn create(dir: &Path, stem: &str, jsonl: bool) -> Result<Self, TraceError> {
        let mut csv = csv::Writer::from_path(dir.join(format!("{stem}.csv")))?;
        let mut json = if jsonl {
            Some(BufWriter::new(File::create(dir.join(format!("{stem}.jsonl")))?))
        } else {
            None
        };
        let (sender, receiver) = unbounded::<TraceRecord>();
        let handle = std::thread::Builder::new()
            .name("trace-writer".to_string())
            .spawn(move || -> Result<usize, TraceError> {
                let mut written = 0;
                for record in receiver {
                    csv.serialize(&record)?;
                    if let Some(out) = json.as_mut() {
                        serde_json::to_writer(&mut *out, &record)?;
                        writeln!(out)?;
                    }
                    written += 1;
                }
                csv.flush()?;
                if let Some(mut out) = json {
                    out.flush()?;
                }
                Ok(written)
            })?;
        Ok(Self { sender, handle })
    }

    pub fn sender(&self) -> Sender<TraceRecord> {
        self.sender.clone()
    }

    /// Waits for every queued record to be written. Senders handed out with
    /// [`sender`](Self::sender) must be dropped first.
    pub fn finish(self) -> Result<usize, TraceError> {
        let Self { sender, handle } = self;
        drop(sender);
        handle.join().map_err(|_| TraceError::WriterPanicked)?
    }
}
