use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::csv::{ChunkSink, ExportError};

const ZIP_PIPE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive writer stopped")]
    Closed,

    #[error("Archive writer task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCompression {
    /// For content that is already compressed.
    Stored,
    Deflated,
}

enum ZipOp {
    Start {
        name: String,
        compression: EntryCompression,
    },
    Data(Bytes),
    Abort,
}

/// Async front for a ZIP file written on a blocking thread.
///
/// Entries are written one at a time: [`ZipSink::start_entry`], any number
/// of chunks through [`ChunkSink`], then [`ZipSink::end_entry`] or
/// [`ZipSink::abort_entry`] to drop a half-written one. Chunks travel over a
/// bounded channel so a slow disk throttles the producers.
pub struct ZipSink {
    tx: mpsc::Sender<ZipOp>,
    writer: JoinHandle<Result<u64, ArchiveError>>,
    entry_open: bool,
}

impl ZipSink {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let file = tokio::fs::File::create(path.as_ref()).await?.into_std().await;
        let (tx, rx) = mpsc::channel(ZIP_PIPE_DEPTH);
        let writer = tokio::task::spawn_blocking(move || write_zip(file, rx));
        Ok(Self {
            tx,
            writer,
            entry_open: false,
        })
    }

    /// The writer has stopped (I/O or ZIP error); nothing more can be added.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn start_entry(
        &mut self,
        name: &str,
        compression: EntryCompression,
    ) -> Result<(), ArchiveError> {
        self.send(ZipOp::Start {
            name: name.to_string(),
            compression,
        })
        .await?;
        self.entry_open = true;
        Ok(())
    }

    /// Discard the entry being written, if any.
    pub async fn abort_entry(&mut self) -> Result<(), ArchiveError> {
        if !self.entry_open {
            return Ok(());
        }
        self.entry_open = false;
        self.send(ZipOp::Abort).await
    }

    /// Add a complete entry from memory.
    pub async fn add_entry(
        &mut self,
        name: &str,
        compression: EntryCompression,
        data: Bytes,
    ) -> Result<(), ArchiveError> {
        self.start_entry(name, compression).await?;
        self.send(ZipOp::Data(data)).await?;
        self.end_entry();
        Ok(())
    }

    /// Mark the current entry complete so a later abort cannot drop it.
    pub fn end_entry(&mut self) {
        self.entry_open = false;
    }

    /// Write the central directory and return the archive size in bytes.
    pub async fn finish(self) -> Result<u64, ArchiveError> {
        drop(self.tx);
        self.writer
            .await
            .map_err(|e| ArchiveError::Join(e.to_string()))?
    }

    async fn send(&self, op: ZipOp) -> Result<(), ArchiveError> {
        self.tx.send(op).await.map_err(|_| ArchiveError::Closed)
    }
}

#[async_trait]
impl ChunkSink for ZipSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ExportError> {
        self.tx
            .send(ZipOp::Data(chunk))
            .await
            .map_err(|_| ExportError::SinkClosed)
    }
}

fn entry_options(compression: EntryCompression) -> SimpleFileOptions {
    let method = match compression {
        EntryCompression::Stored => CompressionMethod::Stored,
        EntryCompression::Deflated => CompressionMethod::Deflated,
    };
    SimpleFileOptions::default()
        .compression_method(method)
        .large_file(true)
}

fn write_zip(file: File, mut rx: mpsc::Receiver<ZipOp>) -> Result<u64, ArchiveError> {
    let mut zip = ZipWriter::new(file);
    while let Some(op) = rx.blocking_recv() {
        match op {
            ZipOp::Start { name, compression } => zip.start_file(name, entry_options(compression))?,
            ZipOp::Data(chunk) => zip.write_all(&chunk)?,
            ZipOp::Abort => zip.abort_file()?,
        }
    }
    let mut file = zip.finish()?;
    file.flush()?;
    file.sync_all()?;
    Ok(file.metadata()?.len())
}
