//! CSV rendering of motion frames.
//!
//! Output always starts with a UTF-8 BOM and a header row, then rows in
//! chunks of [`CSV_CHUNK_FRAMES`] so memory stays bounded regardless of file
//! size. Rows come from the parsed artifact when it exists and from positioned
//! reads of the raw frames otherwise.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use common::motion::{
    BOOL_COUNT, FRAME_SIZE, FrameError, INST_TYPE_COUNT, INST_UDI_COUNT, JsonlGzReader,
    REAL_COUNT, Row, decode_frame,
};
use common::storage::{ByteRange, ObjectStore, StorageError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub const CSV_CHUNK_FRAMES: usize = 2000;
const BOM: &str = "\u{feff}";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Invalid column layout: {0}")]
    Layout(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Read failed: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt frame data: {0}")]
    Frame(#[from] FrameError),

    #[error("Output closed by receiver")]
    SinkClosed,
}

/// One output column: `index` is the frame field key, `name` the header.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CsvColumn {
    pub index: String,
    pub name: String,
}

/// Column order and header names for CSV output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvColumns {
    columns: Vec<CsvColumn>,
}

impl CsvColumns {
    /// Every frame field in wire order, headed by its key.
    pub fn all_fields() -> Self {
        let mut keys = vec!["ulint_data".to_string()];
        keys.extend((0..REAL_COUNT).map(|i| format!("real_data_{i}")));
        keys.push("dint_data".into());
        keys.push("uint_data".into());
        keys.extend((0..BOOL_COUNT).map(|i| format!("bool_data_{i}")));
        keys.extend((0..INST_TYPE_COUNT).map(|i| format!("instType_{i}")));
        keys.extend((0..INST_UDI_COUNT).map(|i| format!("instUDI_{i}")));
        Self {
            columns: keys
                .into_iter()
                .map(|k| CsvColumn {
                    name: k.clone(),
                    index: k,
                })
                .collect(),
        }
    }

    pub fn new(columns: Vec<CsvColumn>) -> Result<Self, ExportError> {
        if columns.is_empty() {
            return Err(ExportError::Layout("no columns".into()));
        }
        Ok(Self { columns })
    }

    /// Read a JSON array of `{"index": ..., "name": ...}` objects.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        let columns: Vec<CsvColumn> =
            serde_json::from_str(&text).map_err(|e| ExportError::Layout(e.to_string()))?;
        Self::new(columns)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// BOM plus the header line.
    pub fn preamble(&self) -> String {
        let mut out = String::from(BOM);
        let names: Vec<String> = self.columns.iter().map(|c| escape(&c.name)).collect();
        out.push_str(&names.join(","));
        out.push('\n');
        out
    }

    pub fn write_row(&self, row: &Row, out: &mut String) {
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            match row.get(&col.index) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) => out.push_str(&escape(s)),
                Some(other) => out.push_str(&escape(&other.to_string())),
            }
        }
        out.push('\n');
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Destination for rendered chunks.
#[async_trait]
pub trait ChunkSink: Send {
    /// Fails with [`ExportError::SinkClosed`] once the receiver is gone.
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ExportError>;
}

#[async_trait]
impl ChunkSink for mpsc::Sender<Result<Bytes, io::Error>> {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ExportError> {
        self.send(Ok(chunk)).await.map_err(|_| ExportError::SinkClosed)
    }
}

#[async_trait]
impl ChunkSink for Vec<u8> {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ExportError> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Render CSV from a parsed `.jsonl.gz` object. Returns the row count.
pub async fn csv_from_parsed<S: ChunkSink + ?Sized>(
    columns: &CsvColumns,
    store: &dyn ObjectStore,
    parsed_key: &str,
    sink: &mut S,
) -> Result<u64, ExportError> {
    let reader = store.get_stream(parsed_key).await?;
    let mut rows = JsonlGzReader::new(reader);

    sink.write_chunk(Bytes::from(columns.preamble())).await?;
    let mut out = String::new();
    let mut pending = 0usize;
    let mut total = 0u64;
    while let Some(batch) = rows.next_batch().await? {
        for row in &batch {
            columns.write_row(row, &mut out);
            pending += 1;
            total += 1;
            if pending == CSV_CHUNK_FRAMES {
                sink.write_chunk(Bytes::from(std::mem::take(&mut out))).await?;
                pending = 0;
            }
        }
    }
    if !out.is_empty() {
        sink.write_chunk(Bytes::from(out)).await?;
    }
    Ok(total)
}

/// Render CSV by decoding raw frames, one positioned read per chunk.
pub async fn csv_from_raw<S: ChunkSink + ?Sized>(
    columns: &CsvColumns,
    store: &dyn ObjectStore,
    raw_key: &str,
    sink: &mut S,
) -> Result<u64, ExportError> {
    let size = store.size(raw_key).await?;
    let total = size / FRAME_SIZE as u64;

    sink.write_chunk(Bytes::from(columns.preamble())).await?;
    let mut offset = 0u64;
    while offset < total {
        let count = (CSV_CHUNK_FRAMES as u64).min(total - offset);
        let range = ByteRange::new(offset * FRAME_SIZE as u64, (offset + count) * FRAME_SIZE as u64);
        let buf = store.get_range(raw_key, range).await?;

        let mut out = String::new();
        for at in (0..buf.len() / FRAME_SIZE).map(|i| i * FRAME_SIZE) {
            let frame = decode_frame(&buf, at)?;
            columns.write_row(&frame.to_json(), &mut out);
        }
        sink.write_chunk(Bytes::from(out)).await?;
        offset += count;
    }
    Ok(total)
}
