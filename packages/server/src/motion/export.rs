use std::io;
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use common::storage::ObjectStore;
use futures::stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use worker::csv::{CsvColumns, ExportError, csv_from_parsed, csv_from_raw};

const BODY_PIPE_DEPTH: usize = 4;

/// Where the CSV rows come from.
#[derive(Debug, Clone)]
pub enum CsvSource {
    Parsed(String),
    /// Re-decode raw frames when no parsed artifact exists.
    Raw(String),
}

/// Stream a CSV rendering of one record as a response body.
///
/// Rows are produced by a background task feeding a bounded channel, so the
/// task only runs as fast as the client reads. A client that disconnects
/// closes the channel and the task stops at its next chunk.
pub fn csv_body(
    store: Arc<dyn ObjectStore>,
    columns: Arc<CsvColumns>,
    source: CsvSource,
    record_id: i32,
) -> Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(BODY_PIPE_DEPTH);

    tokio::spawn(async move {
        let mut tx = tx;
        let written = match &source {
            CsvSource::Parsed(key) => csv_from_parsed(&columns, store.as_ref(), key, &mut tx).await,
            CsvSource::Raw(key) => csv_from_raw(&columns, store.as_ref(), key, &mut tx).await,
        };
        match written {
            Ok(rows) => debug!(record_id, rows, "CSV export finished"),
            Err(ExportError::SinkClosed) => debug!(record_id, "CSV export abandoned by client"),
            Err(e) => {
                warn!(record_id, error = %e, "CSV export failed");
                // Aborts the response so the client sees a truncated transfer.
                let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
            }
        }
    });

    Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}
