//! Raw frames to gzip-compressed JSON lines, streamed into object storage.
//!
//! The producer decodes input chunk by chunk and hands compressed output to
//! the storage writer through a bounded channel; each send waits until the
//! writer has room, so at most [`PIPE_DEPTH`] chunks are ever buffered. A
//! failing producer sends an error down the channel, which aborts the
//! storage write instead of committing a truncated object.

use std::io;

use bytes::Bytes;
use common::motion::{FRAME_SIZE, FrameSplitter, JsonlGzEncoder};
use common::storage::{BoxReader, ObjectStore, PutOutcome, StorageError};
use futures::stream;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

const READ_CHUNK: usize = 64 * 1024;
const PIPE_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("input ends with {0} bytes that do not form a whole 924-byte frame")]
    Misaligned(usize),

    #[error("input contains no frames")]
    Empty,

    #[error("failed to read input: {0}")]
    Read(io::Error),

    #[error("failed to encode output: {0}")]
    Encode(io::Error),

    #[error("storage write failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSummary {
    pub total_frames: u64,
    pub ts_first: u64,
    pub ts_last: u64,
    pub parsed: PutOutcome,
}

struct ProducerStats {
    frames: u64,
    first: Option<u64>,
    last: Option<u64>,
}

/// Transcode everything `input` yields and store it under `key`.
pub async fn transcode_to_store<R>(
    input: R,
    store: &dyn ObjectStore,
    key: &str,
) -> Result<TranscodeSummary, TranscodeError>
where
    R: AsyncRead + Unpin + Send,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(PIPE_DEPTH);
    let body = Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }));
    let reader: BoxReader = Box::new(StreamReader::new(body));

    let (produced, stored) = tokio::join!(produce(input, tx), store.put_stream(key, reader));

    let (stats, parsed) = match (produced, stored) {
        (Ok(stats), Ok(parsed)) => (stats, parsed),
        // The writer gave up first; its error is the cause.
        (Err(TranscodeError::Encode(e)), Err(s)) if e.kind() == io::ErrorKind::BrokenPipe => {
            return Err(s.into());
        }
        (Err(e), _) => return Err(e),
        (Ok(_), Err(s)) => return Err(s.into()),
    };
    match (stats.first, stats.last) {
        (Some(ts_first), Some(ts_last)) => Ok(TranscodeSummary {
            total_frames: stats.frames,
            ts_first,
            ts_last,
            parsed,
        }),
        _ => Err(TranscodeError::Empty),
    }
}

async fn produce<R>(
    mut input: R,
    tx: mpsc::Sender<io::Result<Bytes>>,
) -> Result<ProducerStats, TranscodeError>
where
    R: AsyncRead + Unpin,
{
    let result = encode_frames(&mut input, &tx).await;
    if let Err(e) = &result {
        // Poison the stream so the storage write fails rather than commits.
        let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
    }
    result
}

async fn encode_frames<R>(
    input: &mut R,
    tx: &mpsc::Sender<io::Result<Bytes>>,
) -> Result<ProducerStats, TranscodeError>
where
    R: AsyncRead + Unpin,
{
    let mut splitter = FrameSplitter::new();
    let mut encoder = JsonlGzEncoder::new();
    let mut stats = ProducerStats {
        frames: 0,
        first: None,
        last: None,
    };
    let mut buf = vec![0u8; READ_CHUNK.next_multiple_of(FRAME_SIZE)];

    loop {
        let n = input.read(&mut buf).await.map_err(TranscodeError::Read)?;
        if n == 0 {
            break;
        }
        for frame in splitter.push(&buf[..n]) {
            stats.first.get_or_insert(frame.timestamp);
            stats.last = Some(frame.timestamp);
            encoder.push_frame(&frame).map_err(TranscodeError::Encode)?;
        }
        let out = encoder.take_output();
        if !out.is_empty() {
            send(tx, out).await?;
        }
    }

    stats.frames = splitter.finish().map_err(TranscodeError::Misaligned)?;
    if stats.frames == 0 {
        return Err(TranscodeError::Empty);
    }
    let tail = encoder.finish().map_err(TranscodeError::Encode)?;
    send(tx, tail).await?;
    Ok(stats)
}

async fn send(tx: &mpsc::Sender<io::Result<Bytes>>, chunk: Vec<u8>) -> Result<(), TranscodeError> {
    tx.send(Ok(Bytes::from(chunk))).await.map_err(|_| {
        TranscodeError::Encode(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "storage writer stopped reading",
        ))
    })
}
