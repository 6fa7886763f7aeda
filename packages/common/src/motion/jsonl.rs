use std::io::{self, Write};

use flate2::Compression;
use flate2::write::{GzDecoder, GzEncoder};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::frame::Frame;

pub type Row = Map<String, Value>;

/// Push-style encoder producing gzip-compressed JSON lines.
///
/// Compressed bytes accumulate in memory only until the caller drains them
/// with [`JsonlGzEncoder::take_output`].
pub struct JsonlGzEncoder {
    gz: GzEncoder<Vec<u8>>,
}

impl Default for JsonlGzEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonlGzEncoder {
    pub fn new() -> Self {
        Self {
            gz: GzEncoder::new(Vec::new(), Compression::default()),
        }
    }

    pub fn push_frame(&mut self, frame: &Frame) -> io::Result<()> {
        serde_json::to_writer(&mut self.gz, &frame.to_json())?;
        self.gz.write_all(b"\n")
    }

    /// Compressed bytes produced so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(self.gz.get_mut())
    }

    /// Flush the gzip trailer and return the remaining bytes.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        self.gz.finish()
    }
}

/// Push-style decoder for gzip-compressed JSON lines.
pub struct JsonlGzDecoder {
    inflater: GzDecoder<Vec<u8>>,
    partial: Vec<u8>,
}

impl Default for JsonlGzDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonlGzDecoder {
    pub fn new() -> Self {
        Self {
            inflater: GzDecoder::new(Vec::new()),
            partial: Vec::new(),
        }
    }

    /// Feed compressed bytes, returning every row completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> io::Result<Vec<Row>> {
        self.inflater.write_all(chunk)?;
        let inflated = std::mem::take(self.inflater.get_mut());
        self.partial.extend_from_slice(&inflated);
        self.drain_lines()
    }

    pub fn finish(mut self) -> io::Result<Vec<Row>> {
        self.inflater.try_finish()?;
        let inflated = std::mem::take(self.inflater.get_mut());
        self.partial.extend_from_slice(&inflated);
        let mut rows = self.drain_lines()?;
        if !is_blank(&self.partial) {
            rows.push(parse_line(&self.partial)?);
        }
        Ok(rows)
    }

    fn drain_lines(&mut self) -> io::Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.partial[start..].iter().position(|&b| b == b'\n') {
            let line = &self.partial[start..start + pos];
            if !is_blank(line) {
                rows.push(parse_line(line)?);
            }
            start += pos + 1;
        }
        self.partial.drain(..start);
        Ok(rows)
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn parse_line(line: &[u8]) -> io::Result<Row> {
    serde_json::from_slice(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Async adapter that yields decoded rows in batches as compressed bytes arrive.
pub struct JsonlGzReader<R> {
    reader: R,
    decoder: Option<JsonlGzDecoder>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> JsonlGzReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: Some(JsonlGzDecoder::new()),
            buf: vec![0u8; 64 * 1024],
        }
    }

    /// Next non-empty batch of rows, or `None` at end of stream.
    pub async fn next_batch(&mut self) -> io::Result<Option<Vec<Row>>> {
        loop {
            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(None);
            };
            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                let rows = match self.decoder.take() {
                    Some(decoder) => decoder.finish()?,
                    None => Vec::new(),
                };
                return Ok((!rows.is_empty()).then_some(rows));
            }
            let rows = decoder.push(&self.buf[..n])?;
            if !rows.is_empty() {
                return Ok(Some(rows));
            }
        }
    }
}
