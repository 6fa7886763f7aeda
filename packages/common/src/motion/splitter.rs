use super::frame::{FRAME_SIZE, Frame, decode_frame};

/// Cuts an arbitrary chunked byte stream into whole frames.
///
/// Bytes that do not yet form a complete frame are carried over to the next
/// [`FrameSplitter::push`] call.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    leftover: Vec<u8>,
    emitted: u64,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        if !self.leftover.is_empty() {
            let need = FRAME_SIZE - self.leftover.len();
            let take = need.min(rest.len());
            self.leftover.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.leftover.len() < FRAME_SIZE {
                return frames;
            }
            frames.extend(decode_frame(&self.leftover, 0).ok());
            self.leftover.clear();
        }

        let whole = rest.len() / FRAME_SIZE * FRAME_SIZE;
        frames.extend((0..whole).step_by(FRAME_SIZE).filter_map(|at| decode_frame(rest, at).ok()));
        self.leftover.extend_from_slice(&rest[whole..]);
        self.emitted += frames.len() as u64;
        frames
    }

    /// Frames emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Close the stream. Returns the number of dangling bytes as an error if
    /// the input did not end on a frame boundary.
    pub fn finish(self) -> Result<u64, usize> {
        if self.leftover.is_empty() {
            Ok(self.emitted)
        } else {
            Err(self.leftover.len())
        }
    }
}
