//! Binary motion frame codec and the file-level rules built on it.

mod frame;
mod jsonl;
mod splitter;
mod timestamp;
mod validate;

pub use frame::{
    BOOL_COUNT, FRAME_SIZE, Frame, FrameError, INST_TYPE_COUNT, INST_UDI_COUNT, REAL_COUNT,
    decode_all, decode_frame,
};
pub use jsonl::{JsonlGzDecoder, JsonlGzEncoder, JsonlGzReader, Row};
pub use splitter::FrameSplitter;
pub use timestamp::{DeviceClock, parse_file_time_token, parse_frame_timestamp};
pub use validate::{
    FramePosition, MotionFileName, ValidationError, base_name, check_boundary_timestamps,
    frame_count, parse_motion_filename,
};
