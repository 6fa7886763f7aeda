use serde_json::{Map, Value};
use thiserror::Error;

/// Size of one binary frame in bytes.
pub const FRAME_SIZE: usize = 924;

pub const REAL_COUNT: usize = 207;
pub const BOOL_COUNT: usize = 8;
pub const INST_TYPE_COUNT: usize = 4;
pub const INST_UDI_COUNT: usize = 16;

const REAL_OFFSET: usize = 8;
const DINT_OFFSET: usize = REAL_OFFSET + REAL_COUNT * 4;
const UINT_OFFSET: usize = DINT_OFFSET + 4;
const BOOL_OFFSET: usize = UINT_OFFSET + 4;
const INST_TYPE_OFFSET: usize = BOOL_OFFSET + BOOL_COUNT;
const INST_UDI_OFFSET: usize = INST_TYPE_OFFSET + INST_TYPE_COUNT * 2;

const _: () = assert!(INST_UDI_OFFSET + INST_UDI_COUNT * 4 == FRAME_SIZE);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame at offset {offset} needs 924 bytes, buffer has {available}")]
    Truncated { offset: usize, available: usize },

    #[error("field '{0}' is missing or has the wrong type")]
    BadField(String),
}

/// One decoded telemetry record.
///
/// All multi-byte fields are little-endian on the wire. The timestamp is the
/// device's 17-digit `YYYYMMDDHHMMSSmmm` value stored as an integer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp: u64,
    pub real: [f32; REAL_COUNT],
    pub dint: i32,
    pub uint: u32,
    pub bools: [bool; BOOL_COUNT],
    pub inst_type: [i16; INST_TYPE_COUNT],
    pub inst_udi: [u32; INST_UDI_COUNT],
}

struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl FieldReader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}

/// Decode exactly one frame starting at `offset`.
pub fn decode_frame(buf: &[u8], offset: usize) -> Result<Frame, FrameError> {
    let available = buf.len().saturating_sub(offset);
    if available < FRAME_SIZE {
        return Err(FrameError::Truncated { offset, available });
    }

    let mut r = FieldReader {
        bytes: &buf[offset..offset + FRAME_SIZE],
        pos: 0,
    };

    let timestamp = u64::from_le_bytes(r.take());
    let mut real = [0f32; REAL_COUNT];
    for v in real.iter_mut() {
        *v = f32::from_le_bytes(r.take());
    }
    let dint = i32::from_le_bytes(r.take());
    let uint = u32::from_le_bytes(r.take());
    let mut bools = [false; BOOL_COUNT];
    for b in bools.iter_mut() {
        *b = r.take::<1>()[0] != 0;
    }
    let mut inst_type = [0i16; INST_TYPE_COUNT];
    for v in inst_type.iter_mut() {
        *v = i16::from_le_bytes(r.take());
    }
    let mut inst_udi = [0u32; INST_UDI_COUNT];
    for v in inst_udi.iter_mut() {
        *v = u32::from_le_bytes(r.take());
    }

    Ok(Frame {
        timestamp,
        real,
        dint,
        uint,
        bools,
        inst_type,
        inst_udi,
    })
}

impl Frame {
    /// A frame with every field zero except the timestamp.
    pub fn with_timestamp(timestamp: u64) -> Self {
        Self {
            timestamp,
            real: [0.0; REAL_COUNT],
            dint: 0,
            uint: 0,
            bools: [false; BOOL_COUNT],
            inst_type: [0; INST_TYPE_COUNT],
            inst_udi: [0; INST_UDI_COUNT],
        }
    }

    /// Serialize back to the 924-byte wire layout.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut out = [0u8; FRAME_SIZE];
        out[..REAL_OFFSET].copy_from_slice(&self.timestamp.to_le_bytes());
        for (i, v) in self.real.iter().enumerate() {
            let at = REAL_OFFSET + i * 4;
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        out[DINT_OFFSET..UINT_OFFSET].copy_from_slice(&self.dint.to_le_bytes());
        out[UINT_OFFSET..BOOL_OFFSET].copy_from_slice(&self.uint.to_le_bytes());
        for (i, b) in self.bools.iter().enumerate() {
            out[BOOL_OFFSET + i] = u8::from(*b);
        }
        for (i, v) in self.inst_type.iter().enumerate() {
            let at = INST_TYPE_OFFSET + i * 2;
            out[at..at + 2].copy_from_slice(&v.to_le_bytes());
        }
        for (i, v) in self.inst_udi.iter().enumerate() {
            let at = INST_UDI_OFFSET + i * 4;
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// JSON object form used by the parsed artifact and CSV export.
    ///
    /// `ulint_data` is a decimal string since 17-digit values exceed the
    /// range a double can represent exactly. Non-finite floats become `null`.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut obj = Map::with_capacity(
            3 + REAL_COUNT + BOOL_COUNT + INST_TYPE_COUNT + INST_UDI_COUNT,
        );
        obj.insert("ulint_data".into(), Value::String(self.timestamp.to_string()));
        for (i, v) in self.real.iter().enumerate() {
            obj.insert(format!("real_data_{i}"), Value::from(*v));
        }
        obj.insert("dint_data".into(), Value::from(self.dint));
        obj.insert("uint_data".into(), Value::from(self.uint));
        for (i, b) in self.bools.iter().enumerate() {
            obj.insert(format!("bool_data_{i}"), Value::from(u8::from(*b)));
        }
        for (i, v) in self.inst_type.iter().enumerate() {
            obj.insert(format!("instType_{i}"), Value::from(*v));
        }
        for (i, v) in self.inst_udi.iter().enumerate() {
            obj.insert(format!("instUDI_{i}"), Value::from(*v));
        }
        obj
    }

    /// Inverse of [`Frame::to_json`].
    pub fn from_json(obj: &Map<String, Value>) -> Result<Self, FrameError> {
        let timestamp = obj
            .get("ulint_data")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| FrameError::BadField("ulint_data".into()))?;

        let int = |key: &str| -> Result<i64, FrameError> {
            obj.get(key)
                .and_then(Value::as_i64)
                .ok_or_else(|| FrameError::BadField(key.into()))
        };

        let mut real = [0f32; REAL_COUNT];
        for (i, v) in real.iter_mut().enumerate() {
            let key = format!("real_data_{i}");
            *v = match obj.get(&key) {
                Some(Value::Null) => f32::NAN,
                Some(n) => n.as_f64().ok_or(FrameError::BadField(key))? as f32,
                None => return Err(FrameError::BadField(key)),
            };
        }
        let dint = i32::try_from(int("dint_data")?)
            .map_err(|_| FrameError::BadField("dint_data".into()))?;
        let uint = u32::try_from(int("uint_data")?)
            .map_err(|_| FrameError::BadField("uint_data".into()))?;
        let mut bools = [false; BOOL_COUNT];
        for (i, b) in bools.iter_mut().enumerate() {
            *b = int(&format!("bool_data_{i}"))? != 0;
        }
        let mut inst_type = [0i16; INST_TYPE_COUNT];
        for (i, v) in inst_type.iter_mut().enumerate() {
            let key = format!("instType_{i}");
            *v = i16::try_from(int(&key)?).map_err(|_| FrameError::BadField(key))?;
        }
        let mut inst_udi = [0u32; INST_UDI_COUNT];
        for (i, v) in inst_udi.iter_mut().enumerate() {
            let key = format!("instUDI_{i}");
            *v = u32::try_from(int(&key)?).map_err(|_| FrameError::BadField(key))?;
        }

        Ok(Self {
            timestamp,
            real,
            dint,
            uint,
            bools,
            inst_type,
            inst_udi,
        })
    }
}

/// Decode every frame in a buffer whose length is a multiple of [`FRAME_SIZE`].
pub fn decode_all(buf: &[u8]) -> Result<Vec<Frame>, FrameError> {
    if buf.len() % FRAME_SIZE != 0 {
        let offset = buf.len() - buf.len() % FRAME_SIZE;
        return Err(FrameError::Truncated {
            offset,
            available: buf.len() - offset,
        });
    }
    (0..buf.len() / FRAME_SIZE)
        .map(|i| decode_frame(buf, i * FRAME_SIZE))
        .collect()
}
