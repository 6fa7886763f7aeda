use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

const SEVENTEEN_DIGIT_MIN: u64 = 10_000_000_000_000_000;
const SEVENTEEN_DIGIT_MAX: u64 = 99_999_999_999_999_999;

/// Parse a device timestamp of the form `YYYYMMDDHHMMSSmmm`.
///
/// Returns `None` unless the value has exactly 17 digits and names a real
/// calendar instant. Field ranges are checked by chrono's constructors, so
/// e.g. Feb 30 or minute 60 is rejected.
pub fn parse_frame_timestamp(ts: u64) -> Option<NaiveDateTime> {
    if !(SEVENTEEN_DIGIT_MIN..=SEVENTEEN_DIGIT_MAX).contains(&ts) {
        return None;
    }
    let ms = (ts % 1000) as u32;
    let rest = ts / 1000;
    let sec = (rest % 100) as u32;
    let min = (rest / 100 % 100) as u32;
    let hour = (rest / 10_000 % 100) as u32;
    let day = (rest / 1_000_000 % 100) as u32;
    let month = (rest / 100_000_000 % 100) as u32;
    let year = i32::try_from(rest / 10_000_000_000).ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_milli_opt(hour, min, sec, ms)
}

/// Parse the 12-digit `YYYYMMDDHHMM` token carried in a motion filename.
pub fn parse_file_time_token(token: &str) -> Option<NaiveDateTime> {
    if token.len() != 12 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let num = |r: std::ops::Range<usize>| token[r].parse::<u32>().ok();
    let year = i32::try_from(num(0..4)?).ok()?;
    NaiveDate::from_ymd_opt(year, num(4..6)?, num(6..8)?)?.and_hms_opt(num(8..10)?, num(10..12)?, 0)
}

/// Wall-clock convention of the recording device.
///
/// Devices write local wall-clock values without a zone. One fixed offset is
/// applied everywhere those values become absolute instants: filename tokens,
/// frame timestamps at ingestion, and range filters at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceClock {
    offset: FixedOffset,
}

impl Default for DeviceClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl DeviceClock {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Returns `None` when the offset is outside ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Convert a raw 17-digit frame timestamp to Unix epoch milliseconds.
    pub fn frame_epoch_ms(&self, ts: u64) -> Option<i64> {
        parse_frame_timestamp(ts)
            .and_then(|local| self.to_utc(local))
            .map(|dt| dt.timestamp_millis())
    }
}
