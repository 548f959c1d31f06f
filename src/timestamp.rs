//! Entry timestamps.
//!
//! ZIP carries times in several encodings: the 2-second-granular MS-DOS
//! date/time pair in every header, NTFS FILETIME ticks, and 32-bit Unix
//! seconds in the various Unix extra fields. All of them are normalized
//! into [`Timestamp`], which stores FILETIME ticks (100-nanosecond
//! intervals since 1601-01-01 UTC) so no source loses precision.
//!
//! DOS date/time values carry no time zone; they are interpreted as UTC.
//!
//! # Example
//!
//! ```rust
//! use zipkit::{DosDateTime, Timestamp};
//!
//! let dos = DosDateTime::new(0x5A21, 0x6C8F); // 2025-01-01 13:36:30
//! let ts = dos.to_timestamp().unwrap();
//! assert_eq!(DosDateTime::from_timestamp(ts), dos);
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Difference between the FILETIME epoch (1601) and the Unix epoch (1970)
/// in 100-nanosecond intervals.
const FILETIME_UNIX_DIFF: u64 = 116444736000000000;

/// Number of 100-nanosecond intervals per second.
const INTERVALS_PER_SECOND: u64 = 10_000_000;

const SECONDS_PER_DAY: i64 = 86_400;

/// A point in time attached to an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Raw FILETIME value (100-nanosecond intervals since 1601-01-01)
    filetime: u64,
}

impl Timestamp {
    /// Creates a timestamp from a raw Windows FILETIME value.
    #[inline]
    pub const fn from_filetime(filetime: u64) -> Self {
        Self { filetime }
    }

    /// Creates a timestamp from Unix seconds.
    ///
    /// Returns `None` for times before 1601 or beyond the FILETIME range.
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        let intervals = (secs.unsigned_abs()).checked_mul(INTERVALS_PER_SECOND)?;
        if secs < 0 {
            FILETIME_UNIX_DIFF.checked_sub(intervals)
        } else {
            FILETIME_UNIX_DIFF.checked_add(intervals)
        }
        .map(Self::from_filetime)
    }

    /// Creates a timestamp from a `SystemTime`, keeping 100ns precision.
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => {
                let whole = Self::from_unix_secs(i64::try_from(d.as_secs()).ok()?)?;
                whole
                    .filetime
                    .checked_add(u64::from(d.subsec_nanos()) / 100)
                    .map(Self::from_filetime)
            }
            Err(e) => {
                let d = e.duration();
                let intervals = d
                    .as_secs()
                    .checked_mul(INTERVALS_PER_SECOND)?
                    .checked_add(u64::from(d.subsec_nanos()) / 100)?;
                FILETIME_UNIX_DIFF
                    .checked_sub(intervals)
                    .map(Self::from_filetime)
            }
        }
    }

    /// Returns the raw Windows FILETIME value.
    #[inline]
    pub const fn as_filetime(&self) -> u64 {
        self.filetime
    }

    /// Returns the timestamp as Unix seconds, rounding towards negative infinity.
    pub fn as_unix_secs(&self) -> i64 {
        if self.filetime >= FILETIME_UNIX_DIFF {
            ((self.filetime - FILETIME_UNIX_DIFF) / INTERVALS_PER_SECOND) as i64
        } else {
            let intervals = FILETIME_UNIX_DIFF - self.filetime;
            -(intervals.div_ceil(INTERVALS_PER_SECOND) as i64)
        }
    }

    /// Converts to a `SystemTime`.
    pub fn as_system_time(&self) -> SystemTime {
        if self.filetime >= FILETIME_UNIX_DIFF {
            let intervals = self.filetime - FILETIME_UNIX_DIFF;
            UNIX_EPOCH
                + Duration::new(
                    intervals / INTERVALS_PER_SECOND,
                    ((intervals % INTERVALS_PER_SECOND) * 100) as u32,
                )
        } else {
            let intervals = FILETIME_UNIX_DIFF - self.filetime;
            UNIX_EPOCH
                - Duration::new(
                    intervals / INTERVALS_PER_SECOND,
                    ((intervals % INTERVALS_PER_SECOND) * 100) as u32,
                )
        }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> SystemTime {
        ts.as_system_time()
    }
}

/// An MS-DOS packed date/time pair as stored in ZIP headers.
///
/// Date: bits 15-9 year since 1980, bits 8-5 month, bits 4-0 day.
/// Time: bits 15-11 hour, bits 10-5 minute, bits 4-0 seconds / 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct DosDateTime {
    /// Packed date.
    pub date: u16,
    /// Packed time.
    pub time: u16,
}

impl DosDateTime {
    /// Wraps raw header values.
    pub const fn new(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    /// Returns true for the all-zero pair, which means "no timestamp".
    pub fn is_unset(&self) -> bool {
        self.date == 0 && self.time == 0
    }

    /// Decodes into a timestamp, treating the wall-clock value as UTC.
    ///
    /// Returns `None` for the all-zero pair and for impossible field values.
    pub fn to_timestamp(&self) -> Option<Timestamp> {
        if self.is_unset() {
            return None;
        }
        let year = 1980 + i64::from(self.date >> 9);
        let month = u32::from((self.date >> 5) & 0x0F);
        let day = u32::from(self.date & 0x1F);
        let hour = i64::from(self.time >> 11);
        let minute = i64::from((self.time >> 5) & 0x3F);
        let second = i64::from(self.time & 0x1F) * 2;

        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
            return None;
        }
        if hour > 23 || minute > 59 || second > 59 {
            return None;
        }

        let days = days_from_civil(year, month, day);
        Timestamp::from_unix_secs(days * SECONDS_PER_DAY + hour * 3600 + minute * 60 + second)
    }

    /// Encodes a timestamp, clamping to the DOS range 1980-01-01 .. 2107-12-31.
    ///
    /// Seconds are truncated to an even value.
    pub fn from_timestamp(ts: Timestamp) -> Self {
        let secs = ts.as_unix_secs();
        let days = secs.div_euclid(SECONDS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        if year < 1980 {
            return Self::new((1 << 5) | 1, 0);
        }
        if year > 2107 {
            return Self::new((127 << 9) | (12 << 5) | 31, (23 << 11) | (59 << 5) | 29);
        }

        let rem = secs.rem_euclid(SECONDS_PER_DAY);
        let hour = (rem / 3600) as u16;
        let minute = ((rem % 3600) / 60) as u16;
        let second = (rem % 60) as u16;

        let date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16;
        let time = (hour << 11) | (minute << 5) | (second / 2);
        Self::new(date, time)
    }
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Inverse of [`days_from_civil`].
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
