//! Extra-field parsing and encoding.
//!
//! The extra area of a local header or central directory entry is a
//! sequence of `(id: u16, len: u16, payload)` sub-records. The ids below are
//! decoded; every other id is skipped by its declared length. Skipping must
//! never fail, because new ids keep appearing in the wild.
//!
//! When several timestamp fields are present the last one parsed wins;
//! the format defines no precedence between them.

use super::reader::FieldCursor;
use super::{ZIP64_SENTINEL_16, ZIP64_SENTINEL_32};
use crate::timestamp::Timestamp;

/// Known extra-field ids.
pub mod ids {
    /// Zip64 extended information.
    pub const ZIP64: u16 = 0x0001;
    /// NTFS attributes (FILETIME timestamps).
    pub const NTFS: u16 = 0x000A;
    /// PKWARE Unix.
    pub const UNIX: u16 = 0x000D;
    /// Info-ZIP extended timestamp.
    pub const EXTENDED_TIMESTAMP: u16 = 0x5455;
    /// Info-ZIP Unix, type 1 (obsolete).
    pub const INFOZIP_UNIX_1: u16 = 0x5855;
    /// Info-ZIP Unix, type 2.
    pub const INFOZIP_UNIX_2: u16 = 0x7855;
    /// Info-ZIP Unix with variable-width uid/gid.
    pub const UNIX_N: u16 = 0x7875;
}

/// Header fields that a Zip64 extra field may widen.
///
/// Values start out as read from the fixed header. A field still holding
/// its 32-bit (or, for `disk_start`, 16-bit) sentinel is replaced by the
/// next value in the Zip64 payload, in the order of this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Zip64Fields {
    /// Uncompressed size.
    pub uncompressed_size: u64,
    /// Compressed size.
    pub compressed_size: u64,
    /// Local header offset (central directory only).
    pub header_offset: u64,
    /// Disk number start (central directory only).
    pub disk_start: u32,
}

impl Zip64Fields {
    fn apply(&mut self, payload: &[u8]) {
        let sentinel = u64::from(ZIP64_SENTINEL_32);
        let mut cursor = FieldCursor::new(payload);
        for field in [
            &mut self.uncompressed_size,
            &mut self.compressed_size,
            &mut self.header_offset,
        ] {
            if *field == sentinel {
                match cursor.u64() {
                    Some(value) => *field = value,
                    None => return,
                }
            }
        }
        if self.disk_start == u32::from(ZIP64_SENTINEL_16) {
            if let Some(disk) = cursor.u32() {
                self.disk_start = disk;
            }
        }
    }
}

/// Metadata decoded from an extra-field area.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    /// Last modification time.
    pub modified: Option<Timestamp>,
    /// Last access time.
    pub accessed: Option<Timestamp>,
    /// Creation time.
    pub created: Option<Timestamp>,
    /// Unix user id.
    pub uid: Option<u32>,
    /// Unix group id.
    pub gid: Option<u32>,
    /// Whether a Zip64 field was present.
    pub has_zip64: bool,
    /// Ids that were skipped without being decoded.
    pub skipped: Vec<u16>,
}

impl ExtraFields {
    /// Parses an extra-field area, widening `sizes` from any Zip64 field.
    ///
    /// This never fails. A sub-record whose declared length runs past the
    /// end of the area ends parsing.
    pub fn parse(data: &[u8], sizes: &mut Zip64Fields) -> Self {
        let mut fields = Self::default();
        let mut cursor = FieldCursor::new(data);

        while cursor.remaining() >= 4 {
            let (Some(id), Some(len)) = (cursor.u16(), cursor.u16()) else {
                break;
            };
            let Some(payload) = cursor.take(usize::from(len)) else {
                log::debug!(
                    "extra field {id:#06x} declares {len} bytes but only {} remain",
                    cursor.remaining()
                );
                break;
            };

            match id {
                ids::ZIP64 => {
                    fields.has_zip64 = true;
                    sizes.apply(payload);
                }
                ids::NTFS => fields.parse_ntfs(payload),
                ids::UNIX => fields.parse_pkware_unix(payload),
                ids::EXTENDED_TIMESTAMP => fields.parse_extended_timestamp(payload),
                ids::INFOZIP_UNIX_1 => fields.parse_infozip_unix_1(payload),
                ids::INFOZIP_UNIX_2 => fields.parse_infozip_unix_2(payload),
                ids::UNIX_N => fields.skipped.push(id),
                other => {
                    log::debug!("skipping unknown extra field {other:#06x} ({len} bytes)");
                    fields.skipped.push(other);
                }
            }
        }

        fields
    }

    fn parse_ntfs(&mut self, payload: &[u8]) {
        let mut cursor = FieldCursor::new(payload);
        if cursor.take(4).is_none() {
            return;
        }
        while let (Some(tag), Some(size)) = (cursor.u16(), cursor.u16()) {
            let Some(attr) = cursor.take(usize::from(size)) else {
                return;
            };
            if tag == 1 && attr.len() >= 24 {
                let mut times = FieldCursor::new(attr);
                let filetime = |v: Option<u64>| v.filter(|&t| t != 0).map(Timestamp::from_filetime);
                self.modified = filetime(times.u64());
                self.accessed = filetime(times.u64());
                self.created = filetime(times.u64());
            }
        }
    }

    fn parse_pkware_unix(&mut self, payload: &[u8]) {
        let mut cursor = FieldCursor::new(payload);
        if let Some(atime) = cursor.u32() {
            self.accessed = Timestamp::from_unix_secs(i64::from(atime));
        }
        if let Some(mtime) = cursor.u32() {
            self.modified = Timestamp::from_unix_secs(i64::from(mtime));
        }
        if let Some(uid) = cursor.u16() {
            self.uid = Some(u32::from(uid));
        }
        if let Some(gid) = cursor.u16() {
            self.gid = Some(u32::from(gid));
        }
    }

    fn parse_extended_timestamp(&mut self, payload: &[u8]) {
        let mut cursor = FieldCursor::new(payload);
        let Some(flags) = cursor.u8() else {
            return;
        };
        // Central directory copies carry only mtime even when flags announce more
        let mut next = || cursor.u32().map(|v| i64::from(v as i32));
        if flags & 0x01 != 0 {
            if let Some(secs) = next() {
                self.modified = Timestamp::from_unix_secs(secs);
            }
        }
        if flags & 0x02 != 0 {
            if let Some(secs) = next() {
                self.accessed = Timestamp::from_unix_secs(secs);
            }
        }
        if flags & 0x04 != 0 {
            if let Some(secs) = next() {
                self.created = Timestamp::from_unix_secs(secs);
            }
        }
    }

    fn parse_infozip_unix_1(&mut self, payload: &[u8]) {
        let mut cursor = FieldCursor::new(payload);
        if let Some(atime) = cursor.u32() {
            self.accessed = Timestamp::from_unix_secs(i64::from(atime as i32));
        }
        if let Some(mtime) = cursor.u32() {
            self.modified = Timestamp::from_unix_secs(i64::from(mtime as i32));
        }
        if let (Some(uid), Some(gid)) = (cursor.u16(), cursor.u16()) {
            self.uid = Some(u32::from(uid));
            self.gid = Some(u32::from(gid));
        }
    }

    fn parse_infozip_unix_2(&mut self, payload: &[u8]) {
        let mut cursor = FieldCursor::new(payload);
        if let (Some(uid), Some(gid)) = (cursor.u16(), cursor.u16()) {
            self.uid = Some(u32::from(uid));
            self.gid = Some(u32::from(gid));
        }
    }
}

/// Appends a Zip64 extra field carrying `values` in header order.
pub fn push_zip64(out: &mut Vec<u8>, values: &[u64]) {
    out.extend_from_slice(&ids::ZIP64.to_le_bytes());
    out.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Appends an extended-timestamp extra field carrying only the mtime.
///
/// Times outside the signed 32-bit Unix range are not representable and
/// are skipped.
pub fn push_extended_mtime(out: &mut Vec<u8>, modified: Timestamp) {
    let Ok(secs) = i32::try_from(modified.as_unix_secs()) else {
        return;
    };
    out.extend_from_slice(&ids::EXTENDED_TIMESTAMP.to_le_bytes());
    out.extend_from_slice(&5u16.to_le_bytes());
    out.push(0x01);
    out.extend_from_slice(&secs.to_le_bytes());
}
