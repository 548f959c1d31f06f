//! Header and trailer encoding.
//!
//! Builds the local header written before each payload and, once every file
//! is done, the central directory and end records.

use std::io::{self, Write};

use crate::Timestamp;
use crate::format::extra::{push_extended_mtime, push_zip64};
use crate::format::records::{
    CentralDirectoryEntry, DataDescriptor, EndOfCentralDirectory, LocalFileHeader,
    Zip64EndOfCentralDirectory, Zip64Locator,
};
use crate::format::{
    CompressionMethod, HOST_UNIX, VERSION_DEFLATE, VERSION_ZIP64, ZIP64_EOCD_LEN,
    ZIP64_SENTINEL_16, ZIP64_SENTINEL_32, flags,
};
use crate::timestamp::DosDateTime;

/// Regular file, rw-r--r--.
const DEFAULT_MODE: u32 = 0o100_644;

/// Layout switches shared by every entry of one archive.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderStyle {
    pub data_descriptors: bool,
    pub extended_timestamps: bool,
}

/// Everything the trailer needs to know about a written entry.
#[derive(Debug, Clone)]
pub(crate) struct EntryRecord {
    pub name: String,
    pub method: CompressionMethod,
    pub modified: Option<Timestamp>,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub offset: u64,
}

impl EntryRecord {
    fn sizes_need_zip64(&self) -> bool {
        self.compressed_size >= u64::from(ZIP64_SENTINEL_32)
            || self.uncompressed_size >= u64::from(ZIP64_SENTINEL_32)
    }

    fn flags(&self, style: HeaderStyle) -> u16 {
        let mut bits = 0;
        if !self.name.is_ascii() {
            bits |= flags::UTF8;
        }
        if style.data_descriptors {
            bits |= flags::DATA_DESCRIPTOR;
        }
        bits
    }

    fn dos_time(&self) -> DosDateTime {
        self.modified
            .map(DosDateTime::from_timestamp)
            .unwrap_or_default()
    }

    fn timestamp_extra(&self, style: HeaderStyle, extra: &mut Vec<u8>) {
        if let (true, Some(modified)) = (style.extended_timestamps, self.modified) {
            push_extended_mtime(extra, modified);
        }
    }

    /// The local header. With data descriptors, CRC and sizes are zero and
    /// travel in the descriptor instead.
    pub(crate) fn local_header(&self, style: HeaderStyle) -> LocalFileHeader {
        let zip64 = self.sizes_need_zip64();
        let mut extra = Vec::new();
        let (crc32, compressed_size, uncompressed_size) = if zip64 {
            let sizes = if style.data_descriptors {
                [0, 0]
            } else {
                [self.uncompressed_size, self.compressed_size]
            };
            push_zip64(&mut extra, &sizes);
            let crc = if style.data_descriptors { 0 } else { self.crc32 };
            (crc, ZIP64_SENTINEL_32, ZIP64_SENTINEL_32)
        } else if style.data_descriptors {
            (0, 0, 0)
        } else {
            (
                self.crc32,
                self.compressed_size as u32,
                self.uncompressed_size as u32,
            )
        };
        self.timestamp_extra(style, &mut extra);

        LocalFileHeader {
            version_needed: if zip64 { VERSION_ZIP64 } else { VERSION_DEFLATE },
            flags: self.flags(style),
            method: self.method.to_u16(),
            modified: self.dos_time(),
            crc32,
            compressed_size,
            uncompressed_size,
            file_name: self.name.as_bytes().to_vec(),
            extra,
        }
    }

    /// The descriptor written after the payload, if descriptors are enabled.
    pub(crate) fn descriptor(&self, style: HeaderStyle) -> Option<(DataDescriptor, bool)> {
        style.data_descriptors.then(|| {
            (
                DataDescriptor {
                    crc32: self.crc32,
                    compressed_size: self.compressed_size,
                    uncompressed_size: self.uncompressed_size,
                },
                self.sizes_need_zip64(),
            )
        })
    }

    pub(crate) fn central_entry(&self, style: HeaderStyle) -> CentralDirectoryEntry {
        let mut wide = Vec::new();
        let mut saturate = |value: u64| {
            if value >= u64::from(ZIP64_SENTINEL_32) {
                wide.push(value);
                ZIP64_SENTINEL_32
            } else {
                value as u32
            }
        };
        let uncompressed_size = saturate(self.uncompressed_size);
        let compressed_size = saturate(self.compressed_size);
        let local_header_offset = saturate(self.offset);

        let mut extra = Vec::new();
        let zip64 = !wide.is_empty();
        if zip64 {
            push_zip64(&mut extra, &wide);
        }
        self.timestamp_extra(style, &mut extra);

        let version = if zip64 { VERSION_ZIP64 } else { VERSION_DEFLATE };
        CentralDirectoryEntry {
            version_made_by: (HOST_UNIX << 8) | version,
            version_needed: version,
            flags: self.flags(style),
            method: self.method.to_u16(),
            modified: self.dos_time(),
            crc32: self.crc32,
            compressed_size,
            uncompressed_size,
            disk_start: 0,
            internal_attributes: 0,
            external_attributes: DEFAULT_MODE << 16,
            local_header_offset,
            file_name: self.name.as_bytes().to_vec(),
            extra,
            comment: Vec::new(),
        }
    }
}

/// Writes the central directory and end records starting at `cd_offset`.
///
/// Entries appear in the order given. Returns the number of bytes written.
pub(crate) fn write_trailer<W: Write>(
    w: &mut W,
    entries: &[EntryRecord],
    cd_offset: u64,
    style: HeaderStyle,
    comment: &[u8],
) -> io::Result<u64> {
    let mut cd_size = 0u64;
    for entry in entries {
        let record = entry.central_entry(style);
        record.write_to(w)?;
        cd_size += record.record_len();
    }

    let count = entries.len() as u64;
    let zip64 = count >= u64::from(ZIP64_SENTINEL_16)
        || cd_size >= u64::from(ZIP64_SENTINEL_32)
        || cd_offset >= u64::from(ZIP64_SENTINEL_32);
    let mut written = cd_size;

    if zip64 {
        let zip64_offset = cd_offset + cd_size;
        Zip64EndOfCentralDirectory {
            version_made_by: (HOST_UNIX << 8) | VERSION_ZIP64,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            entries_this_disk: count,
            total_entries: count,
            cd_size,
            cd_offset,
        }
        .write_to(w)?;
        Zip64Locator {
            disk_with_zip64_eocd: 0,
            zip64_eocd_offset: zip64_offset,
            total_disks: 1,
        }
        .write_to(w)?;
        written += ZIP64_EOCD_LEN + crate::format::ZIP64_LOCATOR_LEN;
    }

    let entries_16 = u16::try_from(count)
        .ok()
        .filter(|&n| n != ZIP64_SENTINEL_16)
        .unwrap_or(ZIP64_SENTINEL_16);
    let narrow = |value: u64| {
        u32::try_from(value)
            .ok()
            .filter(|&n| n != ZIP64_SENTINEL_32)
            .unwrap_or(ZIP64_SENTINEL_32)
    };
    let eocd = EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        entries_this_disk: entries_16,
        total_entries: entries_16,
        cd_size: narrow(cd_size),
        cd_offset: narrow(cd_offset),
        comment: comment.to_vec(),
    };
    eocd.write_to(w)?;
    written += crate::format::EOCD_LEN + comment.len() as u64;
    Ok(written)
}
