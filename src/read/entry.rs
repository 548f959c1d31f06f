//! Archive entry metadata.

use std::sync::OnceLock;

use crate::format::extra::{ExtraFields, Zip64Fields};
use crate::format::records::{CentralDirectoryEntry, DataDescriptor, LocalFileHeader};
use crate::format::{CompressionMethod, decode_text, flags};
use crate::timestamp::Timestamp;

/// An entry in a ZIP archive.
///
/// Entries come either from the central directory or, when that is missing
/// or damaged, from local file headers found by scanning. This struct is
/// marked `#[non_exhaustive]` so fields can be added without breaking
/// downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Entry {
    /// Decoded file name.
    ///
    /// UTF-8 when flag bit 11 is set or the raw bytes are valid UTF-8,
    /// otherwise decoded from code page 437.
    pub name: String,
    /// File name as stored.
    pub name_raw: Vec<u8>,
    /// Entry comment (central directory only).
    pub comment: String,
    /// Compression method.
    pub method: CompressionMethod,
    /// General purpose bit flags.
    pub flags: u16,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Size of the stored payload, including any encryption header.
    pub compressed_size: u64,
    /// Size of the data after decompression.
    pub uncompressed_size: u64,
    /// Offset of the local file header.
    pub offset: u64,
    /// Header length as known when the entry was listed.
    ///
    /// For central directory entries this is estimated from the central
    /// copy of the name and extra fields. The local header may carry a
    /// different extra area; its real length is read before decompression.
    pub header_len: u64,
    /// Last modification time.
    pub last_modification: Option<Timestamp>,
    /// Last access time.
    pub last_access: Option<Timestamp>,
    /// Creation time.
    pub creation: Option<Timestamp>,
    /// Unix user id, if an extra field carried one.
    pub user_id: Option<u32>,
    /// Unix group id, if an extra field carried one.
    pub group_id: Option<u32>,
    /// Host-dependent external attributes (central directory only).
    pub external_attributes: u32,
    /// Length of the local header once it has been read.
    pub(crate) local_header_len: OnceLock<u64>,
    pub(crate) sizes_known: bool,
}

impl Entry {
    /// Builds an entry from a central directory record.
    pub fn from_central(record: &CentralDirectoryEntry) -> Self {
        let mut wide = Zip64Fields {
            uncompressed_size: u64::from(record.uncompressed_size),
            compressed_size: u64::from(record.compressed_size),
            header_offset: u64::from(record.local_header_offset),
            disk_start: u32::from(record.disk_start),
        };
        let extra = ExtraFields::parse(&record.extra, &mut wide);
        let utf8 = record.flags & flags::UTF8 != 0;

        let mut entry = Self {
            name: decode_text(&record.file_name, utf8),
            name_raw: record.file_name.clone(),
            comment: decode_text(&record.comment, utf8),
            method: CompressionMethod::from_u16(record.method),
            flags: record.flags,
            crc32: record.crc32,
            compressed_size: wide.compressed_size,
            uncompressed_size: wide.uncompressed_size,
            offset: wide.header_offset,
            header_len: crate::format::LOCAL_FILE_HEADER_LEN
                + record.file_name.len() as u64
                + record.extra.len() as u64,
            last_modification: record.modified.to_timestamp(),
            last_access: None,
            creation: None,
            user_id: None,
            group_id: None,
            external_attributes: record.external_attributes,
            local_header_len: OnceLock::new(),
            sizes_known: true,
        };
        entry.apply_extra(extra);
        entry
    }

    /// Builds an entry from a local file header found at `offset`.
    ///
    /// Entries with flag bit 3 have unknown sizes until their data
    /// descriptor is applied.
    pub fn from_local(header: &LocalFileHeader, offset: u64) -> Self {
        let mut wide = Zip64Fields {
            uncompressed_size: u64::from(header.uncompressed_size),
            compressed_size: u64::from(header.compressed_size),
            header_offset: offset,
            disk_start: 0,
        };
        let extra = ExtraFields::parse(&header.extra, &mut wide);
        let utf8 = header.flags & flags::UTF8 != 0;
        let header_len = header.header_len();

        let mut entry = Self {
            name: decode_text(&header.file_name, utf8),
            name_raw: header.file_name.clone(),
            comment: String::new(),
            method: CompressionMethod::from_u16(header.method),
            flags: header.flags,
            crc32: header.crc32,
            compressed_size: wide.compressed_size,
            uncompressed_size: wide.uncompressed_size,
            offset,
            header_len,
            last_modification: header.modified.to_timestamp(),
            last_access: None,
            creation: None,
            user_id: None,
            group_id: None,
            external_attributes: 0,
            local_header_len: OnceLock::from(header_len),
            sizes_known: header.flags & flags::DATA_DESCRIPTOR == 0,
        };
        entry.apply_extra(extra);
        entry
    }

    // Extra fields override the DOS time; among extra fields the last one wins
    fn apply_extra(&mut self, extra: ExtraFields) {
        if extra.modified.is_some() {
            self.last_modification = extra.modified;
        }
        self.last_access = extra.accessed.or(self.last_access);
        self.creation = extra.created.or(self.creation);
        self.user_id = extra.uid.or(self.user_id);
        self.group_id = extra.gid.or(self.group_id);
    }

    /// Fills in CRC and sizes from a data descriptor.
    pub(crate) fn apply_descriptor(&mut self, descriptor: &DataDescriptor) {
        self.crc32 = descriptor.crc32;
        self.compressed_size = descriptor.compressed_size;
        self.uncompressed_size = descriptor.uncompressed_size;
        self.sizes_known = true;
    }

    /// Returns true if the payload is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    /// Returns true if CRC and sizes follow the payload in a data descriptor.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }

    /// Returns true if the name is flagged as UTF-8.
    pub fn is_utf8(&self) -> bool {
        self.flags & flags::UTF8 != 0
    }

    /// Returns true once CRC and sizes are known.
    ///
    /// Always true for central directory entries. A scanned entry with a
    /// data descriptor becomes known when the descriptor has been read.
    pub fn sizes_known(&self) -> bool {
        self.sizes_known
    }

    /// Returns true if the name denotes a directory.
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Unix permission bits, when the entry was made on a Unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attributes >> 16;
        (mode != 0).then_some(mode)
    }

    /// Offset of the first payload byte, once the local header has been read.
    pub fn data_offset(&self) -> Option<u64> {
        self.local_header_len.get().map(|len| self.offset + len)
    }
}
