//! Fixed-layout ZIP records.
//!
//! Each `parse` function expects the reader to be positioned just after the
//! record's 4-byte signature, since signatures are consumed by the scanner
//! that found them. Each `write_to` function emits the signature as well.

use std::io::{self, Read, Write};

use super::reader::{
    read_bytes, read_u16_le, read_u32_le, read_u64_le, skip_bytes, write_u16_le, write_u32_le,
    write_u64_le,
};
use super::{
    CENTRAL_DIRECTORY_ENTRY_LEN, CENTRAL_DIRECTORY_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE,
    EOCD_SIGNATURE, LOCAL_FILE_HEADER_LEN, LOCAL_FILE_HEADER_SIGNATURE, ZIP64_EOCD_LEN,
    ZIP64_EOCD_SIGNATURE, ZIP64_LOCATOR_SIGNATURE, ZIP64_SENTINEL_16, ZIP64_SENTINEL_32,
};
use crate::timestamp::DosDateTime;

/// Local file header (`PK\x03\x04`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalFileHeader {
    /// Version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flags.
    pub flags: u16,
    /// Raw compression method.
    pub method: u16,
    /// Last modification date/time.
    pub modified: DosDateTime,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compressed size (32-bit field, may be a Zip64 sentinel).
    pub compressed_size: u32,
    /// Uncompressed size (32-bit field, may be a Zip64 sentinel).
    pub uncompressed_size: u32,
    /// Raw file name bytes.
    pub file_name: Vec<u8>,
    /// Raw extra-field area.
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Parses the header body following the signature.
    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        let version_needed = read_u16_le(r)?;
        let flags = read_u16_le(r)?;
        let method = read_u16_le(r)?;
        let time = read_u16_le(r)?;
        let date = read_u16_le(r)?;
        let crc32 = read_u32_le(r)?;
        let compressed_size = read_u32_le(r)?;
        let uncompressed_size = read_u32_le(r)?;
        let name_len = read_u16_le(r)?;
        let extra_len = read_u16_le(r)?;
        let file_name = read_bytes(r, usize::from(name_len))?;
        let extra = read_bytes(r, usize::from(extra_len))?;

        Ok(Self {
            version_needed,
            flags,
            method,
            modified: DosDateTime::new(date, time),
            crc32,
            compressed_size,
            uncompressed_size,
            file_name,
            extra,
        })
    }

    /// Total header length: fixed part, name, and extra area.
    pub fn header_len(&self) -> u64 {
        LOCAL_FILE_HEADER_LEN + self.file_name.len() as u64 + self.extra.len() as u64
    }

    /// Writes the header including its signature.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32_le(w, LOCAL_FILE_HEADER_SIGNATURE)?;
        write_u16_le(w, self.version_needed)?;
        write_u16_le(w, self.flags)?;
        write_u16_le(w, self.method)?;
        write_u16_le(w, self.modified.time)?;
        write_u16_le(w, self.modified.date)?;
        write_u32_le(w, self.crc32)?;
        write_u32_le(w, self.compressed_size)?;
        write_u32_le(w, self.uncompressed_size)?;
        write_u16_le(w, field_len(&self.file_name)?)?;
        write_u16_le(w, field_len(&self.extra)?)?;
        w.write_all(&self.file_name)?;
        w.write_all(&self.extra)
    }
}

/// Central directory entry (`PK\x01\x02`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CentralDirectoryEntry {
    /// Version made by (high byte: host system).
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flags.
    pub flags: u16,
    /// Raw compression method.
    pub method: u16,
    /// Last modification date/time.
    pub modified: DosDateTime,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compressed size (32-bit field, may be a Zip64 sentinel).
    pub compressed_size: u32,
    /// Uncompressed size (32-bit field, may be a Zip64 sentinel).
    pub uncompressed_size: u32,
    /// Disk number where the entry starts.
    pub disk_start: u16,
    /// Internal file attributes.
    pub internal_attributes: u16,
    /// External file attributes (host dependent).
    pub external_attributes: u32,
    /// Offset of the local header (may be a Zip64 sentinel).
    pub local_header_offset: u32,
    /// Raw file name bytes.
    pub file_name: Vec<u8>,
    /// Raw extra-field area.
    pub extra: Vec<u8>,
    /// Raw comment bytes.
    pub comment: Vec<u8>,
}

impl CentralDirectoryEntry {
    /// Parses the entry body following the signature.
    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        let version_made_by = read_u16_le(r)?;
        let version_needed = read_u16_le(r)?;
        let flags = read_u16_le(r)?;
        let method = read_u16_le(r)?;
        let time = read_u16_le(r)?;
        let date = read_u16_le(r)?;
        let crc32 = read_u32_le(r)?;
        let compressed_size = read_u32_le(r)?;
        let uncompressed_size = read_u32_le(r)?;
        let name_len = read_u16_le(r)?;
        let extra_len = read_u16_le(r)?;
        let comment_len = read_u16_le(r)?;
        let disk_start = read_u16_le(r)?;
        let internal_attributes = read_u16_le(r)?;
        let external_attributes = read_u32_le(r)?;
        let local_header_offset = read_u32_le(r)?;
        let file_name = read_bytes(r, usize::from(name_len))?;
        let extra = read_bytes(r, usize::from(extra_len))?;
        let comment = read_bytes(r, usize::from(comment_len))?;

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            method,
            modified: DosDateTime::new(date, time),
            crc32,
            compressed_size,
            uncompressed_size,
            disk_start,
            internal_attributes,
            external_attributes,
            local_header_offset,
            file_name,
            extra,
            comment,
        })
    }

    /// Total record length including variable fields.
    pub fn record_len(&self) -> u64 {
        CENTRAL_DIRECTORY_ENTRY_LEN
            + self.file_name.len() as u64
            + self.extra.len() as u64
            + self.comment.len() as u64
    }

    /// Writes the entry including its signature.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32_le(w, CENTRAL_DIRECTORY_SIGNATURE)?;
        write_u16_le(w, self.version_made_by)?;
        write_u16_le(w, self.version_needed)?;
        write_u16_le(w, self.flags)?;
        write_u16_le(w, self.method)?;
        write_u16_le(w, self.modified.time)?;
        write_u16_le(w, self.modified.date)?;
        write_u32_le(w, self.crc32)?;
        write_u32_le(w, self.compressed_size)?;
        write_u32_le(w, self.uncompressed_size)?;
        write_u16_le(w, field_len(&self.file_name)?)?;
        write_u16_le(w, field_len(&self.extra)?)?;
        write_u16_le(w, field_len(&self.comment)?)?;
        write_u16_le(w, self.disk_start)?;
        write_u16_le(w, self.internal_attributes)?;
        write_u32_le(w, self.external_attributes)?;
        write_u32_le(w, self.local_header_offset)?;
        w.write_all(&self.file_name)?;
        w.write_all(&self.extra)?;
        w.write_all(&self.comment)
    }
}

/// End of central directory record (`PK\x05\x06`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndOfCentralDirectory {
    /// Number of this disk.
    pub disk_number: u16,
    /// Disk where the central directory starts.
    pub disk_with_cd: u16,
    /// Central directory entries on this disk.
    pub entries_this_disk: u16,
    /// Total central directory entries.
    pub total_entries: u16,
    /// Size of the central directory in bytes.
    pub cd_size: u32,
    /// Offset of the central directory.
    pub cd_offset: u32,
    /// Archive comment.
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Parses the record body following the signature.
    ///
    /// A comment length pointing past the end of the source fails with
    /// `UnexpectedEof`.
    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        let disk_number = read_u16_le(r)?;
        let disk_with_cd = read_u16_le(r)?;
        let entries_this_disk = read_u16_le(r)?;
        let total_entries = read_u16_le(r)?;
        let cd_size = read_u32_le(r)?;
        let cd_offset = read_u32_le(r)?;
        let comment_len = read_u16_le(r)?;
        let comment = read_bytes(r, usize::from(comment_len))?;

        Ok(Self {
            disk_number,
            disk_with_cd,
            entries_this_disk,
            total_entries,
            cd_size,
            cd_offset,
            comment,
        })
    }

    /// Returns true if any field holds its sentinel, meaning the real value
    /// lives in the Zip64 end of central directory record.
    pub fn needs_zip64(&self) -> bool {
        self.disk_number == ZIP64_SENTINEL_16
            || self.disk_with_cd == ZIP64_SENTINEL_16
            || self.entries_this_disk == ZIP64_SENTINEL_16
            || self.total_entries == ZIP64_SENTINEL_16
            || self.cd_size == ZIP64_SENTINEL_32
            || self.cd_offset == ZIP64_SENTINEL_32
    }

    /// Writes the record including its signature.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32_le(w, EOCD_SIGNATURE)?;
        write_u16_le(w, self.disk_number)?;
        write_u16_le(w, self.disk_with_cd)?;
        write_u16_le(w, self.entries_this_disk)?;
        write_u16_le(w, self.total_entries)?;
        write_u32_le(w, self.cd_size)?;
        write_u32_le(w, self.cd_offset)?;
        write_u16_le(w, field_len(&self.comment)?)?;
        w.write_all(&self.comment)
    }
}

/// Zip64 end of central directory record (`PK\x06\x06`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Zip64EndOfCentralDirectory {
    /// Version made by.
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// Number of this disk.
    pub disk_number: u32,
    /// Disk where the central directory starts.
    pub disk_with_cd: u32,
    /// Central directory entries on this disk.
    pub entries_this_disk: u64,
    /// Total central directory entries.
    pub total_entries: u64,
    /// Size of the central directory in bytes.
    pub cd_size: u64,
    /// Offset of the central directory.
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    /// Parses the record body following the signature, skipping any
    /// extensible data declared by the size field.
    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        let record_size = read_u64_le(r)?;
        let fixed = ZIP64_EOCD_LEN - 12;
        if record_size < fixed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Zip64 end record declares {record_size} bytes, minimum is {fixed}"),
            ));
        }
        let record = Self {
            version_made_by: read_u16_le(r)?,
            version_needed: read_u16_le(r)?,
            disk_number: read_u32_le(r)?,
            disk_with_cd: read_u32_le(r)?,
            entries_this_disk: read_u64_le(r)?,
            total_entries: read_u64_le(r)?,
            cd_size: read_u64_le(r)?,
            cd_offset: read_u64_le(r)?,
        };
        skip_bytes(r, record_size - fixed)?;
        Ok(record)
    }

    /// Writes the record including its signature, without extensible data.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32_le(w, ZIP64_EOCD_SIGNATURE)?;
        write_u64_le(w, ZIP64_EOCD_LEN - 12)?;
        write_u16_le(w, self.version_made_by)?;
        write_u16_le(w, self.version_needed)?;
        write_u32_le(w, self.disk_number)?;
        write_u32_le(w, self.disk_with_cd)?;
        write_u64_le(w, self.entries_this_disk)?;
        write_u64_le(w, self.total_entries)?;
        write_u64_le(w, self.cd_size)?;
        write_u64_le(w, self.cd_offset)
    }
}

/// Zip64 end of central directory locator (`PK\x06\x07`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Zip64Locator {
    /// Disk holding the Zip64 end record.
    pub disk_with_zip64_eocd: u32,
    /// Offset of the Zip64 end record.
    pub zip64_eocd_offset: u64,
    /// Total number of disks.
    pub total_disks: u32,
}

impl Zip64Locator {
    /// Parses the 16-byte locator body following the signature.
    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            disk_with_zip64_eocd: read_u32_le(r)?,
            zip64_eocd_offset: read_u64_le(r)?,
            total_disks: read_u32_le(r)?,
        })
    }

    /// Writes the locator including its signature.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32_le(w, ZIP64_LOCATOR_SIGNATURE)?;
        write_u32_le(w, self.disk_with_zip64_eocd)?;
        write_u64_le(w, self.zip64_eocd_offset)?;
        write_u32_le(w, self.total_disks)
    }
}

/// Data descriptor (`PK\x07\x08`) trailing a streamed entry's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDescriptor {
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compressed size.
    pub compressed_size: u64,
    /// Uncompressed size.
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Length of the 32-bit form without signature.
    pub const LEN_32: usize = 12;
    /// Length of the Zip64 form without signature.
    pub const LEN_64: usize = 20;

    /// Decodes the 32-bit form from its body bytes.
    pub fn from_bytes_32(body: &[u8; Self::LEN_32]) -> Self {
        let word = |i: usize| u32::from_le_bytes([body[i], body[i + 1], body[i + 2], body[i + 3]]);
        Self {
            crc32: word(0),
            compressed_size: u64::from(word(4)),
            uncompressed_size: u64::from(word(8)),
        }
    }

    /// Decodes the Zip64 form from its body bytes.
    pub fn from_bytes_64(body: &[u8; Self::LEN_64]) -> Self {
        let mut wide = [0u8; 8];
        wide.copy_from_slice(&body[4..12]);
        let compressed_size = u64::from_le_bytes(wide);
        wide.copy_from_slice(&body[12..20]);
        Self {
            crc32: u32::from_le_bytes([body[0], body[1], body[2], body[3]]),
            compressed_size,
            uncompressed_size: u64::from_le_bytes(wide),
        }
    }

    /// Writes the descriptor with its signature, choosing the Zip64 form when
    /// either size needs it.
    pub fn write_to<W: Write>(&self, w: &mut W, zip64: bool) -> io::Result<()> {
        write_u32_le(w, DATA_DESCRIPTOR_SIGNATURE)?;
        write_u32_le(w, self.crc32)?;
        if zip64 {
            write_u64_le(w, self.compressed_size)?;
            write_u64_le(w, self.uncompressed_size)
        } else {
            write_u32_le(w, self.compressed_size as u32)?;
            write_u32_le(w, self.uncompressed_size as u32)
        }
    }
}

fn field_len(bytes: &[u8]) -> io::Result<u16> {
    u16::try_from(bytes.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("variable field of {} bytes exceeds 65535", bytes.len()),
        )
    })
}
