//! Central directory location and parsing.
//!
//! This is the fast open path: find the end of central directory record by
//! scanning backward from the end of the source, follow it (and, when its
//! fields are saturated, the Zip64 locator and record) to the central
//! directory, then parse the table in one sequential pass.

use std::io::{self, BufReader, Read, Seek, SeekFrom};

use super::entry::Entry;
use crate::format::reader::read_u32_le;
use crate::format::records::{
    CentralDirectoryEntry, EndOfCentralDirectory, Zip64EndOfCentralDirectory, Zip64Locator,
};
use crate::format::{
    CENTRAL_DIRECTORY_SIGNATURE, EOCD_LEN, RecordType, ZIP64_EOCD_LEN, ZIP64_EOCD_SIGNATURE,
};
use crate::recovery::find_backward;
use crate::{Error, Result};

/// How far before the end record to look for the Zip64 locator. Writers put
/// it immediately before the end record; the slack tolerates padding.
const ZIP64_LOCATOR_SEARCH: u64 = 1024;

/// A parsed central directory.
#[derive(Debug, Clone)]
pub(crate) struct CentralDirectory {
    pub eocd: EndOfCentralDirectory,
    pub zip64: Option<Zip64EndOfCentralDirectory>,
    pub entries: Vec<Entry>,
}

/// Locates and parses the central directory of a seekable source.
///
/// Nothing outside the reader's position is modified on failure, so the
/// caller can fall back to another strategy.
pub(crate) fn locate<R: Read + Seek>(reader: &mut R, search_limit: u64) -> Result<CentralDirectory> {
    let size = reader.seek(SeekFrom::End(0))?;
    let (eocd_offset, eocd) = find_eocd(reader, size, search_limit)?;

    let (cd_offset, cd_size, expected, zip64) = if eocd.needs_zip64() {
        let record = read_zip64_record(reader, eocd_offset)?;
        (
            record.cd_offset,
            record.cd_size,
            record.total_entries,
            Some(record),
        )
    } else {
        (
            u64::from(eocd.cd_offset),
            u64::from(eocd.cd_size),
            u64::from(eocd.total_entries),
            None,
        )
    };

    if cd_offset >= size || cd_offset.saturating_add(cd_size) > size {
        return Err(Error::CentralDirectoryOutOfRange {
            offset: cd_offset,
            size,
        });
    }

    reader.seek(SeekFrom::Start(cd_offset))?;
    let mut table = BufReader::new(&mut *reader);
    let mut entries = Vec::with_capacity(expected.min(u64::from(u16::MAX)) as usize);
    loop {
        let signature = match read_u32_le(&mut table) {
            Ok(signature) => signature,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            break;
        }
        let record = CentralDirectoryEntry::parse(&mut table)?;
        entries.push(Entry::from_central(&record));
    }

    if entries.is_empty() && expected > 0 {
        return Err(Error::corrupt_record(
            cd_offset,
            format!("expected {expected} central directory entries, found none"),
        ));
    }
    if entries.len() as u64 != expected {
        log::warn!(
            "end of central directory announces {expected} entries, central directory holds {}",
            entries.len()
        );
    }

    Ok(CentralDirectory {
        eocd,
        zip64,
        entries,
    })
}

/// Finds the end of central directory record.
///
/// Signatures are tried from the end backward. A candidate must end exactly
/// at the end of the source, which rejects `PK\x05\x06` bytes inside an
/// archive comment whose own length field points elsewhere. Among those, the
/// first whose central directory ends right where the record begins (or
/// that defers to Zip64) wins; otherwise the highest one that ends at the
/// end of the source is used, which keeps archives with prepended data
/// readable.
fn find_eocd<R: Read + Seek>(
    reader: &mut R,
    size: u64,
    search_limit: u64,
) -> Result<(u64, EndOfCentralDirectory)> {
    let lower = size.saturating_sub(search_limit);
    let mut end = size;
    let mut fallback = None;
    let mut rejected = None;

    while let Some(offset) =
        find_backward(reader, end, RecordType::EndOfCentralDirectory, end - lower)?
    {
        reader.seek(SeekFrom::Start(offset + 4))?;
        match EndOfCentralDirectory::parse(reader) {
            Ok(eocd) if offset + EOCD_LEN + eocd.comment.len() as u64 == size => {
                let cd_end = u64::from(eocd.cd_offset) + u64::from(eocd.cd_size);
                if eocd.needs_zip64() || cd_end == offset {
                    return Ok((offset, eocd));
                }
                if fallback.is_none() {
                    fallback = Some((offset, eocd));
                }
            }
            Ok(_) => {
                log::debug!("end of central directory candidate at {offset} does not end the file");
                rejected = Some(offset);
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::debug!("end of central directory candidate at {offset} runs past the end");
                rejected = Some(offset);
            }
            Err(e) => return Err(e.into()),
        }
        // Next search only sees signatures starting before this one
        end = offset + 3;
    }

    match (fallback, rejected) {
        (Some(found), _) => Ok(found),
        (None, Some(offset)) => Err(Error::corrupt_record(
            offset,
            "end of central directory record does not end at the end of the file",
        )),
        (None, None) => Err(Error::EocdNotFound {
            searched: search_limit.min(size),
        }),
    }
}

fn read_zip64_record<R: Read + Seek>(
    reader: &mut R,
    eocd_offset: u64,
) -> Result<Zip64EndOfCentralDirectory> {
    let locator_offset = find_backward(
        reader,
        eocd_offset,
        RecordType::Zip64Locator,
        ZIP64_LOCATOR_SEARCH,
    )?
    .ok_or(Error::Zip64LocatorNotFound)?;

    reader.seek(SeekFrom::Start(locator_offset + 4))?;
    let locator =
        Zip64Locator::parse(reader).map_err(|e| invalid(locator_offset, e.to_string()))?;

    let offset = locator.zip64_eocd_offset;
    if offset.saturating_add(ZIP64_EOCD_LEN) > locator_offset {
        return Err(invalid(offset, "record offset lies past its locator".into()));
    }

    reader.seek(SeekFrom::Start(offset))?;
    let signature = read_u32_le(reader).map_err(|e| invalid(offset, e.to_string()))?;
    if signature != ZIP64_EOCD_SIGNATURE {
        return Err(invalid(
            offset,
            format!("expected signature {ZIP64_EOCD_SIGNATURE:#010x}, found {signature:#010x}"),
        ));
    }
    Zip64EndOfCentralDirectory::parse(reader).map_err(|e| invalid(offset, e.to_string()))
}

fn invalid(offset: u64, reason: String) -> Error {
    Error::Zip64RecordInvalid { offset, reason }
}
