//! Forward archive scanning.
//!
//! [`ForwardScanner`] rebuilds an archive's structure from the front,
//! without the central directory. It reports each record as a [`ScanEvent`]
//! and can hand out the payload of the local entry it just reported, which
//! makes single-pass extraction from unseekable streams possible.

use std::io::{self, Read};

use super::scanner::{Signature, SignatureScanner};
use crate::format::reader::{read_u16_le, read_u32_le, skip_bytes};
use crate::format::records::{
    CentralDirectoryEntry, DataDescriptor, EndOfCentralDirectory, LocalFileHeader,
    Zip64EndOfCentralDirectory,
};
use crate::format::{CompressionMethod, ENCRYPTION_HEADER_LEN, RecordType};
use crate::read::{Entry, EntryReader, Priority};
use crate::{Error, Result};

/// Bounded view of the current entry's payload inside the scanned stream.
pub type PayloadReader<'a, R> = io::Take<&'a mut SignatureScanner<R>>;

/// A record discovered by [`ForwardScanner`].
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A local file header.
    LocalEntry(Entry),
    /// The data descriptor closing a streamed entry.
    DataDescriptor {
        /// Offset of the local header the descriptor belongs to.
        entry_offset: u64,
        /// Descriptor contents.
        descriptor: DataDescriptor,
    },
    /// A central directory entry.
    CentralEntry(Entry),
    /// The end of central directory record.
    EndOfCentralDirectory {
        /// Offset of the record.
        offset: u64,
        /// Parsed record.
        record: EndOfCentralDirectory,
    },
    /// The Zip64 end of central directory record.
    Zip64EndOfCentralDirectory {
        /// Offset of the record.
        offset: u64,
        /// Parsed record.
        record: Zip64EndOfCentralDirectory,
    },
}

#[derive(Debug, Clone, Copy)]
enum Pending {
    None,
    /// Known-size payload ending at this absolute offset.
    Payload { end: u64 },
    /// Payload of unknown size closed by a data descriptor.
    Descriptor { entry_offset: u64, data_start: u64 },
}

/// Sequential record scanner over any reader.
pub struct ForwardScanner<R> {
    scanner: SignatureScanner<R>,
    pending: Pending,
    current: Option<Entry>,
    stashed: Option<Signature>,
    verify_crc: bool,
}

impl<R: Read> ForwardScanner<R> {
    /// Creates a scanner starting at offset 0 of `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            scanner: SignatureScanner::new(reader),
            pending: Pending::None,
            current: None,
            stashed: None,
            verify_crc: true,
        }
    }

    /// Sets whether inline readers check CRC-32 at end of stream.
    pub fn verify_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    /// Absolute offset of the next unconsumed byte.
    pub fn position(&self) -> u64 {
        self.scanner.position()
    }

    /// Advances to the next record.
    ///
    /// Returns `Ok(None)` at end of stream. Records that fail to parse are
    /// logged and skipped; only errors from the underlying reader surface.
    pub fn next_event(&mut self) -> Result<Option<ScanEvent>> {
        self.current = None;
        match std::mem::replace(&mut self.pending, Pending::None) {
            Pending::None => {}
            Pending::Payload { end } => {
                let position = self.scanner.position();
                if position < end {
                    if let Err(e) = skip_bytes(&mut self.scanner, end - position) {
                        return truncated(e, position);
                    }
                }
            }
            Pending::Descriptor {
                entry_offset,
                data_start,
            } => {
                if let Some(descriptor) = self.find_descriptor(data_start)? {
                    return Ok(Some(ScanEvent::DataDescriptor {
                        entry_offset,
                        descriptor,
                    }));
                }
                log::warn!("data descriptor for entry at offset {entry_offset} not found");
            }
        }

        loop {
            let signature = match self.stashed.take() {
                Some(signature) => signature,
                None => match self.scanner.next_signature()? {
                    Some(signature) => signature,
                    None => return Ok(None),
                },
            };
            match self.read_record(signature) {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return truncated(e, signature.offset);
                }
                Err(e) => {
                    log::warn!(
                        "skipping unreadable {:?} record at offset {}: {e}",
                        signature.record_type,
                        signature.offset
                    );
                }
            }
        }
    }

    /// Opens the payload of the local entry returned by the last event.
    ///
    /// Returns `Ok(None)` when the last event was not a local entry or its
    /// payload was already opened. The reader must be dropped before the
    /// next call to [`next_event`](Self::next_event); unread payload bytes
    /// are skipped then.
    ///
    /// # Errors
    ///
    /// - [`Error::EncryptedEntry`] for encrypted entries
    /// - [`Error::StreamedEntry`] for entries whose sizes follow in a data
    ///   descriptor
    /// - [`Error::UnsupportedMethod`] for methods other than store and deflate
    pub fn open_current(&mut self) -> Result<Option<EntryReader<PayloadReader<'_, R>>>> {
        let Some(entry) = self.current.take() else {
            return Ok(None);
        };
        if entry.is_encrypted() {
            return Err(Error::EncryptedEntry { name: entry.name });
        }
        if entry.has_data_descriptor() {
            return Err(Error::StreamedEntry { name: entry.name });
        }
        if let CompressionMethod::Unsupported(method) = entry.method {
            return Err(Error::UnsupportedMethod {
                method,
                name: entry.name,
            });
        }
        let Pending::Payload { end } = self.pending else {
            return Ok(None);
        };

        let remaining = end.saturating_sub(self.scanner.position());
        let payload = (&mut self.scanner).take(remaining);
        EntryReader::new(payload, &entry, Priority::Normal, self.verify_crc).map(Some)
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.scanner.into_inner()
    }

    fn read_record(&mut self, signature: Signature) -> io::Result<Option<ScanEvent>> {
        let offset = signature.offset;
        match signature.record_type {
            RecordType::LocalFileHeader => {
                let header = LocalFileHeader::parse(&mut self.scanner)?;
                let entry = Entry::from_local(&header, offset);
                let data_start = self.scanner.position();
                if entry.is_encrypted() {
                    skip_bytes(&mut self.scanner, ENCRYPTION_HEADER_LEN)?;
                }
                self.pending = if entry.has_data_descriptor() {
                    Pending::Descriptor {
                        entry_offset: offset,
                        data_start,
                    }
                } else {
                    Pending::Payload {
                        end: data_start.saturating_add(entry.compressed_size),
                    }
                };
                self.current = Some(entry.clone());
                Ok(Some(ScanEvent::LocalEntry(entry)))
            }
            RecordType::CentralDirectory => {
                let record = CentralDirectoryEntry::parse(&mut self.scanner)?;
                Ok(Some(ScanEvent::CentralEntry(Entry::from_central(&record))))
            }
            RecordType::EndOfCentralDirectory => {
                let record = EndOfCentralDirectory::parse(&mut self.scanner)?;
                Ok(Some(ScanEvent::EndOfCentralDirectory { offset, record }))
            }
            RecordType::Zip64EndOfCentralDirectory => {
                let record = Zip64EndOfCentralDirectory::parse(&mut self.scanner)?;
                Ok(Some(ScanEvent::Zip64EndOfCentralDirectory { offset, record }))
            }
            RecordType::Zip64Locator => {
                skip_bytes(&mut self.scanner, 16)?;
                Ok(None)
            }
            RecordType::DigitalSignature => {
                let len = read_u16_le(&mut self.scanner)?;
                skip_bytes(&mut self.scanner, u64::from(len))?;
                Ok(None)
            }
            RecordType::ArchiveExtraData => {
                let len = read_u32_le(&mut self.scanner)?;
                skip_bytes(&mut self.scanner, u64::from(len))?;
                Ok(None)
            }
            RecordType::DataDescriptor => {
                log::debug!("ignoring data descriptor at offset {offset} outside a streamed entry");
                Ok(None)
            }
            RecordType::Unknown(code) => {
                log::debug!("ignoring unknown record type {code:#06x} at offset {offset}");
                Ok(None)
            }
        }
    }

    /// Searches for the descriptor closing a payload that began at `data_start`.
    ///
    /// A candidate is accepted only when its compressed size equals its
    /// distance from the payload start, which rejects `PK\x07\x08` byte
    /// sequences inside compressed data. A structural record seen first ends
    /// the search and is kept for the next event.
    fn find_descriptor(&mut self, data_start: u64) -> Result<Option<DataDescriptor>> {
        loop {
            let Some(signature) = self.scanner.next_signature()? else {
                return Ok(None);
            };
            match signature.record_type {
                RecordType::DataDescriptor => {}
                RecordType::LocalFileHeader
                | RecordType::CentralDirectory
                | RecordType::EndOfCentralDirectory
                | RecordType::Zip64EndOfCentralDirectory => {
                    self.stashed = Some(signature);
                    return Ok(None);
                }
                _ => continue,
            }

            let distance = signature.offset - data_start;
            let (short, long) = {
                let body = self.scanner.peek(DataDescriptor::LEN_64)?;
                let short = body
                    .get(..DataDescriptor::LEN_32)
                    .and_then(|b| <&[u8; DataDescriptor::LEN_32]>::try_from(b).ok())
                    .map(DataDescriptor::from_bytes_32);
                let long = body
                    .get(..DataDescriptor::LEN_64)
                    .and_then(|b| <&[u8; DataDescriptor::LEN_64]>::try_from(b).ok())
                    .map(DataDescriptor::from_bytes_64);
                (short, long)
            };

            if let Some(descriptor) = short.filter(|d| d.compressed_size == distance) {
                skip_bytes(&mut self.scanner, DataDescriptor::LEN_32 as u64)?;
                return Ok(Some(descriptor));
            }
            if let Some(descriptor) = long.filter(|d| d.compressed_size == distance) {
                skip_bytes(&mut self.scanner, DataDescriptor::LEN_64 as u64)?;
                return Ok(Some(descriptor));
            }
        }
    }
}

fn truncated(e: io::Error, offset: u64) -> Result<Option<ScanEvent>> {
    log::warn!("archive truncated in record at offset {offset}: {e}");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::flags;
    use crate::timestamp::DosDateTime;
    use std::io::Cursor;

    fn local(name: &str, data: &[u8], bits: u16) -> Vec<u8> {
        let streamed = bits & flags::DATA_DESCRIPTOR != 0;
        let header = LocalFileHeader {
            version_needed: 20,
            flags: bits,
            method: 0,
            modified: DosDateTime::default(),
            crc32: if streamed { 0 } else { crc32fast::hash(data) },
            compressed_size: if streamed { 0 } else { data.len() as u32 },
            uncompressed_size: if streamed { 0 } else { data.len() as u32 },
            file_name: name.as_bytes().to_vec(),
            extra: Vec::new(),
        };
        let mut out = Vec::new();
        header.write_to(&mut out).unwrap();
        out.extend_from_slice(data);
        if streamed {
            DataDescriptor {
                crc32: crc32fast::hash(data),
                compressed_size: data.len() as u64,
                uncompressed_size: data.len() as u64,
            }
            .write_to(&mut out, false)
            .unwrap();
        }
        out
    }

    fn collect(data: Vec<u8>) -> Vec<ScanEvent> {
        let mut scanner = ForwardScanner::new(Cursor::new(data));
        let mut events = Vec::new();
        while let Some(event) = scanner.next_event().unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_scans_local_entries_in_order() {
        let mut data = local("a.txt", b"first", 0);
        data.extend(local("b.txt", b"second", 0));

        let events = collect(data);
        let names: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::LocalEntry(entry) => Some(entry.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }

    #[test]
    fn test_payload_containing_signature_is_skipped() {
        // Stored payload that looks like a central directory signature
        let mut data = local("tricky", b"xxPK\x01\x02yy", 0);
        data.extend(local("next", b"z", 0));
        let events = collect(data);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, ScanEvent::LocalEntry(_))));
    }

    #[test]
    fn test_inline_read() {
        let mut data = local("a.txt", b"inline content", 0);
        data.extend(local("b.txt", b"more", 0));
        let mut scanner = ForwardScanner::new(Cursor::new(data));

        assert!(matches!(
            scanner.next_event().unwrap(),
            Some(ScanEvent::LocalEntry(_))
        ));
        let mut out = Vec::new();
        scanner
            .open_current()
            .unwrap()
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"inline content");
        // Only one open per entry
        assert!(scanner.open_current().unwrap().is_none());

        match scanner.next_event().unwrap() {
            Some(ScanEvent::LocalEntry(entry)) => assert_eq!(entry.name, "b.txt"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_partially_read_payload_is_skipped() {
        let mut data = local("a.txt", &[7u8; 1000], 0);
        data.extend(local("b.txt", b"x", 0));
        let mut scanner = ForwardScanner::new(Cursor::new(data));

        scanner.next_event().unwrap();
        let mut reader = scanner.open_current().unwrap().unwrap();
        let mut head = [0u8; 10];
        reader.read_exact(&mut head).unwrap();
        drop(reader);

        match scanner.next_event().unwrap() {
            Some(ScanEvent::LocalEntry(entry)) => assert_eq!(entry.name, "b.txt"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_streamed_entry_descriptor() {
        let mut data = local("s.bin", b"streamed payload", flags::DATA_DESCRIPTOR);
        data.extend(local("after", b"ok", 0));
        let mut scanner = ForwardScanner::new(Cursor::new(data));

        let Some(ScanEvent::LocalEntry(entry)) = scanner.next_event().unwrap() else {
            panic!("expected local entry");
        };
        assert!(!entry.sizes_known());
        // Sizes are unknown, so inline decompression is refused
        assert!(matches!(
            scanner.open_current(),
            Err(Error::StreamedEntry { .. })
        ));

        match scanner.next_event().unwrap() {
            Some(ScanEvent::DataDescriptor {
                entry_offset,
                descriptor,
            }) => {
                assert_eq!(entry_offset, 0);
                assert_eq!(descriptor.compressed_size, 16);
                assert_eq!(descriptor.crc32, crc32fast::hash(b"streamed payload"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            scanner.next_event().unwrap(),
            Some(ScanEvent::LocalEntry(_))
        ));
    }

    #[test]
    fn test_missing_descriptor_keeps_next_record() {
        let mut data = local("s.bin", b"abc", flags::DATA_DESCRIPTOR);
        // Drop the descriptor
        data.truncate(data.len() - 16);
        data.extend(local("next", b"n", 0));

        let events = collect(data);
        assert_eq!(events.len(), 2);
        match &events[1] {
            ScanEvent::LocalEntry(entry) => assert_eq!(entry.name, "next"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_encrypted_entry_refused_inline() {
        let mut payload = vec![0u8; 12];
        payload.extend_from_slice(b"secret");
        let data = local("enc", &payload, flags::ENCRYPTED);
        let mut scanner = ForwardScanner::new(Cursor::new(data));
        scanner.next_event().unwrap();
        assert!(matches!(
            scanner.open_current(),
            Err(Error::EncryptedEntry { .. })
        ));
        assert!(scanner.next_event().unwrap().is_none());
    }

    #[test]
    fn test_skips_signature_and_extra_data_records() {
        let mut data = local("a", b"1", 0);
        data.extend_from_slice(b"PK\x05\x05");
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(b"PK\x03");
        data.extend_from_slice(b"PK\x06\x08");
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[0, 0]);
        data.extend(local("b", b"2", 0));

        let events = collect(data);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_truncated_archive_ends_quietly() {
        let mut data = local("a", b"complete", 0);
        let tail = local("b", b"this payload is cut", 0);
        data.extend_from_slice(&tail[..tail.len() - 5]);
        let events = collect(data);
        assert_eq!(events.len(), 2);
    }
}
