//! Reading hand-built and damaged archives.
//!
//! These archives are assembled byte by byte so each test controls exactly
//! which records are present and what they contain.

mod common;

use std::io::{Cursor, Read};

use common::{RawEntry, RawZip, extra_field};
use zipkit::recovery::{ForwardScanner, ScanEvent};
use zipkit::{
    Archive, CompressionMethod, Error, OpenOptions, OpenStrategy, Priority, WriteOptions,
};

#[test]
fn test_unknown_extra_field_is_skipped() {
    let mut extra = extra_field(0xCAFE, &[1, 2, 3, 4, 5, 6]);
    // Extended timestamp after the unknown field must still be found
    extra.extend(extra_field(0x5455, &[0x01, 0x00, 0xF1, 0x53, 0x65]));

    let mut zip = RawZip::new();
    zip.push(RawEntry {
        extra,
        ..RawEntry::stored("odd.txt", b"payload")
    });
    let bytes = zip.finish(b"");

    for options in [OpenOptions::new(), OpenOptions::new().force_forward_scan(true)] {
        let archive = Archive::open_with_options(Cursor::new(bytes.clone()), options).unwrap();
        let entry = archive.entry("odd.txt").unwrap();
        assert_eq!(
            entry.last_modification.unwrap().as_unix_secs(),
            0x6553_F100
        );
        assert_eq!(archive.read_to_vec("odd.txt").unwrap(), b"payload");
    }
}

#[test]
fn test_streamed_entry_sizes_follow_descriptor() {
    let mut zip = RawZip::new();
    zip.push(RawEntry {
        descriptor: true,
        ..RawEntry::stored("stream.txt", b"streamed content")
    });
    zip.push(RawEntry::stored("after.txt", b"second"));
    let bytes = zip.finish(b"");

    let mut scanner = ForwardScanner::new(Cursor::new(bytes.clone()));
    let Some(ScanEvent::LocalEntry(entry)) = scanner.next_event().unwrap() else {
        panic!("expected a local entry first");
    };
    assert_eq!(entry.name, "stream.txt");
    assert!(!entry.sizes_known());
    assert_eq!(entry.compressed_size, 0);
    // Inline decompression is refused until the descriptor is found
    assert!(matches!(
        scanner.open_current(),
        Err(Error::StreamedEntry { name }) if name == "stream.txt"
    ));

    match scanner.next_event().unwrap() {
        Some(ScanEvent::DataDescriptor {
            entry_offset,
            descriptor,
        }) => {
            assert_eq!(entry_offset, 0);
            assert_eq!(descriptor.compressed_size, 16);
            assert_eq!(descriptor.uncompressed_size, 16);
            assert_eq!(descriptor.crc32, crc32fast::hash(b"streamed content"));
        }
        other => panic!("expected the descriptor, got {other:?}"),
    }
    let Some(ScanEvent::LocalEntry(next)) = scanner.next_event().unwrap() else {
        panic!("expected the second entry");
    };
    assert_eq!(next.name, "after.txt");

    // The façade applies descriptors, so scanned streamed entries decompress
    let archive = Archive::open_with_options(
        Cursor::new(bytes),
        OpenOptions::new().force_forward_scan(true),
    )
    .unwrap();
    let entry = archive.entry("stream.txt").unwrap();
    assert!(entry.sizes_known());
    assert_eq!(entry.uncompressed_size, 16);
    assert_eq!(archive.read_to_vec("stream.txt").unwrap(), b"streamed content");
}

#[test]
fn test_streamed_entry_without_descriptor_is_refused() {
    let mut zip = RawZip::new();
    zip.push(RawEntry {
        descriptor: true,
        ..RawEntry::stored("cut.txt", b"never finished")
    });
    let mut bytes = zip.finish(b"");
    // Cut inside the payload: no descriptor, no central directory
    bytes.truncate(30 + 7 + 5);

    let archive = Archive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.strategy(), OpenStrategy::ForwardScan);
    let entry = archive.entry("cut.txt").unwrap();
    assert!(!entry.sizes_known());
    assert!(matches!(
        archive.decompress(entry, Priority::Normal),
        Err(Error::StreamedEntry { .. })
    ));
}

#[test]
fn test_comment_past_end_falls_back_to_scan() {
    let mut zip = RawZip::new();
    zip.push(RawEntry::stored("one.txt", b"first"));
    zip.push(RawEntry::stored("two.txt", b"second"));
    let mut bytes = zip.finish(b"a comment");
    // Comment length now claims more bytes than the file holds
    let len = bytes.len();
    bytes[len - 11..len - 9].copy_from_slice(&500u16.to_le_bytes());

    let archive = Archive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.strategy(), OpenStrategy::ForwardScan);
    assert_eq!(archive.len(), 2);
    assert_eq!(archive.read_to_vec("one.txt").unwrap(), b"first");
    assert_eq!(archive.read_to_vec("two.txt").unwrap(), b"second");
}

#[test]
fn test_end_record_bytes_in_comment() {
    let mut comment = b"see PK\x05\x06".to_vec();
    comment.extend_from_slice(&[0u8; 18]);
    let (bytes, _) = common::create_archive_with_result(
        Some(WriteOptions::low_memory().comment(comment.clone())),
        &[("one.txt", b"first"), ("two.txt", b"second")],
    )
    .unwrap();

    let archive = Archive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.strategy(), OpenStrategy::CentralDirectory);
    assert_eq!(archive.len(), 2);
    assert_eq!(archive.comment().as_bytes(), comment);
    assert_eq!(archive.read_to_vec("two.txt").unwrap(), b"second");
}

#[test]
fn test_trailing_bytes_fall_back_to_scan() {
    let mut zip = RawZip::new();
    zip.push(RawEntry::stored("one.txt", b"first"));
    let mut bytes = zip.finish(b"");
    bytes.extend_from_slice(b"junk after the end record");

    let archive = Archive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.strategy(), OpenStrategy::ForwardScan);
    assert_eq!(archive.read_to_vec("one.txt").unwrap(), b"first");
}

#[test]
fn test_truncated_archive_lists_complete_entries() {
    let mut zip = RawZip::new();
    zip.push(RawEntry::stored("whole.txt", b"complete entry"));
    zip.push(RawEntry::stored("partial.txt", &[b'p'; 100]));
    let bytes = zip.finish(b"");
    let cut = 30 + 9 + 14 + 30 + 11 + 40;

    let archive = Archive::open(Cursor::new(bytes[..cut].to_vec())).unwrap();
    assert_eq!(archive.strategy(), OpenStrategy::ForwardScan);
    assert_eq!(archive.read_to_vec("whole.txt").unwrap(), b"complete entry");

    // The partial entry is listed but its payload runs past the end
    let partial = archive.entry("partial.txt").unwrap();
    let mut out = Vec::new();
    let err = archive
        .decompress(partial, Priority::Normal)
        .unwrap()
        .read_to_end(&mut out)
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[test]
fn test_no_records_is_an_error() {
    let err = Archive::open(Cursor::new(vec![0x55u8; 4096])).unwrap_err();
    assert!(matches!(err, Error::EocdNotFound { .. }), "{err}");
}

#[test]
fn test_unsupported_method_is_per_entry() {
    let mut zip = RawZip::new();
    zip.push(RawEntry {
        method: 12,
        ..RawEntry::stored("bzip2.bin", b"BZh91AY&SY")
    });
    zip.push(RawEntry::stored("plain.txt", b"plain"));
    let bytes = zip.finish(b"");

    let archive = Archive::open(Cursor::new(bytes)).unwrap();
    let entry = archive.entry("bzip2.bin").unwrap();
    assert_eq!(entry.method, CompressionMethod::Unsupported(12));
    let err = archive.decompress(entry, Priority::Normal).unwrap_err();
    assert!(err.is_unsupported());
    assert_eq!(err.method(), Some(12));
    assert_eq!(err.entry_name(), Some("bzip2.bin"));

    assert_eq!(archive.read_to_vec("plain.txt").unwrap(), b"plain");
}

#[test]
fn test_encrypted_entry_is_refused() {
    let mut zip = RawZip::new();
    zip.push(RawEntry {
        flags: 1,
        ..RawEntry::stored("secret.txt", &[0u8; 20])
    });
    let bytes = zip.finish(b"");
    let archive = Archive::open(Cursor::new(bytes)).unwrap();
    let entry = archive.entry("secret.txt").unwrap();
    assert!(entry.is_encrypted());
    assert!(matches!(
        archive.decompress(entry, Priority::Normal),
        Err(Error::EncryptedEntry { .. })
    ));
}

#[test]
fn test_corrupted_payload_fails_crc() {
    let mut zip = RawZip::new();
    zip.push(RawEntry::stored("data.txt", b"original bytes"));
    let mut bytes = zip.finish(b"");
    bytes[30 + 8] ^= 0xFF;

    let archive = Archive::open(Cursor::new(bytes.clone())).unwrap();
    let err = archive.read_to_vec("data.txt").unwrap_err();
    assert!(matches!(err, Error::CrcMismatch { .. }), "{err}");
    assert!(err.is_corruption());

    let lenient =
        Archive::open_with_options(Cursor::new(bytes), OpenOptions::new().verify_crc(false))
            .unwrap();
    assert_eq!(lenient.read_to_vec("data.txt").unwrap().len(), 14);
}

#[test]
fn test_cp437_names() {
    let mut zip = RawZip::new();
    zip.push(RawEntry {
        name: b"caf\x82.txt",
        ..RawEntry::stored("", b"x")
    });
    let bytes = zip.finish(b"");
    let archive = Archive::open(Cursor::new(bytes)).unwrap();
    let entry = &archive.entries()[0];
    assert_eq!(entry.name, "café.txt");
    assert_eq!(entry.name_raw, b"caf\x82.txt");
}

#[test]
fn test_hand_built_zip64() {
    let mut zip = RawZip::new();
    zip.push(RawEntry::stored("a.txt", b"alpha"));
    zip.push(RawEntry::stored("b.txt", b"beta"));
    let bytes = zip.finish_zip64();

    let archive = Archive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.strategy(), OpenStrategy::CentralDirectory);
    assert!(archive.is_zip64());
    assert_eq!(archive.len(), 2);
    assert_eq!(archive.read_to_vec("b.txt").unwrap(), b"beta");
}

#[test]
fn test_zip64_without_locator_is_terminal() {
    let mut zip = RawZip::new();
    zip.push(RawEntry::stored("a.txt", b"alpha"));
    let mut bytes = zip.finish_zip64();
    // Break the locator signature
    let locator = bytes.len() - 22 - 20;
    bytes[locator] = b'X';

    let err = Archive::open(Cursor::new(bytes)).unwrap_err();
    assert!(matches!(err, Error::Zip64LocatorNotFound), "{err}");
}

#[test]
fn test_unseekable_source_lists_but_requires_seek() {
    let bytes = common::create_archive(&[("x.txt", b"content of x")]).unwrap();
    let archive = Archive::open_unseekable(&bytes[..]).unwrap();
    assert_eq!(archive.strategy(), OpenStrategy::ForwardScan);
    let entry = archive.entry("x.txt").unwrap();
    assert_eq!(entry.uncompressed_size, 12);
    assert!(matches!(
        archive.decompress(entry, Priority::Normal),
        Err(Error::SeekRequired { .. })
    ));
}

#[test]
fn test_forward_scanner_reads_inline() {
    let bytes = common::create_archive(&[("one", b"1111"), ("two", b"2222")]).unwrap();
    let mut scanner = ForwardScanner::new(Cursor::new(bytes));
    let mut contents = Vec::new();
    let mut central = 0;
    while let Some(event) = scanner.next_event().unwrap() {
        match event {
            ScanEvent::LocalEntry(entry) => {
                let mut data = String::new();
                scanner
                    .open_current()
                    .unwrap()
                    .unwrap()
                    .read_to_string(&mut data)
                    .unwrap();
                contents.push((entry.name, data));
            }
            ScanEvent::CentralEntry(_) => central += 1,
            _ => {}
        }
    }
    contents.sort();
    assert_eq!(
        contents,
        [("one".into(), "1111".into()), ("two".into(), "2222".into())]
    );
    assert_eq!(central, 2);
}
