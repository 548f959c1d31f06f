//! Property-based tests using proptest.
//!
//! These tests check invariants of the reader and writer on randomly
//! generated archives and inputs.

mod common;

use proptest::prelude::*;
use std::io::Cursor;
use zipkit::format::RecordType;
use zipkit::recovery::{SignatureScanner, find_backward};
use zipkit::{Archive, CompressionMethod, DosDateTime, OpenOptions, OpenStrategy, Timestamp};

/// Strategy for entry names: 1-3 components, no duplicates handled by caller.
fn name_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-zA-Z0-9][a-zA-Z0-9_.-]{0,9}", 1..4).prop_map(|p| p.join("/"))
}

/// Entries with unique names and small payloads.
fn entries_strategy() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    proptest::collection::btree_map(
        name_strategy(),
        proptest::collection::vec(any::<u8>(), 0..2048),
        0..8,
    )
    .prop_map(|map| map.into_iter().collect())
}

fn borrow(entries: &[(String, Vec<u8>)]) -> Vec<(&str, &[u8])> {
    entries
        .iter()
        .map(|(n, d)| (n.as_str(), d.as_slice()))
        .collect()
}

proptest! {
    /// DOS packing keeps every even second inside its range.
    #[test]
    fn dos_time_roundtrip(secs in 315_532_800i64..=4_354_819_198) {
        let ts = Timestamp::from_unix_secs(secs).unwrap();
        let decoded = DosDateTime::from_timestamp(ts).to_timestamp().unwrap();
        prop_assert_eq!(decoded.as_unix_secs(), secs - secs % 2);
    }

    /// Any packed pair either decodes or is rejected, never panics.
    #[test]
    fn dos_decode_total(date in any::<u16>(), time in any::<u16>()) {
        if let Some(ts) = DosDateTime::new(date, time).to_timestamp() {
            prop_assert_eq!(DosDateTime::from_timestamp(ts), DosDateTime::new(date, time));
        }
    }

    /// A signature planted in noise is found at its offset by both scan
    /// directions.
    #[test]
    fn planted_signature_is_found(
        noise in proptest::collection::vec(any::<u8>().prop_filter("no P", |b| *b != b'P'), 0..9000),
        at in any::<prop::sample::Index>(),
    ) {
        let at = at.index(noise.len() + 1);
        let mut data = noise[..at].to_vec();
        data.extend_from_slice(b"PK\x03\x04");
        data.extend_from_slice(&noise[at..]);

        let mut scanner = SignatureScanner::new(&data[..]);
        let found = scanner.next_signature().unwrap().unwrap();
        prop_assert_eq!(found.offset, at as u64);
        prop_assert_eq!(found.record_type, RecordType::LocalFileHeader);
        prop_assert!(scanner.next_signature().unwrap().is_none());

        let mut cursor = Cursor::new(&data);
        let back = find_backward(
            &mut cursor,
            data.len() as u64,
            RecordType::LocalFileHeader,
            u64::MAX,
        )
        .unwrap();
        prop_assert_eq!(back, Some(at as u64));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Whatever is written reads back byte-for-byte via the central directory.
    #[test]
    fn written_archives_read_back(entries in entries_strategy(), stored in any::<bool>()) {
        let method = if stored { CompressionMethod::Stored } else { CompressionMethod::Deflated };
        let options = common::test_options().method(method);
        let (bytes, result) =
            common::create_archive_with_result(Some(options), &borrow(&entries)).unwrap();
        prop_assert_eq!(result.entries_written, entries.len());

        let archive = Archive::open(Cursor::new(bytes)).unwrap();
        prop_assert_eq!(archive.strategy(), OpenStrategy::CentralDirectory);
        prop_assert_eq!(common::read_all(&archive), entries);
    }

    /// The forward scan finds the same entries as the central directory.
    #[test]
    fn scan_matches_central_directory(entries in entries_strategy(), descriptors in any::<bool>()) {
        let options = common::test_options().data_descriptors(descriptors);
        let (bytes, _) =
            common::create_archive_with_result(Some(options), &borrow(&entries)).unwrap();

        let central = Archive::open(Cursor::new(bytes.clone())).unwrap();
        let scanned = Archive::open_with_options(
            Cursor::new(bytes),
            OpenOptions::new().force_forward_scan(true),
        )
        .unwrap();

        let key = |a: &Archive| {
            let mut v: Vec<_> = a
                .entries()
                .iter()
                .map(|e| (e.name.clone(), e.crc32, e.compressed_size, e.uncompressed_size))
                .collect();
            v.sort();
            v
        };
        prop_assert_eq!(key(&central), key(&scanned));
    }

    /// Opening arbitrary bytes never panics.
    #[test]
    fn arbitrary_bytes_do_not_panic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = Archive::open(Cursor::new(data.clone()));
        let _ = Archive::open_unseekable(&data[..]);
    }

    /// Truncating a valid archive anywhere still opens or fails cleanly, and
    /// every entry that opens either decompresses correctly or reports an error.
    #[test]
    fn truncation_never_panics(cut in 0usize..4096) {
        let entries = vec![
            ("a.txt".to_string(), common::text_bytes(1500)),
            ("b.bin".to_string(), common::random_bytes(900, 7)),
        ];
        let bytes = common::create_archive(&borrow(&entries)).unwrap();
        let cut = cut.min(bytes.len());
        if let Ok(archive) = Archive::open(Cursor::new(bytes[..cut].to_vec())) {
            for entry in archive.entries() {
                if let Ok(data) = archive.read_to_vec(&entry.name) {
                    let expected = entries.iter().find(|(n, _)| *n == entry.name).map(|(_, d)| d);
                    prop_assert_eq!(Some(&data), expected);
                }
            }
        }
    }
}
