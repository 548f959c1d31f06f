//! Fuzz target for Archive::open with arbitrary byte input.
//!
//! Exercises the central directory locator, the forward-scan fallback and
//! the per-entry decoders with malformed or adversarial input. Any panic or
//! hang is a bug.
//!
//! Run with: cargo +nightly fuzz run archive_open

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::{Cursor, Read};
use zipkit::{Archive, Priority};

fuzz_target!(|data: &[u8]| {
    let cursor = Cursor::new(data.to_vec());
    let Ok(archive) = Archive::open(cursor) else {
        return;
    };

    for entry in archive.entries() {
        let _ = entry.name.as_str();
        let _ = entry.uncompressed_size;
        let _ = entry.crc32;

        // Bound the work per entry so decompression bombs do not look like hangs
        if let Ok(reader) = archive.decompress(entry, Priority::Normal) {
            let mut sink = Vec::new();
            let _ = reader.take(1 << 20).read_to_end(&mut sink);
        }
    }

    // The streaming path must also survive the same bytes
    let _ = Archive::open_unseekable(Cursor::new(data));
});
