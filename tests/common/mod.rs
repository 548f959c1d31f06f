//! Shared test utilities for integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::{Cursor, Read};

use rand::{RngCore, SeedableRng};
use zipkit::{Archive, BytesSource, Priority, Timestamp, WriteOptions, WriteResult, ZipWriter};

/// Fixed modification time so archives are reproducible.
pub fn fixed_time() -> Timestamp {
    Timestamp::from_unix_secs(1_700_000_000).unwrap()
}

/// Options small enough for tests: two threads at the minimum budget.
pub fn test_options() -> WriteOptions {
    WriteOptions::new().threads(2)
}

/// Writes `entries` to an in-memory archive.
///
/// Returns both the archive bytes and the WriteResult.
pub fn create_archive_with_result(
    options: Option<WriteOptions>,
    entries: &[(&str, &[u8])],
) -> zipkit::Result<(Vec<u8>, WriteResult)> {
    let options = options.unwrap_or_else(test_options);
    let mut writer = ZipWriter::start(Cursor::new(Vec::new()), options)?;
    for (name, data) in entries {
        let source = BytesSource::new(data.to_vec()).with_modified(fixed_time());
        writer.submit(source, *name)?;
    }
    let (result, cursor) = writer.finish_into_inner()?;
    Ok((cursor.into_inner(), result))
}

/// Writes `entries` with default test options.
pub fn create_archive(entries: &[(&str, &[u8])]) -> zipkit::Result<Vec<u8>> {
    create_archive_with_result(None, entries).map(|(bytes, _)| bytes)
}

/// Decompresses every entry, in listing order.
pub fn read_all(archive: &Archive) -> Vec<(String, Vec<u8>)> {
    archive
        .entries()
        .iter()
        .map(|entry| {
            let mut data = Vec::new();
            archive
                .decompress(entry, Priority::Normal)
                .unwrap()
                .read_to_end(&mut data)
                .unwrap();
            (entry.name.clone(), data)
        })
        .collect()
}

/// Deterministic incompressible bytes.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rngs::StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

/// Bytes that deflate well.
pub fn text_bytes(len: usize) -> Vec<u8> {
    b"All work and no play makes Jack a dull boy. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Builder for hand-made archives, byte by byte.
///
/// Records are laid out exactly as pushed; offsets for the central
/// directory are the positions where local headers were pushed.
#[derive(Default)]
pub struct RawZip {
    pub bytes: Vec<u8>,
    central: Vec<u8>,
    count: u16,
}

/// One stored entry for [`RawZip`].
pub struct RawEntry<'a> {
    pub name: &'a [u8],
    pub data: &'a [u8],
    pub method: u16,
    pub flags: u16,
    pub extra: Vec<u8>,
    /// Write a signed data descriptor and zero the header CRC and sizes.
    pub descriptor: bool,
}

impl<'a> RawEntry<'a> {
    pub fn stored(name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name: name.as_bytes(),
            data,
            method: 0,
            flags: 0,
            extra: Vec::new(),
            descriptor: false,
        }
    }
}

fn u16le(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn u32le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn u64le(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// An extra-field record.
pub fn extra_field(id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    u16le(&mut out, id);
    u16le(&mut out, payload.len() as u16);
    out.extend_from_slice(payload);
    out
}

impl RawZip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a local header and payload, and queues the central record.
    pub fn push(&mut self, entry: RawEntry<'_>) -> &mut Self {
        let offset = self.bytes.len() as u32;
        let crc = crc32fast::hash(entry.data);
        let size = entry.data.len() as u32;
        let flags = entry.flags | if entry.descriptor { 1 << 3 } else { 0 };
        let (h_crc, h_size) = if entry.descriptor { (0, 0) } else { (crc, size) };

        let out = &mut self.bytes;
        out.extend_from_slice(b"PK\x03\x04");
        u16le(out, 20);
        u16le(out, flags);
        u16le(out, entry.method);
        u16le(out, 0); // time
        u16le(out, 0x5721); // date
        u32le(out, h_crc);
        u32le(out, h_size);
        u32le(out, h_size);
        u16le(out, entry.name.len() as u16);
        u16le(out, entry.extra.len() as u16);
        out.extend_from_slice(entry.name);
        out.extend_from_slice(&entry.extra);
        out.extend_from_slice(entry.data);
        if entry.descriptor {
            out.extend_from_slice(b"PK\x07\x08");
            u32le(out, crc);
            u32le(out, size);
            u32le(out, size);
        }

        let cd = &mut self.central;
        cd.extend_from_slice(b"PK\x01\x02");
        u16le(cd, 20);
        u16le(cd, 20);
        u16le(cd, flags);
        u16le(cd, entry.method);
        u16le(cd, 0);
        u16le(cd, 0x5721);
        u32le(cd, crc);
        u32le(cd, size);
        u32le(cd, size);
        u16le(cd, entry.name.len() as u16);
        u16le(cd, entry.extra.len() as u16);
        u16le(cd, 0); // comment
        u16le(cd, 0); // disk
        u16le(cd, 0); // internal
        u32le(cd, 0o100644 << 16);
        u32le(cd, offset);
        cd.extend_from_slice(entry.name);
        cd.extend_from_slice(&entry.extra);
        self.count += 1;
        self
    }

    /// Appends the central directory and a plain end record.
    pub fn finish(mut self, comment: &[u8]) -> Vec<u8> {
        let cd_offset = self.bytes.len() as u32;
        let cd_size = self.central.len() as u32;
        self.bytes.extend_from_slice(&self.central);
        let out = &mut self.bytes;
        out.extend_from_slice(b"PK\x05\x06");
        u16le(out, 0);
        u16le(out, 0);
        u16le(out, self.count);
        u16le(out, self.count);
        u32le(out, cd_size);
        u32le(out, cd_offset);
        u16le(out, comment.len() as u16);
        out.extend_from_slice(comment);
        self.bytes
    }

    /// Appends the central directory, a Zip64 end record and locator, and
    /// an end record whose fields are all saturated.
    pub fn finish_zip64(mut self) -> Vec<u8> {
        let cd_offset = self.bytes.len() as u64;
        let cd_size = self.central.len() as u64;
        self.bytes.extend_from_slice(&self.central);
        let zip64_offset = self.bytes.len() as u64;
        let count = u64::from(self.count);

        let out = &mut self.bytes;
        out.extend_from_slice(b"PK\x06\x06");
        u64le(out, 44);
        u16le(out, 45);
        u16le(out, 45);
        u32le(out, 0);
        u32le(out, 0);
        u64le(out, count);
        u64le(out, count);
        u64le(out, cd_size);
        u64le(out, cd_offset);

        out.extend_from_slice(b"PK\x06\x07");
        u32le(out, 0);
        u64le(out, zip64_offset);
        u32le(out, 1);

        out.extend_from_slice(b"PK\x05\x06");
        u16le(out, 0xFFFF);
        u16le(out, 0xFFFF);
        u16le(out, 0xFFFF);
        u16le(out, 0xFFFF);
        u32le(out, 0xFFFF_FFFF);
        u32le(out, 0xFFFF_FFFF);
        u16le(out, 0);
        self.bytes
    }
}
