//! ZIP format constants, record layouts, and low-level parsing utilities.
//!
//! Every ZIP record starts with `PK` followed by a two-byte type code. The
//! [`RecordType`] enum maps those codes; [`records`] decodes and encodes the
//! fixed layouts and [`extra`] handles the extensible extra-field area.

pub mod extra;
pub mod reader;
pub mod records;

/// First two bytes of every record signature.
pub const SIGNATURE_PREFIX: [u8; 2] = *b"PK";

/// Signature of a local file header (`PK\x03\x04`).
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
/// Signature of a central directory entry (`PK\x01\x02`).
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
/// Signature of the end of central directory record (`PK\x05\x06`).
pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;
/// Signature of the Zip64 end of central directory record (`PK\x06\x06`).
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
/// Signature of the Zip64 end of central directory locator (`PK\x06\x07`).
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
/// Signature of a data descriptor (`PK\x07\x08`).
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;

/// Fixed size of a local file header, signature included.
pub const LOCAL_FILE_HEADER_LEN: u64 = 30;
/// Fixed size of a central directory entry, signature included.
pub const CENTRAL_DIRECTORY_ENTRY_LEN: u64 = 46;
/// Fixed size of the end of central directory record, signature included.
pub const EOCD_LEN: u64 = 22;
/// Fixed size of the Zip64 end of central directory record, signature included.
pub const ZIP64_EOCD_LEN: u64 = 56;
/// Size of the Zip64 end of central directory locator, signature included.
pub const ZIP64_LOCATOR_LEN: u64 = 20;

/// Largest distance between the end of file and an EOCD signature:
/// the fixed record plus a maximal 65535-byte comment.
pub const MAX_EOCD_SEARCH: u64 = EOCD_LEN + u16::MAX as u64;

/// Length of the traditional encryption header preceding encrypted data.
pub const ENCRYPTION_HEADER_LEN: u64 = 12;

/// 16-bit field value meaning "see the Zip64 record".
pub const ZIP64_SENTINEL_16: u16 = 0xFFFF;
/// 32-bit field value meaning "see the Zip64 extra field or record".
pub const ZIP64_SENTINEL_32: u32 = 0xFFFF_FFFF;

/// Version needed to extract: deflate.
pub const VERSION_DEFLATE: u16 = 20;
/// Version needed to extract: Zip64.
pub const VERSION_ZIP64: u16 = 45;
/// Host system byte of "version made by": Unix.
pub const HOST_UNIX: u16 = 3;

/// General purpose bit flags.
pub mod flags {
    /// Entry data is encrypted.
    pub const ENCRYPTED: u16 = 1 << 0;
    /// CRC and sizes follow the data in a data descriptor.
    pub const DATA_DESCRIPTOR: u16 = 1 << 3;
    /// File name and comment are UTF-8.
    pub const UTF8: u16 = 1 << 11;
}

/// Record type identified by the two bytes after `PK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// `PK\x03\x04`
    LocalFileHeader,
    /// `PK\x01\x02`
    CentralDirectory,
    /// `PK\x05\x06`
    EndOfCentralDirectory,
    /// `PK\x06\x06`
    Zip64EndOfCentralDirectory,
    /// `PK\x06\x07`
    Zip64Locator,
    /// `PK\x07\x08`
    DataDescriptor,
    /// `PK\x05\x05`
    DigitalSignature,
    /// `PK\x06\x08`
    ArchiveExtraData,
    /// Any other type code.
    Unknown(u16),
}

impl RecordType {
    /// Maps a little-endian type code (the bytes after `PK`) to a record type.
    pub fn from_code(code: u16) -> Self {
        match code.to_le_bytes() {
            [0x03, 0x04] => Self::LocalFileHeader,
            [0x01, 0x02] => Self::CentralDirectory,
            [0x05, 0x06] => Self::EndOfCentralDirectory,
            [0x06, 0x06] => Self::Zip64EndOfCentralDirectory,
            [0x06, 0x07] => Self::Zip64Locator,
            [0x07, 0x08] => Self::DataDescriptor,
            [0x05, 0x05] => Self::DigitalSignature,
            [0x06, 0x08] => Self::ArchiveExtraData,
            _ => Self::Unknown(code),
        }
    }

    /// Returns the type code for this record type.
    pub fn code(self) -> u16 {
        let bytes = match self {
            Self::LocalFileHeader => [0x03, 0x04],
            Self::CentralDirectory => [0x01, 0x02],
            Self::EndOfCentralDirectory => [0x05, 0x06],
            Self::Zip64EndOfCentralDirectory => [0x06, 0x06],
            Self::Zip64Locator => [0x06, 0x07],
            Self::DataDescriptor => [0x07, 0x08],
            Self::DigitalSignature => [0x05, 0x05],
            Self::ArchiveExtraData => [0x06, 0x08],
            Self::Unknown(code) => return code,
        };
        u16::from_le_bytes(bytes)
    }
}

/// Compression method of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionMethod {
    /// Method 0: data stored as-is.
    Stored,
    /// Method 8: raw deflate.
    #[default]
    Deflated,
    /// Any method this crate cannot decode.
    Unsupported(u16),
}

impl CompressionMethod {
    /// Maps the raw header value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Stored,
            8 => Self::Deflated,
            other => Self::Unsupported(other),
        }
    }

    /// Returns the raw header value.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflated => 8,
            Self::Unsupported(other) => other,
        }
    }
}

/// Code page 437 mapping for bytes 0x80..=0xFF.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

/// Decodes a stored file name or comment.
///
/// With the UTF-8 flag the bytes are UTF-8 (invalid sequences replaced).
/// Without it, valid UTF-8 is still accepted since many tools write UTF-8
/// without setting the flag; anything else is decoded as code page 437.
pub fn decode_text(raw: &[u8], utf8_flag: bool) -> String {
    if utf8_flag {
        return String::from_utf8_lossy(raw).into_owned();
    }
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_owned(),
        Err(_) => raw
            .iter()
            .map(|&b| {
                if b < 0x80 {
                    char::from(b)
                } else {
                    CP437_HIGH[usize::from(b - 0x80)]
                }
            })
            .collect(),
    }
}
