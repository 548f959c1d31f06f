//! Signature-driven discovery of archive structure.
//!
//! The central directory is the normal way into a ZIP archive, but it sits
//! at the very end and is the first thing lost when a download is cut
//! short. This module reads archives the other way around:
//!
//! - [`SignatureScanner`] finds `PK` record signatures in a byte stream,
//!   and [`find_backward`] finds the last one of a given type near the end
//!   of a seekable source.
//! - [`ForwardScanner`] walks an archive from the front, reporting local
//!   headers, data descriptors and central directory records as it meets
//!   them. It needs nothing but [`std::io::Read`], so it also serves
//!   streamed archives.
//!
//! # Example
//!
//! ```rust
//! use std::io::{Cursor, Read};
//! use zipkit::recovery::{ForwardScanner, ScanEvent};
//! use zipkit::{BytesSource, WriteOptions, ZipWriter};
//!
//! let mut writer = ZipWriter::start(Cursor::new(Vec::new()), WriteOptions::low_memory())?;
//! writer.submit(BytesSource::new(b"streamed".to_vec()), "a.txt")?;
//! let (_result, bytes) = writer.finish_into_inner()?;
//!
//! let mut scanner = ForwardScanner::new(Cursor::new(bytes.into_inner()));
//! while let Some(event) = scanner.next_event()? {
//!     if let ScanEvent::LocalEntry(entry) = event {
//!         let mut content = String::new();
//!         if let Some(mut reader) = scanner.open_current()? {
//!             reader.read_to_string(&mut content)?;
//!         }
//!         assert_eq!(entry.name, "a.txt");
//!         assert_eq!(content, "streamed");
//!     }
//! }
//! # Ok::<(), zipkit::Error>(())
//! ```

mod forward;
mod scanner;

pub use forward::{ForwardScanner, PayloadReader, ScanEvent};
pub use scanner::{Signature, SignatureMatcher, SignatureScanner, find_backward};
