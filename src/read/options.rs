//! Options for opening archives.

use crate::format::MAX_EOCD_SEARCH;

/// Options controlling how an archive is opened and read.
///
/// # Example
///
/// ```rust
/// use zipkit::OpenOptions;
///
/// let options = OpenOptions::new()
///     .force_forward_scan(true)
///     .verify_crc(false);
/// assert!(options.force_forward_scan);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// How many trailing bytes to search for the end of central directory
    /// record (default: 65557, the record plus a maximal comment).
    pub eocd_search_limit: u64,
    /// Skip the central directory and rebuild the entry list by scanning
    /// local headers (default: false).
    pub force_forward_scan: bool,
    /// Check CRC-32 and size at the end of every decompressed stream
    /// (default: true).
    pub verify_crc: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            eocd_search_limit: MAX_EOCD_SEARCH,
            force_forward_scan: false,
            verify_crc: true,
        }
    }
}

impl OpenOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the end of central directory search bound.
    ///
    /// Bounds shorter than the default can miss archives with long comments.
    pub fn eocd_search_limit(mut self, limit: u64) -> Self {
        self.eocd_search_limit = limit;
        self
    }

    /// Sets whether to ignore the central directory.
    pub fn force_forward_scan(mut self, force: bool) -> Self {
        self.force_forward_scan = force;
        self
    }

    /// Sets whether decompressed streams verify CRC-32.
    pub fn verify_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = OpenOptions::default();
        assert_eq!(options.eocd_search_limit, 65557);
        assert!(!options.force_forward_scan);
        assert!(options.verify_crc);
    }

    #[test]
    fn test_builder_chain() {
        let options = OpenOptions::new()
            .eocd_search_limit(1024)
            .force_forward_scan(true)
            .verify_crc(false);
        assert_eq!(options.eocd_search_limit, 1024);
        assert!(options.force_forward_scan);
        assert!(!options.verify_crc);
    }
}
