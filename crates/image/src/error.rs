use thiserror::Error;

/// Structural failure while reading or writing a module image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a module image (magic {found:02x?})")]
    BadMagic { found: [u8; 4] },
    #[error("unsupported image format version {0}")]
    UnsupportedVersion(u16),
    #[error("truncated image: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),
    #[error("unknown {kind} tag {tag} at offset {offset}")]
    UnknownTag {
        kind: &'static str,
        tag: u8,
        offset: usize,
    },
    #[error("reference index {index} out of range ({count} references declared)")]
    ReferenceOutOfRange { index: u32, count: usize },
    #[error("type nesting deeper than {0} levels")]
    NestingTooDeep(usize),
    #[error("{kind} count {count} at offset {offset} exceeds remaining data")]
    CountOverflow {
        kind: &'static str,
        count: u32,
        offset: usize,
    },
    #[error("{0} trailing bytes after code section")]
    TrailingBytes(usize),
    #[error("{0} too large to encode")]
    TooLarge(&'static str),
}

pub type Result<T> = std::result::Result<T, ImageError>;
