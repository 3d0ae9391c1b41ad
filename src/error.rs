use std::path::PathBuf;

/// Stable process exit codes. The CLI maps every [`GcError`] to one of these.
pub const EXIT_OK: i32 = 0;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_GENERIC: i32 = 10;
pub const EXIT_UNSUPPORTED_VERSION: i32 = 11;
pub const EXIT_MISSING_RESOURCE: i32 = 12;
pub const EXIT_HASH_MISMATCH: i32 = 13;

/// The primary error type for all operations in the `gcpack` crate.
#[derive(Debug)]
pub enum GcError {
    /// Invalid arguments, invalid pipeline spec, text-only mode on binary input.
    Usage(String),

    /// Structural violation: bad magic, truncated varint, out-of-bounds length,
    /// unknown codec code, length mismatch after decompression, JSON parse failure.
    Corrupt(String),

    /// Container version outside 1..6, or reserved v6 flag bits set.
    UnsupportedVersion(String),

    /// A bucket-level resource referenced by an archive is not present.
    MissingResource(String),

    /// Integrity failure: index CRC, index body SHA, blob SHA/CRC, or a decode
    /// failure during deep verification.
    HashMismatch(String),

    /// An I/O error, with the path where it happened when known.
    Io { source: std::io::Error, path: PathBuf },
}

impl GcError {
    /// The stable exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            GcError::Usage(_) => EXIT_USAGE,
            GcError::Corrupt(_) => EXIT_GENERIC,
            GcError::UnsupportedVersion(_) => EXIT_UNSUPPORTED_VERSION,
            GcError::MissingResource(_) => EXIT_MISSING_RESOURCE,
            GcError::HashMismatch(_) => EXIT_HASH_MISMATCH,
            GcError::Io { .. } => EXIT_GENERIC,
        }
    }

    /// Severity rank used when verify aggregates several findings.
    /// Higher exit code wins; I/O ranks with generic failures.
    pub fn severity(&self) -> i32 {
        self.exit_code()
    }

    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        GcError::Io { source, path: path.into() }
    }
}

impl std::fmt::Display for GcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcError::Usage(msg) => write!(f, "usage error: {}", msg),
            GcError::Corrupt(msg) => write!(f, "corrupt payload: {}", msg),
            GcError::UnsupportedVersion(msg) => write!(f, "unsupported version: {}", msg),
            GcError::MissingResource(msg) => write!(f, "missing resource: {}", msg),
            GcError::HashMismatch(msg) => write!(f, "hash mismatch: {}", msg),
            GcError::Io { source, path } => {
                if path.as_os_str().is_empty() {
                    write!(f, "I/O error: {}", source)
                } else {
                    write!(f, "I/O error on path '{}': {}", path.display(), source)
                }
            }
        }
    }
}

impl std::error::Error for GcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GcError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GcError {
    fn from(err: std::io::Error) -> Self {
        GcError::Io { source: err, path: PathBuf::new() }
    }
}

impl From<serde_json::Error> for GcError {
    fn from(err: serde_json::Error) -> Self {
        GcError::Corrupt(format!("JSON: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, GcError>;
