//! `.pyc` container parsing.
//!
//! A `.pyc` is a short header followed by the marshalled module code object.
//! The header grew over the years:
//!
//! | Era | Layout |
//! |-----|--------|
//! | ≤ 3.2 | magic (4) + mtime (4) |
//! | 3.3 – 3.6 | magic (4) + mtime (4) + source size (4) |
//! | ≥ 3.7 | magic (4) + flags (4) + (mtime+size, or source hash when hash-based) |
//!
//! The magic's first two bytes select the bytecode table for the whole file;
//! the trailing two bytes are always `\r\n` (a transfer-corruption tripwire,
//! validated here).

use std::rc::Rc;

use crate::{
    code::Code,
    marshal::{self, MarshalError},
    object::Object,
    version::PythonVersion,
};

/// Bit in the 3.7+ flags word marking a hash-based `.pyc`.
const FLAG_HASH_BASED: u32 = 0x01;

/// A parsed `.pyc` file: the version that compiled it plus the module code.
#[derive(Debug, Clone)]
pub struct PycFile {
    /// Version resolved from the magic number.
    pub version: PythonVersion,
    /// The top-level (module) code object.
    pub code: Rc<Code>,
    /// True when the header is the 3.7+ hash-based variant.
    pub hash_based: bool,
}

/// Error raised while parsing the `.pyc` container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PycError {
    /// Fewer bytes than the smallest valid header.
    Truncated,
    /// The magic trailer was not `\r\n`.
    BadMagicTrailer,
    /// A magic number no CPython release ever used.
    UnknownMagic(u16),
    /// The marshalled body failed to decode.
    Marshal(MarshalError),
    /// The body decoded, but not to a code object.
    NotACodeObject,
}

impl std::fmt::Display for PycError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "pyc file truncated"),
            Self::BadMagicTrailer => write!(f, "pyc magic trailer is not \\r\\n"),
            Self::UnknownMagic(magic) => write!(f, "unknown pyc magic number {magic}"),
            Self::Marshal(error) => write!(f, "pyc body: {error}"),
            Self::NotACodeObject => write!(f, "pyc body is not a code object"),
        }
    }
}

impl std::error::Error for PycError {}

impl From<MarshalError> for PycError {
    fn from(error: MarshalError) -> Self {
        Self::Marshal(error)
    }
}

impl PycError {
    /// True when the failure is "this version is not in the table", which
    /// callers report differently from corrupt input.
    #[must_use]
    pub fn is_unsupported_version(&self) -> bool {
        matches!(self, Self::UnknownMagic(_))
    }
}

/// Parses a `.pyc` file into its version and module code object.
pub fn parse(bytes: &[u8]) -> Result<PycFile, PycError> {
    if bytes.len() < 8 {
        return Err(PycError::Truncated);
    }
    if bytes[2] != b'\r' || bytes[3] != b'\n' {
        return Err(PycError::BadMagicTrailer);
    }
    let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
    let version = PythonVersion::from_magic(magic).ok_or(PycError::UnknownMagic(magic))?;

    let (body_start, hash_based) = if version.gte(3, 7) {
        if bytes.len() < 16 {
            return Err(PycError::Truncated);
        }
        let flags = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        (16, flags & FLAG_HASH_BASED != 0)
    } else if version.gte(3, 3) {
        if bytes.len() < 12 {
            return Err(PycError::Truncated);
        }
        (12, false)
    } else {
        (8, false)
    };

    let body = marshal::read_object(&bytes[body_start..], version)?;
    match body {
        Object::Code(code) => Ok(PycFile {
            version,
            code,
            hash_based,
        }),
        _ => Err(PycError::NotACodeObject),
    }
}

#[cfg(test)]
mod tests {
    use super::{PycError, parse};

    /// Builds a minimal 3.8-era header in front of `body`.
    fn py38_file(body: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3413u16.to_le_bytes());
        bytes.extend_from_slice(b"\r\n");
        bytes.extend_from_slice(&[0; 12]); // flags + mtime + size
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(parse(&[0; 4]), Err(PycError::Truncated)));
    }

    #[test]
    fn rejects_bad_trailer() {
        let bytes = [0x55, 0x0d, b'X', b'Y', 0, 0, 0, 0];
        assert!(matches!(parse(&bytes), Err(PycError::BadMagicTrailer)));
    }

    #[test]
    fn rejects_unknown_magic() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&9999u16.to_le_bytes());
        bytes.extend_from_slice(b"\r\n\0\0\0\0");
        let error = parse(&bytes).unwrap_err();
        assert!(error.is_unsupported_version());
    }

    #[test]
    fn body_must_be_code() {
        let bytes = py38_file(b"N");
        assert!(matches!(parse(&bytes), Err(PycError::NotACodeObject)));
    }
}
