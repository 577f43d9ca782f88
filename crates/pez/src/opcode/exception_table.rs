//! Decoder for the 3.11+ exception table.
//!
//! From 3.11 on, protected regions are not marked by `SETUP_*` instructions
//! but by a side table of `(start, length, target, depth, lasti)` entries
//! packed as base-64 varints. Offsets and lengths are stored in code units
//! and scaled to bytes here.

use crate::error::{DecompileError, DecompileResult};

/// Continuation bit inside a varint byte.
const CONTINUATION: u8 = 0x40;
/// Payload mask of a varint byte (the 0x80 bit only marks entry starts).
const PAYLOAD: u8 = 0x3f;

/// One protected range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// First protected byte offset (inclusive).
    pub start: u32,
    /// End of the protected range (exclusive).
    pub end: u32,
    /// Handler entry byte offset.
    pub target: u32,
    /// Operand stack depth to unwind to before entering the handler.
    pub depth: u32,
    /// Whether the offset of the raising instruction is pushed too.
    pub lasti: bool,
}

/// Parses the raw `co_exceptiontable` bytes.
pub fn parse_exception_table(bytes: &[u8], code_len: u32) -> DecompileResult<Vec<ExceptionEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let start = varint(bytes, &mut pos)? * 2;
        let length = varint(bytes, &mut pos)? * 2;
        let target = varint(bytes, &mut pos)? * 2;
        let depth_lasti = varint(bytes, &mut pos)?;
        let end = start + length;
        if end > code_len || target >= code_len {
            return Err(DecompileError::invalid_bytecode(format!(
                "exception range {start}..{end} -> {target} exceeds code of {code_len} bytes"
            )));
        }
        entries.push(ExceptionEntry {
            start,
            end,
            target,
            depth: depth_lasti >> 1,
            lasti: depth_lasti & 1 != 0,
        });
    }
    Ok(entries)
}

fn varint(bytes: &[u8], pos: &mut usize) -> DecompileResult<u32> {
    let mut byte = *bytes
        .get(*pos)
        .ok_or_else(|| DecompileError::invalid_bytecode("truncated exception table"))?;
    *pos += 1;
    let mut value = u32::from(byte & PAYLOAD);
    while byte & CONTINUATION != 0 {
        byte = *bytes
            .get(*pos)
            .ok_or_else(|| DecompileError::invalid_bytecode("truncated exception table"))?;
        *pos += 1;
        value = (value << 6) | u32::from(byte & PAYLOAD);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{ExceptionEntry, parse_exception_table};

    #[test]
    fn single_entry() {
        // start=2 words, len=3 words, target=8 words, depth=0, lasti=0;
        // entry-start bit set on the first byte.
        let bytes = [0x80 | 2, 3, 8, 0];
        let entries = parse_exception_table(&bytes, 64).unwrap();
        assert_eq!(
            entries,
            vec![ExceptionEntry {
                start: 4,
                end: 10,
                target: 16,
                depth: 0,
                lasti: false,
            }]
        );
    }

    #[test]
    fn varint_continuation_and_lasti() {
        // start = (1<<6)|5 = 69 words; depth_lasti = 3 -> depth 1, lasti.
        let bytes = [0x80 | 0x40 | 1, 5, 1, 40, 3];
        let entries = parse_exception_table(&bytes, 1024).unwrap();
        assert_eq!(entries[0].start, 138);
        assert_eq!(entries[0].end, 140);
        assert_eq!(entries[0].target, 80);
        assert_eq!(entries[0].depth, 1);
        assert!(entries[0].lasti);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let bytes = [0x80 | 2, 3, 8, 0];
        assert!(parse_exception_table(&bytes, 8).is_err());
    }

    #[test]
    fn truncated_is_rejected() {
        assert!(parse_exception_table(&[0x80 | 2, 3], 64).is_err());
    }
}
