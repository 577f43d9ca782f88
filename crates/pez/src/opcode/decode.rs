//! Instruction stream decoding.
//!
//! Produces one [`Instruction`] per executed operation: `EXTENDED_ARG`
//! prefixes are folded into the following instruction's operand and size,
//! and the inline `CACHE` slots of 3.11+ are folded into the preceding
//! instruction's size. Downstream passes therefore never see either.

use super::{Opcode, tables};
use crate::{
    error::{DecompileError, DecompileResult},
    version::PythonVersion,
};

/// One decoded instruction.
///
/// `offset` is the byte index of the instruction's first byte (the first
/// `EXTENDED_ARG` prefix when there is one); `size` spans prefixes, the
/// instruction word, and trailing caches, so `offset + size` is always the
/// next instruction's offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset into the code stream.
    pub offset: u32,
    /// Decoded opcode.
    pub opcode: Opcode,
    /// Operand (0 for no-operand instructions).
    pub arg: u32,
    /// Total encoded size in bytes.
    pub size: u32,
}

impl Instruction {
    /// The destination byte offset, when this instruction jumps.
    #[must_use]
    pub fn jump_target(&self, version: PythonVersion) -> Option<u32> {
        super::jump_target(version, self.opcode, self.arg, self.offset, self.size)
    }
}

/// Decodes a whole code stream for `version`.
///
/// Unknown opcode bytes and truncated operands are rejected; a decompiler
/// cannot do anything useful downstream of a mis-decoded stream.
pub fn decode(bytes: &[u8], version: PythonVersion) -> DecompileResult<Vec<Instruction>> {
    let mut instructions = Vec::with_capacity(bytes.len() / 2);
    let have_argument = tables::have_argument(version);
    let mut pos: usize = 0;

    while pos < bytes.len() {
        let start = pos;
        let mut extended: u32 = 0;

        // Fold any EXTENDED_ARG chain into the real instruction.
        let (byte, opcode) = loop {
            let byte = bytes[pos];
            let opcode = tables::lookup(version, byte).ok_or_else(|| {
                DecompileError::unsupported(format!("opcode byte {byte} at offset {pos} for Python {version}"))
            })?;
            if opcode != Opcode::ExtendedArg {
                break (byte, opcode);
            }
            let arg = read_arg(bytes, pos, version)?;
            extended = if version.is_wordcode() {
                (extended | arg) << 8
            } else {
                (extended | arg) << 16
            };
            pos += instruction_width(version, byte, have_argument);
        };

        let arg = if byte >= have_argument {
            extended | read_arg(bytes, pos, version)?
        } else {
            0
        };
        pos += instruction_width(version, byte, have_argument);

        // Fold declared caches; tolerate stray CACHE words beyond the
        // declared count so a miscounted table degrades gracefully.
        if version.has_exception_table() {
            let mut caches = tables::cache_entries(version, opcode) as usize;
            while caches > 0 && pos + 1 < bytes.len() {
                pos += 2;
                caches -= 1;
            }
            while pos < bytes.len() && tables::lookup(version, bytes[pos]) == Some(Opcode::Cache) {
                pos += 2;
            }
        }

        instructions.push(Instruction {
            offset: start as u32,
            opcode,
            arg,
            size: (pos - start) as u32,
        });
    }

    Ok(instructions)
}

/// Operand width/stride bookkeeping for the two instruction formats.
fn instruction_width(version: PythonVersion, byte: u8, have_argument: u8) -> usize {
    if version.is_wordcode() {
        2
    } else if byte >= have_argument {
        3
    } else {
        1
    }
}

fn read_arg(bytes: &[u8], pos: usize, version: PythonVersion) -> DecompileResult<u32> {
    if version.is_wordcode() {
        let byte = bytes
            .get(pos + 1)
            .ok_or_else(|| DecompileError::invalid_bytecode(format!("truncated instruction at offset {pos}")))?;
        Ok(u32::from(*byte))
    } else {
        let low = bytes.get(pos + 1);
        let high = bytes.get(pos + 2);
        match (low, high) {
            (Some(&low), Some(&high)) => Ok(u32::from(u16::from_le_bytes([low, high]))),
            _ => Err(DecompileError::invalid_bytecode(format!(
                "truncated instruction at offset {pos}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Instruction, decode};
    use crate::{opcode::Opcode, version::PythonVersion};

    #[test]
    fn classic_stream() {
        // 2.7: LOAD_CONST 0; RETURN_VALUE
        let py27 = PythonVersion::new(2, 7);
        let bytes = [100, 0, 0, 83];
        let instructions = decode(&bytes, py27).unwrap();
        assert_eq!(
            instructions,
            vec![
                Instruction {
                    offset: 0,
                    opcode: Opcode::LoadConst,
                    arg: 0,
                    size: 3
                },
                Instruction {
                    offset: 3,
                    opcode: Opcode::ReturnValue,
                    arg: 0,
                    size: 1
                },
            ]
        );
    }

    #[test]
    fn wordcode_with_extended_arg() {
        // 3.8: EXTENDED_ARG 1; LOAD_CONST 4 -> arg 260, folded.
        let py38 = PythonVersion::new(3, 8);
        let bytes = [144, 1, 100, 4, 83, 0];
        let instructions = decode(&bytes, py38).unwrap();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].opcode, Opcode::LoadConst);
        assert_eq!(instructions[0].arg, 260);
        assert_eq!(instructions[0].offset, 0);
        assert_eq!(instructions[0].size, 4);
        assert_eq!(instructions[1].opcode, Opcode::ReturnValue);
    }

    #[test]
    fn caches_fold_into_size() {
        // 3.12: COMPARE_OP has one cache word.
        let py312 = PythonVersion::new(3, 12);
        let bytes = [107, 40, 0, 0, 83, 0];
        let instructions = decode(&bytes, py312).unwrap();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].opcode, Opcode::CompareOp);
        assert_eq!(instructions[0].size, 4);
        assert_eq!(instructions[1].offset, 4);
    }

    #[test]
    fn unknown_byte_is_unsupported() {
        let py38 = PythonVersion::new(3, 8);
        assert!(decode(&[200, 0], py38).is_err());
    }

    #[test]
    fn truncated_operand_is_invalid() {
        let py27 = PythonVersion::new(2, 7);
        assert!(decode(&[100, 0], py27).is_err());
    }
}
