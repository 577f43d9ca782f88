//! Shared fixtures for the integration suites.
//!
//! Bytecode is assembled through the decoder's own opcode tables run in
//! reverse, so fixtures cannot drift from what the decoder reads. Cache
//! words are appended automatically on versions that use them.
#![allow(dead_code, reason = "each suite uses a different slice of the helpers")]

use std::rc::Rc;

use pez::opcode::{Opcode, tables};
use pez::{Code, Object, PythonVersion};

pub const PY27: PythonVersion = PythonVersion::new(2, 7);
pub const PY38: PythonVersion = PythonVersion::new(3, 8);
pub const PY312: PythonVersion = PythonVersion::new(3, 12);

/// Assembles instructions for `version`, filling in cache slots. Operands
/// must fit one operand unit; fixtures that need `EXTENDED_ARG` spell it
/// explicitly.
pub fn asm(version: PythonVersion, instructions: &[(Opcode, u32)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for &(opcode, arg) in instructions {
        let byte = tables::byte_for(version, opcode)
            .unwrap_or_else(|| panic!("{opcode:?} not encodable for {version}"));
        if version.is_wordcode() {
            assert!(arg < 256, "operand too wide for a fixture: {arg}");
            bytes.push(byte);
            bytes.push(arg as u8);
            for _ in 0..tables::cache_entries(version, opcode) {
                bytes.push(tables::byte_for(version, Opcode::Cache).unwrap_or(0));
                bytes.push(0);
            }
        } else if byte >= tables::have_argument(version) {
            assert!(arg < 0x10000, "operand too wide for a fixture: {arg}");
            bytes.push(byte);
            bytes.extend_from_slice(&(arg as u16).to_le_bytes());
        } else {
            bytes.push(byte);
        }
    }
    bytes
}

/// A code object with the common fields filled in.
pub fn code(
    version: PythonVersion,
    name: &str,
    instructions: &[(Opcode, u32)],
    consts: Vec<Object>,
    names: &[&str],
    varnames: &[&str],
) -> Rc<Code> {
    Rc::new(Code {
        name: name.to_owned(),
        code_bytes: asm(version, instructions),
        consts,
        names: names.iter().map(|&name| Rc::from(name)).collect(),
        varnames: varnames.iter().map(|&name| Rc::from(name)).collect(),
        nlocals: varnames.len() as u32,
        ..Code::default()
    })
}

/// Decompiles a code object to text, panicking with the error context on
/// failure so test output stays readable.
pub fn decompile(code: &Rc<Code>, version: PythonVersion) -> String {
    let mut tracer = pez::NoopTracer;
    match pez::decompile_code(code, version, &mut tracer) {
        Ok(source) => source,
        Err(error) => panic!("decompilation failed: {error}"),
    }
}
