//! Reader for CPython's marshal serialization format.
//!
//! Marshal is the format `co_consts` and the module code object are stored
//! in inside a `.pyc`. The format changed gradually over two decades; the
//! reader below handles every layout a supported compiler produces:
//!
//! - legacy interned strings (`t`) with back-references (`R`), Python 2 only
//! - the 3.4+ shared-object machinery (`FLAG_REF` bit plus `r` references)
//! - int32/int64 ints and 15-bit-digit longs
//! - text-marshalled and binary floats/complex numbers
//! - the three historical code-object layouts (≤2.7, 3.0–3.10, 3.11+)
//!
//! Everything is decoded into [`Object`]; no marshal detail leaks past this
//! module.

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::{
    code::Code,
    object::Object,
    version::PythonVersion,
};

/// Bit set on a type code when the object is entered into the ref table.
const FLAG_REF: u8 = 0x80;

/// Local variable kind bits in the 3.11+ `co_localspluskinds` table.
const CO_FAST_LOCAL: u8 = 0x20;
const CO_FAST_CELL: u8 = 0x40;
const CO_FAST_FREE: u8 = 0x80;

/// Error raised while decoding a marshal stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// The stream ended inside an object.
    UnexpectedEof,
    /// A type code byte not produced by any supported compiler.
    UnknownTypeCode(u8),
    /// A `TYPE_REF`/`TYPE_STRINGREF` index pointing nowhere.
    BadReference(u32),
    /// String data that was declared unicode but is not valid UTF-8.
    InvalidUtf8,
    /// A text-marshalled float that does not parse.
    InvalidFloatText,
    /// A length field that is negative or overflows the remaining input.
    InvalidLength(i64),
    /// Object nesting beyond any plausible compiler output.
    TooDeep,
}

impl std::fmt::Display for MarshalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "marshal stream truncated"),
            Self::UnknownTypeCode(code) => write!(f, "unknown marshal type code 0x{code:02x}"),
            Self::BadReference(index) => write!(f, "marshal reference {index} out of range"),
            Self::InvalidUtf8 => write!(f, "marshal unicode string is not valid UTF-8"),
            Self::InvalidFloatText => write!(f, "marshal text float does not parse"),
            Self::InvalidLength(len) => write!(f, "marshal length {len} is invalid"),
            Self::TooDeep => write!(f, "marshal object nesting too deep"),
        }
    }
}

impl std::error::Error for MarshalError {}

/// Depth guard: compiler output never nests anywhere near this deep.
const MAX_DEPTH: usize = 256;

/// Reads one marshalled object (usually the module code object) from `bytes`.
pub fn read_object(bytes: &[u8], version: PythonVersion) -> Result<Object, MarshalError> {
    let mut reader = Reader {
        bytes,
        pos: 0,
        version,
        refs: Vec::new(),
        interned: Vec::new(),
        depth: 0,
    };
    reader.read()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    version: PythonVersion,
    /// 3.4+ shared-object table, indexed by `TYPE_REF`.
    refs: Vec<Option<Object>>,
    /// Python 2 interned-string table, indexed by `TYPE_STRINGREF`.
    interned: Vec<Rc<str>>,
    depth: usize,
}

impl Reader<'_> {
    fn read(&mut self) -> Result<Object, MarshalError> {
        if self.depth >= MAX_DEPTH {
            return Err(MarshalError::TooDeep);
        }
        self.depth += 1;
        let result = self.read_inner();
        self.depth -= 1;
        result
    }

    fn read_inner(&mut self) -> Result<Object, MarshalError> {
        let code = self.u8()?;
        let flagged = code & FLAG_REF != 0 && self.version.gte(3, 4);
        let code = if self.version.gte(3, 4) { code & !FLAG_REF } else { code };

        // Reserve the ref slot before reading children: CPython numbers
        // shared objects by the position their encoding starts at.
        let ref_slot = if flagged {
            self.refs.push(None);
            Some(self.refs.len() - 1)
        } else {
            None
        };

        let object = match code {
            b'N' => Object::None,
            b'T' => Object::True,
            b'F' => Object::False,
            b'.' => Object::Ellipsis,
            b'S' => Object::StopIteration,
            b'0' => Object::None, // TYPE_NULL only terminates dicts; treated as None elsewhere
            b'i' => Object::Int(i64::from(self.i32()?)),
            b'I' => Object::Int(self.i64()?),
            b'l' => self.read_long()?,
            b'f' => Object::Float(self.read_text_float()?),
            b'g' => Object::Float(self.f64()?),
            b'x' => {
                let real = self.read_text_float()?;
                let imag = self.read_text_float()?;
                Object::Complex { real, imag }
            }
            b'y' => {
                let real = self.f64()?;
                let imag = self.f64()?;
                Object::Complex { real, imag }
            }
            b's' => {
                let version = self.version;
                let data = self.sized_bytes()?;
                legacy_string(data, version)
            }
            b't' => {
                let version = self.version;
                let data = self.sized_bytes()?;
                let object = if version.is_legacy() {
                    legacy_string(data, version)
                } else {
                    let text = std::str::from_utf8(data).map_err(|_| MarshalError::InvalidUtf8)?;
                    Object::String(text.into())
                };
                if let Object::String(s) = &object {
                    self.interned.push(Rc::clone(s));
                }
                object
            }
            b'R' => {
                let index = self.u32()?;
                let s = self
                    .interned
                    .get(index as usize)
                    .ok_or(MarshalError::BadReference(index))?;
                Object::String(Rc::clone(s))
            }
            b'u' | b'a' | b'A' => {
                let data = self.sized_bytes()?;
                let text = std::str::from_utf8(data).map_err(|_| MarshalError::InvalidUtf8)?;
                Object::String(text.into())
            }
            b'z' | b'Z' => {
                let len = self.u8()? as usize;
                let data = self.take(len)?;
                let text = std::str::from_utf8(data).map_err(|_| MarshalError::InvalidUtf8)?;
                Object::String(text.into())
            }
            b'(' => {
                let count = self.length()?;
                self.read_tuple(count, ref_slot)?
            }
            b')' => {
                let count = self.u8()? as usize;
                self.read_tuple(count, ref_slot)?
            }
            b'[' => {
                // Lists do not appear in const pools from the compiler, but
                // marshal can carry them; decode as a tuple.
                let count = self.length()?;
                self.read_tuple(count, ref_slot)?
            }
            b'<' | b'>' => {
                let count = self.length()?;
                let mut items = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    items.push(self.read()?);
                }
                Object::FrozenSet(items.into())
            }
            b'r' => {
                let index = self.u32()?;
                let object = self
                    .refs
                    .get(index as usize)
                    .and_then(Option::as_ref)
                    .ok_or(MarshalError::BadReference(index))?;
                object.clone()
            }
            b'c' => self.read_code(ref_slot)?,
            other => return Err(MarshalError::UnknownTypeCode(other)),
        };

        if let Some(slot) = ref_slot {
            // Container types filled their slot early; leaf types fill here.
            if self.refs[slot].is_none() {
                self.refs[slot] = Some(object.clone());
            }
        }
        Ok(object)
    }

    fn read_tuple(&mut self, count: usize, _ref_slot: Option<usize>) -> Result<Object, MarshalError> {
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            items.push(self.read()?);
        }
        Ok(Object::Tuple(items.into()))
    }

    /// TYPE_LONG: i32 digit count (sign carries the number's sign), then
    /// 15-bit digits stored little-endian in u16 words.
    fn read_long(&mut self) -> Result<Object, MarshalError> {
        let count = self.i32()?;
        let digit_count = count.unsigned_abs() as usize;
        let mut value = BigInt::zero();
        for index in 0..digit_count {
            let digit = u64::from(self.u16()?);
            value += BigInt::from(digit) << (15 * index);
        }
        if count < 0 {
            value = -value;
        }
        // Longs that fit i64 are plain ints everywhere downstream.
        match value.to_i64() {
            Some(small) => Ok(Object::Int(small)),
            None => Ok(Object::BigInt(value)),
        }
    }

    fn read_text_float(&mut self) -> Result<f64, MarshalError> {
        let len = self.u8()? as usize;
        let data = self.take(len)?;
        let text = std::str::from_utf8(data).map_err(|_| MarshalError::InvalidFloatText)?;
        text.parse().map_err(|_| MarshalError::InvalidFloatText)
    }

    /// Code objects. Three layouts, selected by version (§ module docs).
    fn read_code(&mut self, ref_slot: Option<usize>) -> Result<Object, MarshalError> {
        let version = self.version;
        let mut code = Code::default();

        if version.is_legacy() {
            // 1.5-2.7: counts are u16 before 2.3, int32 from 2.3 on.
            code.argcount = self.count_field()?;
            code.nlocals = self.count_field()?;
            code.stacksize = self.count_field()?;
            code.flags = self.count_field()?;
            code.code_bytes = self.string_field()?;
            code.consts = self.object_vec()?;
            code.names = self.string_tuple_field()?;
            code.varnames = self.string_tuple_field()?;
            if version.gte(2, 1) {
                code.freevars = self.string_tuple_field()?;
                code.cellvars = self.string_tuple_field()?;
            }
            code.filename = self.string_text_field()?;
            code.name = self.string_text_field()?;
            code.firstlineno = self.count_field()?;
            let _lnotab = self.string_field()?;
        } else if version.lt(3, 11) {
            code.argcount = self.u32()?;
            if version.gte(3, 8) {
                code.posonlyargcount = self.u32()?;
            }
            code.kwonlyargcount = self.u32()?;
            code.nlocals = self.u32()?;
            code.stacksize = self.u32()?;
            code.flags = self.u32()?;
            code.code_bytes = self.string_field()?;
            code.consts = self.object_vec()?;
            code.names = self.string_tuple_field()?;
            code.varnames = self.string_tuple_field()?;
            code.freevars = self.string_tuple_field()?;
            code.cellvars = self.string_tuple_field()?;
            code.filename = self.string_text_field()?;
            code.name = self.string_text_field()?;
            code.firstlineno = self.u32()?;
            let _lnotab = self.string_field()?;
        } else {
            // 3.11+: locals, cells and frees are merged into localsplus and
            // split back out here by kind.
            code.argcount = self.u32()?;
            code.posonlyargcount = self.u32()?;
            code.kwonlyargcount = self.u32()?;
            code.stacksize = self.u32()?;
            code.flags = self.u32()?;
            code.code_bytes = self.string_field()?;
            code.consts = self.object_vec()?;
            code.names = self.string_tuple_field()?;
            let localsplus = self.string_tuple_field()?;
            let kinds = self.string_field()?;
            code.filename = self.string_text_field()?;
            code.name = self.string_text_field()?;
            code.qualname = self.string_text_field()?;
            code.firstlineno = self.u32()?;
            let _linetable = self.string_field()?;
            code.exceptiontable_bytes = self.string_field()?;

            for (name, &kind) in localsplus.iter().zip(kinds.iter()) {
                if kind & CO_FAST_LOCAL != 0 && kind & CO_FAST_CELL == 0 {
                    code.varnames.push(Rc::clone(name));
                } else if kind & CO_FAST_CELL != 0 {
                    code.cellvars.push(Rc::clone(name));
                } else if kind & CO_FAST_FREE != 0 {
                    code.freevars.push(Rc::clone(name));
                }
            }
            code.nlocals = code.varnames.len() as u32;
        }

        let object = Object::Code(Rc::new(code));
        if let Some(slot) = ref_slot {
            self.refs[slot] = Some(object.clone());
        }
        Ok(object)
    }

    /// Integer field whose width depends on the era (u16 before 2.3).
    fn count_field(&mut self) -> Result<u32, MarshalError> {
        if self.version.lt(2, 3) {
            Ok(u32::from(self.u16()?))
        } else {
            self.u32()
        }
    }

    /// Reads a nested object expected to carry raw bytes.
    fn string_field(&mut self) -> Result<Vec<u8>, MarshalError> {
        match self.read()? {
            Object::Bytes(data) => Ok(data.to_vec()),
            Object::String(s) => Ok(s.as_bytes().to_vec()),
            Object::None => Ok(Vec::new()),
            _ => Err(MarshalError::UnknownTypeCode(b's')),
        }
    }

    /// Reads a nested object expected to be text.
    fn string_text_field(&mut self) -> Result<String, MarshalError> {
        match self.read()? {
            Object::String(s) => Ok(s.to_string()),
            Object::Bytes(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
            Object::None => Ok(String::new()),
            _ => Err(MarshalError::UnknownTypeCode(b'u')),
        }
    }

    /// Reads a tuple of strings (a name table).
    fn string_tuple_field(&mut self) -> Result<Vec<Rc<str>>, MarshalError> {
        let items = match self.read()? {
            Object::Tuple(items) => items,
            Object::None => return Ok(Vec::new()),
            _ => return Err(MarshalError::UnknownTypeCode(b'(')),
        };
        items
            .iter()
            .map(|item| match item {
                Object::String(s) => Ok(Rc::clone(s)),
                Object::Bytes(data) => std::str::from_utf8(data)
                    .map(Into::into)
                    .map_err(|_| MarshalError::InvalidUtf8),
                _ => Err(MarshalError::UnknownTypeCode(b'u')),
            })
            .collect()
    }

    /// Reads a tuple of arbitrary objects (the constant pool).
    fn object_vec(&mut self) -> Result<Vec<Object>, MarshalError> {
        match self.read()? {
            Object::Tuple(items) => Ok(items.to_vec()),
            Object::None => Ok(Vec::new()),
            _ => Err(MarshalError::UnknownTypeCode(b'(')),
        }
    }

    fn length(&mut self) -> Result<usize, MarshalError> {
        let len = self.i32()?;
        if len < 0 {
            return Err(MarshalError::InvalidLength(i64::from(len)));
        }
        Ok(len as usize)
    }

    fn sized_bytes(&mut self) -> Result<&[u8], MarshalError> {
        let len = self.length()?;
        self.take(len)
    }

    fn take(&mut self, len: usize) -> Result<&[u8], MarshalError> {
        let end = self.pos.checked_add(len).ok_or(MarshalError::UnexpectedEof)?;
        if end > self.bytes.len() {
            return Err(MarshalError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, MarshalError> {
        let byte = *self.bytes.get(self.pos).ok_or(MarshalError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, MarshalError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn i32(&mut self) -> Result<i32, MarshalError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u32(&mut self) -> Result<u32, MarshalError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i64(&mut self) -> Result<i64, MarshalError> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap_or_default()))
    }

    fn f64(&mut self) -> Result<f64, MarshalError> {
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap_or_default()))
    }
}

/// A Python 2 `TYPE_STRING` is the `str` type: textual when it decodes as
/// UTF-8, otherwise raw bytes. From 3.0 on the same code means `bytes`.
fn legacy_string(data: &[u8], version: PythonVersion) -> Object {
    if version.is_legacy() {
        match std::str::from_utf8(data) {
            Ok(text) => Object::String(text.into()),
            Err(_) => Object::Bytes(data.into()),
        }
    } else {
        Object::Bytes(data.into())
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use pretty_assertions::assert_eq;

    use super::{MarshalError, read_object};
    use crate::{object::Object, version::PythonVersion};

    const PY312: PythonVersion = PythonVersion::new(3, 12);
    const PY27: PythonVersion = PythonVersion::new(2, 7);

    #[test]
    fn singletons() {
        assert_eq!(read_object(b"N", PY312), Ok(Object::None));
        assert_eq!(read_object(b"T", PY312), Ok(Object::True));
        assert_eq!(read_object(b"F", PY312), Ok(Object::False));
        assert_eq!(read_object(b".", PY312), Ok(Object::Ellipsis));
    }

    #[test]
    fn int32_and_int64() {
        assert_eq!(read_object(b"i\x2a\x00\x00\x00", PY312), Ok(Object::Int(42)));
        assert_eq!(read_object(b"i\xff\xff\xff\xff", PY312), Ok(Object::Int(-1)));
        let mut bytes = vec![b'I'];
        bytes.extend_from_slice(&(1i64 << 40).to_le_bytes());
        assert_eq!(read_object(&bytes, PY27), Ok(Object::Int(1 << 40)));
    }

    #[test]
    fn long_digits() {
        // 2**20 = digit0 0, digit1 32 (32 << 15 == 2**20)
        let mut bytes = vec![b'l'];
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&32u16.to_le_bytes());
        assert_eq!(read_object(&bytes, PY27), Ok(Object::Int(1 << 20)));

        // A value that does not fit i64 stays a BigInt: 2**75.
        let mut bytes = vec![b'l'];
        bytes.extend_from_slice(&6i32.to_le_bytes());
        for _ in 0..5 {
            bytes.extend_from_slice(&0u16.to_le_bytes());
        }
        bytes.extend_from_slice(&1u16.to_le_bytes());
        assert_eq!(read_object(&bytes, PY27), Ok(Object::BigInt(BigInt::from(1u8) << 75)));
    }

    #[test]
    fn binary_float() {
        let mut bytes = vec![b'g'];
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        assert_eq!(read_object(&bytes, PY312), Ok(Object::Float(1.5)));
    }

    #[test]
    fn short_ascii_and_small_tuple() {
        // FLAG_REF set on both, as CPython emits.
        let bytes = [
            0xa9, 2, // small tuple, 2 items, ref-flagged
            0xda, 2, b'h', b'i', // short ascii interned "hi"
            b'r', 1, 0, 0, 0, // ref to "hi"
        ];
        let expected = Object::Tuple(vec![Object::String("hi".into()), Object::String("hi".into())].into());
        assert_eq!(read_object(&bytes, PY312), Ok(expected));
    }

    #[test]
    fn legacy_interned_stringref() {
        let bytes = [
            b'(', 2, 0, 0, 0, // tuple of 2
            b't', 1, 0, 0, 0, b'x', // interned "x"
            b'R', 0, 0, 0, 0, // stringref 0
        ];
        let expected = Object::Tuple(vec![Object::String("x".into()), Object::String("x".into())].into());
        assert_eq!(read_object(&bytes, PY27), Ok(expected));
    }

    #[test]
    fn truncation_is_an_error() {
        assert_eq!(read_object(b"i\x2a", PY312), Err(MarshalError::UnexpectedEof));
        assert_eq!(read_object(b"", PY312), Err(MarshalError::UnexpectedEof));
    }

    #[test]
    fn unknown_code_is_an_error() {
        assert_eq!(read_object(b"Q", PY312), Err(MarshalError::UnknownTypeCode(b'Q')));
    }
}
