//! pez, a Python bytecode decompiler.
//!
//! Takes a `.pyc` file (anything from Python 1.5 through 3.14) and
//! reconstructs readable, semantically equivalent Python source. The
//! pipeline per code object: decode instructions, build a control-flow
//! graph, compute dominance facts, infer the operand stack entering every
//! block, then walk the blocks re-forming structured control flow (`if`,
//! loops, `try`, `with`, `match`, comprehensions, short-circuits) while an
//! abstract stack simulator rebuilds expressions. Nested code objects
//! recurse through the same pipeline into a shared per-module arena.
//!
//! # Quick start
//!
//! ```ignore
//! let bytes = std::fs::read("module.pyc")?;
//! let source = pez::decompile_pyc(&bytes)?;
//! print!("{source}");
//! ```

mod ast;
mod cfg;
mod code;
pub mod codegen;
mod decomp;
mod dom;
mod error;
mod marshal;
mod object;
pub mod opcode;
mod pattern;
mod pyc;
mod scratch;
mod sim;
mod stack;
pub mod tracer;
mod version;

use std::rc::Rc;

pub use crate::{
    ast::{AstArena, AstExpr, AstStmt, ExprId, StmtId},
    code::Code,
    decomp::{DEFAULT_MAX_DEPTH, Decompiler},
    error::{DecompileError, DecompileErrorKind, ErrorContext, PezError, SimError},
    marshal::MarshalError,
    object::Object,
    pyc::{PycError, PycFile},
    tracer::{DecompileTracer, NoopTracer, RecordingTracer, StderrTracer},
    version::PythonVersion,
};

use crate::error::DecompileResult;

/// Decompiles a whole `.pyc` file to source text.
pub fn decompile_pyc(bytes: &[u8]) -> Result<String, PezError> {
    decompile_pyc_with(bytes, &mut NoopTracer, None)
}

/// Decompiles a `.pyc` file with an explicit tracer and optional focus
/// path selecting one nested code object.
pub fn decompile_pyc_with<Tr: DecompileTracer>(
    bytes: &[u8],
    tracer: &mut Tr,
    focus: Option<&FocusPath>,
) -> Result<String, PezError> {
    let file = pyc::parse(bytes)?;
    let code = match focus {
        Some(path) => path.resolve(&file.code)?,
        None => Rc::clone(&file.code),
    };
    let is_module = focus.is_none();
    decompile_one(&code, file.version, tracer, is_module).map_err(PezError::from)
}

/// Decompiles a single code object for a known version.
pub fn decompile_code<Tr: DecompileTracer>(
    code: &Rc<Code>,
    version: PythonVersion,
    tracer: &mut Tr,
) -> Result<String, DecompileError> {
    decompile_one(code, version, tracer, true)
}

fn decompile_one<Tr: DecompileTracer>(
    code: &Rc<Code>,
    version: PythonVersion,
    tracer: &mut Tr,
    is_module: bool,
) -> DecompileResult<String> {
    let mut arena = AstArena::new();
    let mut decompiler = Decompiler::new(&mut arena, tracer, Rc::clone(code), version, 0)?;
    let statements = decompiler.run()?;
    let statements = if is_module {
        decompiler.finalize_module(statements)
    } else {
        statements
    };
    drop(decompiler);
    Ok(codegen::render_module(&arena, &statements))
}

/// A dotted path selecting a nested code object (`outer.inner`).
///
/// Names are matched against `co_name` of nested code objects, walking one
/// constant pool per segment. A segment matching more than one nested code
/// object is ambiguous and rejected rather than guessed.
#[derive(Debug, Clone)]
pub struct FocusPath {
    segments: Vec<String>,
}

impl FocusPath {
    /// Parses a dotted path. Empty segments are rejected.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self { segments })
    }

    /// Walks the nested code objects from `root` down this path.
    pub fn resolve(&self, root: &Rc<Code>) -> Result<Rc<Code>, DecompileError> {
        let mut current = Rc::clone(root);
        for segment in &self.segments {
            let mut matches = current
                .nested_codes()
                .filter(|code| code.name == *segment)
                .cloned()
                .collect::<Vec<_>>();
            match matches.len() {
                0 => {
                    return Err(DecompileError::new(DecompileErrorKind::FocusNotFound(
                        self.segments.join("."),
                    )));
                }
                1 => current = matches.remove(0),
                _ => {
                    return Err(DecompileError::new(DecompileErrorKind::AmbiguousFocus(
                        self.segments.join("."),
                    )));
                }
            }
        }
        Ok(current)
    }
}
