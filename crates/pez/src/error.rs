//! Error taxonomy for the decompilation pipeline.
//!
//! Failures are split into two tiers. Hard errors ([`DecompileError`]) abort
//! the current code object and surface to the caller together with an
//! [`ErrorContext`] naming the block, offset, and opcode that first went
//! wrong. Soft errors ([`SimError`]) are produced by the stack simulator
//! inside blocks the driver already treats as suspect; the driver recovers
//! from them locally by falling back to opaque straight-line emission.
//!
//! Keeping loader, decoder, and core failures distinct lets callers handle
//! exit codes and recovery policies accurately without string matching.

use std::fmt;

use crate::{cfg::BlockId, marshal::MarshalError, pyc::PycError};

/// Result type alias for fallible operations in the decompilation core.
pub type DecompileResult<T> = Result<T, DecompileError>;

/// Result type alias for single-block simulation steps.
pub type SimResult<T> = Result<T, SimError>;

/// Location information captured when a fatal error first fires inside a
/// code object.
///
/// Higher layers report this context verbatim so a failure can be localised
/// without losing the original cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// `co_name` of the code object being decompiled.
    pub code_name: String,
    /// Block the driver or simulator was working on.
    pub block: BlockId,
    /// Byte offset of the offending instruction.
    pub offset: u32,
    /// Opcode name, or `"?"` when the failure predates decoding.
    pub opcode: &'static str,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in {} at block {} offset {} ({})",
            self.code_name, self.block, self.offset, self.opcode
        )
    }
}

/// Fatal decompilation failure.
///
/// Aborts the current code object only: a focused child can fail while its
/// parent succeeds. No partial output is produced for the failing object.
#[derive(Debug, Clone)]
pub struct DecompileError {
    /// What went wrong.
    pub kind: DecompileErrorKind,
    /// Where it first went wrong, when known.
    pub context: Option<ErrorContext>,
}

/// The fatal failure classes of the core.
#[derive(Debug, Clone)]
pub enum DecompileErrorKind {
    /// Malformed jump target, overlapping exception range, truncated
    /// instruction, or any other shape a standard compiler cannot emit.
    InvalidBytecode(String),
    /// An opcode byte not present in the table for the declared version.
    Unsupported(String),
    /// A driver invariant on block structure failed.
    InvalidBlock(String),
    /// An emission step failed to advance past its current block.
    NoProgress,
    /// The dataflow worklist drained while unprocessed blocks remained.
    UnexpectedEmptyWorklist,
    /// Nested code objects exceeded the recursion guard.
    RecursionLimit(usize),
    /// A `--focus` path named a code object that does not exist.
    FocusNotFound(String),
    /// A `--focus` path matched more than one nested code object.
    AmbiguousFocus(String),
}

impl DecompileError {
    /// Creates an error with no context attached yet.
    #[must_use]
    pub fn new(kind: DecompileErrorKind) -> Self {
        Self { kind, context: None }
    }

    /// Attaches context if none was recorded yet.
    ///
    /// The first context wins: the innermost failure site is the one worth
    /// reporting, and it is set closest to the fault.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        if self.context.is_none() {
            self.context = Some(context);
        }
        self
    }

    /// Shorthand for an [`DecompileErrorKind::InvalidBytecode`] error.
    #[must_use]
    pub fn invalid_bytecode(message: impl Into<String>) -> Self {
        Self::new(DecompileErrorKind::InvalidBytecode(message.into()))
    }

    /// Shorthand for an [`DecompileErrorKind::Unsupported`] error.
    #[must_use]
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::new(DecompileErrorKind::Unsupported(what.into()))
    }

    /// Shorthand for an [`DecompileErrorKind::InvalidBlock`] error.
    #[must_use]
    pub fn invalid_block(message: impl Into<String>) -> Self {
        Self::new(DecompileErrorKind::InvalidBlock(message.into()))
    }
}

impl fmt::Display for DecompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DecompileErrorKind::InvalidBytecode(msg) => write!(f, "invalid bytecode: {msg}")?,
            DecompileErrorKind::Unsupported(what) => write!(f, "unsupported: {what}")?,
            DecompileErrorKind::InvalidBlock(msg) => write!(f, "invalid block: {msg}")?,
            DecompileErrorKind::NoProgress => write!(f, "driver made no progress")?,
            DecompileErrorKind::UnexpectedEmptyWorklist => {
                write!(f, "dataflow worklist drained unexpectedly")?;
            }
            DecompileErrorKind::RecursionLimit(limit) => {
                write!(f, "nested code objects exceed recursion limit {limit}")?;
            }
            DecompileErrorKind::FocusNotFound(path) => write!(f, "focus path not found: {path}")?,
            DecompileErrorKind::AmbiguousFocus(path) => write!(f, "focus path is ambiguous: {path}")?,
        }
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        Ok(())
    }
}

impl std::error::Error for DecompileError {}

/// Recoverable simulator failure.
///
/// Raised by the stack simulator inside a single block; the driver converts
/// it into fallback emission for that block and decompilation continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Pop on an empty stack in a block entered with strict depth tracking.
    StackUnderflow,
    /// A value that should have been an expression was something else.
    NotAnExpression(&'static str),
    /// `SWAP`/`ROT`/`COPY` argument out of range for the current depth.
    BadStackArg(u32),
    /// `UNPACK_SEQUENCE`/`UNPACK_EX` count disagrees with the target shape.
    InvalidUnpackCount(u32),
    /// `BUILD_CONST_KEY_MAP` keys operand was not a tuple constant.
    InvalidConstKeyMap,
    /// A comprehension code object did not have the expected single-loop shape.
    InvalidComprehension,
    /// A lambda code object's body was not a single expression.
    InvalidLambdaBody,
    /// The stack depth at a block boundary disagreed with the dataflow result.
    InvalidStackDepth { expected: usize, actual: usize },
    /// An opcode the simulator has no handler for.
    UnhandledOpcode(&'static str),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackUnderflow => write!(f, "operand stack underflow"),
            Self::NotAnExpression(found) => write!(f, "expected expression on stack, found {found}"),
            Self::BadStackArg(arg) => write!(f, "stack manipulation argument {arg} out of range"),
            Self::InvalidUnpackCount(count) => write!(f, "invalid unpack count {count}"),
            Self::InvalidConstKeyMap => write!(f, "const-key map keys are not a tuple constant"),
            Self::InvalidComprehension => write!(f, "comprehension code object has unexpected shape"),
            Self::InvalidLambdaBody => write!(f, "lambda body is not a single expression"),
            Self::InvalidStackDepth { expected, actual } => {
                write!(f, "stack depth {actual} at block boundary, expected {expected}")
            }
            Self::UnhandledOpcode(name) => write!(f, "no simulator handler for {name}"),
        }
    }
}

/// Top-level error for the whole pipeline, separating failures by stage.
#[derive(Debug, Clone)]
pub enum PezError {
    /// The `.pyc` container could not be parsed, or its version is unknown.
    Pyc(PycError),
    /// The marshalled object graph is malformed.
    Marshal(MarshalError),
    /// The decompilation core failed.
    Decompile(DecompileError),
}

impl fmt::Display for PezError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pyc(error) => write!(f, "{error}"),
            Self::Marshal(error) => write!(f, "{error}"),
            Self::Decompile(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for PezError {}

impl From<PycError> for PezError {
    fn from(error: PycError) -> Self {
        Self::Pyc(error)
    }
}

impl From<MarshalError> for PezError {
    fn from(error: MarshalError) -> Self {
        Self::Marshal(error)
    }
}

impl From<DecompileError> for PezError {
    fn from(error: DecompileError) -> Self {
        Self::Decompile(error)
    }
}
