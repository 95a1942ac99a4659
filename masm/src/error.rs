use std::fmt;
use std::rc::Rc;

pub type Result<T> = std::result::Result<T, Error>;

/// A position in the original (pre-include-expansion) sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: Rc<str>,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LexicalError {
    UnterminatedString { column: usize },
    InvalidNumber { column: usize, text: String },
    UnexpectedCharacter { column: usize, text: String },
}

impl fmt::Display for LexicalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LexicalError::UnterminatedString { column } => {
                write!(f, "Unterminated string starting at column {}", column)
            }
            LexicalError::InvalidNumber { column, text } => {
                write!(f, "Invalid number \"{}\" at column {}", text, column)
            }
            LexicalError::UnexpectedCharacter { column, text } => {
                write!(f, "Unexpected character \"{}\" at column {}", text, column)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParseError {
    UnexpectedToken { text: String },
    MalformedOperand { detail: String },
    WrongOperandCount { name: String, expected: &'static str },
    UnknownDirective { name: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { text } => write!(f, "Unexpected token \"{}\"", text),
            ParseError::MalformedOperand { detail } => write!(f, "Malformed operand: {}", detail),
            ParseError::WrongOperandCount { name, expected } => {
                write!(f, "\"{}\" expects {}", name, expected)
            }
            ParseError::UnknownDirective { name } => write!(f, "Unknown directive \"{}\"", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum IncludeError {
    Unavailable { path: String },
    Recursive { path: String },
    Resolver { path: String, message: String },
}

impl fmt::Display for IncludeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IncludeError::Unavailable { path } => {
                write!(f, "No include resolver configured; cannot read \"{}\"", path)
            }
            IncludeError::Recursive { path } => {
                write!(f, "Recursive include of \"{}\"", path)
            }
            IncludeError::Resolver { path, message } => {
                write!(f, "Reading include \"{}\" failed: {}", path, message)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MacroError {
    MissingEnd { name: String },
    InvalidDefinition { detail: String },
    InvalidParameter { text: String },
    Recursion { chain: String },
    DepthExceeded { limit: usize },
}

impl fmt::Display for MacroError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MacroError::MissingEnd { name } => {
                write!(f, "Macro \"{}\" has no matching .end_macro", name)
            }
            MacroError::InvalidDefinition { detail } => {
                write!(f, "Invalid macro definition: {}", detail)
            }
            MacroError::InvalidParameter { text } => {
                write!(f, "Invalid macro parameter \"{}\"", text)
            }
            MacroError::Recursion { chain } => {
                write!(f, "Recursive macro expansion: {}", chain)
            }
            MacroError::DepthExceeded { limit } => {
                write!(f, "Macro expansion exceeds {} nested levels", limit)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SymbolError {
    DuplicateLabel { name: String },
    DuplicateSymbol { name: String },
    CircularEqv { name: String },
    Undefined { name: String },
    OrgBackward { requested: u32, current: u32 },
    OrgUnaligned { requested: u32 },
    DirectiveWrongSegment { name: String, segment: &'static str },
    InstructionWrongSegment { segment: &'static str },
    ModuleMismatch,
    InvalidSize { name: String, detail: String },
}

impl fmt::Display for SymbolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymbolError::DuplicateLabel { name } => write!(f, "Label \"{}\" is already defined", name),
            SymbolError::DuplicateSymbol { name } => {
                write!(f, "Symbol \"{}\" is defined more than once", name)
            }
            SymbolError::CircularEqv { name } => {
                write!(f, "Circular .eqv definition involving \"{}\"", name)
            }
            SymbolError::Undefined { name } => write!(f, "Symbol \"{}\" is not defined", name),
            SymbolError::OrgBackward { requested, current } => write!(
                f,
                "\".org\" target {:#010x} lies before the current offset {:#010x}",
                requested, current
            ),
            SymbolError::OrgUnaligned { requested } => write!(
                f,
                "\".org\" target {:#010x} is not word-aligned in a code segment",
                requested
            ),
            SymbolError::DirectiveWrongSegment { name, segment } => {
                write!(f, "\"{}\" is not allowed in the {} segment", name, segment)
            }
            SymbolError::InstructionWrongSegment { segment } => {
                write!(f, "Instructions are not allowed in the {} segment", segment)
            }
            SymbolError::ModuleMismatch => {
                write!(f, "\".module\"/\".endmodule\" are not balanced")
            }
            SymbolError::InvalidSize { name, detail } => {
                write!(f, "Invalid \"{}\" argument: {}", name, detail)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EncodingError {
    ImmediateOutOfRange { mnemonic: String, value: i64 },
    BranchOutOfRange { distance: i64 },
    RegisterOutOfRange { text: String },
    ShiftOutOfRange { value: i64 },
    UnknownInstruction { mnemonic: String },
    OperandMismatch { mnemonic: String },
    ExpansionTooDeep { mnemonic: String },
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EncodingError::ImmediateOutOfRange { mnemonic, value } => {
                write!(f, "Immediate {} is out of range for \"{}\"", value, mnemonic)
            }
            EncodingError::BranchOutOfRange { distance } => {
                write!(f, "Branch target is {} words away; must fit in 16 bits", distance)
            }
            EncodingError::RegisterOutOfRange { text } => {
                write!(f, "\"{}\" is not a valid register", text)
            }
            EncodingError::ShiftOutOfRange { value } => {
                write!(f, "Shift amount {} is out of range", value)
            }
            EncodingError::UnknownInstruction { mnemonic } => {
                write!(f, "Unknown instruction \"{}\"", mnemonic)
            }
            EncodingError::OperandMismatch { mnemonic } => {
                write!(f, "Operands do not match \"{}\"", mnemonic)
            }
            EncodingError::ExpansionTooDeep { mnemonic } => {
                write!(f, "Pseudo-instruction \"{}\" expands too deeply", mnemonic)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionError {
    DivisionByZero,
    UnsupportedOperator { text: String },
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExpressionError::DivisionByZero => write!(f, "Division by zero in constant expression"),
            ExpressionError::UnsupportedOperator { text } => {
                write!(f, "Operator \"{}\" is not supported here", text)
            }
        }
    }
}

/// One rejected line of a pseudo-op catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct TableError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ErrorKind {
    Lexical(LexicalError),
    Parse(ParseError),
    Include(IncludeError),
    Macro(MacroError),
    Symbol(SymbolError),
    Encoding(EncodingError),
    PseudoOpDisabled { mnemonic: String },
    Expression(ExpressionError),
    Table(Vec<TableError>),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Lexical(e) => e.fmt(f),
            ErrorKind::Parse(e) => e.fmt(f),
            ErrorKind::Include(e) => e.fmt(f),
            ErrorKind::Macro(e) => e.fmt(f),
            ErrorKind::Symbol(e) => e.fmt(f),
            ErrorKind::Encoding(e) => e.fmt(f),
            ErrorKind::PseudoOpDisabled { mnemonic } => write!(
                f,
                "\"{}\" requires pseudo-instruction expansion, which is disabled",
                mnemonic
            ),
            ErrorKind::Expression(e) => e.fmt(f),
            ErrorKind::Table(errors) => {
                writeln!(f, "Pseudo-op catalog is invalid:")?;
                for error in errors {
                    writeln!(f, "  {}", error)?;
                }
                Ok(())
            }
        }
    }
}

/// The single error type of the assembler. Fatal to the current `assemble`
/// call; never recovered locally.
#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub location: Option<SourceLocation>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error {
            kind,
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Error {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}", location, self.kind),
            None => self.kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_from_kind {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Error {
            fn from(err: $t) -> Error {
                Error::new(ErrorKind::$variant(err))
            }
        }
    };
}

impl_from_kind!(LexicalError, Lexical);
impl_from_kind!(ParseError, Parse);
impl_from_kind!(IncludeError, Include);
impl_from_kind!(MacroError, Macro);
impl_from_kind!(SymbolError, Symbol);
impl_from_kind!(EncodingError, Encoding);
impl_from_kind!(ExpressionError, Expression);
