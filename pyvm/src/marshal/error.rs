use std::fmt;

/// Failures of the byte stream itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// No bytes left where an object was expected.
    Eof,
    /// A `r` entry pointing outside the table or at a reserved slot.
    InvalidReference(u32),
    /// A fixed-size read ran past the end of the input.
    TruncatedRead { wanted: usize, available: usize },
}

/// Well-formed bytes carrying data this reader rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    UnknownTypeTag(u8),
    SizeOutOfRange(i64),
    RecursionLimitExceeded,
    BadMagic(u32),
    UnsupportedFloat,
    BadLongDigit(u16),
    UnnormalizedLong,
    InvalidUtf8,
    InvalidLiteral(String),
    UnexpectedNull,
    UnexpectedType { expected: &'static str, found: String },
    Unhashable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    Stream(StreamError),
    Format(FormatError),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Eof => write!(f, "EOF read where object expected"),
            StreamError::InvalidReference(idx) => {
                write!(f, "bad marshal data (invalid reference {idx})")
            }
            StreamError::TruncatedRead { wanted, available } => write!(
                f,
                "marshal data too short: wanted {wanted} bytes, {available} available"
            ),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::UnknownTypeTag(tag) => {
                write!(f, "bad marshal data (unknown type code {:?})", *tag as char)
            }
            FormatError::SizeOutOfRange(n) => {
                write!(f, "bad marshal data (size out of range: {n})")
            }
            FormatError::RecursionLimitExceeded => {
                write!(f, "recursion limit exceeded")
            }
            FormatError::BadMagic(magic) => {
                write!(f, "bad magic number {magic:#010x}")
            }
            FormatError::UnsupportedFloat => {
                write!(f, "can't unpack IEEE 754 special value")
            }
            FormatError::BadLongDigit(d) => {
                write!(f, "bad marshal data (digit {d} out of range in long)")
            }
            FormatError::UnnormalizedLong => {
                write!(f, "bad marshal data (unnormalized long data)")
            }
            FormatError::InvalidUtf8 => write!(f, "invalid UTF-8 in string"),
            FormatError::InvalidLiteral(text) => {
                write!(f, "invalid numeric literal {text:?}")
            }
            FormatError::UnexpectedNull => {
                write!(f, "NULL object in marshal data")
            }
            FormatError::UnexpectedType { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            FormatError::Unhashable(ty) => {
                write!(f, "unhashable type in marshal data: '{ty}'")
            }
        }
    }
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalError::Stream(e) => write!(f, "{e}"),
            MarshalError::Format(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StreamError {}
impl std::error::Error for FormatError {}
impl std::error::Error for MarshalError {}

impl From<StreamError> for MarshalError {
    fn from(e: StreamError) -> Self {
        MarshalError::Stream(e)
    }
}

impl From<FormatError> for MarshalError {
    fn from(e: FormatError) -> Self {
        MarshalError::Format(e)
    }
}
