use thiserror::Error;

/// Errors raised while decoding a binary DSON file.
///
/// Every variant carries the absolute byte offset at which the problem was detected.
#[derive(Debug, Error)]
pub enum FromBinError {
    #[error("not a DSON file")]
    NotBinFile,
    #[error("unexpected end of input at {at}, {need} more bytes needed")]
    UnexpectedEof { at: usize, need: usize },
    #[error("{what} mismatch at {at}: expected {exp}, found {is}")]
    OffsetMismatch {
        at: usize,
        what: &'static str,
        exp: u64,
        is: u64,
    },
    #[error("{block} block at {at} has size {size}, not a multiple of {entry}")]
    BlockSize {
        at: usize,
        block: &'static str,
        size: usize,
        entry: usize,
    },
    #[error("{block} block at {at} holds {is} entries, header declares {exp}")]
    EntryCount {
        at: usize,
        block: &'static str,
        exp: usize,
        is: usize,
    },
    #[error("{remaining} trailing bytes after data block at {at}")]
    TrailingData { at: usize, remaining: usize },
    #[error("malformed field name at {at}")]
    NameFormat { at: usize },
    #[error("hash mismatch for {name:?} at {at}: stored {exp}, computed {is}")]
    HashMismatch {
        at: usize,
        name: String,
        exp: i32,
        is: i32,
    },
    #[error("object at {at} declares parent {is}, expected {exp}")]
    ParentMismatch { at: usize, exp: i32, is: i32 },
    #[error("object index {idx} at {at} out of range")]
    ObjectIndex { at: usize, idx: usize },
    #[error("child count mismatch at {at}: expected {exp}, attached {is}")]
    ChildCount { at: usize, exp: usize, is: usize },
    #[error("top-level field at {at} is not an object")]
    MissingRoot { at: usize },
    #[error("{open} objects left open at {at}")]
    Unterminated { at: usize, open: usize },
    #[error("object count mismatch at {at}: header declares {exp}, found {is}")]
    ObjectCount { at: usize, exp: usize, is: usize },
    #[error("in embedded file at {at}: {source}")]
    Embedded {
        at: usize,
        #[source]
        source: Box<FromBinError>,
    },
}

impl FromBinError {
    /// Absolute byte offset of the problem within the outermost buffer.
    pub fn offset(&self) -> usize {
        use FromBinError::*;
        match self {
            NotBinFile => 0,
            UnexpectedEof { at, .. }
            | OffsetMismatch { at, .. }
            | BlockSize { at, .. }
            | EntryCount { at, .. }
            | TrailingData { at, .. }
            | NameFormat { at }
            | HashMismatch { at, .. }
            | ParentMismatch { at, .. }
            | ObjectIndex { at, .. }
            | ChildCount { at, .. }
            | MissingRoot { at }
            | Unterminated { at, .. }
            | ObjectCount { at, .. } => *at,
            Embedded { at, source } => *at + source.offset(),
        }
    }
}

/// Errors raised while parsing text and encoding it to binary.
///
/// Spans are byte offsets into the input text.
#[derive(Debug, Error)]
pub enum FromJsonError {
    #[error("expected {what} at {first}..{end}")]
    Expected {
        what: String,
        first: usize,
        end: usize,
    },
    #[error("malformed {what} at {first}..{end}")]
    LiteralFormat {
        what: String,
        first: usize,
        end: usize,
    },
    #[error("unexpected end of input at {at}")]
    UnexpectedEof { at: usize },
    #[error("invalid encoding at {first}..{end}")]
    Encoding { first: usize, end: usize },
    #[error("cannot determine the binary type of {name:?} at {first}..{end}")]
    Unidentified {
        name: String,
        first: usize,
        end: usize,
    },
    #[error("field name {name:?} at {first}..{end} is too long")]
    NameTooLong {
        name: String,
        first: usize,
        end: usize,
    },
    #[error("{what} at {first}..{end} exceeds the format limits")]
    TooLarge {
        what: &'static str,
        first: usize,
        end: usize,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("encoding cancelled")]
    Cancelled,
}

impl FromJsonError {
    /// Text range the error refers to, if any.
    pub fn span(&self) -> Option<std::ops::Range<usize>> {
        use FromJsonError::*;
        match self {
            Expected { first, end, .. }
            | LiteralFormat { first, end, .. }
            | Encoding { first, end }
            | Unidentified { first, end, .. }
            | NameTooLong { first, end, .. }
            | TooLarge { first, end, .. } => Some(*first..*end),
            UnexpectedEof { at } => Some(*at..*at),
            Io(_) | Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FromJsonError::Cancelled)
    }
}

impl From<std::str::Utf8Error> for FromJsonError {
    fn from(err: std::str::Utf8Error) -> Self {
        let first = err.valid_up_to();
        let end = first + err.error_len().unwrap_or(1);
        Self::Encoding { first, end }
    }
}

/// Returned when parsing an [`UnhashPolicy`](crate::UnhashPolicy) from an unrecognized string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown unhash policy {0:?}, expected one of none, unhash, pound-unhash")]
pub struct UnknownPolicy(pub String);

/// Tokenizer-level failures, converted into [`FromJsonError`] at the parser boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JsonError {
    Eof(usize),
    ExpectedValue(usize, usize),
    Expected(String, usize, usize),
    BareControl(usize, usize),
    BadNumber(usize, usize),
}

impl From<JsonError> for FromJsonError {
    fn from(err: JsonError) -> Self {
        match err {
            JsonError::Eof(at) => FromJsonError::UnexpectedEof { at },
            JsonError::ExpectedValue(first, end) => FromJsonError::Expected {
                what: "value".to_owned(),
                first,
                end,
            },
            JsonError::BareControl(first, end) => FromJsonError::LiteralFormat {
                what: "string (bare control character)".to_owned(),
                first,
                end,
            },
            JsonError::BadNumber(first, end) => FromJsonError::LiteralFormat {
                what: "number".to_owned(),
                first,
                end,
            },
            JsonError::Expected(what, first, end) => FromJsonError::Expected { what, first, end },
        }
    }
}
