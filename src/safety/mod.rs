//! Query safety gate.
//!
//! Parses generated SQL and accepts it only if it is a single read-only query
//! over exactly one allowed table and its declared columns.

mod functions;
mod validator;

pub use validator::{QueryValidator, ValidatedQuery};

use std::fmt;

/// The type of SQL statement detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Drop,
    Truncate,
    Alter,
    Create,
    Grant,
    Revoke,
    Explain,
    Merge,
    /// Statement type could not be determined.
    Unknown,
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Drop => write!(f, "DROP"),
            Self::Truncate => write!(f, "TRUNCATE"),
            Self::Alter => write!(f, "ALTER"),
            Self::Create => write!(f, "CREATE"),
            Self::Grant => write!(f, "GRANT"),
            Self::Revoke => write!(f, "REVOKE"),
            Self::Explain => write!(f, "EXPLAIN"),
            Self::Merge => write!(f, "MERGE"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Why a candidate query was refused by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Nothing left to run after sanitizing.
    Empty,
    /// The text is not SQL the store dialect understands.
    Unparseable(String),
    /// More than one statement; the count is attached.
    MultipleStatements(usize),
    /// A data-definition or data-mutation keyword appears in the text.
    ForbiddenKeyword(String),
    /// The statement (or a nested query body) is not a plain read.
    NotReadOnly(StatementType),
    /// `SELECT ... INTO` creates a table.
    SelectInto,
    /// A relation other than the dataset's table is referenced.
    ForeignTable(String),
    /// A column outside the dataset's declared columns is referenced.
    UnknownColumn(String),
    /// A qualified reference with a qualifier that is not the table or an alias.
    BadQualifier(String),
    /// A function outside the store's allow-list is called.
    ForbiddenFunction(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "the query is empty"),
            Self::Unparseable(msg) => write!(f, "the query could not be parsed ({msg})"),
            Self::MultipleStatements(n) => {
                write!(f, "only one statement is allowed, found {n}")
            }
            Self::ForbiddenKeyword(word) => {
                write!(f, "'{word}' is not allowed, only reads are permitted")
            }
            Self::NotReadOnly(kind) => {
                write!(f, "{kind} statements are not allowed, only SELECT is permitted")
            }
            Self::SelectInto => write!(f, "SELECT ... INTO is not allowed"),
            Self::ForeignTable(name) => {
                write!(f, "table '{name}' is not part of this dataset")
            }
            Self::UnknownColumn(name) => {
                write!(f, "column '{name}' does not exist in this dataset")
            }
            Self::BadQualifier(name) => {
                write!(f, "reference '{name}' does not point at this dataset")
            }
            Self::ForbiddenFunction(name) => write!(f, "function '{name}' is not allowed"),
        }
    }
}
