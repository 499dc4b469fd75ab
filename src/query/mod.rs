//! Search query language: scanning and translation to engine syntax
//!
//! The scanner splits user input into tokens; the parser rewrites them into
//! the query string the index engine understands. Parsing is pure text to
//! text with no I/O.

pub mod parser;
pub mod scanner;

pub use parser::{parse_query, ParseError, QueryParser};
pub use scanner::{Scanner, SearchToken, TokenKind};
