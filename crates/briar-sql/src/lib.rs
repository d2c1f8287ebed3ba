//! # briar-sql
//!
//! The SQL front end: a hand-written tokenizer and recursive-descent parser
//! producing typed [`briar_tree::QueryNode`] trees.
//!
//! The surface covers the shell's grammar: `CREATE TABLE` / `DROP TABLE`,
//! single-row `INSERT`, `UPDATE ... SET ... WHERE`, `DELETE FROM ... WHERE`,
//! `SELECT` with comma-joins, `INNER JOIN ... ON`, `NATURAL JOIN`, aliases,
//! `ORDER BY`, `LIMIT`, the full predicate set (`IN`, `EXISTS`, `BETWEEN`,
//! `IS NULL`, `LIKE`, `AND`/`OR`/`NOT`), and `BEGIN TRANSACTION` /
//! `COMMIT`. `ABORT` is a client command handled above the parser.

#![warn(missing_docs)]

pub mod lexer;
pub mod parser;

pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{parse_statement, Parser};
