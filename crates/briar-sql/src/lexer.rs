//! The SQL tokenizer.

use briar_common::{DbError, DbResult};

/// Keywords recognized by the grammar, uppercased.
const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "ORDER", "BY", "ASC", "DESC", "LIMIT", "JOIN", "INNER",
    "NATURAL", "ON", "AS", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "CREATE",
    "TABLE", "DROP", "CASCADE", "RESTRICT", "PRIMARY", "KEY", "FOREIGN", "REFERENCES",
    "BEGIN", "TRANSACTION", "COMMIT", "AND", "OR", "NOT", "IN", "EXISTS", "BETWEEN", "IS",
    "NULL", "LIKE", "TRUE", "FALSE", "INTEGER", "INT", "FLOAT", "CHAR", "VARCHAR",
];

/// The kind of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// A reserved word, stored uppercased.
    Keyword(String),
    /// An identifier.
    Identifier(String),
    /// A numeric literal, kept as written.
    Number(String),
    /// A single-quoted string literal, unescaped.
    Str(String),
    /// Punctuation or an operator.
    Symbol(String),
    /// End of input.
    End,
}

impl TokenKind {
    /// Returns the keyword text if this is a keyword.
    pub fn keyword(&self) -> Option<&str> {
        match self {
            TokenKind::Keyword(k) => Some(k.as_str()),
            _ => None,
        }
    }
}

/// One token with its byte position in the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The token kind and payload.
    pub kind: TokenKind,
    /// Byte offset of the token start.
    pub position: usize,
}

/// The tokenizer.
pub struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over one statement.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            position: 0,
        }
    }

    /// Tokenizes the whole input, ending with a single `End` token.
    pub fn tokenize(mut self) -> DbResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let end = token.kind == TokenKind::End;
            tokens.push(token);
            if end {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.position).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.position + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.position += 1;
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> DbResult<Token> {
        self.skip_whitespace();
        let start = self.position;
        let Some(b) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::End,
                position: start,
            });
        };

        if b.is_ascii_alphabetic() || b == b'_' {
            while let Some(b) = self.peek() {
                if b.is_ascii_alphanumeric() || b == b'_' {
                    self.position += 1;
                } else {
                    break;
                }
            }
            let word = &self.input[start..self.position];
            let upper = word.to_ascii_uppercase();
            let kind = if KEYWORDS.contains(&upper.as_str()) {
                TokenKind::Keyword(upper)
            } else {
                TokenKind::Identifier(word.to_string())
            };
            return Ok(Token {
                kind,
                position: start,
            });
        }

        if b.is_ascii_digit() {
            let mut seen_dot = false;
            while let Some(b) = self.peek() {
                if b.is_ascii_digit() {
                    self.position += 1;
                } else if b == b'.' && !seen_dot
                    && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())
                {
                    seen_dot = true;
                    self.position += 1;
                } else {
                    break;
                }
            }
            return Ok(Token {
                kind: TokenKind::Number(self.input[start..self.position].to_string()),
                position: start,
            });
        }

        if b == b'\'' {
            self.position += 1;
            let mut text = String::new();
            loop {
                match self.peek() {
                    Some(b'\'') => {
                        // Doubled quote escapes a quote.
                        if self.peek_at(1) == Some(b'\'') {
                            text.push('\'');
                            self.position += 2;
                        } else {
                            self.position += 1;
                            break;
                        }
                    }
                    Some(_) => {
                        let rest = &self.input[self.position..];
                        let ch = rest.chars().next().expect("non-empty");
                        text.push(ch);
                        self.position += ch.len_utf8();
                    }
                    None => {
                        return Err(DbError::parse(start, "unterminated string literal"));
                    }
                }
            }
            return Ok(Token {
                kind: TokenKind::Str(text),
                position: start,
            });
        }

        // Two-character operators first.
        for op in ["<=", ">=", "!=", "<>"] {
            if self.input[self.position..].starts_with(op) {
                self.position += 2;
                return Ok(Token {
                    kind: TokenKind::Symbol(op.to_string()),
                    position: start,
                });
            }
        }
        if matches!(
            b,
            b'(' | b')' | b',' | b';' | b'*' | b'=' | b'<' | b'>' | b'+' | b'-' | b'/' | b'.'
        ) {
            self.position += 1;
            return Ok(Token {
                kind: TokenKind::Symbol((b as char).to_string()),
                position: start,
            });
        }

        Err(DbError::parse(
            start,
            format!("unexpected character '{}'", b as char),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        Lexer::new(sql)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let tokens = kinds("select From WHERE");
        assert_eq!(tokens[0], TokenKind::Keyword("SELECT".to_string()));
        assert_eq!(tokens[1], TokenKind::Keyword("FROM".to_string()));
        assert_eq!(tokens[2], TokenKind::Keyword("WHERE".to_string()));
    }

    #[test]
    fn test_identifiers_keep_case() {
        let tokens = kinds("Users_2");
        assert_eq!(tokens[0], TokenKind::Identifier("Users_2".to_string()));
    }

    #[test]
    fn test_numbers_and_strings() {
        let tokens = kinds("42 3.25 'it''s'");
        assert_eq!(tokens[0], TokenKind::Number("42".to_string()));
        assert_eq!(tokens[1], TokenKind::Number("3.25".to_string()));
        assert_eq!(tokens[2], TokenKind::Str("it's".to_string()));
    }

    #[test]
    fn test_operators() {
        let tokens = kinds("a <= b <> c != d = e");
        assert_eq!(tokens[1], TokenKind::Symbol("<=".to_string()));
        assert_eq!(tokens[3], TokenKind::Symbol("<>".to_string()));
        assert_eq!(tokens[5], TokenKind::Symbol("!=".to_string()));
        assert_eq!(tokens[7], TokenKind::Symbol("=".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(Lexer::new("'oops").tokenize().is_err());
    }

    #[test]
    fn test_qualified_name() {
        let tokens = kinds("users.id");
        assert_eq!(tokens[0], TokenKind::Identifier("users".to_string()));
        assert_eq!(tokens[1], TokenKind::Symbol(".".to_string()));
        assert_eq!(tokens[2], TokenKind::Identifier("id".to_string()));
    }
}
