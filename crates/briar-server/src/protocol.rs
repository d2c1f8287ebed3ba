//! The wire format shared by server and client.

/// Prefix of the success terminator: `!ok <rows> <in_txn>`.
pub const OK_PREFIX: &str = "!ok";

/// Prefix of the error line: `!err <kind>: <cause>`.
pub const ERR_PREFIX: &str = "!err";

/// Prefix of the column header line.
pub const COLS_PREFIX: &str = "#cols";

/// Splits accumulated client input into `;`-terminated statements,
/// respecting single-quoted strings. Returns the complete statements and
/// the unterminated remainder.
pub fn split_statements(input: &str) -> (Vec<String>, String) {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for ch in input.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            ';' if !in_string => {
                current.push(ch);
                if !current.trim().is_empty() {
                    statements.push(current.trim().to_string());
                }
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    (statements, current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_statement() {
        let (done, rest) = split_statements("SELECT * FROM t;");
        assert_eq!(done, vec!["SELECT * FROM t;"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_incomplete_statement_is_buffered() {
        let (done, rest) = split_statements("SELECT * FROM");
        assert!(done.is_empty());
        assert_eq!(rest, "SELECT * FROM");
    }

    #[test]
    fn test_semicolon_inside_string_kept() {
        let (done, rest) = split_statements("INSERT INTO t (s) VALUES ('a;b');");
        assert_eq!(done.len(), 1);
        assert!(done[0].contains("'a;b'"));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_multiple_statements() {
        let (done, _) = split_statements("BEGIN TRANSACTION; COMMIT;");
        assert_eq!(done.len(), 2);
    }
}
