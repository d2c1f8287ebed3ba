//! System-wide constants and limits.

/// Default TCP port for the line-oriented shell.
pub const DEFAULT_PORT: u16 = 5433;

/// Default host address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default number of WRITE records between checkpoints.
///
/// Kept small so checkpoint behavior is deterministic under test.
pub const DEFAULT_CHECKPOINT_THRESHOLD: usize = 5;

/// Logical block size used for statistics, in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Default blocking factor (tuples per block) when a table has no
/// measured tuple size yet.
pub const DEFAULT_BLOCKING_FACTOR: usize = 10;

/// Maximum length of a table or column identifier.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// File name of the schema descriptor inside a database directory.
pub const SCHEMA_FILE: &str = "__schema__.json";

/// File name of the write-ahead log inside a database directory.
pub const WAL_FILE: &str = "wal.log";

/// Returns true if `name` is a valid table identifier:
/// `[A-Za-z_][A-Za-z0-9_]*`, at most [`MAX_IDENTIFIER_LEN`] bytes.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }
    let mut chars = name.chars();
    let first = chars.next().expect("non-empty");
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("users"));
        assert!(is_valid_identifier("_tmp_2"));
        assert!(!is_valid_identifier("2users"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("user-table"));
        assert!(!is_valid_identifier(&"x".repeat(MAX_IDENTIFIER_LEN + 1)));
    }
}
