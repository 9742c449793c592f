//! SQL safety helpers for statement building.
//!
//! Identifiers (table, index, view and database names) cannot be bound as parameters, so
//! they are always emitted double-quoted with embedded quotes doubled. Literals that the
//! server refuses to take as placeholders (`IMPORT ... DATA ('url')`) are single-quoted
//! the same way. Free-form fragments such as column types are checked for statement
//! separators and comments before being spliced in.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) to confirm view definitions are a single
//! SELECT. CockroachDB-only syntax that sqlparser does not know falls back to a lexical check.

use crate::error::{DbError, DbResult};
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// URL schemes accepted as bulk import sources.
pub const IMPORT_SCHEMES: &[&str] = &["s3", "azure-blob", "azure", "gs", "http", "https"];

/// Statements that open, end or partition a transaction. The transaction tool owns those.
const TRANSACTION_CONTROL: &[&str] = &[
    "BEGIN", "START", "COMMIT", "END", "ROLLBACK", "ABORT", "SAVEPOINT", "RELEASE", "PREPARE",
];

/// Quote an identifier: `users` -> `"users"`, `a"b` -> `"a""b"`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal: `it's` -> `'it''s'`.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Check that an identifier is usable and return it trimmed.
pub fn validate_identifier<'a>(kind: &str, name: &'a str) -> DbResult<&'a str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DbError::invalid_input(format!("{} name cannot be empty", kind)));
    }
    if trimmed.contains('\0') {
        return Err(DbError::invalid_input(format!(
            "{} name cannot contain NUL characters",
            kind
        )));
    }
    Ok(trimmed)
}

/// Check a raw SQL fragment (column type, column constraint) spliced into DDL.
pub fn validate_fragment(field: &str, fragment: &str) -> DbResult<()> {
    if fragment.contains(';') || fragment.contains("--") || fragment.contains("/*") {
        return Err(DbError::invalid_input(format!(
            "Column {} '{}' may not contain statement separators or comments",
            field, fragment
        )));
    }
    if fragment.contains('\0') {
        return Err(DbError::invalid_input(format!(
            "Column {} may not contain NUL characters",
            field
        )));
    }
    Ok(())
}

/// Check a bulk import source against [`IMPORT_SCHEMES`].
pub fn validate_import_url(file_url: &str) -> DbResult<()> {
    let parsed = url::Url::parse(file_url.trim())
        .map_err(|e| DbError::invalid_input(format!("Invalid file URL '{}': {}", file_url, e)))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if !IMPORT_SCHEMES.contains(&scheme.as_str()) {
        return Err(DbError::invalid_input(format!(
            "Unsupported scheme: {} (allowed: {})",
            scheme,
            IMPORT_SCHEMES.join(", ")
        )));
    }
    Ok(())
}

/// Remove trailing whitespace and semicolons.
pub fn strip_trailing_semicolons(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Split on top-level `;`, ignoring separators inside quotes and comments.
///
/// Comments are dropped from the returned statements; empty statements are skipped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_content = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                has_content = true;
                current.push(c);
                while let Some(n) = chars.next() {
                    current.push(n);
                    if n == c {
                        if chars.peek() == Some(&c) {
                            current.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                current.push(' ');
            }
            ';' => {
                if has_content {
                    statements.push(current.trim().to_string());
                }
                current.clear();
                has_content = false;
            }
            _ => {
                if !c.is_whitespace() {
                    has_content = true;
                }
                current.push(c);
            }
        }
    }
    if has_content {
        statements.push(current.trim().to_string());
    }
    statements
}

/// Reject input that holds anything other than exactly one statement.
pub fn ensure_single_statement(sql: &str) -> DbResult<()> {
    match split_statements(sql).len() {
        0 => Err(DbError::invalid_input("SQL statement cannot be empty")),
        1 => Ok(()),
        n => Err(DbError::invalid_input(format!(
            "Expected a single SQL statement, found {}",
            n
        ))),
    }
}

/// Require a single SELECT (or other row-returning query) for view definitions.
pub fn ensure_single_select(sql: &str) -> DbResult<()> {
    ensure_single_statement(sql)?;

    match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(statements) => match statements.as_slice() {
            [Statement::Query(_)] => Ok(()),
            _ => Err(DbError::invalid_input(
                "View definition must be a single SELECT statement",
            )),
        },
        Err(_) => {
            let statements = split_statements(sql);
            let first_word = statements
                .first()
                .and_then(|s| s.split_whitespace().next())
                .map(|w| w.trim_start_matches('(').to_ascii_uppercase())
                .unwrap_or_default();
            if matches!(first_word.as_str(), "SELECT" | "WITH" | "VALUES" | "TABLE") {
                Ok(())
            } else {
                Err(DbError::invalid_input(
                    "View definition must be a single SELECT statement",
                ))
            }
        }
    }
}

/// Check one entry of a transaction: a single statement that does not control the
/// transaction itself.
pub fn ensure_transaction_statement(sql: &str) -> DbResult<()> {
    ensure_single_statement(sql)?;
    let first_word = split_statements(sql)
        .first()
        .and_then(|s| s.split_whitespace().next())
        .map(|w| w.trim_end_matches(';').to_ascii_uppercase())
        .unwrap_or_default();
    if TRANSACTION_CONTROL.contains(&first_word.as_str()) {
        return Err(DbError::invalid_input(format!(
            "{} is not allowed inside execute_transaction; statements are committed or rolled back together",
            first_word
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_ident("Mixed Case"), "\"Mixed Case\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("s3://bucket/a.csv"), "'s3://bucket/a.csv'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_validate_identifier() {
        assert_eq!(validate_identifier("Table", "  users ").unwrap(), "users");
        assert!(validate_identifier("Table", "   ").is_err());
        assert!(validate_identifier("Table", "a\0b").is_err());
    }

    #[test]
    fn test_validate_fragment() {
        assert!(validate_fragment("datatype", "DECIMAL(10, 2)").is_ok());
        assert!(validate_fragment("constraint", "NOT NULL DEFAULT 'x'").is_ok());
        assert!(validate_fragment("datatype", "INT); DROP TABLE users").is_err());
        assert!(validate_fragment("constraint", "NOT NULL -- hidden").is_err());
        assert!(validate_fragment("constraint", "/* x */ NOT NULL").is_err());
    }

    #[test]
    fn test_validate_import_url() {
        for url in [
            "s3://bucket/data.csv",
            "azure-blob://container/data.avro",
            "azure://container/data.csv",
            "gs://bucket/data.csv",
            "http://example.com/data.csv",
            "HTTPS://example.com/data.csv",
        ] {
            assert!(validate_import_url(url).is_ok(), "{url}");
        }
        for url in ["file:///etc/passwd", "ftp://host/data.csv", "nodelocal://1/data.csv"] {
            let err = validate_import_url(url).unwrap_err();
            assert!(err.to_string().contains("Unsupported scheme"), "{url}");
        }
        assert!(validate_import_url("not a url").is_err());
    }

    #[test]
    fn test_strip_trailing_semicolons() {
        assert_eq!(strip_trailing_semicolons("SELECT 1;"), "SELECT 1");
        assert_eq!(strip_trailing_semicolons("  SELECT 1 ; ;\n"), "SELECT 1");
        assert_eq!(strip_trailing_semicolons("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_split_statements_respects_quotes_and_comments() {
        assert_eq!(split_statements("SELECT ';' FROM t;").len(), 1);
        assert_eq!(split_statements("SELECT \"a;b\" FROM t").len(), 1);
        assert_eq!(split_statements("SELECT 1 -- ; trailing\n").len(), 1);
        assert_eq!(split_statements("SELECT 1 /* ; */").len(), 1);
        assert_eq!(split_statements("SELECT 'it''s;'").len(), 1);
        assert_eq!(split_statements("SELECT 1; SELECT 2").len(), 2);
        assert!(split_statements(" ; ;").is_empty());
    }

    #[test]
    fn test_ensure_single_statement() {
        assert!(ensure_single_statement("SELECT * FROM users;").is_ok());
        assert!(ensure_single_statement("SELECT 1; DROP TABLE users").is_err());
        assert!(ensure_single_statement("   ").is_err());
    }

    #[test]
    fn test_ensure_single_select() {
        assert!(ensure_single_select("SELECT id, name FROM users WHERE active").is_ok());
        assert!(ensure_single_select("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
        assert!(ensure_single_select("DELETE FROM users").is_err());
        assert!(ensure_single_select("SELECT 1; DELETE FROM users").is_err());
    }

    #[test]
    fn test_ensure_transaction_statement() {
        assert!(ensure_transaction_statement("INSERT INTO t VALUES (1)").is_ok());
        assert!(ensure_transaction_statement("UPDATE t SET v = 'commit; now'").is_ok());
        assert!(ensure_transaction_statement("COMMIT").is_err());
        assert!(ensure_transaction_statement("  rollback;").is_err());
        assert!(ensure_transaction_statement("begin transaction").is_err());
        assert!(ensure_transaction_statement("SAVEPOINT cockroach_restart").is_err());
        assert!(ensure_transaction_statement("INSERT INTO t VALUES (1); COMMIT").is_err());
        assert!(ensure_transaction_statement("").is_err());
    }
}
