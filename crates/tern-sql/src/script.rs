//! SQL script content and statement boundaries

use sha2::{Digest, Sha256};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, TokenWithLocation, Tokenizer, TokenizerError};
use std::fmt;

/// One direction of a SQL migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlScript {
    sql: String,
}

impl SqlScript {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    /// The script text exactly as written
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Whether the script contains nothing but whitespace and comments
    pub fn is_blank(&self) -> bool {
        match Tokenizer::new(&PostgreSqlDialect {}, &self.sql).tokenize() {
            Ok(tokens) => tokens
                .iter()
                .all(|token| matches!(token, Token::Whitespace(_) | Token::EOF)),
            Err(_) => false,
        }
    }

    /// SHA-256 of the script text, hex encoded
    pub fn checksum(&self) -> String {
        sha256_hex(self.sql.as_bytes())
    }

    /// The script's statements as written, in order.
    ///
    /// Text the tokenizer rejects is returned whole so the server reports
    /// the error.
    pub fn statements(&self) -> Vec<String> {
        if self.is_blank() {
            return Vec::new();
        }
        split_sql_statements(&self.sql).unwrap_or_else(|e| {
            tracing::warn!("SQL tokenizing failed, keeping the script whole: {}", e);
            vec![self.sql.trim().to_string()]
        })
    }
}

impl fmt::Display for SqlScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Split SQL at top-level semicolons without rewriting any statement.
///
/// Boundaries come from the PostgreSQL tokenizer, so semicolons inside
/// quoted strings, dollar-quoted bodies and comments never split.
pub fn split_sql_statements(sql: &str) -> Result<Vec<String>, TokenizerError> {
    let tokens = Tokenizer::new(&PostgreSqlDialect {}, sql).tokenize_with_location()?;
    let lines = LineStarts::new(sql);

    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;

    for TokenWithLocation { token, location } in tokens {
        match token {
            Token::SemiColon => {
                let Some(offset) = lines.byte_offset(sql, &location) else {
                    continue;
                };
                let end = offset + 1;
                if has_code {
                    statements.push(sql[start..end].trim().to_string());
                }
                start = end;
                has_code = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => has_code = true,
        }
    }

    if has_code {
        statements.push(sql[start..].trim().to_string());
    }
    Ok(statements)
}

/// Byte offset of each line start, for mapping tokenizer locations
struct LineStarts(Vec<usize>);

impl LineStarts {
    fn new(sql: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self(starts)
    }

    /// Locations are 1-based, columns count characters
    fn byte_offset(&self, sql: &str, location: &Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let line_start = *self.0.get(line)?;
        sql[line_start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| line_start + i)
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
