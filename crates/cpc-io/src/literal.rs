//! List literal codec
//!
//! Relationship cells hold quoted identifier lists such as
//! `['q123', "q456"]`. This module parses them without evaluating
//! anything and formats lists back in the same shape.

use thiserror::Error;

/// A cell that is not a well-formed list literal
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiteralError {
    #[error("expected '[' at start of list")]
    MissingOpenBracket,

    #[error("unterminated list")]
    UnterminatedList,

    #[error("unterminated string starting at byte {0}")]
    UnterminatedString(usize),

    #[error("unexpected character '{found}' at byte {position}")]
    UnexpectedChar { found: char, position: usize },

    #[error("trailing characters after list at byte {0}")]
    TrailingCharacters(usize),
}

/// Parse a list literal into its identifiers, preserving order
///
/// An empty or whitespace-only cell is an empty list.
pub fn parse_identifier_list(cell: &str) -> Result<Vec<String>, LiteralError> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut chars = trimmed.char_indices().peekable();
    match chars.next() {
        Some((_, '[')) => {}
        _ => return Err(LiteralError::MissingOpenBracket),
    }

    let mut items = Vec::new();
    let mut expect_item = true;

    loop {
        let Some((position, c)) = chars.next() else {
            return Err(LiteralError::UnterminatedList);
        };

        match c {
            c if c.is_whitespace() => continue,
            ']' => break,
            '\'' | '"' if expect_item => {
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => return Err(LiteralError::UnterminatedString(position)),
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => value.push(ch),
                    }
                }
                if !closed {
                    return Err(LiteralError::UnterminatedString(position));
                }
                items.push(value);
                expect_item = false;
            }
            ',' if !expect_item => expect_item = true,
            found => return Err(LiteralError::UnexpectedChar { found, position }),
        }
    }

    if let Some((position, _)) = chars.next() {
        return Err(LiteralError::TrailingCharacters(position));
    }

    Ok(items)
}

/// Format identifiers as a single-quoted list literal
pub fn format_identifier_list<S: AsRef<str>>(identifiers: &[S]) -> String {
    let items: Vec<String> = identifiers
        .iter()
        .map(|id| {
            let escaped = id.as_ref().replace('\\', "\\\\").replace('\'', "\\'");
            format!("'{escaped}'")
        })
        .collect();

    format!("[{}]", items.join(", "))
}
