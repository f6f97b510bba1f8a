//! Tokenizer for the filter query language.

use std::str::FromStr;

use super::types::PropertyKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Quoted string, `c"..."` case-sensitive variant, or `@ident` bare
    /// string.
    Str { value: String, case_sensitive: bool },
    /// `key:value` property filter.
    Property { key: PropertyKey, value: String },
    /// `!!!` shorthand.
    AnyError,
    /// `@@@` shorthand.
    AnyRunningAgent,
    /// `$$$` shorthand.
    AnyRunningProcess,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Eof,
}

#[derive(Debug)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for TokenizeError {}

fn err(message: impl Into<String>, position: usize) -> TokenizeError {
    TokenizeError { message: message.into(), position }
}

fn is_bare_string_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn is_property_value_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')'
}

/// Parse a quoted string starting at the opening quote.
fn parse_string(
    chars: &[char],
    mut pos: usize,
    case_sensitive: bool,
) -> Result<(Token, usize), TokenizeError> {
    let start = pos;
    pos += 1; // opening quote
    let mut value = String::new();

    while pos < chars.len() {
        match chars[pos] {
            '"' => {
                return Ok((Token::Str { value, case_sensitive }, pos + 1));
            }
            '\\' => {
                let Some(&next) = chars.get(pos + 1) else {
                    return Err(err("Unterminated escape sequence", pos));
                };
                match next {
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    other => return Err(err(format!("Invalid escape sequence: \\{other}"), pos)),
                }
                pos += 2;
            }
            c => {
                value.push(c);
                pos += 1;
            }
        }
    }

    Err(err("Unterminated string", start))
}

/// Tokenize a query string.
pub fn tokenize(query: &str) -> Result<Vec<Token>, TokenizeError> {
    let chars: Vec<char> = query.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        // Shorthands take priority over their single-char tokens.
        if chars[pos..].starts_with(&['!', '!', '!']) {
            tokens.push(Token::AnyError);
            pos += 3;
        } else if chars[pos..].starts_with(&['@', '@', '@']) {
            tokens.push(Token::AnyRunningAgent);
            pos += 3;
        } else if chars[pos..].starts_with(&['$', '$', '$']) {
            tokens.push(Token::AnyRunningProcess);
            pos += 3;
        } else if c == 'c' && chars.get(pos + 1) == Some(&'"') {
            let (token, next) = parse_string(&chars, pos + 1, true)?;
            tokens.push(token);
            pos = next;
        } else if c == '"' {
            let (token, next) = parse_string(&chars, pos, false)?;
            tokens.push(token);
            pos = next;
        } else if c == '@' {
            let start = pos + 1;
            let mut end = start;
            while end < chars.len() && is_bare_string_char(chars[end]) {
                end += 1;
            }
            if end == start {
                return Err(err("Empty bare string after @", pos));
            }
            tokens.push(Token::Str {
                value: chars[start..end].iter().collect(),
                case_sensitive: false,
            });
            pos = end;
        } else if c == '!' {
            tokens.push(Token::Not);
            pos += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            pos += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            pos += 1;
        } else if c.is_alphabetic() {
            let start = pos;
            let mut end = pos;
            while end < chars.len() && chars[end].is_alphabetic() {
                end += 1;
            }
            let word: String = chars[start..end].iter().collect();

            // `key:value` property filter.
            if chars.get(end) == Some(&':') {
                let key = PropertyKey::from_str(&word.to_lowercase())
                    .map_err(|_| err(format!("Unknown property: {word}"), start))?;
                let value_start = end + 1;
                let mut value_end = value_start;
                while value_end < chars.len() && is_property_value_char(chars[value_end]) {
                    value_end += 1;
                }
                if value_end == value_start {
                    return Err(err(format!("Empty value for property {word}"), start));
                }
                tokens.push(Token::Property {
                    key,
                    value: chars[value_start..value_end].iter().collect(),
                });
                pos = value_end;
                continue;
            }

            match word.to_uppercase().as_str() {
                "AND" => tokens.push(Token::And),
                "OR" => tokens.push(Token::Or),
                _ => return Err(err(format!("Unknown keyword: {word}"), start)),
            }
            pos = end;
        } else {
            return Err(err(format!("Unexpected character: {c}"), pos));
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}
