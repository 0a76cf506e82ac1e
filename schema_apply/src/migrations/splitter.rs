//! Splitting migration text into statements
//!
//! Statements end at `;`. A `;` inside a quoted string, a quoted identifier,
//! a comment or a dollar-quoted body (`$$ ... $$`, `$fn$ ... $fn$`) does not
//! end a statement, so function and trigger definitions survive intact.
//!
//! Backslash escapes inside string literals are honoured for `E'...'`
//! strings, and for every string when the dialect uses them (MySQL).

enum State {
    Code,
    /// `escapes` is set when `\` escapes the next character
    SingleQuoted { escapes: bool },
    DoubleQuoted,
    LineComment,
    BlockComment(usize),
    DollarQuoted(Vec<u8>),
}

/// Split SQL text into trimmed statements, without their terminating `;`.
///
/// Fragments made only of whitespace and comments are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    split_statements_with(sql, false)
}

/// Like [`split_statements`], with `backslash_escapes` set for dialects where
/// `\'` inside any string literal is an escaped quote
pub fn split_statements_with(sql: &str, backslash_escapes: bool) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut state = State::Code;
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        let mut transition = None;

        match &state {
            State::Code => match b {
                b';' => {
                    push_fragment(&mut statements, &sql[start..i], has_code);
                    start = i + 1;
                    has_code = false;
                }
                b'\'' => {
                    has_code = true;
                    let escapes = backslash_escapes || escape_string_prefix(&bytes[..i]);
                    transition = Some(State::SingleQuoted { escapes });
                }
                b'"' => {
                    has_code = true;
                    transition = Some(State::DoubleQuoted);
                }
                b'-' if next == Some(b'-') => {
                    transition = Some(State::LineComment);
                    i += 1;
                }
                b'/' if next == Some(b'*') => {
                    transition = Some(State::BlockComment(1));
                    i += 1;
                }
                b'$' => {
                    has_code = true;
                    if let Some(tag) = dollar_tag(&bytes[i..]) {
                        i += tag.len() - 1;
                        transition = Some(State::DollarQuoted(tag.to_vec()));
                    }
                }
                _ if !b.is_ascii_whitespace() => has_code = true,
                _ => {}
            },
            State::SingleQuoted { escapes } => {
                if *escapes && b == b'\\' {
                    i += 1;
                } else if b == b'\'' && next == Some(b'\'') {
                    i += 1;
                } else if b == b'\'' {
                    transition = Some(State::Code);
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    transition = Some(State::Code);
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    transition = Some(State::Code);
                }
            }
            State::BlockComment(depth) => {
                let depth = *depth;
                if b == b'*' && next == Some(b'/') {
                    i += 1;
                    transition = Some(if depth == 1 {
                        State::Code
                    } else {
                        State::BlockComment(depth - 1)
                    });
                } else if b == b'/' && next == Some(b'*') {
                    i += 1;
                    transition = Some(State::BlockComment(depth + 1));
                }
            }
            State::DollarQuoted(tag) => {
                if bytes[i..].starts_with(tag) {
                    i += tag.len() - 1;
                    transition = Some(State::Code);
                }
            }
        }

        if let Some(next_state) = transition {
            state = next_state;
        }
        i += 1;
    }

    push_fragment(&mut statements, &sql[start..], has_code);
    statements
}

fn push_fragment(statements: &mut Vec<String>, fragment: &str, has_code: bool) {
    let trimmed = fragment.trim();
    if has_code && !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// Whether the quote following `before` opens an `E'...'` string
fn escape_string_prefix(before: &[u8]) -> bool {
    match before {
        [.., prev, b'E' | b'e'] => !(prev.is_ascii_alphanumeric() || *prev == b'_'),
        [b'E' | b'e'] => true,
        _ => false,
    }
}

/// The opening `$tag$` at the start of `rest`, if any. Positional parameters
/// such as `$1` are not tags.
fn dollar_tag(rest: &[u8]) -> Option<&[u8]> {
    let end = rest[1..].iter().position(|&b| b == b'$')? + 1;
    let tag = &rest[1..end];

    let valid = match tag.first() {
        None => true,
        Some(first) => {
            (first.is_ascii_alphabetic() || *first == b'_')
                && tag.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_')
        }
    };

    valid.then(|| &rest[..=end])
}
