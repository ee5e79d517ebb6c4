//! Flattening of multi-line expression templates.
//!
//! A template is either plain text or, when it starts with `=`, an expression
//! field in which every `{{ ... }}` region is code for the workflow engine's
//! expression parser. That parser reads the field as a single line, so every
//! line break must go. Outside string literals a line break becomes one space,
//! which keeps the tokens on either side apart. Inside a string literal the
//! [`SanitizePolicy`] decides.
//!
//! Quotes and backslashes are not escaped here: the template is expected to be
//! valid code for the expression language already. Escaping for JSON happens
//! when the document is serialized.
//!
//! The scanner knows `'`, `"` and `` ` `` literals with backslash escapes and
//! `//` comments. Regular expression literals and `${}` inside template
//! literals are treated as ordinary text.

use std::{
    fmt,
    iter::Peekable,
    str::{CharIndices, FromStr},
};

use crate::{PatchError, Result, SanitizeFault};

/// Marks a field value as an expression rather than fixed text.
pub const EXPRESSION_PREFIX: char = '=';

/// What a line break inside an expression string literal turns into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SanitizePolicy {
    /// Replace it with the escape sequence for the same character (`\n`,
    /// `\r`, `\u0085`, `\u2028` or `\u2029`), so the literal keeps its value.
    /// A `\r\n` pair is a line ending and becomes `\n`.
    #[default]
    Escape,
    /// Replace it with a single space, like every other line break. The
    /// literal loses its line breaks.
    Flatten,
}

impl FromStr for SanitizePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "escape" => Ok(SanitizePolicy::Escape),
            "flatten" => Ok(SanitizePolicy::Flatten),
            _ => Err(format!("unknown sanitize policy: {}", s)),
        }
    }
}

impl fmt::Display for SanitizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SanitizePolicy::Escape => f.write_str("escape"),
            SanitizePolicy::Flatten => f.write_str("flatten"),
        }
    }
}

/// A template that is safe to store in a single-line field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub value: String,
    /// Number of line breaks that were removed. `\r\n` counts once.
    pub line_breaks: usize,
}

/// An open `{{ ... }}` region.
#[derive(Debug, Clone, Copy)]
struct Region {
    opened_at: usize,
    /// Unmatched `{` inside the region; `}}` only closes it at depth 0.
    depth: usize,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Text,
    Code(Region),
    Literal {
        region: Region,
        quote: char,
        opened_at: usize,
    },
    LineComment {
        region: Region,
        opened_at: usize,
    },
}

fn is_line_break(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{85}' | '\u{2028}' | '\u{2029}')
}

/// Consume the `\n` of a `\r\n` pair so it counts as one break, and return
/// the escape sequence that stands for the break inside a string literal.
fn finish_break(c: char, chars: &mut Peekable<CharIndices<'_>>) -> &'static str {
    match c {
        '\r' if chars.next_if(|&(_, next)| next == '\n').is_some() => "\\n",
        '\r' => "\\r",
        '\u{85}' => "\\u0085",
        '\u{2028}' => "\\u2028",
        '\u{2029}' => "\\u2029",
        _ => "\\n",
    }
}

fn fault(fault: SanitizeFault, offset: usize) -> PatchError {
    PatchError::Sanitization { fault, offset }
}

/// Remove every line break from `template`.
///
/// Fails with [`PatchError::Sanitization`] when the expression structure is
/// broken in a way that flattening would hide or make worse.
pub fn sanitize(template: &str, policy: SanitizePolicy) -> Result<Sanitized> {
    let expression = template.starts_with(EXPRESSION_PREFIX);
    let mut out = String::with_capacity(template.len());
    let mut line_breaks = 0;
    let mut mode = Mode::Text;
    let mut chars = template.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        if is_line_break(c) {
            let escaped = finish_break(c, &mut chars);
            line_breaks += 1;
            match mode {
                Mode::Literal { .. } if policy == SanitizePolicy::Escape => out.push_str(escaped),
                Mode::LineComment { opened_at, .. } => {
                    return Err(fault(SanitizeFault::LineComment, opened_at))
                }
                _ => out.push(' '),
            }
            continue;
        }

        match mode {
            Mode::Text => {
                out.push(c);
                if expression && c == '{' && chars.next_if(|&(_, n)| n == '{').is_some() {
                    out.push('{');
                    mode = Mode::Code(Region {
                        opened_at: offset,
                        depth: 0,
                    });
                }
            }
            Mode::Code(mut region) => {
                out.push(c);
                match c {
                    '\'' | '"' | '`' => {
                        mode = Mode::Literal {
                            region,
                            quote: c,
                            opened_at: offset,
                        }
                    }
                    '/' if chars.next_if(|&(_, n)| n == '/').is_some() => {
                        out.push('/');
                        mode = Mode::LineComment {
                            region,
                            opened_at: offset,
                        }
                    }
                    '{' => {
                        region.depth += 1;
                        mode = Mode::Code(region);
                    }
                    '}' if region.depth > 0 => {
                        region.depth -= 1;
                        mode = Mode::Code(region);
                    }
                    '}' if chars.next_if(|&(_, n)| n == '}').is_some() => {
                        out.push('}');
                        mode = Mode::Text;
                    }
                    _ => {}
                }
            }
            Mode::Literal { region, quote, .. } => match c {
                '\\' => match chars.next() {
                    None => return Err(fault(SanitizeFault::DanglingEscape, offset)),
                    Some((_, next)) if is_line_break(next) => {
                        // A line continuation contributes nothing to the value.
                        finish_break(next, &mut chars);
                        line_breaks += 1;
                        if policy == SanitizePolicy::Flatten {
                            out.push_str("\\ ");
                        }
                    }
                    Some((_, next)) => {
                        out.push('\\');
                        out.push(next);
                    }
                },
                _ => {
                    out.push(c);
                    if c == quote {
                        mode = Mode::Code(region);
                    }
                }
            },
            Mode::LineComment { .. } => {
                out.push(c);
                if c == '}' && chars.next_if(|&(_, n)| n == '}').is_some() {
                    out.push('}');
                    mode = Mode::Text;
                }
            }
        }
    }

    match mode {
        Mode::Text => {}
        Mode::Code(region) | Mode::LineComment { region, .. } => {
            return Err(fault(SanitizeFault::UnclosedExpression, region.opened_at))
        }
        Mode::Literal {
            quote, opened_at, ..
        } => {
            return Err(fault(
                SanitizeFault::UnterminatedLiteral { quote },
                opened_at,
            ))
        }
    }

    Ok(Sanitized {
        value: out,
        line_breaks,
    })
}
