use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// How script text is canonicalized before rules are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// Collapse whitespace and lower-case only. Comment text is matched like code.
    Literal,
    /// Drop shell comments first, then behave like [`NormalizationPolicy::Literal`].
    #[default]
    StripComments,
}

impl NormalizationPolicy {
    /// Spelling used in config and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            NormalizationPolicy::Literal => "literal",
            NormalizationPolicy::StripComments => "strip_comments",
        }
    }
}

/// Canonical form of `text` under `policy`: single spaces, trimmed, lower-case.
pub fn normalize(text: &str, policy: NormalizationPolicy) -> String {
    let text: Cow<'_, str> = match policy {
        NormalizationPolicy::Literal => Cow::Borrowed(text),
        NormalizationPolicy::StripComments => Cow::Owned(strip_comments(text)),
    };
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Removes `#` comments that start a word outside quotes. Each comment ends at
/// its newline, which is kept. An unterminated quote leaves the rest intact.
///
/// Backslash escapes are tracked as the shell does: outside quotes and inside
/// double quotes a `\` takes the next character literally, single quotes take
/// everything literally.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut in_comment = false;
    let mut word_start = true;

    for ch in text.chars() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
                word_start = true;
                out.push(ch);
            }
            continue;
        }

        if escaped {
            escaped = false;
            word_start = false;
            out.push(ch);
            continue;
        }

        match quote {
            Some('\'') => {
                if ch == '\'' {
                    quote = None;
                }
            }
            Some(q) => {
                if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\\' => escaped = true,
                '\'' | '"' => quote = Some(ch),
                '#' if word_start => {
                    in_comment = true;
                    continue;
                }
                _ => {}
            },
        }

        word_start = quote.is_none() && !escaped && ends_word(ch);
        out.push(ch);
    }

    out
}

/// Characters after which an unquoted `#` opens a comment. A closing `)` is
/// not one of them: `$(cmd)#x` is a single word.
fn ends_word(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, ';' | '&' | '|' | '(')
}
