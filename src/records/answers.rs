//! Decoding of the `state` blob stored with each student module record.
//!
//! The dump stores state as JSON whose own escapes have been escaped again,
//! so a value reads like `"The following is \\"Quoted\\""` and non-ASCII
//! text appears as `\\u00e9`. Undoing the outer layer with Python
//! `unicode_escape` rules yields plain JSON.

use serde_json::{Map, Value};

/// Key under which the state object keeps the submitted answers, itself a
/// map from input id (e.g. `i4x-BerkeleyX-GG101x-problem-<hash>_2_1`) to answer.
pub const STUDENT_ANSWERS_KEY: &str = "student_answers";

/// Undo one layer of backslash escaping.
///
/// Unknown escapes are kept verbatim. Surrogate pairs written as two
/// `\uXXXX` escapes are combined; a lone surrogate becomes U+FFFD.
pub fn unescape(input: &str) -> String {
    let mut out = Unescaper::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let Some(escape) = chars.next() else {
            out.push('\\');
            break;
        };

        match escape {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push_code_point(value);
            }
            'x' | 'u' | 'U' => {
                let width = match escape {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = chars.clone().take(width).collect();
                let parsed = if digits.len() == width
                    && digits.chars().all(|d| d.is_ascii_hexdigit())
                {
                    u32::from_str_radix(&digits, 16).ok()
                } else {
                    None
                };

                match parsed {
                    Some(value) => {
                        for _ in 0..width {
                            chars.next();
                        }
                        out.push_code_point(value);
                    }
                    None => {
                        out.push('\\');
                        out.push(escape);
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    out.finish()
}

struct Unescaper {
    out: String,
    high_surrogate: Option<u32>,
}

impl Unescaper {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            out: String::with_capacity(capacity),
            high_surrogate: None,
        }
    }

    fn flush_surrogate(&mut self) {
        if self.high_surrogate.take().is_some() {
            self.out.push(char::REPLACEMENT_CHARACTER);
        }
    }

    fn push(&mut self, c: char) {
        self.flush_surrogate();
        self.out.push(c);
    }

    fn push_code_point(&mut self, value: u32) {
        match value {
            0xD800..=0xDBFF => {
                self.flush_surrogate();
                self.high_surrogate = Some(value);
            }
            0xDC00..=0xDFFF => match self.high_surrogate.take() {
                Some(high) => {
                    let combined = 0x10000 + ((high - 0xD800) << 10) + (value - 0xDC00);
                    self.out
                        .push(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                None => self.out.push(char::REPLACEMENT_CHARACTER),
            },
            _ => self.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER)),
        }
    }

    fn finish(mut self) -> String {
        self.flush_surrogate();
        self.out
    }
}

/// Pull the submitted answers out of a raw state field.
///
/// States without answers (or that are not JSON objects) yield an empty map.
pub fn extract_student_answers(state: &str) -> Result<Value, serde_json::Error> {
    let data: Value = serde_json::from_str(&unescape(state))?;

    Ok(match data {
        Value::Object(mut object) => object
            .remove(STUDENT_ANSWERS_KEY)
            .unwrap_or_else(|| Value::Object(Map::new())),
        _ => Value::Object(Map::new()),
    })
}
