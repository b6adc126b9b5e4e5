//! Redis-style glob patterns (`SCAN MATCH`, `KEYS`) for the in-memory store.
//!
//! Supported syntax: `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\` escapes.

use regex::Regex;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    // `None` when the pattern contains an empty class and can never match.
    regex: Option<Regex>,
}

impl GlobPattern {
    /// Compiles a glob pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut out = String::with_capacity(pattern.len() * 2 + 8);
        out.push_str("(?s)^");

        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                '\\' => push_literal(&mut out, chars.next().unwrap_or('\\')),
                '[' => {
                    let negate = chars.next_if_eq(&'^').is_some();
                    let mut class = String::new();
                    while let Some(n) = chars.next() {
                        let lo = match n {
                            ']' => break,
                            '\\' => match chars.next() {
                                Some(escaped) => escaped,
                                None => break,
                            },
                            other => other,
                        };

                        let mut ahead = chars.clone();
                        let is_range = ahead.next() == Some('-') && ahead.peek().is_some_and(|p| *p != ']');
                        if !is_range {
                            push_class_literal(&mut class, lo);
                            continue;
                        }

                        chars.next();
                        let hi = match chars.next() {
                            Some('\\') => chars.next().unwrap_or('\\'),
                            Some(hi) => hi,
                            None => lo,
                        };
                        // Redis accepts `[z-a]` as `[a-z]`.
                        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                        push_class_literal(&mut class, lo);
                        class.push('-');
                        push_class_literal(&mut class, hi);
                    }
                    match (class.is_empty(), negate) {
                        (true, true) => out.push('.'),
                        (true, false) => return Ok(Self { regex: None }),
                        (false, true) => {
                            out.push_str("[^");
                            out.push_str(&class);
                            out.push(']');
                        }
                        (false, false) => {
                            out.push('[');
                            out.push_str(&class);
                            out.push(']');
                        }
                    }
                }
                other => push_literal(&mut out, other),
            }
        }
        out.push('$');

        Ok(Self {
            regex: Some(Regex::new(&out)?),
        })
    }

    /// Returns `true` if `key` matches the pattern.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(key))
    }
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn push_class_literal(class: &mut String, c: char) {
    if c.is_ascii_punctuation() {
        class.push('\\');
    }
    class.push(c);
}
