//! Redis-style glob patterns (`*`, `?`, `[abc]`, `[^a-z]`, `\x`).
//!
//! Patterns compile to an anchored regex once and are then matched against
//! keys. A class that cannot be compiled (e.g. `[z-a]`) makes the whole
//! pattern match literally, which is what a key scan can safely fall back to.

use regex::Regex;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(Regex),
    Literal,
}

impl GlobPattern {
    /// Compiles `pattern`.
    pub fn new(pattern: &str) -> Self {
        let matcher = match Regex::new(&translate(pattern)) {
            Ok(regex) => Matcher::Glob(regex),
            Err(e) => {
                tracing::debug!(pattern = %pattern, error = %e, "glob falls back to literal match");
                Matcher::Literal
            }
        };
        Self {
            source: pattern.to_string(),
            matcher,
        }
    }

    /// Returns `true` if `key` matches the whole pattern.
    pub fn matches(&self, key: &str) -> bool {
        match &self.matcher {
            Matcher::Glob(regex) => regex.is_match(key),
            Matcher::Literal => key == self.source,
        }
    }

    /// The pattern as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn translate(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push_str("(?s)^");

    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                i += 1;
                match chars.get(i) {
                    Some(c) => push_escaped(&mut out, *c),
                    None => push_escaped(&mut out, '\\'),
                }
            }
            '[' => match parse_class(&chars[i + 1..]) {
                Some((class, consumed)) => {
                    out.push_str(&class);
                    i += consumed;
                }
                None => push_escaped(&mut out, '['),
            },
            c => push_escaped(&mut out, c),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Parses the body of a `[...]` class. Returns the regex class and the
/// number of characters consumed including the closing bracket.
fn parse_class(rest: &[char]) -> Option<(String, usize)> {
    let mut class = String::from("[");
    let mut i = 0;
    if rest.first() == Some(&'^') {
        class.push('^');
        i += 1;
    }
    let body_start = i;

    while i < rest.len() {
        match rest[i] {
            ']' if i > body_start => {
                class.push(']');
                return Some((class, i + 1));
            }
            '\\' => {
                i += 1;
                let c = *rest.get(i)?;
                push_class_literal(&mut class, c);
            }
            '-' if i > body_start && i + 1 < rest.len() && rest[i + 1] != ']' => class.push('-'),
            c => push_class_literal(&mut class, c),
        }
        i += 1;
    }
    None
}

fn push_escaped(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn push_class_literal(class: &mut String, c: char) {
    if matches!(c, '\\' | ']' | '[' | '^' | '-' | '&' | '~') {
        class.push('\\');
    }
    class.push(c);
}
