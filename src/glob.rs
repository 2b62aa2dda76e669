//! Shell-style wildcard matching for entry names
//!
//! # Supported Patterns
//!
//! - `*` - zero or more characters, never crossing `/`
//! - `**` - zero or more characters including `/`; `**/` may also match nothing
//! - `?` - exactly one character other than `/`
//! - `[abc]`, `[a-z]`, `[!a-z]` - one character from (or not from) a set
//! - `\x` - the literal character `x`
//!
//! An unterminated `[` is taken literally.
//!
//! # Examples
//!
//! ```
//! use gar::glob_match;
//!
//! assert!(glob_match("*.txt", "notes.txt"));
//! assert!(glob_match("src/**/*.rs", "src/bin/main.rs"));
//! assert!(glob_match("log[0-9].txt", "log7.txt"));
//! assert!(!glob_match("*.txt", "docs/notes.txt"));
//! ```

/// Match `text` against a wildcard `pattern` (whole-string match)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    match_here(&pattern, &text)
}

fn match_here(pattern: &[char], text: &[char]) -> bool {
    let Some((&first, rest)) = pattern.split_first() else {
        return text.is_empty();
    };

    match first {
        '*' if rest.first() == Some(&'*') => {
            let mut rest = rest;
            while rest.first() == Some(&'*') {
                rest = &rest[1..];
            }
            // `**/` covers zero directories as well
            if let Some(after_slash) = rest.strip_prefix(&['/']) {
                if match_here(after_slash, text) {
                    return true;
                }
            }
            (0..=text.len()).any(|skip| match_here(rest, &text[skip..]))
        },
        '*' => {
            for skip in 0..=text.len() {
                if match_here(rest, &text[skip..]) {
                    return true;
                }
                if text.get(skip) == Some(&'/') {
                    break;
                }
            }
            false
        },
        '?' => match text.split_first() {
            Some((&c, tail)) => c != '/' && match_here(rest, tail),
            None => false,
        },
        '[' => match CharClass::parse(rest) {
            Some((class, after)) => match text.split_first() {
                Some((&c, tail)) => c != '/' && class.contains(c) && match_here(after, tail),
                None => false,
            },
            None => match_literal('[', rest, text),
        },
        '\\' => match rest.split_first() {
            Some((&escaped, after)) => match_literal(escaped, after, text),
            None => match_literal('\\', rest, text),
        },
        c => match_literal(c, rest, text),
    }
}

fn match_literal(c: char, rest: &[char], text: &[char]) -> bool {
    match text.split_first() {
        Some((&t, tail)) => t == c && match_here(rest, tail),
        None => false,
    }
}

/// Bracket expression such as `[a-z_]` or `[!0-9]`
struct CharClass {
    negated: bool,
    ranges: Vec<(char, char)>,
}

impl CharClass {
    /// Parse the body following `[`; returns the class and the pattern after `]`
    fn parse(body: &[char]) -> Option<(Self, &[char])> {
        let negated = matches!(body.first(), Some('!' | '^'));
        let mut i = usize::from(negated);
        let start = i;
        let mut ranges = Vec::new();

        while i < body.len() {
            let c = body[i];
            // A `]` right after the opening bracket is a member, not the end
            if c == ']' && i > start {
                return Some((Self { negated, ranges }, &body[i + 1..]));
            }
            if i + 2 < body.len() && body[i + 1] == '-' && body[i + 2] != ']' {
                ranges.push((c, body[i + 2]));
                i += 3;
            } else {
                ranges.push((c, c));
                i += 1;
            }
        }
        None
    }

    fn contains(&self, c: char) -> bool {
        let hit = self.ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
        hit != self.negated
    }
}
