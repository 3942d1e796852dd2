//! # Glob Matching
//!
//! Redis `KEYS` pattern semantics over raw bytes:
//!
//! - `*` matches any run of bytes (including none)
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` match one byte from (or not from) a class
//! - `\x` matches `x` literally

/// Returns true when `text` matches `pattern`.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Most recent `*`: pattern index after it, and the text index it resumes at.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    let (matched, next) = match_class(pattern, p, text[t]);
                    if matched {
                        p = next;
                        t += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                byte => {
                    if byte == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((resume, from)) => {
                p = resume;
                t = from + 1;
                star = Some((resume, from + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Escapes glob metacharacters so `literal` only matches itself.
pub fn escape(literal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(literal.len());
    for &byte in literal {
        if matches!(byte, b'*' | b'?' | b'[' | b']' | b'\\') {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out
}

/// Matches one byte against the class opening at `pattern[start] == b'['`.
///
/// Returns whether it matched and the pattern index just past the class. An
/// unterminated class runs to the end of the pattern.
fn match_class(pattern: &[u8], start: usize, byte: u8) -> (bool, usize) {
    let len = pattern.len();
    let mut i = start + 1;
    let negate = i < len && pattern[i] == b'^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < len && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < len {
            matched |= pattern[i + 1] == byte;
            i += 2;
        } else if i + 2 < len && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= lo <= byte && byte <= hi;
            i += 3;
        } else {
            matched |= pattern[i] == byte;
            i += 1;
        }
    }

    let next = if i < len { i + 1 } else { i };
    (matched != negate, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_prefix_namespace() {
        assert!(glob_match(b"sfn-cache:*", b"sfn-cache:"));
        assert!(glob_match(b"sfn-cache:*", b"sfn-cache:abc"));
        assert!(!glob_match(b"sfn-cache:*", b"other:abc"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"a*c*e", b"abcde"));
        assert!(!glob_match(b"a*c*e", b"abcdf"));
    }

    #[test]
    fn question_mark_matches_one_byte() {
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
    }

    #[test]
    fn classes_ranges_and_negation() {
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"h[^e]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"key[0-9]", b"key7"));
        assert!(glob_match(b"key[9-0]", b"key7"));
        assert!(!glob_match(b"key[0-9]", b"keyx"));
    }

    #[test]
    fn backslash_escapes_metacharacters() {
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
    }

    #[test]
    fn escaped_literal_only_matches_itself() {
        let mut pattern = escape(b"tmp[1]*?:");
        assert_eq!(pattern, b"tmp\\[1\\]\\*\\?:".to_vec());
        pattern.push(b'*');
        assert!(glob_match(&pattern, b"tmp[1]*?:key"));
        assert!(!glob_match(&pattern, b"tmp1xx:key"));
    }
}
