use std::{borrow::Cow, fmt::Write};

/// Calculate the hash of a given string according to the DSON hashing algorithm.
///
/// Bytes are taken unsigned from the UTF-8 encoding, arithmetic wraps at 32 bits.
pub fn name_hash(s: &'_ str) -> i32 {
    s.bytes().fold(0i32, |acc, c| {
        acc.wrapping_mul(53).wrapping_add(i32::from(c))
    })
}

/// Number of padding bytes needed so that `offset + skip` is a multiple of 4.
#[inline]
pub fn align_skip(offset: usize) -> usize {
    ((offset + 3) & !0b11) - offset
}

pub fn escape(arg: &str) -> Cow<'_, str> {
    if arg.chars().any(|c| c < ' ' || c == '\\' || c == '"') {
        let mut s = String::with_capacity(arg.len() + 8);
        for c in arg.chars() {
            match c {
                '\x08' => s.push_str("\\b"),
                '\x0C' => s.push_str("\\f"),
                '\n' => s.push_str("\\n"),
                '\r' => s.push_str("\\r"),
                '\t' => s.push_str("\\t"),
                '"' => s.push_str("\\\""),
                '\\' => s.push_str("\\\\"),
                c if c < ' ' => {
                    let _ = write!(s, "\\u{:04x}", c as u32);
                }
                _ => s.push(c),
            }
        }
        Cow::Owned(s)
    } else {
        Cow::Borrowed(arg)
    }
}

/// Undo [`escape`]. Returns `None` for bare control characters and malformed escapes.
pub fn unescape(arg: &str) -> Option<Cow<'_, str>> {
    // Bare control characters are disallowed
    if arg.chars().any(|c| c < ' ') {
        return None;
    }
    if !arg.contains('\\') {
        return Some(Cow::Borrowed(arg));
    }

    let mut s = String::with_capacity(arg.len());
    let mut it = arg.chars();
    while let Some(c) = it.next() {
        if c != '\\' {
            s.push(c);
            continue;
        }

        s.push(match it.next()? {
            'b' => '\x08',
            'f' => '\x0C',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '"' => '"',
            '\\' => '\\',
            '/' => '/',
            'u' => {
                let hi = read_hex4(&mut it)?;
                if (0xD800..0xDC00).contains(&hi) {
                    // High surrogate, must be followed by an escaped low surrogate
                    if it.next()? != '\\' || it.next()? != 'u' {
                        return None;
                    }
                    let lo = read_hex4(&mut it)?;
                    if !(0xDC00..0xE000).contains(&lo) {
                        return None;
                    }
                    char::from_u32(0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00))?
                } else {
                    char::from_u32(hi)?
                }
            }
            _ => return None,
        });
    }
    Some(Cow::Owned(s))
}

fn read_hex4(it: &mut std::str::Chars<'_>) -> Option<u32> {
    let mut v = 0;
    for _ in 0..4 {
        v = (v << 4) | it.next()?.to_digit(16)?;
    }
    Some(v)
}

pub fn is_whitespace(i: char) -> bool {
    matches!(i, '\r' | '\n' | '\t' | ' ')
}

/// Uppercase hex dump in file order, used by debug annotations.
pub fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02X}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_reference_values() {
        assert_eq!(name_hash(""), 0);
        assert_eq!(name_hash("a"), 97);
        assert_eq!(name_hash("ab"), 97 * 53 + 98);
        // Non-ASCII bytes are added unsigned
        assert_eq!(name_hash("\u{e9}"), 0xC3 * 53 + 0xA9);
        // Long names wrap instead of overflowing
        let long = "base_root".repeat(20);
        assert_eq!(name_hash(&long), name_hash(&long));
    }

    #[test]
    fn alignment() {
        assert_eq!(align_skip(0), 0);
        assert_eq!(align_skip(1), 3);
        assert_eq!(align_skip(2), 2);
        assert_eq!(align_skip(3), 1);
        assert_eq!(align_skip(4), 0);
        assert_eq!(align_skip(19), 1);
    }

    #[test]
    fn escape_roundtrip() {
        for s in &["plain", "line\nbreak", "quote\"s", "back\\slash", "bell\x07", "tab\t"] {
            let esc = escape(s);
            assert_eq!(unescape(&esc).unwrap(), *s);
        }
        assert!(matches!(escape("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn unescape_rejects_garbage() {
        assert!(unescape("bare\ncontrol").is_none());
        assert!(unescape("bad \\q escape").is_none());
        assert!(unescape("short \\u12").is_none());
        assert!(unescape("lone \\ud800 surrogate").is_none());
        assert_eq!(unescape("\\u00e9\\ud83d\\ude00").unwrap(), "\u{e9}\u{1f600}");
    }

    #[test]
    fn hex_dump() {
        assert_eq!(hex(&[0x00, 0xAB, 0x3F]), "00AB3F");
    }
}
