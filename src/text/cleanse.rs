//! Transport-escape removal.
//!
//! Raw input frequently arrives JSON-escaped (`\n`, `\"`, `\\` as literal
//! two-character sequences). [`cleanse`] turns it back into logical text in a
//! single pass before anything else touches it.

/// Unescape transport-level escape sequences.
///
/// Known sequences: `\n` → newline, `\t` → tab, `\r` → dropped, `\"` → `"`,
/// `\\` → `\`. Any other escaped character is kept together with its
/// backslash, and a trailing lone backslash is kept as-is.
pub fn cleanse(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut escape = false;

    for c in input.chars() {
        if escape {
            match c {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => {}
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
            escape = false;
            continue;
        }

        if c == '\\' {
            escape = true;
            continue;
        }

        out.push(c);
    }

    if escape {
        out.push('\\');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescapes_known_sequences() {
        assert_eq!(cleanse(r"line one\nline two"), "line one\nline two");
        assert_eq!(cleanse(r"a\tb"), "a\tb");
        assert_eq!(cleanse(r#"she said \"hi\""#), "she said \"hi\"");
        assert_eq!(cleanse(r"C:\\Users"), r"C:\Users");
    }

    #[test]
    fn drops_escaped_carriage_return() {
        assert_eq!(cleanse(r"windows\r\nline"), "windows\nline");
    }

    #[test]
    fn unknown_escape_is_preserved() {
        assert_eq!(cleanse(r"regex \d+ and \u00e9"), r"regex \d+ and \u00e9");
    }

    #[test]
    fn trailing_backslash_is_kept() {
        assert_eq!(cleanse(r"ends with \"), r"ends with \");
    }

    #[test]
    fn clean_text_is_unchanged() {
        let text = "Plain text.\nWith a real newline and \"quotes\".";
        assert_eq!(cleanse(text), text);
    }

    #[test]
    fn empty_input() {
        assert_eq!(cleanse(""), "");
    }

    #[test]
    fn idempotent_once_no_escapes_remain() {
        let once = cleanse(r#"first\nsecond\t\"third\""#);
        assert_eq!(cleanse(&once), once);
    }

    #[test]
    fn multibyte_characters_pass_through() {
        assert_eq!(cleanse(r"café\nnaïve — ok"), "café\nnaïve — ok");
    }
}
