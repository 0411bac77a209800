//! Request-target resolution.

use url::Url;

use crate::error::Error;

/// Resolves a request target against `base`.
///
/// Origin-form (`/a?b`), absolute-form (`http://h/a`) and asterisk-form
/// targets are accepted. A target is rejected when it is empty, contains
/// whitespace, control characters or characters that are never legal in a
/// URI, or carries a `%` not followed by two hex digits.
pub(crate) fn resolve(base: &Url, target: &str) -> Result<Url, Error> {
    let malformed = |reason: &str| Error::MalformedTarget {
        target: target.to_owned(),
        reason: reason.to_owned(),
    };

    if target.is_empty() {
        return Err(malformed("empty target"));
    }
    if let Some(c) = target.chars().find(|&c| is_illegal(c)) {
        return Err(malformed(&format!("illegal character {c:?}")));
    }
    if !valid_escapes(target.as_bytes()) {
        return Err(malformed("invalid percent-escape"));
    }

    base.join(target).map_err(|e| malformed(&e.to_string()))
}

fn is_illegal(c: char) -> bool {
    c.is_whitespace() || c.is_control() || matches!(c, '"' | '<' | '>' | '\\' | '^' | '`' | '{' | '|' | '}')
}

fn valid_escapes(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            match bytes.get(i + 1..i + 3) {
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => i += 3,
                _ => return false,
            }
        } else {
            i += 1;
        }
    }
    true
}
