//! sql script splitting for [`Session::exec_queries`].
//!
//! [`Session::exec_queries`]: crate::Session::exec_queries

use memchr::memchr;

/// split a script into individual statements on `;`.
///
/// line comments (`-- … \n`) are dropped; single quoted strings honour `''`
/// as an embedded quote; double quoted identifiers honour `""`; dollar
/// quoted blocks (`$tag$ … $tag$`) are opaque until the matching tag recurs,
/// nested tags included. each statement is trimmed and empty statements are
/// elided.
///
/// this is a scanner, not a parser: adversarial inputs that abuse the
/// grammar (for example an unterminated quote) degrade to a best-effort
/// split of the remainder.
pub fn split_queries(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut queries = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();

        match c {
            b'-' if next == Some(b'-') => {
                // drop the comment up to (and including) the newline
                match memchr(b'\n', &bytes[i..]) {
                    Some(off) => i += off + 1,
                    None => i = bytes.len(),
                }
            }
            b'\'' | b'"' => {
                let quote = c;
                let start = i;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            // doubled quote stays inside the literal
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                current.push_str(&sql[start..i]);
            }
            b'$' => {
                // scan the opening tag: $word$, where word is empty or an identifier
                let tag_start = i;
                let mut j = i + 1;
                while j < bytes.len() && (bytes[j] == b'_' || bytes[j].is_ascii_alphanumeric()) {
                    j += 1;
                }
                if j >= bytes.len() || bytes[j] != b'$' {
                    // a positional parameter or lone dollar, not a quote
                    current.push('$');
                    i += 1;
                    continue;
                }
                let tag = &sql[tag_start..=j];
                let body_start = tag_start;
                i = j + 1;

                // opaque until the same tag recurs
                while i < bytes.len() {
                    if bytes[i] == b'$' && sql[i..].starts_with(tag) {
                        i += tag.len();
                        break;
                    }
                    i += 1;
                }
                current.push_str(&sql[body_start..i]);
            }
            b';' => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    queries.push(stmt.to_string());
                }
                current.clear();
                i += 1;
            }
            _ => {
                let c = sql[i..].chars().next().unwrap();
                current.push(c);
                i += c.len_utf8();
            }
        }
    }

    let stmt = current.trim();
    if !stmt.is_empty() {
        queries.push(stmt.to_string());
    }
    queries
}
