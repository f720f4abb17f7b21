//! Minimal scanner for the fixed request shape.
//!
//! Requests are never parsed into a full JSON tree: fields are looked up by
//! exact key match and anything malformed degrades to an absent value.

use std::collections::BTreeMap;

const WHITESPACE: &[char] = &[' ', '\t', '\r', '\n'];

/// Position of the first non-whitespace character after `"key":`.
fn value_start(json: &str, key: &str) -> Option<usize> {
    let quoted_key = format!("\"{key}\"");
    let key_pos = json.find(&quoted_key)?;
    let after_key = key_pos + quoted_key.len();
    let colon_pos = after_key + json[after_key..].find(':')?;
    let value_pos = colon_pos + 1;
    json[value_pos..]
        .find(|c: char| !WHITESPACE.contains(&c))
        .map(|offset| value_pos + offset)
}

/// Index of the first double quote at or after `start` not preceded by a backslash escape.
fn find_unescaped_quote(text: &str, start: usize) -> Option<usize> {
    let mut escaped = false;
    for (i, b) in text.bytes().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => return Some(i),
            _ => {}
        }
    }
    None
}

/// String value of the first `key` occurrence, empty if absent or not a string.
pub fn extract_string(json: &str, key: &str) -> String {
    let Some(start) = value_start(json, key) else {
        return String::new();
    };
    if json.as_bytes()[start] != b'"' {
        return String::new();
    }
    match find_unescaped_quote(json, start + 1) {
        Some(end) => unescape(&json[start + 1..end]),
        None => String::new(),
    }
}

/// Decode the escapes produced by [`escape`] plus `\/`, `\b`, `\f` and `\uXXXX`.
///
/// Unknown or malformed escapes are kept verbatim.
pub fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                let decoded = Some(&hex)
                    .filter(|hex| hex.len() == 4 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .and_then(char::from_u32);
                match decoded {
                    Some(decoded) => {
                        out.push(decoded);
                        chars.nth(3);
                    }
                    None => out.push_str("\\u"),
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Raw text of the object bound to `key` (braces included), `{}` if absent or unbalanced.
pub fn extract_object<'a>(json: &'a str, key: &str) -> &'a str {
    let Some(start) = value_start(json, key) else {
        return "{}";
    };
    if json.as_bytes()[start] != b'{' {
        return "{}";
    }

    let mut depth = 0usize;
    for (i, b) in json.bytes().enumerate().skip(start) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return &json[start..=i];
                }
            }
            _ => {}
        }
    }

    "{}"
}

/// Boolean literal bound to `key`.
pub fn read_bool(json: &str, key: &str) -> Option<bool> {
    let start = value_start(json, key)?;
    let rest = &json[start..];
    if rest.starts_with("true") {
        Some(true)
    } else if rest.starts_with("false") {
        Some(false)
    } else {
        None
    }
}

/// Integer bound to `key`: optional `-` and decimal digits, must fit in `i32`.
pub fn read_int(json: &str, key: &str) -> Option<i32> {
    let start = value_start(json, key)?;
    let rest = &json[start..];

    let sign_len = usize::from(rest.starts_with('-'));
    let digits_len = rest[sign_len..]
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }

    rest[..sign_len + digits_len].parse().ok()
}

/// Parse `{ "k": v, ... }` where each value is a quoted string or a bare token.
pub fn parse_flat_map(object: &str) -> BTreeMap<String, String> {
    let mut parsed = BTreeMap::new();
    let Some(open) = object.find('{') else {
        return parsed;
    };

    let mut cursor = open + 1;
    while let Some((key, value, next)) = parse_flat_map_entry(object, cursor) {
        if !key.is_empty() {
            parsed.insert(key, value);
        }
        cursor = next;
    }

    parsed
}

fn skip_whitespace(text: &str, cursor: usize) -> Option<usize> {
    text.get(cursor..)?
        .find(|c: char| !WHITESPACE.contains(&c))
        .map(|offset| cursor + offset)
}

fn parse_flat_map_entry(object: &str, cursor: usize) -> Option<(String, String, usize)> {
    let bytes = object.as_bytes();

    let cursor = skip_whitespace(object, cursor)?;
    if bytes[cursor] != b'"' {
        return None;
    }
    let key_end = find_unescaped_quote(object, cursor + 1)?;
    let key = unescape(&object[cursor + 1..key_end]);

    let colon = key_end + 1 + object[key_end + 1..].find(':')?;
    let cursor = skip_whitespace(object, colon + 1)?;

    let (value, cursor) = if bytes[cursor] == b'"' {
        let value_end = find_unescaped_quote(object, cursor + 1)?;
        (unescape(&object[cursor + 1..value_end]), value_end + 1)
    } else {
        let token_len = object[cursor..]
            .find([',', '}'])
            .unwrap_or(object.len() - cursor);
        let token = object[cursor..cursor + token_len].trim_matches(WHITESPACE);
        (token.to_string(), cursor + token_len)
    };

    let cursor = match skip_whitespace(object, cursor) {
        Some(pos) if bytes[pos] == b',' => pos + 1,
        Some(pos) => pos,
        None => object.len(),
    };

    Some((key, value, cursor))
}

/// Flat string map bound to `key`.
pub fn extract_string_map(json: &str, key: &str) -> BTreeMap<String, String> {
    parse_flat_map(extract_object(json, key))
}

/// Escape backslash, double quote and control characters.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if u32::from(c) < 0x20 => escaped.push_str(&format!("\\u{:04x}", u32::from(c))),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Write string map entries as `"k":"v"` pairs, without the surrounding braces.
/// Return number of written entries.
pub fn write_string_entries<'a>(
    out: &mut String,
    entries: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> usize {
    let mut written = 0;
    for (key, value) in entries {
        if written > 0 {
            out.push(',');
        }
        written += 1;
        out.push('"');
        out.push_str(&escape(key));
        out.push_str("\":\"");
        out.push_str(&escape(value));
        out.push('"');
    }
    written
}

/// Render a string map as a JSON object.
pub fn string_map_to_json(values: &BTreeMap<String, String>) -> String {
    let mut out = String::from("{");
    write_string_entries(&mut out, values);
    out.push('}');
    out
}
