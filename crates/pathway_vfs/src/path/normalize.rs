use std::borrow::Cow;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/* 📖 # Normalization rules

`normalize` is a pure function of a base path and a relative string:

- the output starts from the base with a trailing `/`, or from `/` when the relative string
  is absolute
- runs of separators collapse into one (`\` counts as a separator in windows mode)
- `.` segments disappear
- `..` drops the previous segment and stops at the root
- the result ends with `/` exactly when the relative string ended on a separator, `.` or `..`

Running it again on its own output changes nothing.
*/

/// Bytes escaped when a path is written into a url or request line.
const URL_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn is_separator(c: char, windows: bool) -> bool {
    c == '/' || (windows && c == '\\')
}

/// Resolves `relative` against `base` and normalizes the result.
pub fn normalize(base: &str, relative: &str, windows: bool) -> String {
    let absolute = relative.chars().next().is_some_and(|c| is_separator(c, windows));
    let mut out = String::with_capacity(base.len() + relative.len() + 1);
    out.push('/');
    if !absolute {
        push_segments(&mut out, base, windows);
    }
    let directory = push_segments(&mut out, relative, windows);
    let keep_slash = if relative.is_empty() {
        base.is_empty() || base.ends_with('/')
    } else {
        directory
    };
    if !keep_slash && out.len() > 1 {
        out.pop();
    }
    out
}

/// Appends every segment of `text` to `out`, which always ends with `/`.
/// Returns true when the last thing seen denotes a directory.
fn push_segments(out: &mut String, text: &str, windows: bool) -> bool {
    let mut directory = true;
    for segment in text.split(|c| is_separator(c, windows)) {
        match segment {
            "" => directory = true,
            "." => directory = true,
            ".." => {
                pop_segment(out);
                directory = true;
            }
            name => {
                out.push_str(name);
                out.push('/');
                directory = false;
            }
        }
    }
    directory
}

fn pop_segment(out: &mut String) {
    if out.len() <= 1 {
        return;
    }
    out.pop();
    let cut = out.rfind('/').map_or(0, |index| index + 1);
    out.truncate(cut.max(1));
}

/// Splits a leading `scheme:` off `text`.
///
/// A scheme starts with an ASCII letter followed by letters, digits, `+`, `-` or `.`.
/// Returns the lower-cased scheme and the remainder after the colon.
pub fn scan_scheme(text: &str) -> Option<(String, &str)> {
    let colon = text.find(':')?;
    let scheme = &text[..colon];
    let mut chars = scheme.chars();
    if !chars.next()?.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    Some((scheme.to_ascii_lowercase(), &text[colon + 1..]))
}

/// True for a windows drive designator such as `c:` not followed by `//`.
pub fn is_drive_designator(scheme: &str, rest: &str) -> bool {
    scheme.len() == 1 && !rest.starts_with("//")
}

/// Splits a `?query` suffix off a path.
pub fn split_query(text: &str) -> (&str, Option<&str>) {
    match text.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (text, None),
    }
}

/// Percent-encodes spaces, `#`, `%`, `?` and non printable bytes.
pub fn escape_url(path: &str) -> String {
    utf8_percent_encode(path, URL_ESCAPES).to_string()
}

/// Decodes `%XX` escapes; malformed escapes are kept as they are.
pub fn unescape_url(text: &str) -> Cow<'_, str> {
    percent_decode_str(text).decode_utf8_lossy()
}

/// Final segment of a normalized path, empty for the root.
pub fn tail(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or("")
}

/// Device names windows never treats as regular files.
pub fn is_reserved_windows_name(path: &str) -> bool {
    let name = tail(path);
    let stem = name.split('.').next().unwrap_or(name).to_ascii_lowercase();
    match stem.as_str() {
        "con" | "aux" | "prn" | "nul" => true,
        _ => stem
            .strip_prefix("com")
            .or_else(|| stem.strip_prefix("lpt"))
            .is_some_and(|digit| matches!(digit.as_bytes(), [b'1'..=b'9'])),
    }
}

/// Renders `/c:/dir/file` as `c:\dir\file`; other paths only swap separators.
pub fn windows_native(path: &str) -> String {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':';
    let rest = if drive { &path[1..] } else { path };
    let mut native = rest.replace('/', "\\");
    if drive && native.len() == 2 {
        native.push('\\');
    }
    native
}
