//! Object-key segments to host-safe file names.

use unicode_normalization::UnicodeNormalization;

/// Characters replaced by `.`.
const DOT_CHARS: &[char] = &['"', '\'', ':', '<', '>', '!'];

/// Characters replaced by `_`.
const UNDERSCORE_CHARS: &[char] = &[
    '/', '\\', '#', '%', '&', '{', '}', '$', '@', '+', '`', '|', '=', '^', '?', '*', '[', ']',
];

/// Map one key segment to a name the host filesystem accepts.
///
/// The name is NFC-normalized first so lookups match regardless of the
/// composition form the kernel passes in. Characters in `ignore` are kept
/// as they are.
pub fn sanitize_name(name: &str, ignore: &str) -> String {
    let mut out: String = name
        .nfc()
        .map(|c| {
            if ignore.contains(c) {
                c
            } else if DOT_CHARS.contains(&c) {
                '.'
            } else if UNDERSCORE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    if out == "." || out == ".." {
        out = out.replace('.', "_");
    }
    out
}
