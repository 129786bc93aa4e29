//! Title sanitization for use as a filename stem.
//!
//! Titles come from remote metadata and are used verbatim as the stem of every
//! file belonging to a job, so anything that would escape the target directory
//! or break the `title-kind.ext` convention must go.

const PATH_SEPARATORS: &[char] = &['/', '\\'];

/// Fallback stem when nothing usable is left.
pub const UNTITLED: &str = "untitled";

/// Sanitize a media title into a filename stem.
///
/// Path separators and control characters become `_`, surrounding whitespace
/// and dots are trimmed, and an empty result falls back to [`UNTITLED`].
/// Everything else, including non-ASCII text, is preserved.
///
/// ```
/// use mediadl::utils::filename::sanitize_title;
///
/// assert_eq!(sanitize_title("AC/DC - Live"), "AC_DC - Live");
/// assert_eq!(sanitize_title("  ..  "), "untitled");
/// ```
pub fn sanitize_title(input: &str) -> String {
    let replaced: String = input
        .chars()
        .map(|c| {
            if c.is_control() || PATH_SEPARATORS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators_replaced() {
        assert_eq!(sanitize_title("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_title("../../etc/passwd"), "_.._etc_passwd");
    }

    #[test]
    fn test_unicode_preserved() {
        assert_eq!(sanitize_title("観看 青蛙?"), "観看 青蛙?");
    }

    #[test]
    fn test_control_chars_and_empty() {
        assert_eq!(sanitize_title("line\nbreak"), "line_break");
        assert_eq!(sanitize_title(""), UNTITLED);
        assert_eq!(sanitize_title("   "), UNTITLED);
    }
}
