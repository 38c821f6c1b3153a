//! Domain-specific assertion macros for opslog harnesses.
//!
//! These wrap `pretty_assertions` and add context-rich failure messages that
//! make it clear which file-shape invariant was violated.

/// Assert that every line of a rotated file has as many fields as its
/// header line.
///
/// ```rust
/// assert_rectangular!(std::fs::read_to_string(path).unwrap());
/// ```
#[macro_export]
macro_rules! assert_rectangular {
    ($body:expr) => {{
        let body: &str = &$body;
        let mut lines = body.lines();
        let header = lines
            .next()
            .unwrap_or_else(|| panic!("assert_rectangular! failed: empty file"));
        let width = opslog_core::store::split_line(header).len();
        for (i, line) in lines.enumerate() {
            let got = opslog_core::store::split_line(line).len();
            if got != width {
                panic!(
                    "assert_rectangular! failed at line {}:\n  header ({} fields): {}\n  line   ({} fields): {}",
                    i + 2,
                    width,
                    header,
                    got,
                    line
                );
            }
        }
    }};
}

/// Assert the first line of a file body equals the given header fields.
#[macro_export]
macro_rules! assert_header {
    ($body:expr, [$($field:expr),* $(,)?]) => {{
        let body: &str = &$body;
        let expected: Vec<String> = vec![$(String::from($field)),*];
        let header = body.lines().next().unwrap_or_default();
        pretty_assertions::assert_eq!(header, expected.join(","), "unexpected header line");
    }};
}

/// Count data lines (header excluded) in a rotated file or export body.
pub fn data_lines(body: &str) -> usize {
    body.lines().count().saturating_sub(1)
}
