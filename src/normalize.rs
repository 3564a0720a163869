//! Text normalization: canonicalize whitespace, line endings, and control
//! characters before anything downstream (quality gate, chunker) sees the
//! text. Idempotent by construction.

/// Normalize document text: drop NUL bytes, canonicalize line endings,
/// collapse horizontal whitespace runs, cap blank-line runs at one blank
/// line, and trim the ends.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut last_was_space = false;
    let mut newline_run = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '\0' => continue,
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    continue;
                }
                push_newline(&mut out, &mut newline_run);
                last_was_space = false;
            }
            '\n' => {
                push_newline(&mut out, &mut newline_run);
                last_was_space = false;
            }
            ' ' | '\t' => {
                newline_run = 0;
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            }
            other => {
                newline_run = 0;
                last_was_space = false;
                out.push(other);
            }
        }
    }

    out.trim().to_string()
}

fn push_newline(out: &mut String, newline_run: &mut usize) {
    *newline_run += 1;
    if *newline_run <= 2 {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_nul_bytes() {
        assert_eq!(normalize("a\0b"), "ab");
    }

    #[test]
    fn converts_crlf_and_cr() {
        assert_eq!(normalize("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn collapses_space_runs() {
        assert_eq!(normalize("a   b\t\tc"), "a b c");
    }

    #[test]
    fn caps_blank_line_runs_at_two_newlines() {
        assert_eq!(normalize("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn trims_ends() {
        assert_eq!(normalize("  \n hello \n  "), "hello");
    }

    #[test]
    fn is_idempotent() {
        let input = "  a\r\n\r\n\r\nb\t\tc  \0";
        let once = normalize(input);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }
}
