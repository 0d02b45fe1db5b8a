/// Outcome of comparing a file's header line with the expected columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCheck {
    pub is_valid: bool,
    pub missing: Vec<String>,
}

/// Normalized header tokens: comma-split, BOM and quotes stripped, trimmed, lower-cased.
pub fn header_tokens(header_line: &str) -> Vec<String> {
    header_line
        .trim_start_matches('\u{feff}')
        .split(',')
        .map(normalize)
        .collect()
}

fn normalize(token: &str) -> String {
    token.trim().trim_matches('"').trim().to_lowercase()
}

/// Exact, case-insensitive presence check. No fuzzy matching.
pub fn validate_headers<S: AsRef<str>>(expected: &[S], header_line: &str) -> HeaderCheck {
    let found = header_tokens(header_line);
    let missing: Vec<String> = expected
        .iter()
        .map(|e| normalize(e.as_ref()))
        .filter(|e| !found.contains(e))
        .collect();
    HeaderCheck {
        is_valid: missing.is_empty(),
        missing,
    }
}
