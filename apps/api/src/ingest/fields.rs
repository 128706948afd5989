//! Rule-based structured field extraction.
//!
//! Fast, deterministic, no model call. Extracted fields feed the
//! retriever's structured filters, so the field names here ("skills",
//! "seniority", "years_experience", "title") are part of the query
//! surface.

use std::collections::BTreeMap;

/// Skills worth indexing as structured fields. Matched as whole tokens,
/// case-insensitive.
const SKILL_LEXICON: &[&str] = &[
    "rust",
    "go",
    "python",
    "java",
    "javascript",
    "typescript",
    "c++",
    "kubernetes",
    "docker",
    "terraform",
    "kafka",
    "postgres",
    "postgresql",
    "redis",
    "aws",
    "gcp",
    "azure",
    "grpc",
    "graphql",
    "sql",
    "react",
    "linux",
    "distributed systems",
    "machine learning",
];

const SENIORITY_MARKERS: &[(&str, &str)] = &[
    ("principal", "principal"),
    ("staff", "staff"),
    ("senior", "senior"),
    ("sr.", "senior"),
    ("lead", "lead"),
    ("junior", "junior"),
    ("jr.", "junior"),
    ("intern", "intern"),
];

/// Extracts structured fields from raw document text.
pub fn extract_fields(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let lower = text.to_lowercase();

    let skills = extract_skills(&lower);
    if !skills.is_empty() {
        fields.insert("skills".to_string(), skills.join(", "));
    }

    if let Some(seniority) = extract_seniority(&lower) {
        fields.insert("seniority".to_string(), seniority.to_string());
    }

    if let Some(years) = extract_years_experience(&lower) {
        fields.insert("years_experience".to_string(), years.to_string());
    }

    if let Some(title) = extract_title(text) {
        fields.insert("title".to_string(), title);
    }

    fields
}

fn extract_skills(lower: &str) -> Vec<&'static str> {
    SKILL_LEXICON
        .iter()
        .filter(|skill| contains_term(lower, skill))
        .copied()
        .collect()
}

/// Whole-term containment: the term must not be glued to surrounding
/// alphanumerics, so "go" does not match "google".
fn contains_term(haystack: &str, term: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(term) {
        let begin = start + pos;
        let end = begin + term.len();
        let before_ok = begin == 0
            || !haystack[..begin]
                .chars()
                .next_back()
                .map(char::is_alphanumeric)
                .unwrap_or(false);
        let after_ok = end == haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .map(char::is_alphanumeric)
                .unwrap_or(false);
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

fn extract_seniority(lower: &str) -> Option<&'static str> {
    SENIORITY_MARKERS
        .iter()
        .find(|(marker, _)| contains_term(lower, marker))
        .map(|(_, level)| *level)
}

/// Finds "N+ years" / "N years" style experience claims and keeps the
/// largest one.
fn extract_years_experience(lower: &str) -> Option<u32> {
    let mut best: Option<u32> = None;
    let tokens: Vec<&str> = lower.split_whitespace().collect();

    for window in tokens.windows(2) {
        let number = window[0].trim_end_matches('+');
        let unit = window[1].trim_matches(|c: char| !c.is_alphabetic());
        if (unit == "years" || unit == "year" || unit == "yrs") && number.len() <= 2 {
            if let Ok(n) = number.parse::<u32>() {
                best = Some(best.map_or(n, |b| b.max(n)));
            }
        }
    }
    best
}

/// The first non-empty line, truncated, as a best-effort title.
fn extract_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(120).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skills_extracted_from_resume_text() {
        let fields = extract_fields("Senior backend engineer, distributed systems, Go and Rust");
        let skills = fields.get("skills").unwrap();
        assert!(skills.contains("rust"));
        assert!(skills.contains("go"));
        assert!(skills.contains("distributed systems"));
    }

    #[test]
    fn test_whole_term_matching_avoids_substrings() {
        let fields = extract_fields("I worked at Google on search quality");
        // "go" must not fire inside "Google".
        assert!(fields.get("skills").map_or(true, |s| !s.split(", ").any(|x| x == "go")));
    }

    #[test]
    fn test_seniority_detected() {
        let fields = extract_fields("Senior Software Engineer");
        assert_eq!(fields.get("seniority").map(String::as_str), Some("senior"));
    }

    #[test]
    fn test_years_experience_takes_largest_claim() {
        let fields = extract_fields("3 years of Go, 7+ years of Rust experience");
        assert_eq!(fields.get("years_experience").map(String::as_str), Some("7"));
    }

    #[test]
    fn test_title_is_first_nonempty_line() {
        let fields = extract_fields("\n  Senior Rust Engineer\nRemote, full time");
        assert_eq!(fields.get("title").map(String::as_str), Some("Senior Rust Engineer"));
    }

    #[test]
    fn test_no_signals_yields_empty_map_except_title() {
        let fields = extract_fields("hello world");
        assert!(fields.get("skills").is_none());
        assert!(fields.get("seniority").is_none());
        assert!(fields.get("years_experience").is_none());
    }
}
