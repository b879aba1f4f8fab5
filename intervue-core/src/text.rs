use regex::Regex;
use std::sync::OnceLock;

const PREVIEW_CHARS: usize = 120;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Collapses runs of whitespace (including newlines from multi-line input) and trims.
pub fn normalize_answer(text: &str) -> String {
    whitespace_re().replace_all(text, " ").trim().to_string()
}

/// Short single-line form for log lines.
pub fn preview_text(text: &str) -> String {
    let flat = normalize_answer(text);
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut out: String = flat.chars().take(PREVIEW_CHARS).collect();
    out.push('…');
    out
}
