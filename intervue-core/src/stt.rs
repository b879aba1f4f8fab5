// Small helpers/constants for interpreting STT selections in config.

pub const STT_PROVIDER_DEEPGRAM: &str = "deepgram";

pub const DEEPGRAM_MODEL_NOVA_2: &str = "nova-2";
pub const DEEPGRAM_DEFAULT_LANGUAGE: &str = "en-IN";

pub fn is_deepgram_selected(provider: &str) -> bool {
    provider.eq_ignore_ascii_case(STT_PROVIDER_DEEPGRAM)
}

/// A final transcript only becomes an answer if it has non-whitespace content.
pub fn accept_final_transcript(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
