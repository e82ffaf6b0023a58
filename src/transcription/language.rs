//! Language codes understood by multilingual Whisper checkpoints.
//!
//! Each code maps to a special token `<|code|>` in the tokenizer. The order
//! matches the checkpoints' token order, which is what the decoder was
//! trained against.

pub const LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su",
];

/// The tokenizer spelling of a language code.
pub fn language_token(code: &str) -> String {
    format!("<|{}|>", code)
}

/// Normalize a configured language ("EN", " en ") to its code, if known.
pub fn normalize(code: &str) -> Option<&'static str> {
    let wanted = code.trim().to_lowercase();
    LANGUAGES.iter().copied().find(|known| *known == wanted)
}
