use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Extensions with an established spoken form.
const SPOKEN_EXTENSIONS: &[(&str, &str)] = &[
    ("py", "pie"),
    ("yml", "yeah mel"),
    ("yaml", "yeah mel"),
    ("json", "jason"),
    ("txt", "text"),
    ("toml", "toemul"),
    ("gif", "jif"),
    ("wav", "wave"),
];

/// Extensions that read fine as words.
const NATURAL_EXTENSIONS: &[&str] = &["zip", "log", "bin", "bat", "doc", "go"];

static EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.([a-zA-Z]{1,5})\b").expect("extension pattern"));

static PRONUNCIATION_FIXES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bGrok\b", "Grock"),
        (r"\bREADME\b", "read me"),
        (r"\bReadme\b", "read me"),
        (r"\breadme\b", "read me"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("pronunciation pattern"), replacement))
    .collect()
});

/// Rewrite segment text into what the voice model should actually read:
/// spoken file extensions, known mispronunciations, and em-dash breathing
/// pauses at both ends.
pub fn prepare_text(text: &str) -> String {
    let text = text.trim();

    let mut text = EXTENSION
        .replace_all(text, |caps: &Captures| spell_extension(&caps[1]))
        .into_owned();

    for (pattern, replacement) in PRONUNCIATION_FIXES.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }

    if !text.starts_with('—') {
        text.insert_str(0, "— ");
    }
    if !text.ends_with('—') {
        text.push_str(" —");
    }
    text
}

fn spell_extension(ext: &str) -> String {
    let lower = ext.to_lowercase();
    if let Some((_, spoken)) = SPOKEN_EXTENSIONS.iter().find(|(e, _)| *e == lower) {
        return format!(" dot {spoken}");
    }
    if NATURAL_EXTENSIONS.contains(&lower.as_str()) {
        return format!(" dot {ext}");
    }
    let letters: Vec<String> = ext.to_uppercase().chars().map(String::from).collect();
    format!(" dot {}", letters.join(" "))
}
