//! Shared normalization functions for source/target track matching.
//!
//! Everything here is pure: the same input always yields the same key, and
//! nothing touches the network or the filesystem. Titles, artist names and
//! albums all go through [`normalize`]; durations are compared numerically
//! by the scorer and never pass through this module.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Innermost bracketed group: "(Remastered)", "[Live]", "{Demo}".
/// Applied repeatedly so nested groups collapse from the inside out.
pub static BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[\(\[\{][^\(\)\[\]\{\}]*[\)\]\}]").unwrap());

/// Dash or slash separated qualifier at the end of a title:
/// "- Remastered 2011", "- Live at Wembley", "/ Mono Version", "- Radio Edit"
pub static DASH_QUALIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s+[-–—/]\s+[^-–—/]*\b(?:remaster(?:ed)?|live|version|edit|mix|remix|mono|stereo|acoustic|demo|instrumental|radio|bonus|explicit|clean|deluxe|edition|recorded|take)\b[^-–—/]*$",
    )
    .unwrap()
});

/// Bare year suffix: "Song - 2009"
pub static YEAR_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+[-–—]\s+\d{4}$").unwrap());

/// Featured artists without brackets: "Song feat. Artist", "Artist ft. Someone"
pub static FEAT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+.+$").unwrap());

/// Library-style article suffix: "Beatles, The"
pub static ARTICLE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i),\s*the\s*$").unwrap());

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
/// Used to filter out accents during normalization.
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Apply NFKD decomposition, drop combining marks and lower-case.
/// e.g., "Beyoncé" → "beyonce", "ﬁre" → "fire"
pub fn fold_diacritics(s: &str) -> String {
    s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Convert curly quotes to straight quotes and " & " to " and ".
pub fn normalize_punctuation(s: &str) -> String {
    s.replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{00B4}', '\u{0060}'], "'")
        .replace(" & ", " and ")
}

/// Remove bracketed groups, dash qualifiers and featured-artist suffixes.
pub fn strip_qualifiers(s: &str) -> String {
    let mut result = FEAT_SUFFIX.replace(s, "").to_string();

    // Each pass removes one nesting level / one trailing qualifier
    for _ in 0..8 {
        let next = BRACKETED.replace_all(&result, "").to_string();
        let next = FEAT_SUFFIX.replace(&next, "").to_string();
        let next = DASH_QUALIFIER.replace(&next, "").to_string();
        let next = YEAR_SUFFIX.replace(&next, "").to_string();
        if next == result {
            break;
        }
        result = next;
    }
    result
}

/// Drop apostrophes, turn other punctuation into spaces, collapse whitespace.
fn strip_punctuation(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .filter(|c| *c != '\'')
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    collapse_whitespace(&cleaned)
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Canonical comparison form of a title, album or artist name.
///
/// Strips bracketed/parenthetical qualifiers and trailing edition markers,
/// folds diacritics, lower-cases, removes punctuation and collapses
/// whitespace. When stripping would leave nothing (a title that is only a
/// bracketed group), the unstripped text is used instead. Text made only of
/// punctuation ("!!!", "?") keeps its symbols so it still compares equal to
/// itself.
pub fn normalize(text: &str) -> String {
    let punctuated = normalize_punctuation(text);
    let stripped = strip_qualifiers(&punctuated);
    let normalized = strip_punctuation(&fold_diacritics(&stripped));
    if !normalized.is_empty() {
        return normalized;
    }
    let unstripped = strip_punctuation(&fold_diacritics(&punctuated));
    if !unstripped.is_empty() {
        return unstripped;
    }
    collapse_whitespace(&fold_diacritics(&punctuated))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize an artist name for matching.
/// Same as [`normalize`], plus "The" prefix/suffix handling.
pub fn normalize_artist(artist: &str) -> String {
    let without_suffix = ARTICLE_SUFFIX.replace(artist.trim(), "");
    let normalized = normalize(&without_suffix);

    // Strip "the " prefix (e.g., "The Beatles" → "beatles"), but keep "The The"
    match normalized.strip_prefix("the ") {
        Some(rest) if !rest.is_empty() && rest != "the" => rest.to_string(),
        _ => normalized,
    }
}

// ============================================================================
// TESTS
// ============================================================================
