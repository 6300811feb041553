//! Stopword filtering and tag name normalization
//!
//! Keyword candidates from either extraction strategy pass through here
//! before they are resolved to tags. English and Korean function words are
//! dropped, trailing Korean particles are stripped, and surviving names are
//! normalized so that `machine learning` and `Machine Learning` map to the
//! same tag.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

/// Keywords shorter than this (in characters) are always stopwords
pub const MIN_KEYWORD_LENGTH: usize = 2;

lazy_static! {
    static ref ENGLISH_STOPWORDS: HashSet<&'static str> = [
        // Articles
        "a", "an", "the",
        // Conjunctions
        "and", "or", "but", "nor", "so", "for", "yet",
        // Prepositions
        "of", "in", "on", "at", "to", "by", "with", "from", "up", "about", "into",
        "through", "during", "before", "after", "above", "below", "between", "under",
        "over", "out", "off", "down", "upon", "across", "against", "along", "among",
        "around", "as", "behind", "beside", "besides", "beyond", "inside", "outside",
        "near", "next", "onto", "per", "since", "than", "till", "toward", "towards",
        "underneath", "until", "via", "within", "without",
        // Pronouns
        "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
        "my", "your", "his", "its", "our", "their", "mine", "yours", "hers", "ours", "theirs",
        "this", "that", "these", "those", "who", "whom", "whose", "which", "what",
        // Be-verbs
        "is", "am", "are", "was", "were", "be", "been", "being",
        // Modals
        "can", "could", "may", "might", "must", "shall", "should", "will", "would",
        // Misc
        "do", "does", "did", "doing", "done", "have", "has", "had", "having",
        "if", "then", "else", "when", "where", "why", "how", "all", "any", "both",
        "each", "few", "more", "most", "other", "some", "such", "no", "not", "only",
        "own", "same", "too", "very", "just", "also", "etc", "eg", "ie", "vs",
    ]
    .into_iter()
    .collect();

    static ref KOREAN_STOPWORDS: HashSet<&'static str> = [
        // Particles
        "이", "가", "을", "를", "은", "는", "에", "에서", "로", "으로", "의", "와", "과",
        "도", "만", "까지", "부터", "한테", "께", "보다", "처럼", "같이", "마다", "조차",
        "에게", "한테서", "께서", "에게서", "로부터", "으로부터", "라고", "이라고",
        "라는", "이라는", "라며", "이라며", "라면", "이라면",
        // Conjunctions
        "그리고", "또는", "하지만", "그러나", "그래서", "그러므로", "따라서", "즉", "또한",
        // Pronouns
        "저", "나", "너", "우리", "그", "이것", "그것", "저것", "여기", "거기", "저기",
        // Demonstratives
        "이런", "그런", "저런", "이렇게", "그렇게", "저렇게",
        // Dependent nouns and fillers
        "등", "및", "또", "더", "덜", "좀", "약", "혹은", "예를", "들어", "통해",
        "것", "수", "때", "점", "바", "중", "간", "내", "외",
    ]
    .into_iter()
    .collect();

    static ref LATIN_NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z\s\-]+$").unwrap();
}

/// Trailing particles stripped from Korean keywords, longest first so
/// `으로` wins over `로` and `에서` over `에`
const KOREAN_PARTICLES: [&str; 15] = [
    "에서", "으로", "이", "가", "을", "를", "은", "는", "에", "로", "의", "와", "과", "도", "만",
];

/// Check whether a keyword carries no topical meaning
pub fn is_stopword(keyword: &str) -> bool {
    let lower = keyword.trim().to_lowercase();

    if lower.chars().count() < MIN_KEYWORD_LENGTH {
        return true;
    }

    if ENGLISH_STOPWORDS.contains(lower.as_str()) || KOREAN_STOPWORDS.contains(lower.as_str()) {
        return true;
    }

    lower.chars().all(|c| c.is_numeric())
}

fn contains_hangul(text: &str) -> bool {
    text.chars().any(|c| ('\u{AC00}'..='\u{D7A3}').contains(&c))
}

/// Strip one trailing Korean particle (e.g. `데이터를` -> `데이터`)
pub fn remove_particle(keyword: &str) -> String {
    let keyword = keyword.trim();

    if contains_hangul(keyword) {
        let len = keyword.chars().count();
        for particle in KOREAN_PARTICLES {
            let particle_len = particle.chars().count();
            if len <= particle_len + 1 {
                continue;
            }
            if let Some(stem) = keyword.strip_suffix(particle) {
                if stem.chars().count() >= MIN_KEYWORD_LENGTH {
                    return stem.to_string();
                }
            }
        }
    }

    keyword.to_string()
}

/// Drop stopwords and clean particles, preserving input order.
///
/// A single word survives unless it is a stopword; a phrase survives
/// unless every one of its words is a stopword.
pub fn filter_stopwords<S: AsRef<str>>(keywords: &[S]) -> Vec<String> {
    let mut filtered = Vec::with_capacity(keywords.len());

    for keyword in keywords {
        let stripped = keyword.as_ref().trim();
        if stripped.is_empty() {
            continue;
        }

        let cleaned = remove_particle(stripped);
        let words: Vec<&str> = cleaned.split_whitespace().collect();

        let keep = if words.len() <= 1 {
            !is_stopword(&cleaned)
        } else {
            !words.iter().all(|word| is_stopword(word))
        };

        if keep {
            filtered.push(cleaned);
        }
    }

    filtered
}

/// Canonical tag name: Latin-only names are title-cased, everything else lowercased
pub fn normalize_tag_name(name: &str) -> String {
    let name = name.trim();

    if LATIN_NAME_PATTERN.is_match(name) {
        title_case(name)
    } else {
        name.to_lowercase()
    }
}

/// Uppercase letters that follow a non-letter, lowercase the rest
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_is_letter = false;

    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }

    out
}
