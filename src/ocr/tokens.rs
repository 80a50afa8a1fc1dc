//! Color code normalization and vocabulary matching.
//!
//! Codes are one or two letters followed by up to four digits (`C11`, `H7`,
//! `AB102`). OCR regularly swaps look-alike glyphs across that boundary
//! (`0`/`O`, `1`/`I`/`L`, `8`/`B`), so tokens are repaired on both sides of an
//! inferred letter/digit split before they are looked up.

use std::cmp::Ordering;
use std::collections::HashSet;

/// Code-shaped substring: one or two letters, one to four digits.
pub const CODE_PATTERN: &str = r"[A-Z]{1,2}[0-9]{1,4}";

/// Upper bound on generated confusion variants per token.
const MAX_CONFUSION_VARIANTS: usize = 24;
/// Cost of substituting one look-alike glyph for another.
const CONFUSABLE_COST: f64 = 0.35;
/// Accepted distance for tokens of at most three characters.
const SHORT_TOKEN_DISTANCE: f64 = 0.75;
const LONG_TOKEN_DISTANCE: f64 = 1.25;

/// Uppercases and strips leading zeros from the number: `c011` -> `C11`.
///
/// Values that are not `letters + digits` are only trimmed and uppercased.
pub fn normalize_color_code(code: &str) -> String {
    let upper = code.trim().to_uppercase();
    match split_code(&upper) {
        Some((prefix, number)) => {
            let trimmed = number.trim_start_matches('0');
            let number = if trimmed.is_empty() { "0" } else { trimmed };
            format!("{}{}", prefix, number)
        }
        None => upper,
    }
}

/// Splits `^[A-Z]+[0-9]+$` into its letter prefix and digits.
fn split_code(code: &str) -> Option<(&str, &str)> {
    let digits_at = code.find(|c: char| c.is_ascii_digit())?;
    let (prefix, number) = code.split_at(digits_at);
    let valid = !prefix.is_empty()
        && prefix.chars().all(|c| c.is_ascii_uppercase())
        && number.chars().all(|c| c.is_ascii_digit());
    valid.then_some((prefix, number))
}

/// True for `^[A-Z]{1,2}[0-9]{1,4}$`.
pub fn is_code_shaped(token: &str) -> bool {
    match split_code(token) {
        Some((prefix, number)) => prefix.len() <= 2 && number.len() <= 4,
        None => false,
    }
}

/// Natural code order: letter prefix first, then the number as a value.
/// Anything that is not `letters + digits` compares as plain text.
pub fn compare_codes(left: &str, right: &str) -> Ordering {
    let left = normalize_color_code(left);
    let right = normalize_color_code(right);
    match (split_code(&left), split_code(&right)) {
        (Some((lp, ln)), Some((rp, rn))) => lp.cmp(rp).then_with(|| compare_numbers(ln, rn)),
        _ => left.cmp(&right),
    }
}

/// Compares digit strings without leading zeros by value.
fn compare_numbers(left: &str, right: &str) -> Ordering {
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

/// Repairs a raw OCR token into a color code.
///
/// Non-alphanumerics are dropped, the letter/digit boundary is inferred,
/// then characters before it are read as letters and after it as digits.
/// Returns an empty string when nothing alphanumeric remains.
pub fn normalize_ocr_token(token: &str) -> String {
    let chars: Vec<char> = token
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if chars.is_empty() {
        return String::new();
    }

    let split = infer_letter_digit_split(&chars);
    let repaired: String = chars
        .iter()
        .enumerate()
        .map(|(i, &c)| if i < split { as_letter(c) } else { as_digit(c) })
        .collect();
    normalize_color_code(&repaired)
}

/// Picks a prefix length of 1 or 2. Ties keep 1.
fn infer_letter_digit_split(chars: &[char]) -> usize {
    let max_prefix = chars.len().saturating_sub(1).clamp(1, 2);
    let mut best_split = 1;
    let mut best_score = f64::NEG_INFINITY;

    for split in 1..=max_prefix {
        let score: f64 = chars
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let fits = if i < split { is_letter_like(c) } else { is_digit_like(c) };
                if fits { 1.0 } else { -0.8 }
            })
            .sum();
        if score > best_score {
            best_score = score;
            best_split = split;
        }
    }
    best_split
}

fn is_letter_like(c: char) -> bool {
    c.is_ascii_uppercase() || matches!(c, '0' | '1' | '2' | '5' | '6' | '8')
}

fn is_digit_like(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, 'O' | 'Q' | 'D' | 'I' | 'L' | 'T' | 'Z' | 'S' | 'G' | 'B')
}

fn as_letter(c: char) -> char {
    match c {
        '0' => 'O',
        '1' => 'I',
        '2' => 'Z',
        '5' => 'S',
        '6' => 'G',
        '8' => 'B',
        _ => c,
    }
}

fn as_digit(c: char) -> char {
    match c {
        'O' | 'Q' | 'D' => '0',
        'I' | 'L' | 'T' => '1',
        'Z' => '2',
        'S' => '5',
        'G' => '6',
        'B' => '8',
        _ => c,
    }
}

/// Glyphs OCR mistakes for `c`, including `c` itself.
fn confusable_chars(c: char) -> &'static [char] {
    match c {
        '0' | 'O' => &['0', 'O', 'Q', 'D'],
        'Q' => &['Q', '0', 'O'],
        'D' => &['D', '0', 'O'],
        '1' | 'I' => &['1', 'I', 'L', 'T'],
        'L' => &['L', '1', 'I'],
        'T' => &['T', '1', 'I'],
        '2' | 'Z' => &['2', 'Z'],
        '5' | 'S' => &['5', 'S'],
        '6' | 'G' => &['6', 'G'],
        '8' | 'B' => &['8', 'B'],
        _ => &[],
    }
}

fn is_confusable_pair(left: char, right: char) -> bool {
    confusable_chars(left).contains(&right)
}

/// Spellings reachable by swapping look-alike glyphs, breadth-first from the
/// leftmost position. The token itself comes first.
pub fn confusion_variants(normalized: &str, max_variants: usize) -> Vec<String> {
    if normalized.is_empty() || max_variants == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = normalized.chars().collect();
    let mut variants: Vec<Vec<char>> = vec![chars.clone()];

    for (i, &current) in chars.iter().enumerate() {
        if variants.len() >= max_variants {
            break;
        }
        let existing = variants.len();
        'bases: for base_index in 0..existing {
            for &replacement in confusable_chars(current) {
                if replacement == current {
                    continue;
                }
                let mut next = variants[base_index].clone();
                next[i] = replacement;
                if !variants.contains(&next) {
                    variants.push(next);
                }
                if variants.len() >= max_variants {
                    break 'bases;
                }
            }
        }
    }

    variants.into_iter().map(|v| v.into_iter().collect()).collect()
}

/// Edit distance where look-alike substitutions are cheap.
///
/// Insertions, deletions and unrelated substitutions cost 1.0, look-alikes
/// 0.35. A shared first character earns 0.15 back, a look-alike first
/// character 0.08. Never negative.
pub fn confusion_aware_distance(left: &str, right: &str) -> f64 {
    if left == right {
        return 0.0;
    }
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();
    if left.is_empty() {
        return right.len() as f64;
    }
    if right.is_empty() {
        return left.len() as f64;
    }

    let mut previous: Vec<f64> = (0..=right.len()).map(|j| j as f64).collect();
    let mut current = vec![0.0; right.len() + 1];

    for (i, &lc) in left.iter().enumerate() {
        current[0] = (i + 1) as f64;
        for (j, &rc) in right.iter().enumerate() {
            let substitution = previous[j] + substitution_cost(lc, rc);
            let insertion = current[j] + 1.0;
            let deletion = previous[j + 1] + 1.0;
            current[j + 1] = substitution.min(insertion).min(deletion);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    let mut distance = previous[right.len()];
    if left[0] == right[0] {
        distance -= 0.15;
    } else if is_confusable_pair(left[0], right[0]) {
        distance -= 0.08;
    }
    distance.max(0.0)
}

fn substitution_cost(left: char, right: char) -> f64 {
    if left == right {
        0.0
    } else if is_confusable_pair(left, right) {
        CONFUSABLE_COST
    } else {
        1.0
    }
}

/// Resolves recognized tokens against the codes a pattern is known to use.
///
/// An empty vocabulary accepts every normalized token.
#[derive(Clone, Debug, Default)]
pub struct TokenMatcher {
    /// Normalized candidates in caller order, without duplicates
    candidates: Vec<String>,
    lookup: HashSet<String>,
}

impl TokenMatcher {
    pub fn new<S: AsRef<str>>(codes: &[S]) -> Self {
        let mut candidates = Vec::new();
        let mut lookup = HashSet::new();
        for code in codes {
            let normalized = normalize_color_code(code.as_ref());
            if normalized.is_empty() {
                continue;
            }
            if lookup.insert(normalized.clone()) {
                candidates.push(normalized);
            }
        }
        Self { candidates, lookup }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn is_open(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.lookup.contains(code)
    }

    /// Maps a token to a vocabulary code, or `None` if nothing is close.
    ///
    /// Tried in order: exact match, look-alike variants, a candidate that
    /// extends or truncates the token by one character, the nearest candidate
    /// by [`confusion_aware_distance`], then the first candidate sharing the
    /// token's letter prefix.
    pub fn resolve(&self, token: &str) -> Option<String> {
        let normalized = normalize_color_code(token);
        if normalized.is_empty() {
            return None;
        }
        if self.is_open() || self.contains(&normalized) {
            return Some(normalized);
        }

        if let Some(variant) = confusion_variants(&normalized, MAX_CONFUSION_VARIANTS)
            .into_iter()
            .find(|v| self.contains(v))
        {
            return Some(variant);
        }

        let token_len = normalized.len();
        if let Some(extended) = self.candidates.iter().find(|c| {
            (c.starts_with(&normalized) && c.len() - token_len <= 1)
                || (normalized.starts_with(c.as_str()) && token_len - c.len() <= 1)
        }) {
            return Some(extended.clone());
        }

        let mut best: Option<(&String, f64)> = None;
        for candidate in &self.candidates {
            let distance = confusion_aware_distance(&normalized, candidate);
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((candidate, distance));
            }
        }
        let allowed = if token_len <= 3 {
            SHORT_TOKEN_DISTANCE
        } else {
            LONG_TOKEN_DISTANCE
        };
        if let Some((candidate, distance)) = best
            && distance <= allowed
        {
            return Some(candidate.clone());
        }

        if is_code_shaped(&normalized) {
            let prefix: String = normalized.chars().filter(|c| !c.is_ascii_digit()).collect();
            return self.candidates.iter().find(|c| c.starts_with(&prefix)).cloned();
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_matcher(codes: &[&str]) -> TokenMatcher {
        TokenMatcher::new(codes)
    }

    #[test]
    fn test_normalize_color_code() {
        assert_eq!(normalize_color_code("c011"), "C11");
        assert_eq!(normalize_color_code(" h007 "), "H7");
        assert_eq!(normalize_color_code("A000"), "A0");
        assert_eq!(normalize_color_code("zz-1"), "ZZ-1");
        assert_eq!(normalize_color_code(""), "");
    }

    #[test]
    fn test_normalize_color_code_idempotent() {
        for raw in ["c011", "h007", "AB0102", "x", "12", "M-3", "Q0"] {
            let once = normalize_color_code(raw);
            assert_eq!(normalize_color_code(&once), once, "not idempotent for {}", raw);
        }
    }

    #[test]
    fn test_normalize_ocr_token() {
        assert_eq!(normalize_ocr_token("c011"), "C11");
        assert_eq!(normalize_ocr_token("h007"), "H7");
        assert_eq!(normalize_ocr_token("CI1"), "C11");
        assert_eq!(normalize_ocr_token("8ll"), "B11");
        assert_eq!(normalize_ocr_token("C-1O"), "C10");
        assert_eq!(normalize_ocr_token("AH12"), "AH12");
        assert_eq!(normalize_ocr_token("--"), "");
    }

    #[test]
    fn test_normalize_ocr_token_idempotent() {
        for raw in ["c011", "CI1", "8ll", "AH12", "h5s"] {
            let once = normalize_ocr_token(raw);
            assert_eq!(normalize_ocr_token(&once), once, "not idempotent for {}", raw);
        }
    }

    #[test]
    fn test_is_code_shaped() {
        assert!(is_code_shaped("C11"));
        assert!(is_code_shaped("AB1234"));
        assert!(!is_code_shaped("ABC1"));
        assert!(!is_code_shaped("C12345"));
        assert!(!is_code_shaped("11"));
        assert!(!is_code_shaped("C"));
    }

    #[test]
    fn test_compare_codes_natural_order() {
        assert_eq!(compare_codes("C2", "C11"), Ordering::Less);
        assert_eq!(compare_codes("B22", "C2"), Ordering::Less);
        assert_eq!(compare_codes("c011", "C11"), Ordering::Equal);
        assert_eq!(compare_codes("H100", "H99"), Ordering::Greater);
    }

    #[test]
    fn test_confusion_variants() {
        assert_eq!(confusion_variants("C0", 24), vec!["C0", "CO", "CQ", "CD"]);
        assert_eq!(confusion_variants("C11", 3).len(), 3);
        assert!(confusion_variants("", 24).is_empty());
    }

    #[test]
    fn test_confusion_aware_distance() {
        assert_eq!(confusion_aware_distance("C11", "C11"), 0.0);
        assert!((confusion_aware_distance("C1", "CI") - 0.2).abs() < 1e-9);
        assert!((confusion_aware_distance("C17", "C11") - 0.85).abs() < 1e-9);
        assert!((confusion_aware_distance("8", "B") - 0.27).abs() < 1e-9);
        assert_eq!(confusion_aware_distance("", "AB"), 2.0);
    }

    #[test]
    fn test_resolve_exact_and_confusions() {
        let matcher = make_matcher(&["C11", "B22", "H16"]);
        assert_eq!(matcher.resolve(&normalize_ocr_token("CI1")), Some("C11".to_string()));
        assert_eq!(matcher.resolve("B22"), Some("B22".to_string()));

        let matcher = make_matcher(&["C11", "B22", "H16", "B11"]);
        assert_eq!(matcher.resolve(&normalize_ocr_token("8ll")), Some("B11".to_string()));
    }

    #[test]
    fn test_resolve_extension_and_prefix() {
        let matcher = make_matcher(&["C11", "B22", "H16"]);
        // one character short of H16
        assert_eq!(matcher.resolve("H1"), Some("H16".to_string()));
        // nothing close except the letter prefix
        assert_eq!(matcher.resolve("B907"), Some("B22".to_string()));
        assert_eq!(matcher.resolve("M5"), None);
    }

    #[test]
    fn test_resolve_open_vocabulary() {
        let matcher = make_matcher(&[]);
        assert!(matcher.is_open());
        assert_eq!(matcher.resolve("c011"), Some("C11".to_string()));
        assert_eq!(matcher.resolve("  "), None);
    }

    #[test]
    fn test_matcher_keeps_caller_order() {
        let matcher = make_matcher(&["h016", "C11", "H16", "b2"]);
        assert_eq!(matcher.candidates(), &["H16", "C11", "B2"]);
    }
}
