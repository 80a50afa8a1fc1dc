use std::collections::HashMap;

use super::engine::{build_ocr_lines, OcrWord};
use super::tokens::{is_code_shaped, normalize_color_code, normalize_ocr_token};
use crate::config::ScoreWeights;
use crate::model::{sorted_requirements, ColorRequirement, PairingKinds};

/// Longest token that can still be a color code after cleaning.
const MAX_CODE_TOKEN_LEN: usize = 6;

/// Where the lines of a list parse came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSource {
    /// Raw text, one provider word per line
    Text,
    /// Word boxes grouped into visual lines
    Location,
}

impl ListSource {
    fn label(&self) -> &'static str {
        match self {
            ListSource::Text => "text",
            ListSource::Location => "location",
        }
    }
}

/// Outcome of parsing one OCR result as a shopping list.
#[derive(Debug, Clone, Default)]
pub struct ListParse {
    /// Sorted by natural code order
    pub colors: Vec<ColorRequirement>,
    pub pairing: PairingKinds,
    /// Numbered line texts (`"1: C11 B22"`), location parses only
    pub lines: Vec<String>,
    pub logs: Vec<String>,
}

/// Which list parse a caller should trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChoice {
    Location,
    Text,
}

/// Uppercases a line and blanks out brackets, colons, pipes and `x`/`×`
/// multiplier markers.
///
/// `×` is always a marker. `X` only counts as one between two digits
/// (`C11X5`, `C11 x 5`), so codes starting with X survive.
pub fn clean_line(line: &str) -> String {
    let chars: Vec<char> = line.to_uppercase().chars().collect();
    let digit_before = |i: usize| {
        chars[..i]
            .iter()
            .rev()
            .find(|c| !c.is_whitespace())
            .is_some_and(|c| c.is_ascii_digit())
    };
    let digit_after = |i: usize| {
        chars[i + 1..]
            .iter()
            .find(|c| !c.is_whitespace())
            .is_some_and(|c| c.is_ascii_digit())
    };

    let cleaned: String = chars
        .iter()
        .enumerate()
        .map(|(i, &c)| match c {
            '(' | ')' | '（' | '）' | ':' | '：' | '|' => ' ',
            '×' if digit_after(i) => ' ',
            'X' if digit_before(i) && digit_after(i) => ' ',
            _ => c,
        })
        .collect();
    cleaned.trim().to_string()
}

/// Splits a cleaned line on whitespace and list separators (ASCII and CJK).
fn split_tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '，' | '；' | '、'))
        .filter(|t| !t.is_empty())
}

/// Reads a token as a color code. The token must contain a letter and be
/// code-shaped after OCR repair.
pub fn normalize_code_token(token: &str) -> Option<String> {
    let upper: String = token
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if !upper.chars().any(|c| c.is_ascii_uppercase()) {
        return None;
    }
    let code = normalize_ocr_token(&upper);
    (code.len() <= MAX_CODE_TOKEN_LEN && is_code_shaped(&code)).then_some(code)
}

/// Reads a token as a quantity, tolerating `O`, `I` and `L` for digits.
/// Zero is not a quantity.
pub fn parse_quantity(token: &str) -> Option<u32> {
    let repaired = token.trim().replace('O', "0").replace(['I', 'L'], "1");
    if !is_plain_quantity(&repaired) {
        return None;
    }
    repaired.parse::<u32>().ok().filter(|&q| q > 0)
}

/// One to four ASCII digits.
fn is_plain_quantity(token: &str) -> bool {
    (1..=4).contains(&token.len()) && token.chars().all(|c| c.is_ascii_digit())
}

pub fn extract_codes(line: &str) -> Vec<String> {
    split_tokens(line).filter_map(normalize_code_token).collect()
}

pub fn extract_quantities(line: &str) -> Vec<u32> {
    split_tokens(line).filter_map(parse_quantity).collect()
}

/// Codes and quantities found on one line.
struct LineTokens {
    codes: Vec<String>,
    quantities: Vec<u32>,
}

impl LineTokens {
    fn new(line: &str) -> Self {
        Self {
            codes: extract_codes(line),
            quantities: extract_quantities(line),
        }
    }

    fn is_code_only(&self) -> bool {
        !self.codes.is_empty() && self.quantities.is_empty()
    }

    fn is_quantity_only(&self) -> bool {
        self.codes.is_empty() && !self.quantities.is_empty()
    }
}

/// Parses raw OCR text.
pub fn parse_by_text(raw: &str) -> ListParse {
    if raw.trim().is_empty() {
        return ListParse {
            logs: vec!["text parse: OCR text is empty".to_string()],
            ..ListParse::default()
        };
    }
    let lines: Vec<String> = raw
        .replace('\r', "\n")
        .split('\n')
        .map(clean_line)
        .filter(|l| !l.is_empty())
        .collect();
    parse_lines(&lines, ListSource::Text)
}

/// Parses located words after grouping them into visual lines.
pub fn parse_by_location(words: &[OcrWord]) -> ListParse {
    if words.is_empty() {
        return ListParse {
            logs: vec!["location parse: no OCR words".to_string()],
            ..ListParse::default()
        };
    }
    let lines: Vec<String> = build_ocr_lines(words).into_iter().map(|l| l.text).collect();
    let mut parse = parse_lines(&lines, ListSource::Location);
    parse.lines = lines
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}: {}", i + 1, text))
        .collect();
    parse
}

/// Runs the pairing passes over cleaned lines:
/// - Pass 1: blocks of code-only lines followed by quantity-only lines
/// - Pass 2: a code-only line directly followed by a quantity-only line
/// - Pass 3: on lines still unused, each code takes the next token as its
///   quantity when it is a plain number, else 1
fn parse_lines(lines: &[String], source: ListSource) -> ListParse {
    let label = source.label();
    let mut parse = ListParse::default();
    if lines.is_empty() {
        parse
            .logs
            .push(format!("{} parse: no usable lines after cleaning", label));
        return parse;
    }

    let rows: Vec<LineTokens> = lines.iter().map(|l| LineTokens::new(l)).collect();
    let mut consumed = vec![false; lines.len()];
    let mut merged: HashMap<String, u32> = HashMap::new();

    // Pass 1: block pairing
    let mut index = 0;
    while index < rows.len() {
        if consumed[index] || !rows[index].is_code_only() {
            index += 1;
            continue;
        }

        let code_start = index;
        let mut code_end = index;
        let mut codes: Vec<&String> = Vec::new();
        while code_end < rows.len() && !consumed[code_end] && rows[code_end].is_code_only() {
            codes.extend(rows[code_end].codes.iter());
            code_end += 1;
        }

        let quantity_start = code_end;
        let mut quantity_end = quantity_start;
        let mut quantities: Vec<u32> = Vec::new();
        while quantity_end < rows.len()
            && !consumed[quantity_end]
            && rows[quantity_end].is_quantity_only()
        {
            quantities.extend(rows[quantity_end].quantities.iter());
            quantity_end += 1;
        }

        let pairs = codes.len().min(quantities.len());
        let looks_like_block = codes.len() >= 2
            && quantities.len() >= 2
            && codes.len().abs_diff(quantities.len()) <= (codes.len() / 2).max(2);
        if !looks_like_block {
            index = code_end;
            continue;
        }

        for (code, &quantity) in codes.iter().zip(quantities.iter()) {
            add_quantity(&mut merged, code, quantity);
        }
        consumed[code_start..quantity_end].fill(true);
        parse.logs.push(format!(
            "{} block pairing: lines {}-{} codes={}; lines {}-{} qty={}; pairs={}",
            label,
            code_start + 1,
            code_end,
            codes.len(),
            quantity_start + 1,
            quantity_end,
            quantities.len(),
            pairs
        ));
        parse.pairing.block = true;
        index = quantity_end;
    }

    // Pass 2: double-line pairing
    let mut index = 0;
    while index + 1 < rows.len() {
        if consumed[index] || consumed[index + 1] {
            index += 1;
            continue;
        }
        let (current, next) = (&rows[index], &rows[index + 1]);
        if !current.is_code_only() || !next.is_quantity_only() {
            index += 1;
            continue;
        }

        if source == ListSource::Location {
            let diff = current.codes.len().abs_diff(next.quantities.len());
            if diff > (current.codes.len() / 2).max(1) {
                parse.logs.push(format!(
                    "skipped double-line pairing: line {} codes={:?}; line {} qty={:?} (count mismatch)",
                    index + 1,
                    current.codes,
                    index + 2,
                    next.quantities
                ));
                index += 1;
                continue;
            }
        }

        let pairs = current.codes.len().min(next.quantities.len());
        parse.logs.push(format!(
            "{} double-line pairing: line {} codes={:?}; line {} qty={:?}; pairs={}",
            label,
            index + 1,
            current.codes,
            index + 2,
            next.quantities,
            pairs
        ));
        for (code, &quantity) in current.codes.iter().zip(next.quantities.iter()) {
            add_quantity(&mut merged, code, quantity);
        }
        consumed[index] = true;
        consumed[index + 1] = true;
        parse.pairing.double_line = true;
        index += 2;
    }

    // Pass 3: single-line fallback
    for (index, line) in lines.iter().enumerate() {
        if consumed[index] {
            continue;
        }
        let tokens: Vec<&str> = split_tokens(line).collect();
        let mut i = 0;
        while i < tokens.len() {
            let Some(code) = normalize_code_token(tokens[i]) else {
                i += 1;
                continue;
            };
            let mut quantity = 1;
            if let Some(next) = tokens.get(i + 1)
                && is_plain_quantity(next)
            {
                quantity = next.parse::<u32>().unwrap_or(0);
                i += 1;
            }
            i += 1;

            if quantity == 0 {
                continue;
            }
            add_quantity(&mut merged, &code, quantity);
            parse.logs.push(format!(
                "{} single-line fallback: line {} -> {} x {}",
                label,
                index + 1,
                code,
                quantity
            ));
            parse.pairing.single_line = true;
        }
    }

    parse.colors = sorted_requirements(merged);
    parse
}

fn add_quantity(merged: &mut HashMap<String, u32>, code: &str, quantity: u32) {
    if quantity == 0 {
        return;
    }
    let entry = merged.entry(code.to_string()).or_insert(0);
    *entry = entry.saturating_add(quantity);
}

/// Plausibility of a parsed list. Real lists have several codes with
/// quantities well above 1; OCR noise produces many singletons.
/// An empty list scores negative infinity.
pub fn confidence_score(items: &[ColorRequirement], weights: &ScoreWeights) -> f64 {
    let valid: Vec<(String, u32)> = items
        .iter()
        .map(|item| (normalize_color_code(&item.code), item.quantity))
        .filter(|(code, quantity)| !code.is_empty() && *quantity > 0)
        .collect();
    if valid.is_empty() {
        return f64::NEG_INFINITY;
    }

    let count = valid.len();
    let total: u64 = valid.iter().map(|(_, q)| *q as u64).sum();
    let max = valid.iter().map(|(_, q)| *q).max().unwrap_or(0);
    let code_shaped = valid.iter().filter(|(code, _)| is_code_shaped(code)).count();
    let singles = valid.iter().filter(|(_, q)| *q <= 1).count();

    let average = total as f64 / count as f64;
    let single_ratio = singles as f64 / count as f64;

    let mut score = count as f64 * weights.per_item
        + total.min(weights.total_cap as u64) as f64 * weights.per_total
        + max.min(weights.max_cap) as f64 * weights.per_max
        + code_shaped as f64 * weights.per_valid_code;

    if total >= count as u64 * 2 {
        score += weights.bulk_bonus;
    }
    if count >= weights.heavy_single_min_items && single_ratio >= weights.heavy_single_ratio {
        score -= weights.heavy_single_penalty;
    } else if count >= weights.single_min_items && single_ratio >= weights.single_ratio {
        score -= weights.single_penalty;
    }
    if average < weights.low_average && count >= weights.low_average_min_items {
        score -= weights.low_average_penalty;
    }
    score
}

/// True when `candidate` should replace `current`: it is non-empty and
/// scores strictly higher.
pub fn is_better(candidate: &[ColorRequirement], current: &[ColorRequirement], weights: &ScoreWeights) -> bool {
    if candidate.is_empty() {
        return false;
    }
    current.is_empty() || confidence_score(candidate, weights) > confidence_score(current, weights)
}

/// Picks between a location and a text parse. Text wins only with a strictly
/// higher score, or when the location parse is empty.
pub fn choose_list(location: &[ColorRequirement], text: &[ColorRequirement], weights: &ScoreWeights) -> ListChoice {
    if location.is_empty() {
        return ListChoice::Text;
    }
    if text.is_empty() {
        return ListChoice::Location;
    }
    if confidence_score(text, weights) > confidence_score(location, weights) {
        ListChoice::Text
    } else {
        ListChoice::Location
    }
}
