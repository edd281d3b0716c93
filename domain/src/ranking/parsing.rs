//! Ranking extraction from free-form ranker output.
//!
//! Stage-2 models are asked for an ordered list of anonymous labels, but
//! they answer in prose. These functions extract the first ordered list
//! they can find. Pure text pattern matching, no I/O.
//!
//! Recognised shapes, tried in order:
//!
//! | Shape | Example |
//! |-------|---------|
//! | Numbered list | `1. Response C` / `2) A` |
//! | Chain | `C > A > B` or `C → A → B` |
//! | Prefixed list | `Final ranking: C, A, B` |
//!
//! Unrecognised and duplicate labels are skipped everywhere.

/// Extract the first ordered label list from `text`.
///
/// `alphabet` is the set of labels handed to the ranker (one per Stage-1
/// participant). The result is deduplicated in order of appearance and
/// contains only alphabet members; it is empty when no list shape matches.
pub fn parse_ranking(text: &str, alphabet: &[char]) -> Vec<char> {
    if let Some(labels) = parse_numbered_list(text, alphabet) {
        return labels;
    }
    if let Some(labels) = parse_chain(text, alphabet) {
        return labels;
    }
    if let Some(labels) = parse_prefixed_list(text, alphabet) {
        return labels;
    }
    Vec::new()
}

/// First block of numbered lines (`1.`, `2)`, …), stopping at the first
/// non-matching non-empty line after the block has started.
fn parse_numbered_list(text: &str, alphabet: &[char]) -> Option<Vec<char>> {
    let mut labels = Vec::new();
    let mut in_block = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match numbered_line_label(trimmed, alphabet) {
            Some(label) => {
                in_block = true;
                push_unique(&mut labels, label);
            }
            None if in_block => break,
            None => {}
        }
    }

    (labels.len() >= 2).then_some(labels)
}

/// `N.` / `N)` prefix followed by a label token.
fn numbered_line_label(line: &str, alphabet: &[char]) -> Option<char> {
    let digits_end = line.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let rest = line[digits_end..].strip_prefix(['.', ')', ':'])?;
    extract_label(rest, alphabet)
}

/// A single line of labels joined by `>` or `→`.
fn parse_chain(text: &str, alphabet: &[char]) -> Option<Vec<char>> {
    for line in text.lines() {
        let line = line.trim();
        let separator = if line.contains('>') {
            '>'
        } else if line.contains('→') {
            '→'
        } else {
            continue;
        };

        let tokens: Vec<&str> = line.split(separator).collect();
        if tokens.len() < 2 {
            continue;
        }
        let mut labels = Vec::new();
        let mut all_match = true;
        for token in &tokens {
            match extract_label(token, alphabet) {
                Some(label) => push_unique(&mut labels, label),
                None => {
                    all_match = false;
                    break;
                }
            }
        }
        if all_match && labels.len() >= 2 {
            return Some(labels);
        }
    }
    None
}

/// A line whose head mentions "ranking" or "order" before a colon, with a
/// comma- or space-separated label list after it.
fn parse_prefixed_list(text: &str, alphabet: &[char]) -> Option<Vec<char>> {
    for line in text.lines() {
        let line = line.trim();
        let Some(colon) = line.find(':') else { continue };
        let head = line[..colon].to_lowercase();
        if !head.contains("ranking") && !head.contains("order") {
            continue;
        }
        let mut labels = Vec::new();
        for token in line[colon + 1..].split([',', ' ']) {
            if token.trim().is_empty() {
                continue;
            }
            if let Some(label) = extract_label(token, alphabet) {
                push_unique(&mut labels, label);
            }
        }
        if labels.len() >= 2 {
            return Some(labels);
        }
    }
    None
}

/// Reduce a token like `**Response C**` or `(a)` to its alphabet label.
fn extract_label(token: &str, alphabet: &[char]) -> Option<char> {
    let cleaned = token
        .trim()
        .trim_matches(|c: char| {
            c.is_whitespace() || matches!(c, '*' | '#' | '_' | '.' | ',' | ':' | ';' | '(' | ')' | '[' | ']' | '"' | '\'' | '-')
        })
        .trim();

    let cleaned = strip_label_word(cleaned, "response");
    let cleaned = strip_label_word(cleaned, "answer");
    let cleaned = cleaned.trim();

    let mut chars = cleaned.chars();
    let first = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    let upper = first.to_ascii_uppercase();
    alphabet.contains(&upper).then_some(upper)
}

fn strip_label_word<'a>(s: &'a str, word: &str) -> &'a str {
    if s.len() > word.len() && s[..word.len()].eq_ignore_ascii_case(word) {
        s[word.len()..].trim_start()
    } else {
        s
    }
}

fn push_unique(labels: &mut Vec<char>, label: char) {
    if !labels.contains(&label) {
        labels.push(label);
    }
}
