//! Helpers for turning `card-controls` output into values the bridge can use.

use regex::Regex;
use std::sync::OnceLock;

/// Turn `name<TAB>value` style output into pairs.
pub(crate) fn parse_tabular_pairs(output: &str) -> Vec<(String, String)> {
    output.lines().filter_map(parse_pair_line).collect()
}

/// Split one line on its first tab, or on whitespace when there is no tab.
fn parse_pair_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (name, value) = match trimmed.split_once('\t') {
        Some((left, right)) => (left.trim(), right.trim()),
        None => {
            let (left, right) = trimmed.split_once(char::is_whitespace)?;
            (left.trim(), right.trim())
        }
    };

    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

/// Value reported for `name`, if the helper printed one.
pub(crate) fn value_for<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn card_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("card id pattern is valid")
    })
}

/// Card ids are passed as helper arguments, so only a conservative
/// alphabet is accepted (and never a leading `-`).
pub(crate) fn is_valid_card_id(card_id: &str) -> bool {
    card_id_pattern().is_match(card_id)
}
