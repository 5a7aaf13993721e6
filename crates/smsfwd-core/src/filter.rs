//! Dedup and keyword filtering for polled batches.

use crate::source::SourceMessage;

/// Select messages newer than `high_water_mark`, ascending by id.
///
/// Returns the qualifying messages and the updated mark. Messages without an
/// id are dropped and never move the mark. Running it again with the returned
/// mark over the same batch yields nothing.
pub fn select(
    messages: Vec<SourceMessage>,
    high_water_mark: Option<i64>,
) -> (Vec<SourceMessage>, Option<i64>) {
    let mut fresh: Vec<(i64, SourceMessage)> = messages
        .into_iter()
        .filter_map(|m| m.id.map(|id| (id, m)))
        .filter(|(id, _)| high_water_mark.map_or(true, |mark| *id > mark))
        .collect();
    fresh.sort_by_key(|(id, _)| *id);

    let mark = match (high_water_mark, fresh.last()) {
        (Some(prev), Some((top, _))) => Some(prev.max(*top)),
        (None, Some((top, _))) => Some(*top),
        (prev, None) => prev,
    };

    (fresh.into_iter().map(|(_, m)| m).collect(), mark)
}

/// Case-insensitive substring match. An empty keyword list matches everything.
pub fn matches(content: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = content.to_lowercase();
    keywords
        .iter()
        .any(|k| haystack.contains(k.to_lowercase().as_str()))
}

/// Normalize operator keyword input: split on any delimiter, trim, drop
/// empties, lowercase. Duplicates are kept once, first occurrence wins.
pub fn parse_keywords(text: &str, delimiters: &[char]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in text.split(|c: char| delimiters.contains(&c)) {
        let kw = part.trim().to_lowercase();
        if !kw.is_empty() && !out.contains(&kw) {
            out.push(kw);
        }
    }
    out
}
