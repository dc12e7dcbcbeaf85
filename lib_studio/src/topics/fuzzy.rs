//! Subsequence fuzzy scoring.
//!
//! A candidate matches when every query character appears in it, in order,
//! ignoring case. Among matches, contiguous runs, an early first match and a
//! short candidate score higher.

/// Per matched character.
pub const MATCH_SCORE: u32 = 16;
/// Per pair of query characters matched at adjacent positions.
pub const CONTIGUOUS_BONUS: u32 = 24;
/// Bonus for a match starting at index 0, minus 2 per later start position.
pub const POSITION_BONUS: u32 = 64;
/// Bonus for an empty candidate, minus 1 per candidate character.
pub const LENGTH_BONUS: u32 = 64;

/// Scores `candidate` against `query`. `None` when it does not match.
///
/// An empty query matches everything with score 0.
pub fn score(query: &str, candidate: &str) -> Option<u32> {
    let needle: Vec<char> = query.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return Some(0);
    }
    let haystack: Vec<char> = candidate.chars().flat_map(char::to_lowercase).collect();
    if haystack.len() < needle.len() {
        return None;
    }

    let length_bonus = LENGTH_BONUS.saturating_sub(clamp_u32(haystack.len()));
    let mut best: Option<u32> = None;
    for (start, _) in haystack.iter().enumerate().filter(|(_, c)| **c == needle[0]) {
        let Some(contiguous) = greedy_match(&needle, &haystack[start..]) else {
            // No later start can match either once the tail is too short.
            break;
        };
        let position_bonus = POSITION_BONUS.saturating_sub(2 * clamp_u32(start));
        let total = MATCH_SCORE * clamp_u32(needle.len())
            + CONTIGUOUS_BONUS * contiguous
            + position_bonus
            + length_bonus;
        best = Some(best.map_or(total, |b| b.max(total)));
    }
    best
}

/// Greedy left-to-right subsequence match anchored at `haystack[0]`.
/// Returns the number of adjacent matched pairs.
fn greedy_match(needle: &[char], haystack: &[char]) -> Option<u32> {
    let mut contiguous = 0;
    let mut last: Option<usize> = None;
    let mut remaining = needle.iter().peekable();
    for (i, c) in haystack.iter().enumerate() {
        let Some(want) = remaining.peek() else {
            break;
        };
        if *want == c {
            if last.is_some_and(|l| l + 1 == i) {
                contiguous += 1;
            }
            last = Some(i);
            remaining.next();
        }
    }
    remaining.peek().is_none().then_some(contiguous)
}

fn clamp_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
