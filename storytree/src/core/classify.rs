//! Deterministic parsing of oracle classification replies.

use std::sync::LazyLock;

/// True when the oracle's reply affirms task completion.
///
/// Matches any case-insensitive occurrence of `yes`; everything else is a
/// no-op for the caller.
pub fn is_affirmative(reply: &str) -> bool {
    reply.to_lowercase().contains("yes")
}

/// Parse a numbered-branch reply into a zero-based branch index.
///
/// The reply is read as a leading integer, so `2. take the left road` picks
/// branch 2. `0` (the "none" option), non-numeric replies, and out-of-range
/// indices all return `None`.
pub fn parse_branch_reply(reply: &str, branch_count: usize) -> Option<usize> {
    static LEADING_INT_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"^\s*(\d+)").unwrap());

    let digits = LEADING_INT_RE.captures(reply)?.get(1)?.as_str();
    let picked: usize = digits.parse().ok()?;
    if picked == 0 || picked > branch_count {
        return None;
    }
    Some(picked - 1)
}
