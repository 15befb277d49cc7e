//! Alias allocator (C11): the fixed candidate sequence agents are assigned
//! from when no alias is requested explicitly.
//!
//! Grounded on `alias_allocator.py` / `names.py`. Note: spec §8's testable
//! property states the candidate sequence is exhausted at 2626 entries
//! (26 classic names × 101 variants: the bare name plus `-01` through
//! `-100`); this implementation follows that explicit literal number rather
//! than the original source's `range(1, 100)` (which yields 2600), since the
//! spec text is not silent here — see DESIGN.md.

pub const CLASSIC_NAMES: [&str; 26] = [
    "alice", "bob", "charlie", "dave", "eve", "frank", "grace", "henry", "ivy", "jack", "kate",
    "leo", "mia", "noah", "olivia", "peter", "quinn", "rose", "sam", "tara", "uma", "victor",
    "wendy", "xavier", "yara", "zoe",
];

pub const RESERVED_ALIAS: &str = "me";

pub const MAX_CANDIDATES: usize = CLASSIC_NAMES.len() * 101;

#[derive(Debug, thiserror::Error)]
#[error("alias candidate sequence exhausted")]
pub struct AliasExhaustedError;

pub fn extract_name_prefix(alias: &str) -> String {
    let alias = alias.trim();
    if alias.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = alias.split('-').collect();
    if parts.len() >= 2 && !parts[1].is_empty() && parts[1].chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}", parts[0], parts[1]).to_lowercase()
    } else {
        parts[0].to_lowercase()
    }
}

/// Iterator over the full candidate sequence, in order: the 26 bare classic
/// names, then `{name}-01 .. {name}-100` with the numeric suffix as the outer
/// loop (alice-01, bob-01, ..., zoe-01, alice-02, ...).
pub fn candidate_name_prefixes() -> impl Iterator<Item = String> {
    CLASSIC_NAMES
        .iter()
        .map(|n| n.to_string())
        .chain((1..=100).flat_map(|num| {
            CLASSIC_NAMES
                .iter()
                .map(move |name| format!("{name}-{num:02}"))
        }))
}

pub fn used_name_prefixes<'a>(existing_aliases: impl IntoIterator<Item = &'a str>) -> std::collections::HashSet<String> {
    existing_aliases
        .into_iter()
        .map(extract_name_prefix)
        .filter(|p| !p.is_empty())
        .collect()
}

pub fn suggest_next_name_prefix<'a>(
    existing_aliases: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    let used = used_name_prefixes(existing_aliases);
    candidate_name_prefixes().find(|candidate| !used.contains(candidate))
}

pub fn is_reserved(alias: &str) -> bool {
    alias.eq_ignore_ascii_case(RESERVED_ALIAS)
}
