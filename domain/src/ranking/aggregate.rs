//! Aggregate ordering of Stage-1 drafts from individual ranker ballots.

use serde::{Deserialize, Serialize};

/// Largest supported Stage-1 panel; labels run `A`..`H`.
pub const MAX_PARTICIPANTS: usize = 8;

/// Anonymous label for the Stage-1 participant at `index`.
pub fn label_for(index: usize) -> Option<char> {
    (index < MAX_PARTICIPANTS).then(|| (b'A' + index as u8) as char)
}

/// The label alphabet for a panel of `n` participants.
pub fn alphabet(n: usize) -> Vec<char> {
    (0..n.min(MAX_PARTICIPANTS))
        .map(|i| (b'A' + i as u8) as char)
        .collect()
}

/// One row of the aggregate ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// Anonymous label the rankers saw.
    pub label: char,
    /// The model behind the label. Only revealed after stage 2 has ended.
    pub model: String,
    /// Mean 1-based position across contributing ballots, with the
    /// missing-label penalty applied.
    pub average_rank: f64,
    /// Number of contributing ballots that actually ranked this label.
    pub rankings_count: usize,
}

/// Aggregate ballots into one ordered ranking.
///
/// `participants` pairs each Stage-1 label with its model id, in Stage-1
/// order. A ballot contributes only if it holds at least two labels that
/// belong to the panel. For each contributing ballot a label scores its
/// 1-based position, or `n + 1` when the ballot omits it (`n` being the
/// panel size). Entries are sorted by ascending average; ties keep Stage-1
/// order. An empty result means no ballot was usable.
pub fn aggregate(participants: &[(char, String)], ballots: &[Vec<char>]) -> Vec<RankedEntry> {
    if participants.is_empty() {
        return Vec::new();
    }

    let contributing: Vec<Vec<char>> = ballots
        .iter()
        .map(|ballot| sanitize(ballot, participants))
        .filter(|ballot| ballot.len() >= 2)
        .collect();
    if contributing.is_empty() {
        return Vec::new();
    }

    let penalty = (participants.len() + 1) as f64;
    let mut entries: Vec<RankedEntry> = participants
        .iter()
        .map(|(label, model)| {
            let mut sum = 0.0;
            let mut count = 0usize;
            for ballot in &contributing {
                match ballot.iter().position(|l| l == label) {
                    Some(pos) => {
                        sum += (pos + 1) as f64;
                        count += 1;
                    }
                    None => sum += penalty,
                }
            }
            RankedEntry {
                label: *label,
                model: model.clone(),
                average_rank: sum / contributing.len() as f64,
                rankings_count: count,
            }
        })
        .collect();

    // Stable sort: ties keep the Stage-1 appearance order built above.
    entries.sort_by(|a, b| a.average_rank.total_cmp(&b.average_rank));
    entries
}

/// Keep only labels belonging to the panel, first occurrence wins.
fn sanitize(ballot: &[char], participants: &[(char, String)]) -> Vec<char> {
    let mut seen = Vec::new();
    for label in ballot {
        if participants.iter().any(|(l, _)| l == label) && !seen.contains(label) {
            seen.push(*label);
        }
    }
    seen
}
