//! Explicit mode-count selection.
//!
//! A [`ModeSelection`] is resolved once per run into one count per segment,
//! each clamped to that segment's rank. Malformed selections are recovered
//! from with a warning instead of failing the run.

use serde::{Deserialize, Serialize};

/// How many eigenmodes to keep, given explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModeSelection {
    /// Same count for every segment.
    Count(usize),
    /// Same percentage of each segment's rank.
    Percentage(f64),
    /// One count per segment.
    PerSegment(Vec<usize>),
    /// One percentage per segment.
    PerSegmentPercentage(Vec<f64>),
}

/// Explicit counts or the automatic optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModePolicy {
    Explicit(ModeSelection),
    Optimize,
}

impl Default for ModePolicy {
    fn default() -> Self {
        ModePolicy::Explicit(ModeSelection::Count(1))
    }
}

impl From<ModeSelection> for ModePolicy {
    fn from(selection: ModeSelection) -> Self {
        ModePolicy::Explicit(selection)
    }
}

impl ModeSelection {
    /// Resolve into one count per segment.
    ///
    /// * A per-segment list whose length differs from `ranks` falls back to
    ///   its first value for every segment.
    /// * An empty per-segment list falls back to one mode everywhere.
    /// * Counts above a segment's rank are clamped to the rank.
    pub fn resolve(&self, ranks: &[usize]) -> Vec<usize> {
        let n = ranks.len();
        let requested: Vec<usize> = match self {
            ModeSelection::Count(count) => vec![*count; n],
            ModeSelection::Percentage(pct) => {
                ranks.iter().map(|&r| percentage_of(*pct, r)).collect()
            }
            ModeSelection::PerSegment(counts) if counts.is_empty() => no_selection(n),
            ModeSelection::PerSegment(counts) if counts.len() != n => {
                warn_mismatch(counts.len(), n);
                vec![counts[0]; n]
            }
            ModeSelection::PerSegment(counts) => counts.clone(),
            ModeSelection::PerSegmentPercentage(pcts) if pcts.is_empty() => no_selection(n),
            ModeSelection::PerSegmentPercentage(pcts) if pcts.len() != n => {
                warn_mismatch(pcts.len(), n);
                ranks.iter().map(|&r| percentage_of(pcts[0], r)).collect()
            }
            ModeSelection::PerSegmentPercentage(pcts) => pcts
                .iter()
                .zip(ranks.iter())
                .map(|(&p, &r)| percentage_of(p, r))
                .collect(),
        };

        requested
            .into_iter()
            .zip(ranks.iter())
            .enumerate()
            .map(|(segment, (count, &rank))| {
                if count > rank {
                    log::warn!(
                        "Segment {}: {} modes requested but rank is {}, using {}",
                        segment,
                        count,
                        rank,
                        rank
                    );
                    rank
                } else {
                    count
                }
            })
            .collect()
    }
}

/// `round(pct * rank / 100)` with halves going to the even count, never negative.
fn percentage_of(pct: f64, rank: usize) -> usize {
    let count = (pct * rank as f64 / 100.0).round_ties_even();
    if count.is_finite() && count > 0.0 {
        count as usize
    } else {
        0
    }
}

fn no_selection(n_segments: usize) -> Vec<usize> {
    log::warn!("No number of modes selected, using 1 mode for every segment");
    vec![1; n_segments]
}

fn warn_mismatch(given: usize, n_segments: usize) {
    log::warn!(
        "Mode list has {} entries for {} segments, using the first for all",
        given,
        n_segments
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const NINE_RANKS: [usize; 9] = [16; 9];

    #[test]
    fn test_single_value_list_expands_to_all_segments() {
        let counts = ModeSelection::PerSegment(vec![2]).resolve(&NINE_RANKS);
        assert_eq!(counts, vec![2; 9]);
    }

    #[test]
    fn test_count_applies_everywhere() {
        let counts = ModeSelection::Count(3).resolve(&[10, 20, 5]);
        assert_eq!(counts, vec![3, 3, 3]);
    }

    #[test]
    fn test_count_clamped_to_rank() {
        let counts = ModeSelection::Count(50).resolve(&[16, 8]);
        assert_eq!(counts, vec![16, 8]);
    }

    #[test]
    fn test_percentage_rounds_against_rank() {
        // 10 % of 16 = 1.6 -> 2, of 4 = 0.4 -> 0, of 25 = 2.5 -> 2
        let counts = ModeSelection::Percentage(10.0).resolve(&[16, 4, 25]);
        assert_eq!(counts, vec![2, 0, 2]);
    }

    #[test]
    fn test_percentage_halves_round_to_even() {
        // 2.5 -> 2, 3.5 -> 4
        let counts = ModeSelection::Percentage(50.0).resolve(&[5, 7]);
        assert_eq!(counts, vec![2, 4]);
    }

    #[test]
    fn test_full_percentage_is_rank() {
        let counts = ModeSelection::Percentage(100.0).resolve(&[7, 12]);
        assert_eq!(counts, vec![7, 12]);
    }

    #[test]
    fn test_per_segment_counts() {
        let counts = ModeSelection::PerSegment(vec![1, 0, 9]).resolve(&[4, 4, 4]);
        assert_eq!(counts, vec![1, 0, 4]);
    }

    #[test]
    fn test_length_mismatch_uses_first_value() {
        let counts = ModeSelection::PerSegment(vec![3, 1]).resolve(&[10, 10, 10]);
        assert_eq!(counts, vec![3, 3, 3]);

        let counts = ModeSelection::PerSegmentPercentage(vec![50.0, 0.0, 0.0]).resolve(&[10, 4]);
        assert_eq!(counts, vec![5, 2]);
    }

    #[test]
    fn test_empty_selection_uses_one_mode() {
        assert_eq!(ModeSelection::PerSegment(vec![]).resolve(&[5, 5]), vec![1, 1]);
        assert_eq!(
            ModeSelection::PerSegmentPercentage(vec![]).resolve(&[5, 5]),
            vec![1, 1]
        );
    }

    #[test]
    fn test_per_segment_percentages() {
        let counts = ModeSelection::PerSegmentPercentage(vec![25.0, 50.0]).resolve(&[8, 8]);
        assert_eq!(counts, vec![2, 4]);
    }
}
