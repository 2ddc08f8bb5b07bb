use crate::directory::Roster;
use crate::Embedding;

/// Outcome of matching one probe embedding against the roster.
#[derive(Debug, Clone, PartialEq)]
pub enum Match {
    Known {
        id: i64,
        name: String,
        distance: f32,
    },
    Unknown,
}

impl Match {
    pub fn is_known(&self) -> bool {
        matches!(self, Match::Known { .. })
    }
}

/// Euclidean distance between two embeddings.
pub fn distance(a: &Embedding, b: &Embedding) -> f32 {
    a.vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Index and distance of the roster embedding nearest to the probe. The
/// first-occurring index wins ties, so identities enrolled earlier are
/// preferred on exact-distance draws.
pub fn nearest(roster: &Roster, probe: &Embedding) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, reference) in roster.embeddings().iter().enumerate() {
        let d = distance(reference, probe);
        match best {
            Some((_, best_d)) if best_d <= d => {}
            _ => best = Some((i, d)),
        }
    }
    best
}

/// Resolve a probe to an identity. A winning distance at exactly the
/// tolerance still counts as a match; strictly greater does not.
pub fn resolve(roster: &Roster, probe: &Embedding, tolerance: f32) -> Match {
    match nearest(roster, probe) {
        Some((index, d)) if d <= tolerance => {
            let (id, name) = roster.identity(index);
            Match::Known {
                id,
                name: name.to_string(),
                distance: d,
            }
        }
        _ => Match::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EMBEDDING_DIM;
    use ndarray::Array1;

    fn embedding(first: f32) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = first;
        Embedding {
            vector: Array1::from_vec(v),
        }
    }

    fn roster_of(rows: &[(i64, &str, f32)]) -> Roster {
        let mut roster = Roster::default();
        for &(id, name, first) in rows {
            roster.push(id, name.to_string(), embedding(first));
        }
        roster
    }

    #[test]
    fn empty_roster_is_always_unknown() {
        let roster = Roster::default();
        assert_eq!(resolve(&roster, &embedding(0.0), 0.5), Match::Unknown);
    }

    #[test]
    fn exact_match_wins_with_zero_distance() {
        let roster = roster_of(&[(1, "Alice", 0.3)]);
        match resolve(&roster, &embedding(0.3), 0.5) {
            Match::Known { id, name, distance } => {
                assert_eq!(id, 1);
                assert_eq!(name, "Alice");
                assert_eq!(distance, 0.0);
            }
            Match::Unknown => panic!("expected a match"),
        }
    }

    #[test]
    fn boundary_distance_matches_epsilon_beyond_does_not() {
        let roster = roster_of(&[(1, "Alice", 0.0)]);
        // Probe at distance exactly 0.5 along the first axis.
        assert!(resolve(&roster, &embedding(0.5), 0.5).is_known());
        assert_eq!(resolve(&roster, &embedding(0.5001), 0.5), Match::Unknown);
    }

    #[test]
    fn beyond_tolerance_is_unknown() {
        let roster = roster_of(&[(1, "Alice", 0.0), (2, "Bob", 10.0)]);
        assert_eq!(resolve(&roster, &embedding(5.0), 0.5), Match::Unknown);
    }

    #[test]
    fn first_occurring_minimum_wins_ties() {
        let roster = roster_of(&[(1, "Alice", 0.2), (2, "Bob", 0.2)]);
        match resolve(&roster, &embedding(0.2), 0.5) {
            Match::Known { id, .. } => assert_eq!(id, 1),
            Match::Unknown => panic!("expected a match"),
        }
    }

    #[test]
    fn extra_reference_photos_occupy_extra_rows() {
        // One identity enrolled twice; its second row is the nearest.
        let roster = roster_of(&[(1, "Alice", 0.9), (2, "Bob", 0.0), (1, "Alice", 0.4)]);
        match resolve(&roster, &embedding(0.41), 0.5) {
            Match::Known { id, distance, .. } => {
                assert_eq!(id, 1);
                assert!(distance < 0.02);
            }
            Match::Unknown => panic!("expected a match"),
        }
    }
}
