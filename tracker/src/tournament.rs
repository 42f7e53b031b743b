//! Single-elimination bracket scheduler.
//!
//! A lobby opens for a fixed join window; at expiry the joiners are
//! seeded into round one. Standard seeding sorts by rating descending
//! and pairs adjacent ranks. Clan-vs-clan seeding greedily matches
//! opponents from a different clan and subdivision, relaxing to any
//! different clan, then to anyone left. An odd field grants exactly one
//! bye per round.

use std::time::Instant;

/// Seeding input for one participant.
#[derive(Debug, Clone)]
pub struct Seed {
    pub clean_name: String,
    pub rating: f64,
    pub clan_tag: String,
    pub clan_group: String,
}

/// Result of one round's seeding: the pairings to fight plus at most
/// one participant advancing on a bye.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundPlan {
    pub pairings: Vec<(String, String)>,
    pub bye: Option<String>,
}

/// What [`Tournament::report_winner`] decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// Other pairings in this round are still unresolved.
    Pending,
    /// Round finished; re-seed these names as the next round.
    NextRound(Vec<String>),
    /// One entrant remained after the round: the tournament is over.
    Champion(String),
    /// The reported name was not in any pending pairing.
    NotPlaying,
}

#[derive(Default)]
pub struct Tournament {
    pub lobby_open: bool,
    pub lobby_deadline: Option<Instant>,
    pub lobby: Vec<String>,
    pub active: bool,
    pub clan_vs_clan: bool,
    pub win_limit: u32,
    pub round: u32,
    pending: Vec<(String, String)>,
    winners: Vec<String>,
}

impl Tournament {
    pub fn new() -> Tournament {
        Tournament::default()
    }

    pub fn idle(&self) -> bool {
        !self.lobby_open && !self.active
    }

    /// Resets the bracket and starts accepting joins until `deadline`.
    pub fn open(&mut self, clan_vs_clan: bool, win_limit: u32, deadline: Instant) {
        *self = Tournament {
            lobby_open: true,
            lobby_deadline: Some(deadline),
            clan_vs_clan,
            win_limit,
            ..Tournament::default()
        };
    }

    /// Adds one joiner; duplicates are rejected.
    pub fn join(&mut self, clean: &str) -> bool {
        if !self.lobby_open || self.lobby.iter().any(|n| n == clean) {
            return false;
        }
        self.lobby.push(clean.to_string());
        true
    }

    pub fn cancel(&mut self) {
        *self = Tournament::default();
    }

    /// Seeds the given field as the next round and records its plan.
    pub fn seed_round(&mut self, field: Vec<Seed>) -> RoundPlan {
        self.lobby_open = false;
        self.lobby_deadline = None;
        self.active = true;
        self.round += 1;
        self.winners.clear();

        let plan = if self.clan_vs_clan {
            pair_clan_vs_clan(field)
        } else {
            pair_by_rating(field)
        };

        self.pending = plan.pairings.clone();
        if let Some(bye) = &plan.bye {
            // A bye advances without fighting.
            self.winners.push(bye.clone());
        }
        plan
    }

    /// Records a match winner and advances the bracket when the round
    /// empties.
    pub fn report_winner(&mut self, clean: &str) -> Advance {
        let idx = match self
            .pending
            .iter()
            .position(|(a, b)| a == clean || b == clean)
        {
            Some(idx) => idx,
            None => return Advance::NotPlaying,
        };
        self.pending.remove(idx);
        self.winners.push(clean.to_string());

        if !self.pending.is_empty() {
            return Advance::Pending;
        }
        if self.winners.len() > 1 {
            return Advance::NextRound(self.winners.clone());
        }
        let champion = self.winners.remove(0);
        self.active = false;
        Advance::Champion(champion)
    }

    /// Whether a player is still fighting in the current round.
    pub fn is_paired(&self, clean: &str) -> bool {
        self.pending.iter().any(|(a, b)| a == clean || b == clean)
    }
}

/// Standard seeding: rating descending, adjacent ranks fight. The last
/// seed takes the bye on an odd field.
fn pair_by_rating(mut field: Vec<Seed>) -> RoundPlan {
    field.sort_by(|a, b| b.rating.total_cmp(&a.rating));
    let mut names: Vec<String> = field.into_iter().map(|s| s.clean_name).collect();

    let bye = (names.len() % 2 == 1).then(|| names.pop()).flatten();
    let pairings = names
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    RoundPlan { pairings, bye }
}

/// Clan-vs-clan seeding: for each remaining participant, prefer the
/// first opponent from a different clan and different subdivision, then
/// any different clan, then anyone left.
fn pair_clan_vs_clan(field: Vec<Seed>) -> RoundPlan {
    let mut remaining = field;
    let mut pairings = Vec::new();

    while remaining.len() > 1 {
        let first = remaining.remove(0);
        let opponent_idx = remaining
            .iter()
            .position(|s| s.clan_tag != first.clan_tag && s.clan_group != first.clan_group)
            .or_else(|| remaining.iter().position(|s| s.clan_tag != first.clan_tag))
            .unwrap_or(0);
        let opponent = remaining.remove(opponent_idx);
        pairings.push((first.clean_name, opponent.clean_name));
    }

    let bye = remaining.pop().map(|s| s.clean_name);
    RoundPlan { pairings, bye }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn seed(name: &str, rating: f64) -> Seed {
        Seed {
            clean_name: name.to_string(),
            rating,
            clan_tag: "NONE".to_string(),
            clan_group: "DEFAULT".to_string(),
        }
    }

    fn clan_seed(name: &str, tag: &str, group: &str) -> Seed {
        Seed {
            clean_name: name.to_string(),
            rating: 1500.0,
            clan_tag: tag.to_string(),
            clan_group: group.to_string(),
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_lobby_join_dedup() {
        let mut t = Tournament::new();
        t.open(false, 2, far_deadline());
        assert!(t.join("kyle"));
        assert!(!t.join("kyle"));
        assert!(t.join("jaden"));
        assert_eq!(t.lobby.len(), 2);
    }

    #[test]
    fn test_join_requires_open_lobby() {
        let mut t = Tournament::new();
        assert!(!t.join("kyle"));
    }

    #[test]
    fn test_standard_seeding_adjacent_ranks() {
        let mut t = Tournament::new();
        t.open(false, 2, far_deadline());
        let plan = t.seed_round(vec![
            seed("low", 1400.0),
            seed("top", 1900.0),
            seed("mid", 1600.0),
            seed("high", 1800.0),
        ]);
        assert_eq!(
            plan.pairings,
            vec![
                ("top".to_string(), "high".to_string()),
                ("mid".to_string(), "low".to_string()),
            ]
        );
        assert_eq!(plan.bye, None);
    }

    #[test]
    fn test_pairing_exhaustive_exclusive_single_bye() {
        for n in 2..=9usize {
            let field: Vec<Seed> = (0..n)
                .map(|i| seed(&format!("p{i}"), 1500.0 + i as f64))
                .collect();
            let mut t = Tournament::new();
            t.open(false, 2, far_deadline());
            let plan = t.seed_round(field);

            assert_eq!(plan.pairings.len(), n / 2, "n = {n}");
            assert_eq!(plan.bye.is_some(), n % 2 == 1, "n = {n}");

            let mut seen = Vec::new();
            for (a, b) in &plan.pairings {
                seen.push(a.clone());
                seen.push(b.clone());
            }
            if let Some(bye) = &plan.bye {
                seen.push(bye.clone());
            }
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), n, "every participant exactly once, n = {n}");
        }
    }

    #[test]
    fn test_odd_field_bye_goes_to_last_seed() {
        let mut t = Tournament::new();
        t.open(false, 2, far_deadline());
        let plan = t.seed_round(vec![
            seed("top", 1900.0),
            seed("mid", 1600.0),
            seed("low", 1300.0),
        ]);
        assert_eq!(plan.bye.as_deref(), Some("low"));
        assert_eq!(
            plan.pairings,
            vec![("top".to_string(), "mid".to_string())]
        );
    }

    #[test]
    fn test_clan_pairing_prefers_cross_clan_cross_group() {
        let mut t = Tournament::new();
        t.open(true, 2, far_deadline());
        let plan = t.seed_round(vec![
            clan_seed("a1", "ERA", "ALPHA"),
            clan_seed("a2", "ERA", "BRAVO"),
            clan_seed("b1", "VOID", "ALPHA"),
            clan_seed("b2", "VOID", "BRAVO"),
        ]);
        // a1 (ERA/ALPHA) must meet b2 (VOID/BRAVO), not b1 (same group).
        assert_eq!(plan.pairings[0], ("a1".to_string(), "b2".to_string()));
        assert_eq!(plan.pairings[1], ("a2".to_string(), "b1".to_string()));
    }

    #[test]
    fn test_clan_pairing_falls_back_within_clan() {
        let mut t = Tournament::new();
        t.open(true, 2, far_deadline());
        let plan = t.seed_round(vec![
            clan_seed("a1", "ERA", "ALPHA"),
            clan_seed("a2", "ERA", "ALPHA"),
        ]);
        assert_eq!(plan.pairings, vec![("a1".to_string(), "a2".to_string())]);
    }

    #[test]
    fn test_report_winner_advances_rounds_to_champion() {
        let mut t = Tournament::new();
        t.open(false, 2, far_deadline());
        t.seed_round(vec![
            seed("a", 1800.0),
            seed("b", 1700.0),
            seed("c", 1600.0),
            seed("d", 1500.0),
        ]);

        assert_eq!(t.report_winner("a"), Advance::Pending);
        let next = match t.report_winner("c") {
            Advance::NextRound(names) => names,
            other => panic!("expected next round, got {other:?}"),
        };
        assert_eq!(next, vec!["a".to_string(), "c".to_string()]);

        t.seed_round(vec![seed("a", 1800.0), seed("c", 1600.0)]);
        assert_eq!(
            t.report_winner("a"),
            Advance::Champion("a".to_string())
        );
        assert!(!t.active);
    }

    #[test]
    fn test_bye_joins_winner_pool() {
        let mut t = Tournament::new();
        t.open(false, 2, far_deadline());
        t.seed_round(vec![
            seed("a", 1800.0),
            seed("b", 1700.0),
            seed("c", 1600.0),
        ]);
        // c has the bye; a beats b and the round closes with two alive.
        let next = match t.report_winner("a") {
            Advance::NextRound(names) => names,
            other => panic!("expected next round, got {other:?}"),
        };
        assert!(next.contains(&"c".to_string()));
        assert!(next.contains(&"a".to_string()));
    }

    #[test]
    fn test_unknown_winner_is_noop() {
        let mut t = Tournament::new();
        t.open(false, 2, far_deadline());
        t.seed_round(vec![seed("a", 1800.0), seed("b", 1700.0)]);
        assert_eq!(t.report_winner("ghost"), Advance::NotPlaying);
        assert!(t.is_paired("a"));
    }
}
