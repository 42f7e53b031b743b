//! The process-wide aggregate: registry, duel board, tournament, clan
//! locks and pending windows, all mutated through one owner so the
//! duel-gate invariant is enforced in a single place.
//!
//! Both the log-line path and the timer path lock the same `World`;
//! outbound notices are queued in an outbox and delivered by the caller
//! after the lock is released, so network I/O never runs under it.

use crate::duels::{DuelBoard, DuelKey};
use crate::registry::Registry;
use crate::store::{is_trusted_id, ok_or_log, Checkpoint, Store};
use crate::tournament::{Advance, Seed, Tournament};
use log::{debug, info, warn};
use shared::rating::rate_duel;
use shared::{normalize, Event, SPECTATOR_TEAM};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// How long a duel challenge waits for `!dyes`.
pub const CHALLENGE_WINDOW: Duration = Duration::from_secs(60);
/// How long a tournament lobby accepts `!tyes`.
pub const LOBBY_WINDOW: Duration = Duration::from_secs(60);
/// How long a clan disband waits for its confirming repeat.
pub const DISBAND_WINDOW: Duration = Duration::from_secs(10);
/// How long a locked-subdivision join request waits for an officer.
pub const GROUP_REQUEST_WINDOW: Duration = Duration::from_secs(60);

const TAG: &str = "^5[Duel]^7";

/// One queued outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Broadcast(String),
    Direct(u32, String),
}

/// Side effects the caller must apply outside the lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Directive {
    /// Server restarted: skip the stale log backlog and resync the
    /// roster.
    Resync,
}

/// How a formal match ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchEnd {
    RoundLimit,
    Forfeit,
    Disconnect,
}

#[derive(Default)]
pub struct World {
    pub registry: Registry,
    pub duels: DuelBoard,
    pub tournament: Tournament,
    /// clan tag -> locked subdivision names.
    pub locked_groups: HashMap<String, HashSet<String>>,
    /// owner clean name -> (clan tag, confirmation deadline).
    pub pending_disbands: HashMap<String, (String, Instant)>,
    /// Checkpoints waiting for both players to come back online.
    pub pending_restores: Vec<Checkpoint>,
    outbox: Vec<Notice>,
}

impl World {
    pub fn new() -> World {
        World::default()
    }

    /// Loads durable state that outlives the process: subdivision locks
    /// and unfinished-match checkpoints.
    pub async fn load(&mut self, store: &Store) -> Result<(), sqlx::Error> {
        for (tag, group) in store.load_locks().await? {
            self.locked_groups.entry(tag).or_default().insert(group);
        }
        self.pending_restores = store.load_checkpoints().await?;
        if !self.pending_restores.is_empty() {
            info!(
                "{} unfinished match(es) awaiting restore",
                self.pending_restores.len()
            );
        }
        Ok(())
    }

    // ---- outbox ----

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn broadcast(&mut self, text: String) {
        self.outbox.push(Notice::Broadcast(format!("{TAG} {text}")));
    }

    /// Private notice when the slot is known, public otherwise.
    pub(crate) fn notify(&mut self, slot: Option<u32>, text: String) {
        match slot {
            Some(slot) => self
                .outbox
                .push(Notice::Direct(slot, format!("{TAG} {text}"))),
            None => self.broadcast(text),
        }
    }

    // ---- event entry point ----

    /// Applies one classified log event. Never fails: persistence
    /// problems are logged and the in-memory state stays authoritative.
    pub async fn apply_event(&mut self, event: Event, store: &Store) -> Option<Directive> {
        match event {
            Event::GameReset => {
                info!("server reset: clearing sessions, duels and bracket");
                self.registry.clear();
                self.duels.clear();
                self.tournament.cancel();
                Some(Directive::Resync)
            }
            Event::IdentityChanged {
                slot,
                raw_name,
                team,
            } => {
                if let Some(clean) = self.registry.resolve(Some(slot), &raw_name, "0", store).await
                {
                    if let Some(session) = self.registry.get_mut(&clean) {
                        session.team = team;
                    }
                    self.try_restore(&clean);
                }
                None
            }
            Event::GuidObserved { slot, id } => {
                self.adopt_id(slot, &id, store).await;
                None
            }
            Event::DuelStarted { raw_a, raw_b } => {
                self.handle_duel_started(&raw_a, &raw_b, store).await;
                None
            }
            Event::DuelEnded {
                raw_winner,
                raw_loser,
            } => {
                self.handle_duel_ended(&raw_winner, &raw_loser, store).await;
                None
            }
            Event::ClientDisconnected { slot } => {
                self.handle_disconnect(slot, store).await;
                None
            }
            Event::AdminCommand {
                raw_admin,
                admin_id,
                raw_message,
            } => {
                self.handle_admin_line(&raw_admin, admin_id, &raw_message, store)
                    .await;
                None
            }
            Event::ChatMessage {
                slot,
                raw_speaker,
                raw_message,
            } => {
                self.handle_chat_line(slot, &raw_speaker, &raw_message, store)
                    .await;
                None
            }
        }
    }

    /// Handles an observed persistent id: a session already keyed by it
    /// moves onto the reported slot; otherwise the slot's id-less
    /// session adopts the id and its durable state follows that key.
    async fn adopt_id(&mut self, slot: u32, id: &str, store: &Store) {
        if !is_trusted_id(id) {
            return;
        }
        if let Some(clean) = self.registry.by_id(id).map(|s| s.clean_name.clone()) {
            self.registry.claim_slot(slot, &clean);
            self.try_restore(&clean);
            return;
        }
        let Some(clean) = self.registry.clean_by_slot(slot) else {
            return;
        };
        let already_keyed = self
            .registry
            .get(&clean)
            .map(|s| s.id.is_some())
            .unwrap_or(true);
        if already_keyed {
            self.try_restore(&clean);
            return;
        }

        let record = ok_or_log("player lookup", store.find_by_key(id).await).flatten();
        if let Some(session) = self.registry.get_mut(&clean) {
            session.id = Some(id.to_string());
            match record {
                Some(record) => {
                    session.rating = record.rating;
                    session.rd = record.rd;
                    session.clan_tag = record.clan_tag;
                    session.role = record.role;
                    session.clan_group = record.clan_group;
                }
                None => {
                    let name = session.name.clone();
                    ok_or_log(
                        "player insert",
                        store.insert_player(id, &name, &clean).await,
                    );
                }
            }
            debug!("session {clean} now keyed by persistent id");
        }
        self.try_restore(&clean);
    }

    // ---- duel lifecycle ----

    async fn handle_duel_started(&mut self, raw_a: &str, raw_b: &str, store: &Store) {
        let Some(a) = self.registry.resolve(None, raw_a, "0", store).await else {
            return;
        };
        let Some(b) = self.registry.resolve(None, raw_b, "0", store).await else {
            return;
        };
        if a == b {
            return;
        }

        let (Some(sa), Some(sb)) = (self.registry.get(&a), self.registry.get(&b)) else {
            return;
        };
        if sa.team == SPECTATOR_TEAM || sb.team == SPECTATOR_TEAM {
            return;
        }

        if !self.duels.try_activate(DuelKey::new(&a, &b)) {
            debug!("duplicate duel start for {a}/{b} ignored");
            return;
        }

        // Formal status comes from a prior accepted challenge, never
        // from the log line itself.
        let (Some(sa), Some(sb)) = (self.registry.get(&a), self.registry.get(&b)) else {
            return;
        };
        let formal = sa.formal
            && sb.formal
            && sa.opponent.as_deref() == Some(b.as_str())
            && sb.opponent.as_deref() == Some(a.as_str());
        let (a_name, a_rating, a_score) = (sa.name.clone(), sa.rating, sa.match_score);
        let (b_name, b_rating, b_score) = (sb.name.clone(), sb.rating, sb.match_score);
        let limit = sa.match_limit;

        if formal {
            self.broadcast(format!(
                "Match round: {a_name} ^7{a_score} - {b_score}^7 {b_name} (first to {limit})"
            ));
        } else {
            if let Some(sa) = self.registry.get_mut(&a) {
                sa.opponent = Some(b.clone());
            }
            if let Some(sb) = self.registry.get_mut(&b) {
                sb.opponent = Some(a.clone());
            }
            self.broadcast(format!(
                "Duel: {a_name} ^7({a_rating:.0})^7 vs {b_name} ^7({b_rating:.0})"
            ));
        }
    }

    async fn handle_duel_ended(&mut self, raw_winner: &str, raw_loser: &str, store: &Store) {
        let w_clean = normalize(raw_winner);
        let l_clean = normalize(raw_loser);
        if w_clean.is_empty() || l_clean.is_empty() || w_clean == l_clean {
            return;
        }
        // A name with no session means the line is stale; no-op.
        let (Some(w), Some(l)) = (self.registry.get(&w_clean), self.registry.get(&l_clean))
        else {
            return;
        };

        let w_key = w.store_key();
        let l_key = l.store_key();
        let w_name = w.name.clone();
        let l_name = l.name.clone();
        let old_w = w.glicko();
        let old_l = l.glicko();
        let mutual = w.opponent.as_deref() == Some(l_clean.as_str())
            && l.opponent.as_deref() == Some(w_clean.as_str());
        let formal = mutual && (w.formal || l.formal);
        let limit = w.match_limit;
        let l_score = l.match_score;

        // Every visible effect below is gated by this one transition.
        if !self.duels.try_release(&DuelKey::new(&w_clean, &l_clean)) {
            debug!("duel end for {w_clean}/{l_clean} with no active key, ignored");
            return;
        }

        let (new_w, new_l) = rate_duel(old_w, old_l);
        if let Some(w) = self.registry.get_mut(&w_clean) {
            w.rating = new_w.rating;
            w.rd = new_w.rd;
        }
        if let Some(l) = self.registry.get_mut(&l_clean) {
            l.rating = new_l.rating;
            l.rd = new_l.rd;
        }
        ok_or_log(
            "rating save",
            store.save_rating(&w_key, new_w.rating, new_w.rd).await,
        );
        ok_or_log(
            "rating save",
            store.save_rating(&l_key, new_l.rating, new_l.rd).await,
        );

        if !formal {
            if let Some(w) = self.registry.get_mut(&w_clean) {
                w.opponent = None;
            }
            if let Some(l) = self.registry.get_mut(&l_clean) {
                l.opponent = None;
            }
            self.broadcast(format!(
                "{w_name} ^7defeats {l_name}^7. Ratings: {:.0} ({:+.0}) / {:.0} ({:+.0})",
                new_w.rating,
                new_w.rating - old_w.rating,
                new_l.rating,
                new_l.rating - old_l.rating,
            ));
            return;
        }

        let w_score = match self.registry.get_mut(&w_clean) {
            Some(w) => {
                w.match_score += 1;
                w.match_score
            }
            None => return,
        };
        ok_or_log("round counters", store.bump_round(&w_key, &l_key).await);
        ok_or_log(
            "checkpoint save",
            store
                .save_checkpoint(&Checkpoint {
                    p1_key: w_key,
                    p2_key: l_key,
                    p1_score: w_score,
                    p2_score: l_score,
                    win_limit: limit,
                    clan_vs_clan: self.tournament.active && self.tournament.clan_vs_clan,
                })
                .await,
        );

        if w_score >= limit {
            self.finalize_match(&w_clean, &l_clean, MatchEnd::RoundLimit, store)
                .await;
        } else {
            self.broadcast(format!(
                "{w_name} ^7takes the round against {l_name}^7 ({w_score}-{l_score}, first to {limit})"
            ));
        }
    }

    async fn handle_disconnect(&mut self, slot: u32, store: &Store) {
        let Some(clean) = self.registry.clean_by_slot(slot) else {
            return;
        };
        let opponent = self.registry.get(&clean).and_then(|s| s.opponent.clone());
        if let Some(opponent) = opponent {
            self.finalize_match(&opponent, &clean, MatchEnd::Disconnect, store)
                .await;
        }
        self.duels.release_all_for(&clean);
        self.registry.remove(&clean);
        debug!("session {clean} removed (slot {slot} disconnected)");
    }

    /// The single completion path for a formal match: round-limit win,
    /// forfeit and disconnect all land here, frozen at the current
    /// score.
    pub(crate) async fn finalize_match(
        &mut self,
        winner_clean: &str,
        loser_clean: &str,
        end: MatchEnd,
        store: &Store,
    ) {
        let (Some(w), Some(l)) = (
            self.registry.get(winner_clean),
            self.registry.get(loser_clean),
        ) else {
            return;
        };
        let w_key = w.store_key();
        let l_key = l.store_key();
        let w_name = w.name.clone();
        let l_name = l.name.clone();
        let formal = w.formal || l.formal;
        let (w_score, l_score) = (w.match_score, l.match_score);

        ok_or_log(
            "checkpoint delete",
            store.delete_checkpoint(&w_key, &l_key).await,
        );
        self.duels
            .try_release(&DuelKey::new(winner_clean, loser_clean));

        if formal {
            ok_or_log("match counter", store.bump_matches_won(&w_key).await);
            match end {
                MatchEnd::RoundLimit => self.broadcast(format!(
                    "{w_name} ^7wins the match against {l_name}^7 ({w_score}-{l_score})!"
                )),
                MatchEnd::Forfeit => self.broadcast(format!(
                    "{w_name} ^7wins by forfeit against {l_name}^7 ({w_score}-{l_score})"
                )),
                MatchEnd::Disconnect => self.broadcast(format!(
                    "{w_name} ^7wins the match, {l_name}^7 left the server ({w_score}-{l_score})"
                )),
            }
        }

        if let Some(w) = self.registry.get_mut(winner_clean) {
            w.reset_match_state();
        }
        if let Some(l) = self.registry.get_mut(loser_clean) {
            l.reset_match_state();
        }

        if formal && self.tournament.active {
            self.advance_bracket(winner_clean, store).await;
        }
    }

    // ---- tournament plumbing ----

    pub(crate) fn open_lobby(&mut self, clan_vs_clan: bool, win_limit: u32, now: Instant) {
        self.tournament
            .open(clan_vs_clan, win_limit, now + LOBBY_WINDOW);
        let kind = if clan_vs_clan {
            "clan-vs-clan tournament"
        } else {
            "tournament"
        };
        let window = LOBBY_WINDOW.as_secs();
        self.broadcast(format!(
            "A {kind} is forming! Type ^2!tyes^7 within {window} seconds to join (first to {win_limit})"
        ));
    }

    pub(crate) fn start_tournament(&mut self) {
        let field = self.tournament.lobby.clone();
        if self.seeds_for(&field).len() < 2 {
            self.tournament.cancel();
            self.broadcast("Tournament cancelled: not enough players joined".to_string());
            return;
        }
        self.broadcast(format!(
            "Tournament begins with {} players!",
            self.seeds_for(&field).len()
        ));
        self.seed_and_launch(field);
    }

    async fn advance_bracket(&mut self, winner_clean: &str, store: &Store) {
        match self.tournament.report_winner(winner_clean) {
            Advance::NotPlaying => {}
            Advance::Pending => {
                if let Some(name) = self.registry.get(winner_clean).map(|s| s.name.clone()) {
                    self.broadcast(format!(
                        "{name} ^7advances, awaiting the remaining matches"
                    ));
                }
            }
            Advance::NextRound(pool) => {
                let round = self.tournament.round + 1;
                self.broadcast(format!("Round {round} begins!"));
                self.seed_and_launch(pool);
            }
            Advance::Champion(champion) => {
                let (name, key) = match self.registry.get(&champion) {
                    Some(s) => (s.name.clone(), s.store_key()),
                    None => (champion.clone(), crate::store::store_key(None, &champion)),
                };
                ok_or_log(
                    "tournament counter",
                    store.bump_tournament_wins(&key).await,
                );
                self.broadcast(format!("{name} ^7is the tournament champion!"));
            }
        }
    }

    fn seeds_for(&self, names: &[String]) -> Vec<Seed> {
        names
            .iter()
            .filter_map(|n| self.registry.get(n))
            .map(|s| Seed {
                clean_name: s.clean_name.clone(),
                rating: s.rating,
                clan_tag: s.clan_tag.clone(),
                clan_group: s.clan_group.clone(),
            })
            .collect()
    }

    fn seed_and_launch(&mut self, names: Vec<String>) {
        let seeds = self.seeds_for(&names);
        if seeds.len() < 2 {
            // Everyone but (at most) one left the server mid-bracket.
            self.tournament.cancel();
            self.broadcast("Tournament cancelled: too few players remain".to_string());
            return;
        }
        let plan = self.tournament.seed_round(seeds);
        let limit = self.tournament.win_limit;

        for (a, b) in &plan.pairings {
            let names = match (self.registry.get(a), self.registry.get(b)) {
                (Some(sa), Some(sb)) => Some((sa.name.clone(), sb.name.clone())),
                _ => None,
            };
            if let Some(sa) = self.registry.get_mut(a) {
                sa.reset_match_state();
                sa.opponent = Some(b.clone());
                sa.formal = true;
                sa.match_limit = limit;
            }
            if let Some(sb) = self.registry.get_mut(b) {
                sb.reset_match_state();
                sb.opponent = Some(a.clone());
                sb.formal = true;
                sb.match_limit = limit;
            }
            if let Some((a_name, b_name)) = names {
                self.broadcast(format!(
                    "Bracket: {a_name} ^7vs {b_name}^7 (first to {limit})"
                ));
            }
        }
        if let Some(bye) = &plan.bye {
            if let Some(name) = self.registry.get(bye).map(|s| s.name.clone()) {
                self.broadcast(format!("{name} ^7advances on a bye"));
            }
        }
    }

    // ---- recovery ----

    /// Re-links an unfinished match once both of its players are back
    /// online, restoring scores from the checkpoint.
    pub fn try_restore(&mut self, clean: &str) {
        let Some(key) = self.registry.get(clean).map(|s| s.store_key()) else {
            return;
        };
        let Some(idx) = self
            .pending_restores
            .iter()
            .position(|cp| cp.p1_key == key || cp.p2_key == key)
        else {
            return;
        };
        let cp = self.pending_restores[idx].clone();
        let (my_score, other_key, other_score) = if cp.p1_key == key {
            (cp.p1_score, cp.p2_key.clone(), cp.p2_score)
        } else {
            (cp.p2_score, cp.p1_key.clone(), cp.p1_score)
        };

        let Some(other_clean) = self
            .registry
            .sessions()
            .find(|s| s.store_key() == other_key)
            .map(|s| s.clean_name.clone())
        else {
            return;
        };
        self.pending_restores.remove(idx);

        let mut names = (String::new(), String::new());
        if let Some(me) = self.registry.get_mut(clean) {
            me.reset_match_state();
            me.opponent = Some(other_clean.clone());
            me.formal = true;
            me.match_score = my_score;
            me.match_limit = cp.win_limit;
            names.0 = me.name.clone();
        }
        if let Some(other) = self.registry.get_mut(&other_clean) {
            other.reset_match_state();
            other.opponent = Some(clean.to_string());
            other.formal = true;
            other.match_score = other_score;
            other.match_limit = cp.win_limit;
            names.1 = other.name.clone();
        }
        info!("restored match {clean} vs {other_clean} at {my_score}-{other_score}");
        self.broadcast(format!(
            "Match resumed: {} ^7{my_score} - {other_score}^7 {} (first to {})",
            names.0, names.1, cp.win_limit
        ));
    }

    // ---- periodic paths ----

    /// Expires every deadline-carrying window. Driven by a one-second
    /// timer; shares the lock with the line path.
    pub fn tick(&mut self, now: Instant) {
        if self.tournament.lobby_open
            && self.tournament.lobby_deadline.is_some_and(|d| d <= now)
        {
            self.start_tournament();
        }

        for session in self.registry.sessions_mut() {
            if session.challenge.as_ref().is_some_and(|c| c.deadline <= now) {
                session.challenge = None;
            }
            if session
                .group_request
                .as_ref()
                .is_some_and(|r| r.deadline <= now)
            {
                session.group_request = None;
            }
        }

        self.pending_disbands
            .retain(|_, (_, deadline)| *deadline > now);
    }

    /// Reconciles sessions against an authoritative roster snapshot.
    pub async fn sync_roster(&mut self, roster: &[(u32, String)], store: &Store) {
        let mut seen = Vec::with_capacity(roster.len());
        for (slot, raw_name) in roster {
            if let Some(clean) = self.registry.resolve(Some(*slot), raw_name, "0", store).await
            {
                seen.push(*slot);
                self.try_restore(&clean);
            }
        }
        self.registry.retain_slots(&seen);
    }

    /// Writes every live rating back. Run on shutdown and after a
    /// line-loop crash so nothing is lost even if individual saves
    /// failed earlier.
    pub async fn flush_ratings(&self, store: &Store) {
        for session in self.registry.sessions() {
            if let Err(e) = store
                .save_rating(&session.store_key(), session.rating, session.rd)
                .await
            {
                warn!("flush for {} failed: {e}", session.clean_name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{DEFAULT_RATING, DEFAULT_WIN_LIMIT};

    async fn store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.init().await.unwrap();
        store
    }

    async fn world_with(store: &Store, names: &[(u32, &str)]) -> World {
        let mut world = World::new();
        for (slot, name) in names {
            world
                .apply_event(
                    Event::IdentityChanged {
                        slot: *slot,
                        raw_name: name.to_string(),
                        team: "1".to_string(),
                    },
                    store,
                )
                .await;
        }
        world.drain_notices();
        world
    }

    fn duel_start(a: &str, b: &str) -> Event {
        Event::DuelStarted {
            raw_a: a.to_string(),
            raw_b: b.to_string(),
        }
    }

    fn duel_end(w: &str, l: &str) -> Event {
        Event::DuelEnded {
            raw_winner: w.to_string(),
            raw_loser: l.to_string(),
        }
    }

    #[tokio::test]
    async fn test_informal_duel_moves_ratings_only() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1"), (1, "P2")]).await;

        world.apply_event(duel_start("P1", "P2"), &store).await;
        world.apply_event(duel_end("P1", "P2"), &store).await;

        let p1 = world.registry.get("p1").unwrap();
        let p2 = world.registry.get("p2").unwrap();
        assert!(p1.rating > DEFAULT_RATING);
        assert!(p2.rating < DEFAULT_RATING);
        assert_eq!(p1.match_score, 0);
        assert_eq!(p2.match_score, 0);
        assert_eq!(p1.opponent, None);
        assert!(store.load_checkpoints().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_duel_end_is_noop() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1"), (1, "P2")]).await;

        world.apply_event(duel_start("P1", "P2"), &store).await;
        world.apply_event(duel_end("P1", "P2"), &store).await;
        let rating_after_first = world.registry.get("p1").unwrap().rating;
        world.drain_notices();

        world.apply_event(duel_end("P1", "P2"), &store).await;

        assert_eq!(world.registry.get("p1").unwrap().rating, rating_after_first);
        assert!(world.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn test_duel_end_without_sessions_is_noop() {
        let store = store().await;
        let mut world = World::new();
        world.apply_event(duel_end("Ghost", "Phantom"), &store).await;
        assert!(world.registry.is_empty());
        assert!(world.drain_notices().is_empty());
    }

    async fn link_formal(world: &mut World, a: &str, b: &str, limit: u32) {
        {
            let s = world.registry.get_mut(a).unwrap();
            s.opponent = Some(b.to_string());
            s.formal = true;
            s.match_limit = limit;
        }
        {
            let s = world.registry.get_mut(b).unwrap();
            s.opponent = Some(a.to_string());
            s.formal = true;
            s.match_limit = limit;
        }
    }

    #[tokio::test]
    async fn test_formal_match_completes_at_limit() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1"), (1, "P2")]).await;
        link_formal(&mut world, "p1", "p2", 2).await;
        let key = world.registry.get("p1").unwrap().store_key();

        world.apply_event(duel_start("P1", "P2"), &store).await;
        world.apply_event(duel_end("P1", "P2"), &store).await;
        assert_eq!(world.registry.get("p1").unwrap().match_score, 1);
        assert_eq!(store.load_checkpoints().await.unwrap().len(), 1);

        world.apply_event(duel_start("P1", "P2"), &store).await;
        world.apply_event(duel_end("P1", "P2"), &store).await;

        let p1 = world.registry.get("p1").unwrap();
        let p2 = world.registry.get("p2").unwrap();
        assert_eq!(p1.match_score, 0);
        assert_eq!(p2.match_score, 0);
        assert!(!p1.formal);
        assert_eq!(p1.opponent, None);
        assert_eq!(store.matches_won(&key).await.unwrap(), 1);
        assert!(store.load_checkpoints().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_awards_forfeit_once() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1"), (1, "P2")]).await;
        link_formal(&mut world, "p1", "p2", 5).await;
        let key = world.registry.get("p1").unwrap().store_key();

        world
            .apply_event(Event::ClientDisconnected { slot: 1 }, &store)
            .await;

        assert!(world.registry.get("p2").is_none());
        assert_eq!(store.matches_won(&key).await.unwrap(), 1);
        assert!(store.load_checkpoints().await.unwrap().is_empty());
        let p1 = world.registry.get("p1").unwrap();
        assert_eq!(p1.opponent, None);
        assert_eq!(p1.match_score, 0);
    }

    #[tokio::test]
    async fn test_spectator_cannot_duel() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1")]).await;
        world
            .apply_event(
                Event::IdentityChanged {
                    slot: 1,
                    raw_name: "Spec".to_string(),
                    team: SPECTATOR_TEAM.to_string(),
                },
                &store,
            )
            .await;
        world.drain_notices();

        world.apply_event(duel_start("P1", "Spec"), &store).await;
        world.apply_event(duel_end("P1", "Spec"), &store).await;

        assert_eq!(world.registry.get("p1").unwrap().rating, DEFAULT_RATING);
        assert!(world.drain_notices().is_empty());
    }

    const GUID: &str = "ABCDEF0123456789ABCDEF0123456789";

    #[tokio::test]
    async fn test_guid_adopts_onto_idless_session() {
        let store = store().await;
        store.insert_player(GUID, "Kyle", "kyle").await.unwrap();
        store.save_rating(GUID, 1680.0, 120.0).await.unwrap();
        let mut world = world_with(&store, &[(2, "Kyle")]).await;

        world
            .apply_event(
                Event::GuidObserved {
                    slot: 2,
                    id: GUID.to_string(),
                },
                &store,
            )
            .await;

        let kyle = world.registry.get("kyle").unwrap();
        assert_eq!(kyle.id.as_deref(), Some(GUID));
        assert_eq!(kyle.rating, 1680.0);
        assert_eq!(kyle.store_key(), GUID);
    }

    #[tokio::test]
    async fn test_guid_rehomes_existing_session_to_new_slot() {
        let store = store().await;
        let mut world = world_with(&store, &[(2, "Kyle")]).await;
        world.registry.get_mut("kyle").unwrap().id = Some(GUID.to_string());

        world
            .apply_event(
                Event::GuidObserved {
                    slot: 7,
                    id: GUID.to_string(),
                },
                &store,
            )
            .await;

        assert_eq!(world.registry.by_slot(7).unwrap().clean_name, "kyle");
        assert!(world.registry.by_slot(2).is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_sessions_and_requests_resync() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1"), (1, "P2")]).await;
        world.apply_event(duel_start("P1", "P2"), &store).await;

        let directive = world.apply_event(Event::GameReset, &store).await;

        assert_eq!(directive, Some(Directive::Resync));
        assert!(world.registry.is_empty());
        assert!(!world.duels.is_active(&DuelKey::new("p1", "p2")));
    }

    #[tokio::test]
    async fn test_checkpoint_restore_relinks_at_score() {
        let store = store().await;
        store
            .save_checkpoint(&Checkpoint {
                p1_key: "TEMP_p1".into(),
                p2_key: "TEMP_p2".into(),
                p1_score: 1,
                p2_score: 0,
                win_limit: 2,
                clan_vs_clan: false,
            })
            .await
            .unwrap();

        let mut world = World::new();
        world.load(&store).await.unwrap();
        assert_eq!(world.pending_restores.len(), 1);

        // P1 alone online: nothing to restore yet.
        world
            .apply_event(
                Event::IdentityChanged {
                    slot: 0,
                    raw_name: "P1".to_string(),
                    team: "1".to_string(),
                },
                &store,
            )
            .await;
        assert_eq!(world.pending_restores.len(), 1);

        world
            .apply_event(
                Event::IdentityChanged {
                    slot: 1,
                    raw_name: "P2".to_string(),
                    team: "1".to_string(),
                },
                &store,
            )
            .await;

        assert!(world.pending_restores.is_empty());
        let p1 = world.registry.get("p1").unwrap();
        let p2 = world.registry.get("p2").unwrap();
        assert_eq!(p1.opponent.as_deref(), Some("p2"));
        assert_eq!(p2.opponent.as_deref(), Some("p1"));
        assert_eq!(p1.match_score, 1);
        assert_eq!(p2.match_score, 0);
        assert!(p1.formal && p2.formal);
        assert_eq!(p1.match_limit, 2);
    }

    #[tokio::test]
    async fn test_tick_expires_challenge() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1")]).await;
        let past = Instant::now();
        world.registry.get_mut("p1").unwrap().challenge = Some(crate::registry::Challenge {
            from: "p2".to_string(),
            rounds: 3,
            deadline: past,
        });

        world.tick(past + Duration::from_secs(1));

        assert!(world.registry.get("p1").unwrap().challenge.is_none());
    }

    #[tokio::test]
    async fn test_lobby_expiry_starts_or_cancels() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1")]).await;
        let now = Instant::now();
        world.open_lobby(false, 2, now);
        world.tournament.join("p1");
        world.drain_notices();

        world.tick(now + LOBBY_WINDOW + Duration::from_secs(1));

        // One joiner is not a tournament.
        assert!(world.tournament.idle());
        let notices = world.drain_notices();
        assert!(matches!(&notices[0], Notice::Broadcast(t) if t.contains("cancelled")));
    }

    #[tokio::test]
    async fn test_roster_sync_detaches_missing_slots() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1"), (1, "P2")]).await;

        world
            .sync_roster(&[(1, "P2".to_string())], &store)
            .await;

        assert_eq!(world.registry.get("p1").unwrap().slot, None);
        assert_eq!(world.registry.get("p2").unwrap().slot, Some(1));
    }

    #[tokio::test]
    async fn test_flush_writes_all_ratings() {
        let store = store().await;
        let mut world = world_with(&store, &[(0, "P1")]).await;
        world.registry.get_mut("p1").unwrap().rating = 1777.0;

        world.flush_ratings(&store).await;

        let rec = store.find_by_clean_name("p1").await.unwrap().unwrap();
        assert_eq!(rec.rating, 1777.0);
    }

    #[tokio::test]
    async fn test_default_limit_matches_constant() {
        let store = store().await;
        let world = world_with(&store, &[(0, "P1")]).await;
        assert_eq!(
            world.registry.get("p1").unwrap().match_limit,
            DEFAULT_WIN_LIMIT
        );
    }
}
