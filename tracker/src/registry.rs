//! In-memory session registry keyed by normalized name.
//!
//! A session is one live identity on the server. Slots are transient and
//! reassigned by the engine, so the normalized name is the primary key
//! and the slot map on the side is continuously repaired as userinfo
//! lines and roster sweeps come in. Resolution is idempotent: replaying
//! the same (slot, name, id) triple is a no-op.

use crate::store::{is_trusted_id, ok_or_log, store_key, ClanRole, PlayerRecord, Store, NO_CLAN};
use log::{debug, info};
use shared::{normalize, Glicko, DEFAULT_RATING, DEFAULT_RD, DEFAULT_WIN_LIMIT};
use std::collections::HashMap;
use std::time::Instant;

/// An open duel challenge waiting for `!dyes`.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Normalized name of the challenger.
    pub from: String,
    pub rounds: u32,
    pub deadline: Instant,
}

/// A pending request to join a locked clan subdivision.
#[derive(Debug, Clone)]
pub struct GroupRequest {
    pub group: String,
    pub deadline: Instant,
}

/// One live player session.
#[derive(Debug, Clone)]
pub struct Session {
    pub slot: Option<u32>,
    /// Raw display name as last seen, markup included.
    pub name: String,
    pub clean_name: String,
    /// Trusted persistent id, when one has been observed.
    pub id: Option<String>,
    pub team: String,
    pub rating: f64,
    pub rd: f64,
    pub clan_tag: String,
    pub role: ClanRole,
    pub clan_group: String,
    /// Rounds won in the current formal match.
    pub match_score: u32,
    pub match_limit: u32,
    pub formal: bool,
    pub paused: bool,
    /// Normalized name of the current opponent.
    pub opponent: Option<String>,
    pub challenge: Option<Challenge>,
    pub group_request: Option<GroupRequest>,
}

impl Session {
    fn from_record(raw_name: &str, clean_name: &str, record: &PlayerRecord) -> Session {
        let id = if record.key.starts_with("TEMP_") {
            None
        } else {
            Some(record.key.clone())
        };
        Session {
            slot: None,
            name: raw_name.to_string(),
            clean_name: clean_name.to_string(),
            id,
            team: String::new(),
            rating: record.rating,
            rd: record.rd,
            clan_tag: record.clan_tag.clone(),
            role: record.role,
            clan_group: record.clan_group.clone(),
            match_score: 0,
            match_limit: DEFAULT_WIN_LIMIT,
            formal: false,
            paused: false,
            opponent: None,
            challenge: None,
            group_request: None,
        }
    }

    fn fresh(raw_name: &str, clean_name: &str) -> Session {
        Session {
            slot: None,
            name: raw_name.to_string(),
            clean_name: clean_name.to_string(),
            id: None,
            team: String::new(),
            rating: DEFAULT_RATING,
            rd: DEFAULT_RD,
            clan_tag: NO_CLAN.to_string(),
            role: ClanRole::Member,
            clan_group: crate::store::DEFAULT_GROUP.to_string(),
            match_score: 0,
            match_limit: DEFAULT_WIN_LIMIT,
            formal: false,
            paused: false,
            opponent: None,
            challenge: None,
            group_request: None,
        }
    }

    /// Durable key: the trusted id, or a name-derived placeholder.
    pub fn store_key(&self) -> String {
        store_key(self.id.as_deref(), &self.clean_name)
    }

    pub fn glicko(&self) -> Glicko {
        Glicko::new(self.rating, self.rd)
    }

    /// Clears everything tied to the current match or challenge.
    pub fn reset_match_state(&mut self) {
        self.opponent = None;
        self.match_score = 0;
        self.match_limit = DEFAULT_WIN_LIMIT;
        self.formal = false;
        self.paused = false;
        self.challenge = None;
    }
}

/// All live sessions plus the slot index over them.
#[derive(Default)]
pub struct Registry {
    sessions: HashMap<String, Session>,
    slots: HashMap<u32, String>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Ensures a session exists for `(slot, raw_name, id)` and returns
    /// its normalized name. Lookup order for durable state: trusted id
    /// first, then normalized name; a player never seen before gets a
    /// fresh default row. Persistence failures degrade to defaults.
    ///
    /// Returns `None` when the name normalizes to nothing.
    pub async fn resolve(
        &mut self,
        slot: Option<u32>,
        raw_name: &str,
        id: &str,
        store: &Store,
    ) -> Option<String> {
        let clean = normalize(raw_name);
        if clean.is_empty() {
            return None;
        }

        let trusted = is_trusted_id(id).then(|| id.to_string());

        if !self.sessions.contains_key(&clean) {
            let mut record = match &trusted {
                Some(id) => ok_or_log("player lookup", store.find_by_key(id).await).flatten(),
                None => None,
            };
            if record.is_none() {
                record =
                    ok_or_log("player lookup", store.find_by_clean_name(&clean).await).flatten();
            }

            let mut session = match record {
                Some(record) => Session::from_record(raw_name, &clean, &record),
                None => {
                    let key = store_key(trusted.as_deref(), &clean);
                    ok_or_log(
                        "player insert",
                        store.insert_player(&key, raw_name, &clean).await,
                    );
                    info!("new player registered: {clean}");
                    Session::fresh(raw_name, &clean)
                }
            };
            if session.id.is_none() {
                session.id = trusted.clone();
            }
            self.sessions.insert(clean.clone(), session);
        } else if let Some(session) = self.sessions.get_mut(&clean) {
            session.name = raw_name.to_string();
            if session.id.is_none() {
                session.id = trusted;
            }
        }

        if let Some(slot) = slot {
            self.claim_slot(slot, &clean);
        }

        Some(clean)
    }

    /// Points `slot` at `clean`, evicting any different session that
    /// currently occupies it. The engine reuses slots aggressively, so a
    /// stale occupant means that player is gone.
    pub fn claim_slot(&mut self, slot: u32, clean: &str) {
        if let Some(previous) = self.slots.get(&slot) {
            if previous != clean {
                let stale = previous.clone();
                debug!("slot {slot} reassigned: evicting stale session {stale}");
                self.sessions.remove(&stale);
            }
        }
        if let Some(old_slot) = self.sessions.get(clean).and_then(|s| s.slot) {
            if old_slot != slot {
                self.slots.remove(&old_slot);
            }
        }
        self.slots.insert(slot, clean.to_string());
        if let Some(session) = self.sessions.get_mut(clean) {
            session.slot = Some(slot);
        }
    }

    pub fn get(&self, clean: &str) -> Option<&Session> {
        self.sessions.get(clean)
    }

    pub fn get_mut(&mut self, clean: &str) -> Option<&mut Session> {
        self.sessions.get_mut(clean)
    }

    pub fn by_slot(&self, slot: u32) -> Option<&Session> {
        self.slots.get(&slot).and_then(|c| self.sessions.get(c))
    }

    pub fn clean_by_slot(&self, slot: u32) -> Option<String> {
        self.slots.get(&slot).cloned()
    }

    pub fn by_id(&self, id: &str) -> Option<&Session> {
        self.sessions.values().find(|s| s.id.as_deref() == Some(id))
    }

    /// Exact normalized match first, then a unique-enough substring
    /// match for partial names typed in chat.
    pub fn find_named(&self, raw_target: &str) -> Option<&Session> {
        let needle = normalize(raw_target);
        if needle.is_empty() {
            return None;
        }
        if let Some(session) = self.sessions.get(&needle) {
            return Some(session);
        }
        if needle.len() > 2 {
            return self
                .sessions
                .values()
                .find(|s| s.clean_name.contains(&needle));
        }
        None
    }

    /// Removes a session and its slot entry.
    pub fn remove(&mut self, clean: &str) -> Option<Session> {
        let session = self.sessions.remove(clean)?;
        if let Some(slot) = session.slot {
            if self.slots.get(&slot).map(String::as_str) == Some(clean) {
                self.slots.remove(&slot);
            }
        }
        Some(session)
    }

    /// Drops every session and slot; the server restarted.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.slots.clear();
    }

    /// Reconciles the slot map against an authoritative roster sweep.
    /// Sessions whose slot is absent from the sweep lose their slot but
    /// stay resident until a disconnect or eviction removes them.
    pub fn retain_slots(&mut self, seen: &[u32]) {
        let stale: Vec<u32> = self
            .slots
            .keys()
            .filter(|slot| !seen.contains(slot))
            .copied()
            .collect();
        for slot in stale {
            if let Some(clean) = self.slots.remove(&slot) {
                if let Some(session) = self.sessions.get_mut(&clean) {
                    session.slot = None;
                }
            }
        }
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
