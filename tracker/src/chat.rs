//! Chat and admin command handling.
//!
//! Both surfaces reuse the same [`World`] mutation paths. The privileged
//! channel reports 1-based admin ids while game slots are 0-based, so
//! admin input is translated before it reaches the shared handlers.

use crate::registry::Challenge;
use crate::store::{ok_or_log, ClanRole, Leaderboard, Store};
use crate::world::{MatchEnd, World, CHALLENGE_WINDOW};
use log::debug;
use shared::commands::{AdminAction, ChatCommand};
use shared::{normalize, DEFAULT_WIN_LIMIT};
use std::time::Instant;

impl World {
    pub(crate) async fn handle_chat_line(
        &mut self,
        slot: Option<u32>,
        raw_speaker: &str,
        raw_message: &str,
        store: &Store,
    ) {
        let Some(command) = ChatCommand::parse(raw_message) else {
            return;
        };

        // Some engine builds omit the slot prefix; fall back to the
        // speaker name, creating the session if this is the first
        // mention.
        let clean = match slot {
            Some(slot) => self.registry.resolve(Some(slot), raw_speaker, "0", store).await,
            None => match self.registry.find_named(raw_speaker) {
                Some(session) => Some(session.clean_name.clone()),
                None => self.registry.resolve(None, raw_speaker, "0", store).await,
            },
        };
        let Some(clean) = clean else {
            return;
        };
        debug!("chat command from {clean}: {command:?}");
        self.dispatch_chat(&clean, command, store).await;
    }

    async fn dispatch_chat(&mut self, clean: &str, command: ChatCommand, store: &Store) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        match command {
            ChatCommand::Duel { target, rounds } => self.cmd_duel(clean, &target, rounds),
            ChatCommand::Accept => self.cmd_accept(clean),
            ChatCommand::Decline => self.cmd_decline(clean),
            ChatCommand::Forfeit => self.cmd_forfeit(clean, store).await,
            ChatCommand::Pause => self.cmd_set_paused(clean, true),
            ChatCommand::Resume => self.cmd_set_paused(clean, false),
            ChatCommand::Rank { target } => self.cmd_rank(clean, target, store).await,
            ChatCommand::TopRatings => {
                self.cmd_top(slot, Leaderboard::Rating, "Top rated duelists", store)
                    .await
            }
            ChatCommand::TopMatches => {
                self.cmd_top(slot, Leaderboard::MatchesWon, "Most matches won", store)
                    .await
            }
            ChatCommand::TopTournaments => {
                self.cmd_top(
                    slot,
                    Leaderboard::TournamentWins,
                    "Most tournament wins",
                    store,
                )
                .await
            }
            ChatCommand::TopClans => self.cmd_top_clans(slot, store).await,
            ChatCommand::Help => self.cmd_help(slot),
            ChatCommand::TournamentHelp => self.cmd_tournament_help(slot),
            ChatCommand::TournamentStart { limit } => self.cmd_tournament_start(clean, limit),
            ChatCommand::TournamentJoin => self.cmd_tournament_join(clean),
            ChatCommand::TournamentForfeit => self.cmd_tournament_forfeit(clean, store).await,
            ChatCommand::ClanTagRegister { tag } => {
                self.cmd_clantag_register(clean, &tag, store).await
            }
            ChatCommand::ClanDisband => self.cmd_clan_disband(clean, store).await,
            ChatCommand::Clan(action) => self.cmd_clan(clean, action, store).await,
            ChatCommand::GroupAccept { slot: target } => {
                self.cmd_group_request(clean, target, true, store).await
            }
            ChatCommand::GroupDecline { slot: target } => {
                self.cmd_group_request(clean, target, false, store).await
            }
        }
    }

    /// Target lookup for commands: a bare number is a slot, anything
    /// else a (partial) name.
    pub(crate) fn find_target(&self, raw: &str) -> Option<String> {
        if let Ok(slot) = raw.parse::<u32>() {
            if let Some(session) = self.registry.by_slot(slot) {
                return Some(session.clean_name.clone());
            }
        }
        self.registry.find_named(raw).map(|s| s.clean_name.clone())
    }

    // ---- challenge protocol ----

    fn cmd_duel(&mut self, clean: &str, target: &str, rounds: u32) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        let Some(target_clean) = self.find_target(target) else {
            self.notify(slot, format!("No player matching '{target}' found"));
            return;
        };
        if target_clean == clean {
            self.notify(slot, "You cannot challenge yourself".to_string());
            return;
        }
        let busy = |s: &crate::registry::Session| s.formal;
        if self.registry.get(clean).map(busy).unwrap_or(false) {
            self.notify(slot, "Finish your current match first".to_string());
            return;
        }
        if self.registry.get(&target_clean).map(busy).unwrap_or(false) {
            self.notify(slot, "That player is already in a match".to_string());
            return;
        }

        let challenger_name = match self.registry.get(clean) {
            Some(s) => s.name.clone(),
            None => return,
        };
        let target_slot = self.registry.get(&target_clean).and_then(|s| s.slot);
        if let Some(target_session) = self.registry.get_mut(&target_clean) {
            // Newest challenge wins; any previous one is overwritten.
            target_session.challenge = Some(Challenge {
                from: clean.to_string(),
                rounds,
                deadline: Instant::now() + CHALLENGE_WINDOW,
            });
        }
        self.notify(
            target_slot,
            format!(
                "{challenger_name} ^7challenges you, first to {rounds}. ^2!dyes^7 to accept, ^1!dno^7 to decline"
            ),
        );
        self.notify(slot, "Challenge sent".to_string());
    }

    fn cmd_accept(&mut self, clean: &str) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        let challenge = self.registry.get_mut(clean).and_then(|s| s.challenge.take());
        let Some(challenge) = challenge else {
            self.notify(slot, "No pending challenge".to_string());
            return;
        };
        if self.registry.get(&challenge.from).is_none() {
            self.notify(slot, "The challenger has left the server".to_string());
            return;
        }

        let accepter_name;
        {
            let Some(me) = self.registry.get_mut(clean) else {
                return;
            };
            me.reset_match_state();
            me.opponent = Some(challenge.from.clone());
            me.formal = true;
            me.match_limit = challenge.rounds;
            accepter_name = me.name.clone();
        }
        let challenger_name;
        {
            let Some(them) = self.registry.get_mut(&challenge.from) else {
                return;
            };
            them.reset_match_state();
            them.opponent = Some(clean.to_string());
            them.formal = true;
            them.match_limit = challenge.rounds;
            challenger_name = them.name.clone();
        }
        self.broadcast(format!(
            "Match on! {challenger_name} ^7vs {accepter_name}^7, first to {}",
            challenge.rounds
        ));
    }

    fn cmd_decline(&mut self, clean: &str) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        let challenge = self.registry.get_mut(clean).and_then(|s| s.challenge.take());
        match challenge {
            Some(challenge) => {
                let from_slot = self
                    .registry
                    .get(&challenge.from)
                    .and_then(|s| s.slot);
                self.notify(slot, "Challenge declined".to_string());
                self.notify(from_slot, "Your challenge was declined".to_string());
            }
            None => self.notify(slot, "No pending challenge".to_string()),
        }
    }

    async fn cmd_forfeit(&mut self, clean: &str, store: &Store) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        let opponent = self.registry.get(clean).and_then(|s| s.opponent.clone());
        match opponent {
            Some(opponent) => {
                self.finalize_match(&opponent, clean, MatchEnd::Forfeit, store)
                    .await
            }
            None => self.notify(slot, "You are not in a match".to_string()),
        }
    }

    fn cmd_set_paused(&mut self, clean: &str, paused: bool) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        let opponent = self
            .registry
            .get(clean)
            .filter(|s| s.formal)
            .and_then(|s| s.opponent.clone());
        let Some(opponent) = opponent else {
            self.notify(slot, "You are not in a match".to_string());
            return;
        };
        let mut names = (String::new(), String::new());
        if let Some(me) = self.registry.get_mut(clean) {
            me.paused = paused;
            names.0 = me.name.clone();
        }
        if let Some(them) = self.registry.get_mut(&opponent) {
            them.paused = paused;
            names.1 = them.name.clone();
        }
        let what = if paused { "paused" } else { "resumed" };
        self.broadcast(format!("Match {} ^7vs {}^7 {what}", names.0, names.1));
    }

    // ---- stats ----

    async fn cmd_rank(&mut self, clean: &str, target: Option<String>, store: &Store) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        let (key, lookup) = match &target {
            None => match self.registry.get(clean) {
                Some(s) => (s.store_key(), s.clean_name.clone()),
                None => return,
            },
            Some(raw) => match self.find_target(raw) {
                Some(found) => match self.registry.get(&found) {
                    Some(s) => (s.store_key(), s.clean_name.clone()),
                    None => return,
                },
                // Offline players are still rankable by name.
                None => (String::new(), normalize(raw)),
            },
        };
        if lookup.is_empty() {
            self.notify(slot, "No such player".to_string());
            return;
        }

        let row = ok_or_log("rank lookup", store.rank_row(&key, &lookup).await).flatten();
        match row {
            Some((rating, rounds_won, tournament_wins, name)) => self.notify(
                slot,
                format!(
                    "{name}^7: rating {rating:.0}, rounds won {rounds_won}, tournament wins {tournament_wins}"
                ),
            ),
            None => self.notify(slot, "No record for that player".to_string()),
        }
    }

    async fn cmd_top(
        &mut self,
        slot: Option<u32>,
        board: Leaderboard,
        title: &str,
        store: &Store,
    ) {
        let rows = ok_or_log("leaderboard", store.top_players(board, 5).await);
        match rows {
            Some(rows) if !rows.is_empty() => {
                self.notify(slot, format!("{title}:"));
                for (i, (name, value)) in rows.into_iter().enumerate() {
                    self.notify(slot, format!("{}. {name}^7: {value:.0}", i + 1));
                }
            }
            _ => self.notify(slot, "No entries yet".to_string()),
        }
    }

    async fn cmd_top_clans(&mut self, slot: Option<u32>, store: &Store) {
        let rows = ok_or_log("clan leaderboard", store.top_clans(5).await);
        match rows {
            Some(rows) if !rows.is_empty() => {
                self.notify(slot, "Top clans by average rating:".to_string());
                for (i, (tag, avg)) in rows.into_iter().enumerate() {
                    self.notify(slot, format!("{}. {tag}^7: {avg:.0}", i + 1));
                }
            }
            _ => self.notify(slot, "No clans yet".to_string()),
        }
    }

    fn cmd_help(&mut self, slot: Option<u32>) {
        for line in [
            "!dduel <name|slot> <rounds>, !dyes, !dno, !dforfeit",
            "!dpause, !dresume, !rank [name]",
            "!dtop, !fttop, !ttop, !dclantop",
            "!dclan <show|promote|demote|kick|rename|group|lock|join group|ownership|quit>",
            "!dclantag register <tag>, !dclandisband, !thelp",
        ] {
            self.notify(slot, line.to_string());
        }
    }

    fn cmd_tournament_help(&mut self, slot: Option<u32>) {
        for line in [
            "!tstart [limit] opens a tournament lobby",
            "!tyes joins an open lobby, !tforfeit concedes your bracket match",
        ] {
            self.notify(slot, line.to_string());
        }
    }

    // ---- tournament commands ----

    fn cmd_tournament_start(&mut self, clean: &str, limit: u32) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        let role = self
            .registry
            .get(clean)
            .map(|s| s.role)
            .unwrap_or(ClanRole::Member);
        if role < ClanRole::Officer {
            self.notify(
                slot,
                "Officer rank or higher required to start a tournament".to_string(),
            );
            return;
        }
        if !self.tournament.idle() {
            self.notify(slot, "A tournament is already running".to_string());
            return;
        }
        self.open_lobby(false, limit, Instant::now());
    }

    fn cmd_tournament_join(&mut self, clean: &str) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        if !self.tournament.lobby_open {
            self.notify(slot, "No tournament lobby is open".to_string());
            return;
        }
        if self.tournament.join(clean) {
            let name = self
                .registry
                .get(clean)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| clean.to_string());
            let count = self.tournament.lobby.len();
            self.broadcast(format!("{name} ^7joined the tournament ({count} in)"));
        } else {
            self.notify(slot, "You are already in".to_string());
        }
    }

    async fn cmd_tournament_forfeit(&mut self, clean: &str, store: &Store) {
        let slot = self.registry.get(clean).and_then(|s| s.slot);
        if !self.tournament.active || !self.tournament.is_paired(clean) {
            self.notify(slot, "You have no bracket match".to_string());
            return;
        }
        let opponent = self.registry.get(clean).and_then(|s| s.opponent.clone());
        match opponent {
            Some(opponent) => {
                self.finalize_match(&opponent, clean, MatchEnd::Forfeit, store)
                    .await
            }
            None => self.notify(slot, "You have no bracket match".to_string()),
        }
    }

    // ---- admin surface ----

    pub(crate) async fn handle_admin_line(
        &mut self,
        raw_admin: &str,
        admin_id: u32,
        raw_message: &str,
        store: &Store,
    ) {
        let Some(action) = AdminAction::parse(raw_message) else {
            return;
        };
        // Privileged ids are 1-based, game slots 0-based.
        let slot = admin_id.checked_sub(1);
        if let Some(slot) = slot {
            self.registry.resolve(Some(slot), raw_admin, "0", store).await;
        }
        debug!("admin command from {raw_admin}: {action:?}");
        self.dispatch_admin(slot, action, store).await;
    }

    async fn dispatch_admin(&mut self, slot: Option<u32>, action: AdminAction, store: &Store) {
        match action {
            AdminAction::Help => {
                for line in [
                    "tstart [cancel], cstart [cancel]",
                    "clanlist, clandelete <tag>, clan <player> <tag>",
                    "group <player> <group>, promote <player>, resetplayer <player>",
                ] {
                    self.notify(slot, line.to_string());
                }
            }
            AdminAction::OpenTournamentLobby { clan_vs_clan } => {
                if self.tournament.idle() {
                    self.open_lobby(clan_vs_clan, DEFAULT_WIN_LIMIT, Instant::now());
                } else {
                    self.notify(slot, "A tournament is already running".to_string());
                }
            }
            AdminAction::CancelTournament { .. } => {
                if self.tournament.idle() {
                    self.notify(slot, "No tournament to cancel".to_string());
                } else {
                    self.tournament.cancel();
                    self.broadcast("Tournament cancelled by an admin".to_string());
                }
            }
            AdminAction::ClanList => {
                let tags = ok_or_log("clan list", store.clan_tags().await).unwrap_or_default();
                if tags.is_empty() {
                    self.notify(slot, "No clans registered".to_string());
                } else {
                    self.notify(slot, format!("Clans: {}", tags.join(", ")));
                }
            }
            AdminAction::ClanDelete { tag } => self.admin_delete_clan(slot, &tag, store).await,
            AdminAction::SetClan { target, tag } => {
                self.admin_set_clan(slot, &target, &tag, store).await
            }
            AdminAction::SetGroup { target, group } => {
                self.admin_set_group(slot, &target, &group, store).await
            }
            AdminAction::PromoteOwner { target } => {
                self.admin_promote_owner(slot, &target, store).await
            }
            AdminAction::ResetPlayer { target } => {
                self.admin_reset_player(slot, &target, store).await
            }
        }
    }
}
