//! Clan membership, roles, subdivisions and locks.
//!
//! Role gates follow the strict ladder member < officer < leader <
//! owner. Destructive actions are double-confirmed inside a short
//! window; locked subdivisions take members only through an officer's
//! `!daccept`.

use crate::registry::GroupRequest;
use crate::store::{ok_or_log, ClanRole, Store, DEFAULT_GROUP, NO_CLAN};
use crate::world::{World, DISBAND_WINDOW, GROUP_REQUEST_WINDOW};
use log::info;
use shared::commands::ClanAction;
use shared::normalize;
use std::time::Instant;

/// Snapshot of the acting player's clan standing.
struct Standing {
    slot: Option<u32>,
    key: String,
    name: String,
    tag: String,
    role: ClanRole,
}

impl World {
    fn standing(&self, clean: &str) -> Option<Standing> {
        self.registry.get(clean).map(|s| Standing {
            slot: s.slot,
            key: s.store_key(),
            name: s.name.clone(),
            tag: s.clan_tag.clone(),
            role: s.role,
        })
    }

    fn in_clan(standing: &Standing) -> bool {
        standing.tag != NO_CLAN && !standing.tag.is_empty()
    }

    pub(crate) async fn cmd_clantag_register(&mut self, clean: &str, tag: &str, store: &Store) {
        let Some(me) = self.standing(clean) else {
            return;
        };
        if Self::in_clan(&me) {
            self.notify(me.slot, "Leave your current clan first".to_string());
            return;
        }
        if tag.is_empty() || tag.len() > 8 {
            self.notify(me.slot, "Clan tags are 1 to 8 characters".to_string());
            return;
        }

        // First registrant founds the clan and owns it; later ones join
        // as members.
        let exists = ok_or_log("clan lookup", store.clan_exists(tag).await).unwrap_or(false);
        let role = if exists {
            ClanRole::Member
        } else {
            ClanRole::Owner
        };
        ok_or_log(
            "clan join",
            store.set_clan(&me.key, tag, role, DEFAULT_GROUP).await,
        );
        if let Some(session) = self.registry.get_mut(clean) {
            session.clan_tag = tag.to_string();
            session.role = role;
            session.clan_group = DEFAULT_GROUP.to_string();
        }
        if exists {
            self.broadcast(format!("{} ^7joined clan {tag}", me.name));
        } else {
            info!("clan {tag} founded by {clean}");
            self.broadcast(format!("{} ^7founded clan {tag}", me.name));
        }
    }

    pub(crate) async fn cmd_clan_disband(&mut self, clean: &str, store: &Store) {
        let Some(me) = self.standing(clean) else {
            return;
        };
        if !Self::in_clan(&me) || me.role != ClanRole::Owner {
            self.notify(me.slot, "Only the clan owner can disband".to_string());
            return;
        }

        let now = Instant::now();
        let confirmed = self
            .pending_disbands
            .get(clean)
            .is_some_and(|(tag, deadline)| *tag == me.tag && *deadline > now);
        if !confirmed {
            self.pending_disbands
                .insert(clean.to_string(), (me.tag.clone(), now + DISBAND_WINDOW));
            self.notify(
                me.slot,
                format!(
                    "Repeat !dclandisband within {} seconds to disband {}",
                    DISBAND_WINDOW.as_secs(),
                    me.tag
                ),
            );
            return;
        }

        self.pending_disbands.remove(clean);
        self.dissolve_clan(&me.tag, store).await;
        self.broadcast(format!("Clan {} ^7has been disbanded", me.tag));
    }

    /// Shared teardown for owner disband and admin delete.
    pub(crate) async fn dissolve_clan(&mut self, tag: &str, store: &Store) {
        ok_or_log("clan disband", store.disband_clan(tag).await);
        if let Some(groups) = self.locked_groups.remove(tag) {
            for group in groups {
                ok_or_log("lock cleanup", store.unlock_group(tag, &group).await);
            }
        }
        for session in self.registry.sessions_mut() {
            if session.clan_tag == tag {
                session.clan_tag = NO_CLAN.to_string();
                session.role = ClanRole::Member;
                session.clan_group = DEFAULT_GROUP.to_string();
            }
        }
        info!("clan {tag} dissolved");
    }

    pub(crate) async fn cmd_clan(&mut self, clean: &str, action: ClanAction, store: &Store) {
        let Some(me) = self.standing(clean) else {
            return;
        };
        if !Self::in_clan(&me) {
            self.notify(me.slot, "You are not in a clan".to_string());
            return;
        }

        match action {
            ClanAction::Show => self.clan_show(&me, store).await,
            ClanAction::Promote { target } => self.clan_shift_role(&me, &target, true, store).await,
            ClanAction::Demote { target } => self.clan_shift_role(&me, &target, false, store).await,
            ClanAction::Rename { old, new } => self.clan_rename_group(&me, &old, &new, store).await,
            ClanAction::Assign { target, group } => {
                self.clan_assign_group(&me, &target, &group, store).await
            }
            ClanAction::Kick { target } => self.clan_kick(&me, &target, store).await,
            ClanAction::Quit => self.clan_quit(clean, &me, store).await,
            ClanAction::Lock { group } => self.clan_toggle_lock(&me, &group, store).await,
            ClanAction::JoinGroup { group } => self.clan_join_group(clean, &me, &group, store).await,
            ClanAction::Ownership { target } => {
                self.clan_transfer_ownership(clean, &me, &target, store).await
            }
        }
    }

    async fn clan_show(&mut self, me: &Standing, store: &Store) {
        let roster = ok_or_log("clan roster", store.clan_roster(&me.tag).await).unwrap_or_default();
        self.notify(me.slot, format!("Clan {} ({} members):", me.tag, roster.len()));
        for (name, role, group) in roster {
            self.notify(me.slot, format!("  {name}^7 [{role}] ({group})"));
        }
    }

    /// Resolves a target to a live clanmate of the actor.
    fn clanmate(&self, me: &Standing, target: &str) -> Option<String> {
        let clean = self.find_target(target)?;
        let session = self.registry.get(&clean)?;
        (session.clan_tag == me.tag).then_some(clean)
    }

    async fn clan_shift_role(&mut self, me: &Standing, target: &str, up: bool, store: &Store) {
        if me.role < ClanRole::Leader {
            self.notify(me.slot, "Leader rank required".to_string());
            return;
        }
        let Some(target_clean) = self.clanmate(me, target) else {
            self.notify(me.slot, "No such clanmate online".to_string());
            return;
        };
        let Some((current, key, name)) = self
            .registry
            .get(&target_clean)
            .map(|s| (s.role, s.store_key(), s.name.clone()))
        else {
            return;
        };
        if current >= me.role {
            self.notify(me.slot, "You cannot change that rank".to_string());
            return;
        }
        let next = if up { current.promoted() } else { current.demoted() };
        let Some(next) = next else {
            self.notify(me.slot, "No rank change possible".to_string());
            return;
        };

        ok_or_log("role change", store.set_role(&key, next).await);
        if let Some(session) = self.registry.get_mut(&target_clean) {
            session.role = next;
        }
        self.broadcast(format!("{name} ^7is now {} of {}", next.as_str(), me.tag));
    }

    async fn clan_rename_group(&mut self, me: &Standing, old: &str, new: &str, store: &Store) {
        if me.role < ClanRole::Leader {
            self.notify(me.slot, "Leader rank required".to_string());
            return;
        }
        ok_or_log(
            "group rename",
            store.rename_group(&me.tag, old, new).await,
        );
        for session in self.registry.sessions_mut() {
            if session.clan_tag == me.tag && session.clan_group == old {
                session.clan_group = new.to_string();
            }
        }
        // A lock follows the subdivision through a rename.
        let was_locked = self
            .locked_groups
            .get(&me.tag)
            .is_some_and(|g| g.contains(old));
        if was_locked {
            if let Some(groups) = self.locked_groups.get_mut(&me.tag) {
                groups.remove(old);
                groups.insert(new.to_string());
            }
            ok_or_log("lock move", store.unlock_group(&me.tag, old).await);
            ok_or_log("lock move", store.lock_group(&me.tag, new).await);
        }
        self.notify(me.slot, format!("Subdivision {old} renamed to {new}"));
    }

    async fn clan_assign_group(&mut self, me: &Standing, target: &str, group: &str, store: &Store) {
        if me.role < ClanRole::Officer {
            self.notify(me.slot, "Officer rank required".to_string());
            return;
        }
        let Some(target_clean) = self.clanmate(me, target) else {
            self.notify(me.slot, "No such clanmate online".to_string());
            return;
        };
        let Some((key, name)) = self
            .registry
            .get(&target_clean)
            .map(|s| (s.store_key(), s.name.clone()))
        else {
            return;
        };
        ok_or_log("group assign", store.set_group(&key, group).await);
        if let Some(session) = self.registry.get_mut(&target_clean) {
            session.clan_group = group.to_string();
        }
        self.notify(me.slot, format!("{name} ^7moved to {group}"));
    }

    async fn clan_kick(&mut self, me: &Standing, target: &str, store: &Store) {
        if me.role < ClanRole::Officer {
            self.notify(me.slot, "Officer rank required".to_string());
            return;
        }
        match self.clanmate(me, target) {
            Some(target_clean) => {
                let Some((role, key, name)) = self
                    .registry
                    .get(&target_clean)
                    .map(|s| (s.role, s.store_key(), s.name.clone()))
                else {
                    return;
                };
                if role >= me.role {
                    self.notify(me.slot, "You cannot kick that rank".to_string());
                    return;
                }
                ok_or_log(
                    "clan kick",
                    store
                        .set_clan(&key, NO_CLAN, ClanRole::Member, DEFAULT_GROUP)
                        .await,
                );
                if let Some(session) = self.registry.get_mut(&target_clean) {
                    session.clan_tag = NO_CLAN.to_string();
                    session.role = ClanRole::Member;
                    session.clan_group = DEFAULT_GROUP.to_string();
                }
                self.broadcast(format!("{name} ^7was kicked from {}", me.tag));
            }
            None => {
                // Offline members can still be kicked by name.
                let clean = normalize(target);
                if clean.is_empty() {
                    self.notify(me.slot, "No such clanmate".to_string());
                    return;
                }
                ok_or_log(
                    "clan kick",
                    store.clear_clan_by_clean_name(&clean, &me.tag).await,
                );
                self.notify(me.slot, format!("{target} removed from {}", me.tag));
            }
        }
    }

    async fn clan_quit(&mut self, clean: &str, me: &Standing, store: &Store) {
        if me.role == ClanRole::Owner {
            self.notify(
                me.slot,
                "Owners must transfer ownership or disband".to_string(),
            );
            return;
        }
        ok_or_log(
            "clan quit",
            store
                .set_clan(&me.key, NO_CLAN, ClanRole::Member, DEFAULT_GROUP)
                .await,
        );
        if let Some(session) = self.registry.get_mut(clean) {
            session.clan_tag = NO_CLAN.to_string();
            session.role = ClanRole::Member;
            session.clan_group = DEFAULT_GROUP.to_string();
        }
        self.broadcast(format!("{} ^7left clan {}", me.name, me.tag));
    }

    async fn clan_toggle_lock(&mut self, me: &Standing, group: &str, store: &Store) {
        if me.role < ClanRole::Leader {
            self.notify(me.slot, "Leader rank required".to_string());
            return;
        }
        let locked = self
            .locked_groups
            .get(&me.tag)
            .is_some_and(|g| g.contains(group));
        if locked {
            if let Some(groups) = self.locked_groups.get_mut(&me.tag) {
                groups.remove(group);
            }
            ok_or_log("unlock", store.unlock_group(&me.tag, group).await);
            self.notify(me.slot, format!("Subdivision {group} unlocked"));
        } else {
            self.locked_groups
                .entry(me.tag.clone())
                .or_default()
                .insert(group.to_string());
            ok_or_log("lock", store.lock_group(&me.tag, group).await);
            self.notify(me.slot, format!("Subdivision {group} locked"));
        }
    }

    async fn clan_join_group(&mut self, clean: &str, me: &Standing, group: &str, store: &Store) {
        let locked = self
            .locked_groups
            .get(&me.tag)
            .is_some_and(|g| g.contains(group));
        if !locked {
            ok_or_log("group join", store.set_group(&me.key, group).await);
            if let Some(session) = self.registry.get_mut(clean) {
                session.clan_group = group.to_string();
            }
            self.notify(me.slot, format!("You joined subdivision {group}"));
            return;
        }

        if let Some(session) = self.registry.get_mut(clean) {
            session.group_request = Some(GroupRequest {
                group: group.to_string(),
                deadline: Instant::now() + GROUP_REQUEST_WINDOW,
            });
        }
        let my_slot = me.slot.map(|s| s.to_string()).unwrap_or_default();
        self.notify(
            me.slot,
            format!("Subdivision {group} is locked, an officer must approve"),
        );
        self.broadcast(format!(
            "{} ^7requests to join {} {group} (officers: ^2!daccept {my_slot}^7 or ^1!ddecline {my_slot}^7)",
            me.name, me.tag
        ));
    }

    async fn clan_transfer_ownership(
        &mut self,
        clean: &str,
        me: &Standing,
        target: &str,
        store: &Store,
    ) {
        if me.role != ClanRole::Owner {
            self.notify(me.slot, "Only the owner can transfer ownership".to_string());
            return;
        }
        let Some(target_clean) = self.clanmate(me, target) else {
            self.notify(me.slot, "No such clanmate online".to_string());
            return;
        };
        if target_clean == clean {
            return;
        }
        let Some((key, name)) = self
            .registry
            .get(&target_clean)
            .map(|s| (s.store_key(), s.name.clone()))
        else {
            return;
        };

        ok_or_log("ownership", store.set_role(&key, ClanRole::Owner).await);
        ok_or_log("ownership", store.set_role(&me.key, ClanRole::Leader).await);
        if let Some(session) = self.registry.get_mut(&target_clean) {
            session.role = ClanRole::Owner;
        }
        if let Some(session) = self.registry.get_mut(clean) {
            session.role = ClanRole::Leader;
        }
        self.broadcast(format!("{name} ^7now owns clan {}", me.tag));
    }

    /// `!daccept <slot>` / `!ddecline <slot>` on a pending locked-group
    /// request.
    pub(crate) async fn cmd_group_request(
        &mut self,
        clean: &str,
        target_slot: u32,
        accept: bool,
        store: &Store,
    ) {
        let Some(me) = self.standing(clean) else {
            return;
        };
        if me.role < ClanRole::Officer {
            self.notify(me.slot, "Officer rank required".to_string());
            return;
        }
        let request = self
            .registry
            .by_slot(target_slot)
            .filter(|s| s.clan_tag == me.tag)
            .and_then(|s| {
                s.group_request
                    .clone()
                    .map(|r| (s.clean_name.clone(), s.store_key(), s.name.clone(), r))
            });
        let Some((target_clean, key, name, request)) = request else {
            self.notify(me.slot, "No pending request in that slot".to_string());
            return;
        };

        if let Some(session) = self.registry.get_mut(&target_clean) {
            session.group_request = None;
        }
        if accept {
            ok_or_log("group join", store.set_group(&key, &request.group).await);
            if let Some(session) = self.registry.get_mut(&target_clean) {
                session.clan_group = request.group.clone();
            }
            self.broadcast(format!("{name} ^7joined subdivision {}", request.group));
        } else {
            self.notify(
                Some(target_slot),
                format!("Your request to join {} was declined", request.group),
            );
        }
    }

    // ---- admin clan actions ----

    pub(crate) async fn admin_delete_clan(&mut self, slot: Option<u32>, tag: &str, store: &Store) {
        let exists = ok_or_log("clan lookup", store.clan_exists(tag).await).unwrap_or(false);
        if !exists {
            self.notify(slot, format!("No clan {tag}"));
            return;
        }
        self.dissolve_clan(tag, store).await;
        self.broadcast(format!("Clan {tag} ^7was removed by an admin"));
    }

    pub(crate) async fn admin_set_clan(
        &mut self,
        slot: Option<u32>,
        target: &str,
        tag: &str,
        store: &Store,
    ) {
        let Some(target_clean) = self.find_target(target) else {
            self.notify(slot, format!("No player matching '{target}' found"));
            return;
        };
        let Some((key, name)) = self
            .registry
            .get(&target_clean)
            .map(|s| (s.store_key(), s.name.clone()))
        else {
            return;
        };
        // First member of a fresh tag gets ownership, same as register.
        let exists = ok_or_log("clan lookup", store.clan_exists(tag).await).unwrap_or(false);
        let role = if exists {
            ClanRole::Member
        } else {
            ClanRole::Owner
        };
        ok_or_log(
            "admin clan set",
            store.set_clan(&key, tag, role, DEFAULT_GROUP).await,
        );
        if let Some(session) = self.registry.get_mut(&target_clean) {
            session.clan_tag = tag.to_string();
            session.role = role;
            session.clan_group = DEFAULT_GROUP.to_string();
        }
        self.broadcast(format!("{name} ^7was placed in clan {tag}"));
    }

    pub(crate) async fn admin_set_group(
        &mut self,
        slot: Option<u32>,
        target: &str,
        group: &str,
        store: &Store,
    ) {
        let Some(target_clean) = self.find_target(target) else {
            self.notify(slot, format!("No player matching '{target}' found"));
            return;
        };
        let Some((key, name)) = self
            .registry
            .get(&target_clean)
            .map(|s| (s.store_key(), s.name.clone()))
        else {
            return;
        };
        ok_or_log("admin group set", store.set_group(&key, group).await);
        if let Some(session) = self.registry.get_mut(&target_clean) {
            session.clan_group = group.to_string();
        }
        self.notify(slot, format!("{name} ^7moved to {group}"));
    }

    pub(crate) async fn admin_promote_owner(
        &mut self,
        slot: Option<u32>,
        target: &str,
        store: &Store,
    ) {
        let Some(target_clean) = self.find_target(target) else {
            self.notify(slot, format!("No player matching '{target}' found"));
            return;
        };
        let Some((key, name, tag)) = self
            .registry
            .get(&target_clean)
            .map(|s| (s.store_key(), s.name.clone(), s.clan_tag.clone()))
        else {
            return;
        };
        if tag == NO_CLAN || tag.is_empty() {
            self.notify(slot, "That player is not in a clan".to_string());
            return;
        }
        ok_or_log("admin promote", store.set_role(&key, ClanRole::Owner).await);
        if let Some(session) = self.registry.get_mut(&target_clean) {
            session.role = ClanRole::Owner;
        }
        self.broadcast(format!("{name} ^7now owns clan {tag}"));
    }

    pub(crate) async fn admin_reset_player(
        &mut self,
        slot: Option<u32>,
        target: &str,
        store: &Store,
    ) {
        let Some(target_clean) = self.find_target(target) else {
            self.notify(slot, format!("No player matching '{target}' found"));
            return;
        };
        let Some((key, name)) = self
            .registry
            .get(&target_clean)
            .map(|s| (s.store_key(), s.name.clone()))
        else {
            return;
        };
        ok_or_log("player reset", store.reset_player(&key).await);
        if let Some(session) = self.registry.get_mut(&target_clean) {
            session.rating = shared::DEFAULT_RATING;
            session.rd = shared::DEFAULT_RD;
        }
        self.notify(slot, format!("{name} ^7reset to default rating"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Notice;
    use shared::Event;
    use std::time::Duration;

    async fn store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.init().await.unwrap();
        store
    }

    /// Puts players online and into clan ERA with the given roles.
    async fn clan_world(store: &Store, members: &[(u32, &str, ClanRole)]) -> World {
        let mut world = World::new();
        for (slot, name, role) in members {
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
            let clean = world.registry.clean_by_slot(*slot).unwrap();
            let key = world.registry.get(&clean).unwrap().store_key();
            store
                .set_clan(&key, "ERA", *role, DEFAULT_GROUP)
                .await
                .unwrap();
            let session = world.registry.get_mut(&clean).unwrap();
            session.clan_tag = "ERA".to_string();
            session.role = *role;
        }
        world.drain_notices();
        world
    }

    fn join_group(group: &str) -> ClanAction {
        ClanAction::JoinGroup {
            group: group.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unlocked_group_join_is_immediate() {
        let store = store().await;
        let mut world = clan_world(&store, &[(0, "Newbie", ClanRole::Member)]).await;

        world.cmd_clan("newbie", join_group("ALPHA"), &store).await;

        let session = world.registry.get("newbie").unwrap();
        assert_eq!(session.clan_group, "ALPHA");
        assert!(session.group_request.is_none());
        let row = store.find_by_key("TEMP_newbie").await.unwrap().unwrap();
        assert_eq!(row.clan_group, "ALPHA");
    }

    #[tokio::test]
    async fn test_locked_group_join_waits_for_approval() {
        let store = store().await;
        let mut world = clan_world(
            &store,
            &[(0, "Boss", ClanRole::Leader), (1, "Newbie", ClanRole::Member)],
        )
        .await;

        world
            .cmd_clan(
                "boss",
                ClanAction::Lock {
                    group: "ALPHA".to_string(),
                },
                &store,
            )
            .await;
        world.cmd_clan("newbie", join_group("ALPHA"), &store).await;

        let session = world.registry.get("newbie").unwrap();
        assert_eq!(session.clan_group, DEFAULT_GROUP);
        let request = session.group_request.as_ref().unwrap();
        assert_eq!(request.group, "ALPHA");
    }

    #[tokio::test]
    async fn test_accept_applies_requested_group() {
        let store = store().await;
        let mut world = clan_world(
            &store,
            &[(0, "Boss", ClanRole::Leader), (1, "Newbie", ClanRole::Member)],
        )
        .await;
        world
            .cmd_clan(
                "boss",
                ClanAction::Lock {
                    group: "ALPHA".to_string(),
                },
                &store,
            )
            .await;
        world.cmd_clan("newbie", join_group("ALPHA"), &store).await;

        world.cmd_group_request("boss", 1, true, &store).await;

        let session = world.registry.get("newbie").unwrap();
        assert_eq!(session.clan_group, "ALPHA");
        assert!(session.group_request.is_none());
        let row = store.find_by_key("TEMP_newbie").await.unwrap().unwrap();
        assert_eq!(row.clan_group, "ALPHA");
    }

    #[tokio::test]
    async fn test_decline_clears_request() {
        let store = store().await;
        let mut world = clan_world(
            &store,
            &[(0, "Boss", ClanRole::Leader), (1, "Newbie", ClanRole::Member)],
        )
        .await;
        world
            .cmd_clan(
                "boss",
                ClanAction::Lock {
                    group: "ALPHA".to_string(),
                },
                &store,
            )
            .await;
        world.cmd_clan("newbie", join_group("ALPHA"), &store).await;
        world.drain_notices();

        world.cmd_group_request("boss", 1, false, &store).await;

        let session = world.registry.get("newbie").unwrap();
        assert_eq!(session.clan_group, DEFAULT_GROUP);
        assert!(session.group_request.is_none());
        assert!(world.drain_notices().iter().any(|n| matches!(
            n,
            Notice::Direct(1, text) if text.contains("declined")
        )));
    }

    #[tokio::test]
    async fn test_member_cannot_resolve_requests() {
        let store = store().await;
        let mut world = clan_world(
            &store,
            &[
                (0, "Boss", ClanRole::Leader),
                (1, "Newbie", ClanRole::Member),
                (2, "Peer", ClanRole::Member),
            ],
        )
        .await;
        world
            .cmd_clan(
                "boss",
                ClanAction::Lock {
                    group: "ALPHA".to_string(),
                },
                &store,
            )
            .await;
        world.cmd_clan("newbie", join_group("ALPHA"), &store).await;

        world.cmd_group_request("peer", 1, true, &store).await;

        let session = world.registry.get("newbie").unwrap();
        assert_eq!(session.clan_group, DEFAULT_GROUP);
        assert!(session.group_request.is_some());
    }

    #[tokio::test]
    async fn test_group_request_expires() {
        let store = store().await;
        let mut world = clan_world(
            &store,
            &[(0, "Boss", ClanRole::Leader), (1, "Newbie", ClanRole::Member)],
        )
        .await;
        world
            .cmd_clan(
                "boss",
                ClanAction::Lock {
                    group: "ALPHA".to_string(),
                },
                &store,
            )
            .await;
        world.cmd_clan("newbie", join_group("ALPHA"), &store).await;
        world.drain_notices();

        world.tick(Instant::now() + GROUP_REQUEST_WINDOW + Duration::from_secs(1));

        assert!(world.registry.get("newbie").unwrap().group_request.is_none());

        // A late approval finds nothing to act on.
        world.cmd_group_request("boss", 1, true, &store).await;
        assert_eq!(world.registry.get("newbie").unwrap().clan_group, DEFAULT_GROUP);
    }

    #[tokio::test]
    async fn test_disband_takes_confirming_repeat() {
        let store = store().await;
        let mut world = clan_world(&store, &[(0, "Boss", ClanRole::Owner)]).await;

        world.cmd_clan_disband("boss", &store).await;

        // First call only arms the window.
        assert!(world.pending_disbands.contains_key("boss"));
        assert_eq!(world.registry.get("boss").unwrap().clan_tag, "ERA");
        assert!(store.clan_exists("ERA").await.unwrap());

        world.cmd_clan_disband("boss", &store).await;

        assert!(world.pending_disbands.is_empty());
        let session = world.registry.get("boss").unwrap();
        assert_eq!(session.clan_tag, NO_CLAN);
        assert_eq!(session.role, ClanRole::Member);
        assert!(!store.clan_exists("ERA").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_disband_does_not_confirm() {
        let store = store().await;
        let mut world = clan_world(&store, &[(0, "Boss", ClanRole::Owner)]).await;

        world.cmd_clan_disband("boss", &store).await;
        world.tick(Instant::now() + DISBAND_WINDOW + Duration::from_secs(1));
        assert!(world.pending_disbands.is_empty());

        // The repeat after the window re-arms instead of disbanding.
        world.cmd_clan_disband("boss", &store).await;

        assert!(world.pending_disbands.contains_key("boss"));
        assert!(store.clan_exists("ERA").await.unwrap());
    }

    #[tokio::test]
    async fn test_non_owner_cannot_disband() {
        let store = store().await;
        let mut world = clan_world(&store, &[(0, "Grunt", ClanRole::Leader)]).await;

        world.cmd_clan_disband("grunt", &store).await;

        assert!(world.pending_disbands.is_empty());
        assert!(store.clan_exists("ERA").await.unwrap());
    }
}
