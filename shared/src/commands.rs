//! Chat and admin command grammar.
//!
//! Commands are case-insensitive and space-delimited. Parsing is pure:
//! anything with the wrong arity or a non-numeric argument where a
//! number is required yields `None` and the line is dropped with no
//! state change. Target names may contain spaces (`!dduel Dark Lord 3`).

use crate::DEFAULT_WIN_LIMIT;

/// A clan subcommand under `!dclan`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClanAction {
    Show,
    Promote { target: String },
    Demote { target: String },
    Rename { old: String, new: String },
    Assign { target: String, group: String },
    Kick { target: String },
    Quit,
    Lock { group: String },
    JoinGroup { group: String },
    Ownership { target: String },
}

/// A command typed in public chat.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Duel { target: String, rounds: u32 },
    Accept,
    Decline,
    Forfeit,
    Pause,
    Resume,
    Rank { target: Option<String> },
    TopRatings,
    TopMatches,
    TopTournaments,
    TopClans,
    Help,
    TournamentHelp,
    TournamentStart { limit: u32 },
    TournamentJoin,
    TournamentForfeit,
    ClanTagRegister { tag: String },
    ClanDisband,
    Clan(ClanAction),
    GroupAccept { slot: u32 },
    GroupDecline { slot: u32 },
}

impl ChatCommand {
    /// Parses one chat message. Non-commands and malformed commands
    /// return `None`.
    pub fn parse(message: &str) -> Option<ChatCommand> {
        let words: Vec<&str> = message.split_whitespace().collect();
        let head = words.first()?.to_ascii_lowercase();
        if !head.starts_with('!') {
            return None;
        }

        match head.as_str() {
            "!dduel" => {
                // Last word is the round count, everything between is the
                // target (names may contain spaces).
                if words.len() < 3 {
                    return None;
                }
                let rounds: u32 = words.last()?.parse().ok()?;
                if rounds == 0 {
                    return None;
                }
                Some(ChatCommand::Duel {
                    target: words[1..words.len() - 1].join(" "),
                    rounds,
                })
            }
            "!dyes" => Some(ChatCommand::Accept),
            "!dno" => Some(ChatCommand::Decline),
            "!dforfeit" => Some(ChatCommand::Forfeit),
            "!dpause" => Some(ChatCommand::Pause),
            "!dresume" => Some(ChatCommand::Resume),
            "!rank" => Some(ChatCommand::Rank {
                target: (words.len() > 1).then(|| words[1..].join(" ")),
            }),
            "!dtop" => Some(ChatCommand::TopRatings),
            "!fttop" => Some(ChatCommand::TopMatches),
            "!ttop" => Some(ChatCommand::TopTournaments),
            "!dclantop" => Some(ChatCommand::TopClans),
            "!dhelp" => Some(ChatCommand::Help),
            "!thelp" => Some(ChatCommand::TournamentHelp),
            "!tstart" => {
                let limit = match words.get(1) {
                    Some(w) => w.parse().ok()?,
                    None => DEFAULT_WIN_LIMIT,
                };
                if limit == 0 {
                    return None;
                }
                Some(ChatCommand::TournamentStart { limit })
            }
            "!tyes" => Some(ChatCommand::TournamentJoin),
            "!tforfeit" => Some(ChatCommand::TournamentForfeit),
            "!dclantag" => {
                if words.len() >= 3 && words[1].eq_ignore_ascii_case("register") {
                    Some(ChatCommand::ClanTagRegister {
                        tag: words[2].to_ascii_uppercase(),
                    })
                } else {
                    None
                }
            }
            "!dclandisband" => Some(ChatCommand::ClanDisband),
            "!dclan" => parse_clan(&words[1..]).map(ChatCommand::Clan),
            "!daccept" => Some(ChatCommand::GroupAccept {
                slot: words.get(1)?.parse().ok()?,
            }),
            "!ddecline" => Some(ChatCommand::GroupDecline {
                slot: words.get(1)?.parse().ok()?,
            }),
            _ => None,
        }
    }
}

fn parse_clan(args: &[&str]) -> Option<ClanAction> {
    let sub = args.first()?.to_ascii_lowercase();
    match sub.as_str() {
        "show" => Some(ClanAction::Show),
        "quit" => Some(ClanAction::Quit),
        "promote" => Some(ClanAction::Promote {
            target: args.get(1)?.to_string(),
        }),
        "demote" => Some(ClanAction::Demote {
            target: args.get(1)?.to_string(),
        }),
        "kick" => Some(ClanAction::Kick {
            target: args.get(1)?.to_string(),
        }),
        "rename" => Some(ClanAction::Rename {
            old: args.get(1)?.to_ascii_uppercase(),
            new: args.get(2)?.to_ascii_uppercase(),
        }),
        "group" => Some(ClanAction::Assign {
            target: args.get(1)?.to_string(),
            group: args.get(2)?.to_ascii_uppercase(),
        }),
        "lock" => Some(ClanAction::Lock {
            group: args.get(1)?.to_ascii_uppercase(),
        }),
        "join" => {
            // `!dclan join group <NAME>`
            if args.get(1)?.eq_ignore_ascii_case("group") {
                Some(ClanAction::JoinGroup {
                    group: args.get(2)?.to_ascii_uppercase(),
                })
            } else {
                None
            }
        }
        "ownership" => Some(ClanAction::Ownership {
            target: args.get(1)?.to_string(),
        }),
        _ => None,
    }
}

/// A command issued on the privileged admin channel. The leading `!` is
/// optional there.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminAction {
    Help,
    OpenTournamentLobby { clan_vs_clan: bool },
    CancelTournament { clan_vs_clan: bool },
    ClanList,
    ClanDelete { tag: String },
    SetClan { target: String, tag: String },
    SetGroup { target: String, group: String },
    PromoteOwner { target: String },
    ResetPlayer { target: String },
}

impl AdminAction {
    pub fn parse(message: &str) -> Option<AdminAction> {
        let words: Vec<&str> = message.split_whitespace().collect();
        let head = words.first()?.trim_start_matches('!').to_ascii_lowercase();

        match head.as_str() {
            "dhelp" | "help" => Some(AdminAction::Help),
            "cstart" => Some(match words.get(1) {
                Some(w) if w.eq_ignore_ascii_case("cancel") => {
                    AdminAction::CancelTournament { clan_vs_clan: true }
                }
                _ => AdminAction::OpenTournamentLobby { clan_vs_clan: true },
            }),
            "tstart" => Some(match words.get(1) {
                Some(w) if w.eq_ignore_ascii_case("cancel") => {
                    AdminAction::CancelTournament {
                        clan_vs_clan: false,
                    }
                }
                _ => AdminAction::OpenTournamentLobby {
                    clan_vs_clan: false,
                },
            }),
            "clanlist" => Some(AdminAction::ClanList),
            "clandelete" => Some(AdminAction::ClanDelete {
                tag: words.get(1)?.to_ascii_uppercase(),
            }),
            "clan" => Some(AdminAction::SetClan {
                target: words.get(1)?.to_string(),
                tag: words.get(2)?.to_ascii_uppercase(),
            }),
            "group" => Some(AdminAction::SetGroup {
                target: words.get(1)?.to_string(),
                group: words.get(2)?.to_ascii_uppercase(),
            }),
            "promote" => Some(AdminAction::PromoteOwner {
                target: words.get(1)?.to_string(),
            }),
            "resetplayer" => Some(AdminAction::ResetPlayer {
                target: words.get(1)?.to_string(),
            }),
            _ => None,
        }
    }
}
