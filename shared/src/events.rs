//! Log-line classification.
//!
//! The game server's log is an append-only text feed with no framing
//! guarantees: lines repeat, markers move column, and names arrive with
//! markup attached. [`classify`] turns one trimmed line into at most one
//! typed [`Event`] and drops everything it does not recognize. It is
//! stateless and deterministic; all duplicate suppression happens later
//! in the duel state machine.

/// One recognized log event. Names are carried raw; normalization is the
/// consumer's job so the classifier stays a pure string function.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The server restarted or changed map; every slot id is now invalid.
    GameReset,
    /// A connected client (re)announced its name and team.
    IdentityChanged {
        slot: u32,
        raw_name: String,
        team: String,
    },
    /// The engine reported a persistent id for a slot.
    GuidObserved { slot: u32, id: String },
    /// Two players entered a private duel.
    DuelStarted { raw_a: String, raw_b: String },
    /// A private duel finished.
    DuelEnded {
        raw_winner: String,
        raw_loser: String,
    },
    /// A client left the server.
    ClientDisconnected { slot: u32 },
    /// A command issued on the privileged admin channel.
    AdminCommand {
        raw_admin: String,
        admin_id: u32,
        raw_message: String,
    },
    /// Ordinary chat. The slot prefix is missing on some engine builds,
    /// so consumers must be able to fall back to the speaker name.
    ChatMessage {
        slot: Option<u32>,
        raw_speaker: String,
        raw_message: String,
    },
}

/// Classifies one trimmed log line. Returns `None` for anything that is
/// not a recognized event.
pub fn classify(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.contains("InitGame:") {
        return Some(Event::GameReset);
    }

    if let Some(event) = parse_userinfo(line) {
        return Some(event);
    }
    if let Some(event) = parse_guid(line) {
        return Some(event);
    }
    if let Some(event) = parse_duel_start(line) {
        return Some(event);
    }
    if let Some(event) = parse_duel_end(line) {
        return Some(event);
    }
    if let Some(event) = parse_disconnect(line) {
        return Some(event);
    }
    if let Some(event) = parse_admin(line) {
        return Some(event);
    }
    parse_chat(line)
}

/// ASCII case-insensitive substring search. Returns a byte index that is
/// always a char boundary because the needle starts with an ASCII byte.
fn find_ci(hay: &str, needle: &str) -> Option<usize> {
    let h = hay.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|i| &line[i + marker.len()..])
}

fn leading_digits(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    s[..end].parse().ok().map(|n| (n, &s[end..]))
}

/// `ClientUserinfoChanged: 4 n\^1Valzhar\t\1\...`
fn parse_userinfo(line: &str) -> Option<Event> {
    let rest = after(line, "ClientUserinfoChanged:")?.trim_start();
    let (slot, rest) = leading_digits(rest)?;
    let body = after(rest, "n\\")?;
    let name_end = body.find("\\t\\")?;
    let raw_name = body[..name_end].trim().to_string();
    let team_part = &body[name_end + 3..];
    let team_end = team_part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(team_part.len());
    if team_end == 0 {
        return None;
    }
    Some(Event::IdentityChanged {
        slot,
        raw_name,
        team: team_part[..team_end].to_string(),
    })
}

/// `Player 0: zaanne ... ja_guid\ABCDEF0123456789ABCDEF0123456789`
fn parse_guid(line: &str) -> Option<Event> {
    let guid_part = after(line, "ja_guid\\")?;
    let guid_end = guid_part
        .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit()))
        .unwrap_or(guid_part.len());
    if guid_end != 32 {
        return None;
    }

    let head = ["Player", "ClientInfo"]
        .iter()
        .find_map(|marker| after(line, marker))?;
    let (slot, _) = leading_digits(head.trim_start())?;

    Some(Event::GuidObserved {
        slot,
        id: guid_part[..guid_end].to_string(),
    })
}

/// `DuelStart: A challenged B to a private duel`
fn parse_duel_start(line: &str) -> Option<Event> {
    let rest = after(line, "DuelStart:")?;
    let challenged = rest.find(" challenged ")?;
    let raw_a = rest[..challenged].trim();
    let tail = &rest[challenged + " challenged ".len()..];
    let end = tail.find(" to a private duel")?;
    let raw_b = tail[..end].trim();
    if raw_a.is_empty() || raw_b.is_empty() {
        return None;
    }
    Some(Event::DuelStarted {
        raw_a: raw_a.to_string(),
        raw_b: raw_b.to_string(),
    })
}

/// `DuelEnd: W has defeated L in a private duel` (marker case varies
/// between engine builds).
fn parse_duel_end(line: &str) -> Option<Event> {
    let start = find_ci(line, "duelend:")?;
    let rest = &line[start + "duelend:".len()..];
    let defeated = find_ci(rest, " has defeated ")?;
    let raw_winner = rest[..defeated].trim();
    let tail = &rest[defeated + " has defeated ".len()..];
    let end = find_ci(tail, " in a private duel")?;
    let raw_loser = tail[..end].trim();
    if raw_winner.is_empty() || raw_loser.is_empty() {
        return None;
    }
    Some(Event::DuelEnded {
        raw_winner: raw_winner.to_string(),
        raw_loser: raw_loser.to_string(),
    })
}

fn parse_disconnect(line: &str) -> Option<Event> {
    let rest = after(line, "ClientDisconnect:")?.trim_start();
    let (slot, _) = leading_digits(rest)?;
    Some(Event::ClientDisconnected { slot })
}

/// `SMOD smsay: Admin (adminID: 3) (...): !promote someone`
fn parse_admin(line: &str) -> Option<Event> {
    let rest = after(line, "SMOD smsay:")?;
    let id_open = rest.find("(adminID:")?;
    let raw_admin = rest[..id_open].trim().to_string();
    let id_part = rest[id_open + "(adminID:".len()..].trim_start();
    let (admin_id, _) = leading_digits(id_part)?;
    // The message follows the last parenthesized header segment.
    let close = rest[id_open..].find("):").map(|i| i + id_open)?;
    let tail = &rest[close + 2..];
    let msg_start = tail.find("):").map(|i| i + 2).unwrap_or(0);
    let raw_message = tail[msg_start..].trim().to_string();
    if raw_admin.is_empty() || raw_message.is_empty() {
        return None;
    }
    Some(Event::AdminCommand {
        raw_admin,
        admin_id,
        raw_message,
    })
}

/// `4: say: Valzhar: "!rank"` or `tell:` variants. Server and console
/// chatter is dropped here so the command layer never sees it.
fn parse_chat(line: &str) -> Option<Event> {
    let marker = find_ci(line, "say:").or_else(|| find_ci(line, "tell:"))?;
    let lower = line.to_ascii_lowercase();
    if lower.contains("say: server:") || lower.contains("say: console:") {
        return None;
    }

    let marker_end = marker + line[marker..].find(':').unwrap_or(0) + 1;
    let rest = &line[marker_end..];

    let first_quote = rest.find('"')?;
    let last_quote = rest.rfind('"')?;
    if last_quote <= first_quote {
        return None;
    }
    let raw_message = rest[first_quote + 1..last_quote].trim().to_string();

    let speaker_part = &rest[..first_quote];
    let raw_speaker = speaker_part
        .split(':')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    if raw_speaker.is_empty() || raw_message.is_empty() {
        return None;
    }

    // Slot digits sit directly before the say/tell marker when present.
    let head = line[..marker].trim_end();
    let head = head.strip_suffix(':').unwrap_or(head).trim_end();
    let digit_start = head
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let slot = head[digit_start..].parse().ok();

    Some(Event::ChatMessage {
        slot,
        raw_speaker,
        raw_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_lines_dropped() {
        assert_eq!(classify(""), None);
        assert_eq!(classify("ShutdownGame:"), None);
        assert_eq!(classify("Kill: 2 5 11: foo killed bar"), None);
    }

    #[test]
    fn test_game_reset() {
        assert_eq!(
            classify(r"0:00 InitGame: \sv_hostname\Duel Server\..."),
            Some(Event::GameReset)
        );
    }

    #[test]
    fn test_userinfo_changed() {
        let line = r"ClientUserinfoChanged: 4 n\^1Val^7zhar\t\1\model\jedi";
        assert_eq!(
            classify(line),
            Some(Event::IdentityChanged {
                slot: 4,
                raw_name: "^1Val^7zhar".to_string(),
                team: "1".to_string(),
            })
        );
    }

    #[test]
    fn test_guid_observed() {
        let guid = "ABCDEF0123456789ABCDEF0123456789";
        let line = format!(r"Player 7: zaanne ja_guid\{guid}\rest");
        assert_eq!(
            classify(&line),
            Some(Event::GuidObserved {
                slot: 7,
                id: guid.to_string(),
            })
        );
    }

    #[test]
    fn test_guid_requires_full_length() {
        let line = r"Player 7: zaanne ja_guid\ABCDEF\rest";
        assert_eq!(classify(line), None);
    }

    #[test]
    fn test_duel_start() {
        let line = "DuelStart: ^2Kyle challenged ^5Jaden^7 to a private duel";
        assert_eq!(
            classify(line),
            Some(Event::DuelStarted {
                raw_a: "^2Kyle".to_string(),
                raw_b: "^5Jaden^7".to_string(),
            })
        );
    }

    #[test]
    fn test_duel_end_case_insensitive() {
        let line = "duelend: Kyle HAS DEFEATED Jaden in a private duel";
        assert_eq!(
            classify(line),
            Some(Event::DuelEnded {
                raw_winner: "Kyle".to_string(),
                raw_loser: "Jaden".to_string(),
            })
        );
    }

    #[test]
    fn test_client_disconnect() {
        assert_eq!(
            classify("ClientDisconnect: 12"),
            Some(Event::ClientDisconnected { slot: 12 })
        );
    }

    #[test]
    fn test_admin_command() {
        let line = "SMOD smsay: Valzhar (adminID: 3) (IP: 1.2.3.4): !promote kyle";
        assert_eq!(
            classify(line),
            Some(Event::AdminCommand {
                raw_admin: "Valzhar".to_string(),
                admin_id: 3,
                raw_message: "!promote kyle".to_string(),
            })
        );
    }

    #[test]
    fn test_chat_with_slot() {
        let line = r#"4: say: Valzhar: "!rank""#;
        assert_eq!(
            classify(line),
            Some(Event::ChatMessage {
                slot: Some(4),
                raw_speaker: "Valzhar".to_string(),
                raw_message: "!rank".to_string(),
            })
        );
    }

    #[test]
    fn test_chat_without_slot() {
        let line = r#"say: Valzhar: "!dtop""#;
        assert_eq!(
            classify(line),
            Some(Event::ChatMessage {
                slot: None,
                raw_speaker: "Valzhar".to_string(),
                raw_message: "!dtop".to_string(),
            })
        );
    }

    #[test]
    fn test_server_chat_dropped() {
        assert_eq!(classify(r#"say: server: "welcome""#), None);
        assert_eq!(classify(r#"say: console: "restarting""#), None);
    }

    #[test]
    fn test_classifier_is_deterministic() {
        let line = "DuelStart: A challenged B to a private duel";
        assert_eq!(classify(line), classify(line));
    }
}
