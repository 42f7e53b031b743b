//! UDP control channel to the game server.
//!
//! One datagram per request: a four-byte marker, then an ASCII command
//! carrying the admin secret. Only `status` elicits a reply; everything
//! else is fire-and-forget, and losing a notification is acceptable.

use crate::world::Notice;
use log::{debug, warn};
use shared::names::strip_trailing_color;
use std::io;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const MARKER: &[u8] = &[0xff, 0xff, 0xff, 0xff];
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RconClient {
    socket: UdpSocket,
    secret: String,
}

impl RconClient {
    pub async fn connect(server_addr: &str, secret: &str) -> io::Result<RconClient> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server_addr).await?;
        Ok(RconClient {
            socket,
            secret: secret.to_string(),
        })
    }

    fn frame(&self, command: &str) -> Vec<u8> {
        let mut packet = MARKER.to_vec();
        packet.extend_from_slice(format!("rcon \"{}\" {command}", self.secret).as_bytes());
        packet
    }

    pub async fn send(&self, command: &str) -> io::Result<()> {
        debug!("rcon: {command}");
        self.socket.send(&self.frame(command)).await?;
        Ok(())
    }

    pub async fn deliver(&self, notice: &Notice) -> io::Result<()> {
        match notice {
            Notice::Broadcast(text) => self.send(&format!("svsay \"{}\"", sanitize(text))).await,
            Notice::Direct(slot, text) => {
                self.send(&format!("svtell {slot} \"{}\"", sanitize(text)))
                    .await
            }
        }
    }

    /// Issues `status` and waits briefly for the reply. A timeout is a
    /// normal outcome (server busy or packet lost), reported as `None`.
    pub async fn status(&self) -> io::Result<Option<String>> {
        self.send("status").await?;
        let mut buf = vec![0u8; 8192];
        match timeout(REPLY_TIMEOUT, self.socket.recv(&mut buf)).await {
            Ok(Ok(len)) => Ok(Some(strip_reply(&buf[..len]))),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("status query timed out");
                Ok(None)
            }
        }
    }
}

/// Command text is embedded in quotes; stray quotes would split it.
fn sanitize(text: &str) -> String {
    text.replace('"', "'")
}

/// Strips the marker and the `print` header line from a reply.
fn strip_reply(raw: &[u8]) -> String {
    let mut body = raw;
    if body.starts_with(MARKER) {
        body = &body[MARKER.len()..];
    }
    if let Some(rest) = body.strip_prefix(b"print") {
        body = rest;
    }
    if let Some(rest) = body.strip_prefix(b"\n") {
        body = rest;
    }
    String::from_utf8_lossy(body).into_owned()
}

/// Parses a status reply into (slot, display name) pairs.
pub fn parse_roster(reply: &str) -> Vec<(u32, String)> {
    reply.lines().filter_map(parse_roster_line).collect()
}

/// One roster row: `slot score ping name... address ...`. Column widths
/// vary between builds, so the name is everything between the ping and
/// the first IPv4-looking token.
fn parse_roster_line(line: &str) -> Option<(u32, String)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }
    let slot: u32 = tokens[0].parse().ok()?;
    let _score: i64 = tokens[1].parse().ok()?;
    let _ping: u32 = tokens[2].parse().ok()?;

    let ip_idx = tokens.iter().position(|t| is_ipv4_prefixed(t))?;
    if ip_idx <= 3 {
        return None;
    }
    let name = tokens[3..ip_idx].join(" ");
    let name = strip_trailing_color(&name).trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some((slot, name))
}

/// `a.b.c.d` optionally followed by `:port`.
fn is_ipv4_prefixed(token: &str) -> bool {
    let host = token.split(':').next().unwrap_or("");
    let octets: Vec<&str> = host.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|o| !o.is_empty() && o.len() <= 3 && o.bytes().all(|b| b.is_ascii_digit()))
}
