//! Duel rating tracker daemon.
//!
//! Tails a game server's log, classifies lines into events, reconciles
//! player identity across unstable slots, runs the duel/match state
//! machine and Glicko ratings, schedules tournaments, and talks back to
//! the server over its UDP control channel.

pub mod chat;
pub mod clans;
pub mod config;
pub mod duels;
pub mod rcon;
pub mod registry;
pub mod store;
pub mod tail;
pub mod tournament;
pub mod world;
