pub mod commands;
pub mod events;
pub mod names;
pub mod rating;

pub use commands::{AdminAction, ChatCommand};
pub use events::Event;
pub use names::normalize;
pub use rating::Glicko;

/// Starting rating for a player never seen before.
pub const DEFAULT_RATING: f64 = 1500.0;
/// Starting rating deviation for a player never seen before.
pub const DEFAULT_RD: f64 = 350.0;
/// Deviation never drops below this after an update.
pub const RD_FLOOR: f64 = 30.0;
/// Default first-to-N round limit for formal matches.
pub const DEFAULT_WIN_LIMIT: u32 = 5;
/// Team id the game reports for spectators; spectators cannot duel.
pub const SPECTATOR_TEAM: &str = "3";
