//! Durable state: player records, in-progress match checkpoints and
//! clan subdivision locks, all in one sqlite database.
//!
//! Every write is a single statement-level transaction; nothing spans
//! multiple log lines. Callers treat failures as log-and-continue
//! ([`ok_or_log`] exists for exactly that), and an explicit flush pass
//! runs on shutdown.

use log::{error, info};
use shared::{DEFAULT_RATING, DEFAULT_RD};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Clan tag of players not in any clan.
pub const NO_CLAN: &str = "NONE";
/// Subdivision every clan member starts in.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Prefix for durable keys of players with no trusted persistent id.
const TEMP_KEY_PREFIX: &str = "TEMP_";

/// A persistent id is trusted only when it is clearly not a placeholder.
pub fn is_trusted_id(id: &str) -> bool {
    !id.is_empty() && id != "0" && id.len() > 10
}

/// Durable key for a player: the trusted persistent id, or a name-derived
/// placeholder key when none exists.
pub fn store_key(trusted_id: Option<&str>, clean_name: &str) -> String {
    match trusted_id {
        Some(id) => id.to_string(),
        None => format!("{TEMP_KEY_PREFIX}{clean_name}"),
    }
}

/// Clan hierarchy, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClanRole {
    Member,
    Officer,
    Leader,
    Owner,
}

impl ClanRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ClanRole::Member => "MEMBER",
            ClanRole::Officer => "OFFICER",
            ClanRole::Leader => "LEADER",
            ClanRole::Owner => "OWNER",
        }
    }

    /// Unknown role strings fall back to MEMBER.
    pub fn from_str(s: &str) -> ClanRole {
        match s {
            "OWNER" => ClanRole::Owner,
            "LEADER" => ClanRole::Leader,
            "OFFICER" => ClanRole::Officer,
            _ => ClanRole::Member,
        }
    }

    pub fn promoted(self) -> Option<ClanRole> {
        match self {
            ClanRole::Member => Some(ClanRole::Officer),
            ClanRole::Officer => Some(ClanRole::Leader),
            _ => None,
        }
    }

    pub fn demoted(self) -> Option<ClanRole> {
        match self {
            ClanRole::Leader => Some(ClanRole::Officer),
            ClanRole::Officer => Some(ClanRole::Member),
            _ => None,
        }
    }
}

/// One durable player row.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub key: String,
    pub name: String,
    pub clean_name: String,
    pub clan_tag: String,
    pub role: ClanRole,
    pub clan_group: String,
    pub rating: f64,
    pub rd: f64,
}

/// Durable snapshot of an in-progress formal match.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub p1_key: String,
    pub p2_key: String,
    pub p1_score: u32,
    pub p2_score: u32,
    pub win_limit: u32,
    pub clan_vs_clan: bool,
}

/// Leaderboard orderings exposed to chat. Kept as an enum so user input
/// never reaches the SQL text.
#[derive(Debug, Clone, Copy)]
pub enum Leaderboard {
    Rating,
    MatchesWon,
    TournamentWins,
}

impl Leaderboard {
    fn column(self) -> &'static str {
        match self {
            Leaderboard::Rating => "duel_rating",
            Leaderboard::MatchesWon => "matches_won",
            Leaderboard::TournamentWins => "tournament_wins",
        }
    }
}

/// Logs a persistence failure and converts the result into an `Option`.
/// The worker never crashes on a failed write.
pub fn ok_or_log<T>(context: &str, result: Result<T, sqlx::Error>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            error!("db {context} failed: {e}");
            None
        }
    }
}

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Store, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Store { pool })
    }

    /// In-memory database for tests. A single connection: every handle
    /// to its own `:memory:` database would otherwise see nothing.
    pub async fn open_in_memory() -> Result<Store, sqlx::Error> {
        let options = SqliteConnectOptions::new().filename(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Store { pool })
    }

    /// Creates the schema if missing and prunes duplicate default-rating
    /// rows left behind by the id/name dual key.
    pub async fn init(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS players (
                guid TEXT PRIMARY KEY,
                name TEXT,
                clean_name TEXT,
                clan_tag TEXT DEFAULT 'NONE',
                clan_role TEXT DEFAULT 'MEMBER',
                clan_group TEXT DEFAULT 'DEFAULT',
                duel_rating REAL DEFAULT 1500,
                rating_deviation REAL DEFAULT 350,
                total_rounds_won INTEGER DEFAULT 0,
                total_rounds_lost INTEGER DEFAULT 0,
                tournament_wins INTEGER DEFAULT 0,
                matches_won INTEGER DEFAULT 0)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS active_matches (
                p1_guid TEXT,
                p2_guid TEXT,
                p1_score INTEGER,
                p2_score INTEGER,
                win_limit INTEGER,
                is_cvc INTEGER)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS clan_locks (
                clan_tag TEXT,
                group_name TEXT,
                UNIQUE(clan_tag, group_name))",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clean_name ON players(clean_name)")
            .execute(&self.pool)
            .await?;

        // A player first seen without an id and later with one ends up
        // with a stale default-rating row under the placeholder key.
        sqlx::query(
            "DELETE FROM players
             WHERE duel_rating = 1500
             AND clean_name IN (
                 SELECT clean_name FROM players WHERE duel_rating > 1500
             )",
        )
        .execute(&self.pool)
        .await?;

        info!("database initialized");
        Ok(())
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> PlayerRecord {
        PlayerRecord {
            key: row.get("guid"),
            name: row.get("name"),
            clean_name: row.get("clean_name"),
            clan_tag: row.get("clan_tag"),
            role: ClanRole::from_str(row.get::<String, _>("clan_role").as_str()),
            clan_group: row.get("clan_group"),
            rating: row.get("duel_rating"),
            rd: row.get("rating_deviation"),
        }
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Option<PlayerRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT guid, name, clean_name, clan_tag, clan_role, clan_group,
                    duel_rating, rating_deviation
             FROM players WHERE guid = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::record_from_row))
    }

    pub async fn find_by_clean_name(
        &self,
        clean_name: &str,
    ) -> Result<Option<PlayerRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT guid, name, clean_name, clan_tag, clan_role, clan_group,
                    duel_rating, rating_deviation
             FROM players WHERE clean_name = ? ORDER BY rowid DESC",
        )
        .bind(clean_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::record_from_row))
    }

    pub async fn insert_player(
        &self,
        key: &str,
        name: &str,
        clean_name: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO players
                (guid, name, clean_name, clan_tag, duel_rating, rating_deviation)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(name)
        .bind(clean_name)
        .bind(NO_CLAN)
        .bind(DEFAULT_RATING)
        .bind(DEFAULT_RD)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_rating(&self, key: &str, rating: f64, rd: f64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET duel_rating = ?, rating_deviation = ? WHERE guid = ?")
            .bind(rating)
            .bind(rd)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn bump_round(&self, winner_key: &str, loser_key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET total_rounds_won = total_rounds_won + 1 WHERE guid = ?")
            .bind(winner_key)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE players SET total_rounds_lost = total_rounds_lost + 1 WHERE guid = ?")
            .bind(loser_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn bump_matches_won(&self, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET matches_won = matches_won + 1 WHERE guid = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn bump_tournament_wins(&self, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET tournament_wins = tournament_wins + 1 WHERE guid = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn reset_player(&self, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE players SET duel_rating = ?, rating_deviation = ? WHERE guid = ?",
        )
        .bind(DEFAULT_RATING)
        .bind(DEFAULT_RD)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn matches_won(&self, key: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT matches_won FROM players WHERE guid = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await
    }

    /// Rating, rounds won, tournament wins and stored display name, for
    /// `!rank`.
    pub async fn rank_row(
        &self,
        key: &str,
        clean_name: &str,
    ) -> Result<Option<(f64, i64, i64, String)>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT duel_rating, total_rounds_won, tournament_wins, name
             FROM players WHERE guid = ? OR clean_name = ? ORDER BY rowid DESC",
        )
        .bind(key)
        .bind(clean_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| (r.get(0), r.get(1), r.get(2), r.get(3))))
    }

    // ---- clans ----

    pub async fn set_clan(
        &self,
        key: &str,
        tag: &str,
        role: ClanRole,
        group: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET clan_tag = ?, clan_role = ?, clan_group = ? WHERE guid = ?")
            .bind(tag)
            .bind(role.as_str())
            .bind(group)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_role(&self, key: &str, role: ClanRole) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET clan_role = ? WHERE guid = ?")
            .bind(role.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_group(&self, key: &str, group: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET clan_group = ? WHERE guid = ?")
            .bind(group)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Kick an offline member by normalized name.
    pub async fn clear_clan_by_clean_name(
        &self,
        clean_name: &str,
        tag: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE players SET clan_tag = 'NONE', clan_role = 'MEMBER',
                    clan_group = 'DEFAULT'
             WHERE clean_name = ? AND clan_tag = ?",
        )
        .bind(clean_name)
        .bind(tag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes every member of a clan (disband / admin delete).
    pub async fn disband_clan(&self, tag: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE players SET clan_tag = 'NONE', clan_role = 'MEMBER',
                    clan_group = 'DEFAULT'
             WHERE clan_tag = ?",
        )
        .bind(tag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn rename_group(
        &self,
        tag: &str,
        old: &str,
        new: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET clan_group = ? WHERE clan_tag = ? AND clan_group = ?")
            .bind(new)
            .bind(tag)
            .bind(old)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clan_exists(&self, tag: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM players WHERE clan_tag = ? AND clan_tag != 'NONE'",
        )
        .bind(tag)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn clan_has_owner(&self, tag: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM players WHERE clan_tag = ? AND clan_role = 'OWNER'",
        )
        .bind(tag)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn clan_roster(&self, tag: &str) -> Result<Vec<(String, String, String)>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT name, clan_role, clan_group FROM players WHERE clan_tag = ?",
        )
        .bind(tag)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get(0), r.get(1), r.get(2)))
            .collect())
    }

    pub async fn clan_tags(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows =
            sqlx::query_scalar("SELECT DISTINCT clan_tag FROM players WHERE clan_tag != 'NONE'")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    // ---- subdivision locks ----

    pub async fn lock_group(&self, tag: &str, group: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO clan_locks (clan_tag, group_name) VALUES (?, ?)")
            .bind(tag)
            .bind(group)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn unlock_group(&self, tag: &str, group: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM clan_locks WHERE clan_tag = ? AND group_name = ?")
            .bind(tag)
            .bind(group)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_locks(&self) -> Result<Vec<(String, String)>, sqlx::Error> {
        let rows = sqlx::query("SELECT clan_tag, group_name FROM clan_locks")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    // ---- checkpoints ----

    /// At most one checkpoint per unordered pair: delete-then-insert.
    pub async fn save_checkpoint(&self, cp: &Checkpoint) -> Result<(), sqlx::Error> {
        self.delete_checkpoint(&cp.p1_key, &cp.p2_key).await?;
        sqlx::query(
            "INSERT INTO active_matches
                (p1_guid, p2_guid, p1_score, p2_score, win_limit, is_cvc)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&cp.p1_key)
        .bind(&cp.p2_key)
        .bind(cp.p1_score as i64)
        .bind(cp.p2_score as i64)
        .bind(cp.win_limit as i64)
        .bind(cp.clan_vs_clan as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_checkpoint(&self, a_key: &str, b_key: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "DELETE FROM active_matches
             WHERE (p1_guid = ? AND p2_guid = ?) OR (p1_guid = ? AND p2_guid = ?)",
        )
        .bind(a_key)
        .bind(b_key)
        .bind(b_key)
        .bind(a_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_checkpoints(&self) -> Result<Vec<Checkpoint>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT p1_guid, p2_guid, p1_score, p2_score, win_limit, is_cvc
             FROM active_matches",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Checkpoint {
                p1_key: r.get(0),
                p2_key: r.get(1),
                p1_score: r.get::<i64, _>(2) as u32,
                p2_score: r.get::<i64, _>(3) as u32,
                win_limit: r.get::<i64, _>(4) as u32,
                clan_vs_clan: r.get::<i64, _>(5) != 0,
            })
            .collect())
    }

    // ---- leaderboards ----

    pub async fn top_players(
        &self,
        board: Leaderboard,
        limit: u32,
    ) -> Result<Vec<(String, f64)>, sqlx::Error> {
        let sql = format!(
            "SELECT name, {col} FROM players
             WHERE name != 'Unknown' AND name != '' AND {col} > 0
             ORDER BY {col} DESC LIMIT ?",
            col = board.column()
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    pub async fn top_clans(&self, limit: u32) -> Result<Vec<(String, f64)>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT clan_tag, AVG(duel_rating) AS avg_r
             FROM players
             WHERE clan_tag != 'NONE' AND clan_tag != '' AND name != 'Unknown'
             GROUP BY clan_tag
             ORDER BY avg_r DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.get(0), r.get(1))).collect())
    }
}
