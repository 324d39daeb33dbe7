use std::fmt;
use std::path::Path;

use contracts::{Command, CommandResult, RoundSnapshot, RunStatus, ScenarioConfig};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRunSummary {
    pub run_id: String,
    pub config: ScenarioConfig,
    pub status: RunStatus,
    pub round_count: usize,
}

#[derive(Debug)]
pub enum PersistenceError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    NotAttached,
    RunAlreadyExists(String),
    RunNotFound(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::NotAttached => write!(f, "sqlite store is not attached"),
            Self::RunAlreadyExists(run_id) => write!(f, "run {run_id} already persisted"),
            Self::RunNotFound(run_id) => write!(f, "run {run_id} not persisted"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

#[derive(Debug)]
pub struct SqliteRunStore {
    conn: Connection,
}

impl SqliteRunStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                config_json TEXT NOT NULL,
                status_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS rounds (
                run_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                snapshot_json TEXT NOT NULL,
                PRIMARY KEY (run_id, round)
            );
            CREATE TABLE IF NOT EXISTS commands (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                command_json TEXT NOT NULL,
                result_json TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            );",
        )?;
        Ok(())
    }

    pub fn run_exists(&self, run_id: &str) -> Result<bool, PersistenceError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT run_id FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete_run(&self, run_id: &str) -> Result<(), PersistenceError> {
        self.conn
            .execute("DELETE FROM rounds WHERE run_id = ?1", params![run_id])?;
        self.conn
            .execute("DELETE FROM commands WHERE run_id = ?1", params![run_id])?;
        self.conn
            .execute("DELETE FROM runs WHERE run_id = ?1", params![run_id])?;
        Ok(())
    }

    pub fn insert_run(
        &self,
        run_id: &str,
        config: &ScenarioConfig,
        status: &RunStatus,
    ) -> Result<(), PersistenceError> {
        if self.run_exists(run_id)? {
            return Err(PersistenceError::RunAlreadyExists(run_id.to_string()));
        }
        let config_json = serde_json::to_string(config)?;
        let status_json = serde_json::to_string(status)?;
        self.conn.execute(
            "INSERT INTO runs (run_id, config_json, status_json) VALUES (?1, ?2, ?3)",
            params![run_id, config_json, status_json],
        )?;
        Ok(())
    }

    pub fn update_status(&self, run_id: &str, status: &RunStatus) -> Result<(), PersistenceError> {
        let status_json = serde_json::to_string(status)?;
        let updated = self.conn.execute(
            "UPDATE runs SET status_json = ?2 WHERE run_id = ?1",
            params![run_id, status_json],
        )?;
        if updated == 0 {
            return Err(PersistenceError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    pub fn save_round(
        &self,
        run_id: &str,
        round: u32,
        snapshot: &RoundSnapshot,
    ) -> Result<(), PersistenceError> {
        let snapshot_json = serde_json::to_string(snapshot)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO rounds (run_id, round, snapshot_json) VALUES (?1, ?2, ?3)",
            params![run_id, round, snapshot_json],
        )?;
        Ok(())
    }

    pub fn save_command(
        &self,
        run_id: &str,
        seq: u64,
        command: &Command,
        result: &CommandResult,
    ) -> Result<(), PersistenceError> {
        let command_json = serde_json::to_string(command)?;
        let result_json = serde_json::to_string(result)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO commands (run_id, seq, command_json, result_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seq, command_json, result_json],
        )?;
        Ok(())
    }

    pub fn load_run(&self, run_id: &str) -> Result<PersistedRunSummary, PersistenceError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT config_json, status_json FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (config_json, status_json) = match row {
            Some(found) => found,
            None => return Err(PersistenceError::RunNotFound(run_id.to_string())),
        };
        let round_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM rounds WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(PersistedRunSummary {
            run_id: run_id.to_string(),
            config: serde_json::from_str(&config_json)?,
            status: serde_json::from_str(&status_json)?,
            round_count: round_count as usize,
        })
    }

    pub fn load_round(
        &self,
        run_id: &str,
        round: u32,
    ) -> Result<Option<RoundSnapshot>, PersistenceError> {
        let snapshot_json: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot_json FROM rounds WHERE run_id = ?1 AND round = ?2",
                params![run_id, round],
                |row| row.get(0),
            )
            .optional()?;
        match snapshot_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{RunMode, SCHEMA_VERSION_V1};

    fn status(run_id: &str, round: u32) -> RunStatus {
        RunStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: run_id.to_string(),
            round,
            max_rounds: 10,
            mode: RunMode::Paused,
            converged: false,
            matched_round: None,
        }
    }

    fn snapshot(run_id: &str, round: u32) -> RoundSnapshot {
        RoundSnapshot {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: run_id.to_string(),
            round,
            positions: vec![vec![0, 1], vec![1, 0]],
            unique_indices: Some(vec![0, 1]),
            class_of: Some(vec![0, 1]),
            expected_utilities: Some(vec![99.0, 99.0]),
            position_shares: Some(vec![0.5, 0.5]),
        }
    }

    #[test]
    fn runs_round_trip_through_the_store() {
        let store = SqliteRunStore::open_in_memory().expect("store");
        let config = ScenarioConfig::default();
        store
            .insert_run("run_1", &config, &status("run_1", 0))
            .expect("insert");
        assert!(store.run_exists("run_1").expect("exists"));
        assert!(matches!(
            store.insert_run("run_1", &config, &status("run_1", 0)),
            Err(PersistenceError::RunAlreadyExists(_))
        ));

        store
            .save_round("run_1", 0, &snapshot("run_1", 0))
            .expect("round 0");
        store
            .save_round("run_1", 1, &snapshot("run_1", 1))
            .expect("round 1");
        store
            .update_status("run_1", &status("run_1", 1))
            .expect("status");

        let summary = store.load_run("run_1").expect("summary");
        assert_eq!(summary.round_count, 2);
        assert_eq!(summary.status.round, 1);
        assert_eq!(summary.config, config);

        let loaded = store.load_round("run_1", 1).expect("load").expect("present");
        assert_eq!(loaded, snapshot("run_1", 1));
        assert!(store.load_round("run_1", 9).expect("load").is_none());
    }

    #[test]
    fn deleting_a_run_clears_all_tables() {
        let store = SqliteRunStore::open_in_memory().expect("store");
        let config = ScenarioConfig::default();
        store
            .insert_run("run_2", &config, &status("run_2", 0))
            .expect("insert");
        store
            .save_round("run_2", 0, &snapshot("run_2", 0))
            .expect("round");
        let command = Command::new(
            "cmd_1",
            "run_2",
            0,
            contracts::CommandType::SimStep,
            contracts::CommandPayload::SimStep { rounds: 1 },
        );
        let result = CommandResult::accepted(&command);
        store
            .save_command("run_2", 0, &command, &result)
            .expect("command");

        store.delete_run("run_2").expect("delete");
        assert!(!store.run_exists("run_2").expect("exists"));
        assert!(store.load_round("run_2", 0).expect("load").is_none());
        assert!(matches!(
            store.load_run("run_2"),
            Err(PersistenceError::RunNotFound(_))
        ));
    }
}
