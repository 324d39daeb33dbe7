//! In-process API facade with command validation, deterministic round
//! control, and SQLite persistence.

mod persistence;
mod server;

use std::path::Path;

use contracts::{
    ApiError, Command, CommandPayload, CommandResult, CommandType, ErrorCode, RoundSnapshot,
    RunStatus, ScenarioConfig, SCHEMA_VERSION_V1,
};
use kernel_core::{CapabilityError, NegotiationEngine, ScenarioError, StepError};
use persistence::SqliteRunStore;
pub use persistence::{PersistedRunSummary, PersistenceError};
pub use server::{serve, ServerError};

#[derive(Debug)]
struct PersistenceState {
    store: SqliteRunStore,
    persisted_rounds: usize,
    persisted_commands: u64,
}

#[derive(Debug)]
pub struct EngineApi {
    engine: NegotiationEngine,
    command_audit: Vec<CommandResult>,
    persistence: Option<PersistenceState>,
    last_persistence_error: Option<String>,
}

impl EngineApi {
    pub fn from_config(config: ScenarioConfig) -> Result<Self, ScenarioError> {
        Ok(Self {
            engine: NegotiationEngine::new(config)?,
            command_audit: Vec::new(),
            persistence: None,
            last_persistence_error: None,
        })
    }

    pub fn status(&self) -> RunStatus {
        self.engine.status().clone()
    }

    pub fn config(&self) -> &ScenarioConfig {
        self.engine.config()
    }

    pub fn run_id(&self) -> &str {
        &self.engine.status().run_id
    }

    pub fn round_count(&self) -> usize {
        self.engine.round_count()
    }

    pub fn round_snapshot(&self, round: usize) -> Option<RoundSnapshot> {
        self.engine.round_snapshot(round)
    }

    pub fn round_report(&self, round: usize) -> Option<String> {
        self.engine.round_report(round)
    }

    pub fn command_audit(&self) -> &[CommandResult] {
        &self.command_audit
    }

    /// Advance up to `rounds` rounds and persist whatever is new.
    pub fn step(&mut self, rounds: u32) -> Result<(RunStatus, u32), StepError> {
        let committed = self.engine.advance_rounds(rounds)?;
        self.persist_progress();
        Ok((self.status(), committed))
    }

    /// Run until convergence, a cycle, or the round budget.
    pub fn run_to_convergence(&mut self) -> Result<(RunStatus, u32), StepError> {
        let committed = self.engine.run_to_convergence()?;
        self.persist_progress();
        Ok((self.status(), committed))
    }

    /// Validate and execute one control-plane command. Rejections come back
    /// as results, not errors; engine faults surface as `InternalError`
    /// rejections carrying the diagnostic.
    pub fn apply_command(&mut self, command: Command) -> CommandResult {
        let result = self.execute_command(&command);
        self.record_command(&command, &result);
        result
    }

    fn execute_command(&mut self, command: &Command) -> CommandResult {
        if command.schema_version != SCHEMA_VERSION_V1 {
            return CommandResult::rejected(
                command,
                ApiError::new(
                    ErrorCode::ContractVersionUnsupported,
                    "unsupported command schema version",
                    Some(command.schema_version.clone()),
                ),
            );
        }
        if command.run_id != self.run_id() {
            return CommandResult::rejected(
                command,
                ApiError::new(
                    ErrorCode::RunNotFound,
                    "command run_id does not match the active run",
                    Some(format!(
                        "requested_run_id={} active_run_id={}",
                        command.run_id,
                        self.run_id()
                    )),
                ),
            );
        }

        match (&command.command_type, &command.payload) {
            (CommandType::SimStart, CommandPayload::SimStart) => {
                self.engine.start();
                CommandResult::accepted(command)
            }
            (CommandType::SimPause, CommandPayload::SimPause) => {
                self.engine.pause();
                CommandResult::accepted(command)
            }
            (CommandType::SimStep, CommandPayload::SimStep { rounds }) => {
                match self.step(*rounds) {
                    Ok(_) => CommandResult::accepted(command),
                    Err(err) => CommandResult::rejected(
                        command,
                        ApiError::new(
                            ErrorCode::InternalError,
                            "round transition failed",
                            Some(err.to_string()),
                        ),
                    ),
                }
            }
            (CommandType::SimRun, CommandPayload::SimRun) => match self.run_to_convergence() {
                Ok(_) => CommandResult::accepted(command),
                Err(err) => CommandResult::rejected(
                    command,
                    ApiError::new(
                        ErrorCode::InternalError,
                        "round transition failed",
                        Some(err.to_string()),
                    ),
                ),
            },
            (
                CommandType::SetCapability,
                CommandPayload::SetCapability {
                    actor_index,
                    capability,
                },
            ) => match self.engine.set_capability(*actor_index, *capability) {
                Ok(()) => CommandResult::accepted(command),
                Err(CapabilityError::RunStarted) => CommandResult::rejected(
                    command,
                    ApiError::new(
                        ErrorCode::RunStateConflict,
                        "capability can only be adjusted before the run starts",
                        None,
                    ),
                ),
                Err(err) => CommandResult::rejected(
                    command,
                    ApiError::new(ErrorCode::InvalidCommand, "bad capability command", Some(err.to_string())),
                ),
            },
            _ => CommandResult::rejected(
                command,
                ApiError::new(
                    ErrorCode::InvalidCommand,
                    "command payload does not match command type",
                    None,
                ),
            ),
        }
    }

    fn record_command(&mut self, command: &Command, result: &CommandResult) {
        self.command_audit.push(result.clone());
        let seq = match &self.persistence {
            Some(state) => state.persisted_commands,
            None => return,
        };
        let run_id = self.run_id().to_string();
        if let Some(state) = self.persistence.as_mut() {
            match state.store.save_command(&run_id, seq, command, result) {
                Ok(()) => state.persisted_commands += 1,
                Err(err) => self.last_persistence_error = Some(err.to_string()),
            }
        }
    }

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let store = SqliteRunStore::open(path)?;
        self.persistence = Some(PersistenceState {
            store,
            persisted_rounds: 0,
            persisted_commands: 0,
        });
        Ok(())
    }

    #[cfg(test)]
    fn attach_memory_store(&mut self) -> Result<(), PersistenceError> {
        let store = SqliteRunStore::open_in_memory()?;
        self.persistence = Some(PersistenceState {
            store,
            persisted_rounds: 0,
            persisted_commands: 0,
        });
        Ok(())
    }

    /// Register the active run in the store, optionally replacing a
    /// previously persisted run with the same id.
    pub fn initialize_run_storage(
        &mut self,
        replace_existing_run: bool,
    ) -> Result<(), PersistenceError> {
        let run_id = self.run_id().to_string();
        let config = self.config().clone();
        let status = self.status();
        let state = match self.persistence.as_mut() {
            Some(state) => state,
            None => return Err(PersistenceError::NotAttached),
        };
        if state.store.run_exists(&run_id)? {
            if replace_existing_run {
                state.store.delete_run(&run_id)?;
                state.persisted_rounds = 0;
                state.persisted_commands = 0;
            } else {
                return Err(PersistenceError::RunAlreadyExists(run_id));
            }
        }
        state.store.insert_run(&run_id, &config, &status)?;
        Ok(())
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    /// Persist rounds appended since the last call plus the current status.
    /// Persistence faults never fail the engine; they are latched for the
    /// caller to inspect.
    fn persist_progress(&mut self) {
        let round_count = self.engine.round_count();
        let status = self.status();
        let run_id = status.run_id.clone();

        let from = match &self.persistence {
            Some(state) => state.persisted_rounds,
            None => return,
        };
        for round in from..round_count {
            let snapshot = match self.engine.round_snapshot(round) {
                Some(snapshot) => snapshot,
                None => break,
            };
            let sealed = snapshot.expected_utilities.is_some();
            let state = match self.persistence.as_mut() {
                Some(state) => state,
                None => return,
            };
            match state.store.save_round(&run_id, round as u32, &snapshot) {
                Ok(()) => {
                    // The newest round is written before it has been valued;
                    // leave the cursor on it so the sealed version replaces
                    // this one on the next pass.
                    if sealed {
                        state.persisted_rounds = round + 1;
                    }
                }
                Err(err) => {
                    self.last_persistence_error = Some(err.to_string());
                    return;
                }
            }
            if !sealed {
                break;
            }
        }
        if let Some(state) = self.persistence.as_mut() {
            if let Err(err) = state.store.update_status(&run_id, &status) {
                self.last_persistence_error = Some(err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_core::scenario::generated_scenario;

    fn api(seed: u64) -> EngineApi {
        let mut config = generated_scenario(seed, 4, 3);
        config.worker_threads = 1;
        config.run_id = format!("run_test_{seed}");
        EngineApi::from_config(config).expect("api")
    }

    fn command(api: &EngineApi, command_type: CommandType, payload: CommandPayload) -> Command {
        Command::new(
            "cmd_1",
            api.run_id().to_string(),
            api.status().round,
            command_type,
            payload,
        )
    }

    #[test]
    fn step_command_advances_and_audits() {
        let mut api = api(3);
        let cmd = command(
            &api,
            CommandType::SimStep,
            CommandPayload::SimStep { rounds: 1 },
        );
        let result = api.apply_command(cmd);
        assert!(result.accepted);
        assert_eq!(api.status().round, 1);
        assert_eq!(api.command_audit().len(), 1);
    }

    #[test]
    fn mismatched_run_id_is_rejected() {
        let mut api = api(5);
        let mut cmd = command(&api, CommandType::SimStart, CommandPayload::SimStart);
        cmd.run_id = "some_other_run".to_string();
        let result = api.apply_command(cmd);
        assert!(!result.accepted);
        assert_eq!(
            result.error.map(|e| e.error_code),
            Some(ErrorCode::RunNotFound)
        );
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let mut api = api(7);
        let cmd = command(&api, CommandType::SimStep, CommandPayload::SimRun);
        let result = api.apply_command(cmd);
        assert!(!result.accepted);
        assert_eq!(
            result.error.map(|e| e.error_code),
            Some(ErrorCode::InvalidCommand)
        );
    }

    #[test]
    fn capability_command_conflicts_after_the_run_starts() {
        let mut api = api(11);
        api.step(1).expect("step");
        let cmd = command(
            &api,
            CommandType::SetCapability,
            CommandPayload::SetCapability {
                actor_index: 0,
                capability: 50.0,
            },
        );
        let result = api.apply_command(cmd);
        assert!(!result.accepted);
        assert_eq!(
            result.error.map(|e| e.error_code),
            Some(ErrorCode::RunStateConflict)
        );
    }

    #[test]
    fn rounds_and_status_persist_through_a_run() {
        let mut api = api(13);
        api.attach_memory_store().expect("store");
        api.initialize_run_storage(true).expect("init storage");
        let (status, committed) = api.run_to_convergence().expect("run");
        assert!(committed > 0);
        assert!(api.last_persistence_error().is_none());

        let state = api.persistence.as_ref().expect("persistence attached");
        let summary = state.store.load_run(api.run_id()).expect("summary");
        assert_eq!(summary.status, status);
        assert_eq!(summary.round_count, api.round_count());
        let first = state
            .store
            .load_round(api.run_id(), 0)
            .expect("load")
            .expect("round 0 persisted");
        assert_eq!(first.round, 0);
    }
}
