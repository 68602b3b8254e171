//! Operator session: the protocol as the CLI sees it between invocations.
//!
//! Protocol state lives in the binary store (`state.bin`). The pieces that sit
//! outside `ProtocolState` (block clock, manual price feed, fee distributor)
//! are kept in `session.json`, and committed events are appended to
//! `events.jsonl`.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cli::config::{CliConfig, CONFIG_FILE};
use crate::cli::{CliError, CliResult};
use crate::core::fees::FeeDistributor;
use crate::oracle::price_feed::ManualPriceFeed;
use crate::protocol::events::EventRecord;
use crate::protocol::state::ProtocolState;
use crate::protocol::state_machine::ProtocolStateMachine;
use crate::storage::backend::BinaryStore;
use crate::storage::state::StateStore;

/// Session file name inside the data directory
pub const SESSION_FILE: &str = "session.json";
/// Event journal file name inside the data directory
pub const EVENTS_FILE: &str = "events.jsonl";

/// State machine driven by the CLI
pub type CliMachine = ProtocolStateMachine<ManualPriceFeed, FeeDistributor>;

/// Collaborator state persisted next to the protocol state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Last committed block height
    pub block_height: u64,
    /// Timestamp of the last committed block
    pub timestamp: u64,
    /// Operator-controlled price feed
    pub oracle: ManualPriceFeed,
    /// Fee router and its running totals
    pub fees: FeeDistributor,
}

/// Protocol state opened from a data directory
pub struct Session {
    dir: PathBuf,
    store: StateStore<BinaryStore>,
    meta: SessionMeta,
}

impl Session {
    /// Initialize a fresh protocol in `config.data_dir`
    pub fn create(config: &CliConfig, force: bool) -> CliResult<Self> {
        config.validate()?;
        let dir = config.data_dir.clone();
        std::fs::create_dir_all(&dir)?;

        let store = StateStore::new(BinaryStore::open(&dir)?);
        if store.is_initialized()? && !force {
            return Err(CliError::Config(format!(
                "protocol already initialized in {}, use --force to overwrite",
                dir.display()
            )));
        }

        let admin = config.admin_address()?;
        let (fee_address_1, fee_address_2) = config.fee_addresses()?;
        let state = ProtocolState::new(admin, config.params.clone())?;
        store.save(&state)?;

        let session = Self {
            dir,
            store,
            meta: SessionMeta {
                block_height: 0,
                timestamp: 0,
                oracle: ManualPriceFeed::new(admin),
                fees: FeeDistributor::new(admin, fee_address_1, fee_address_2)?,
            },
        };
        session.write_meta()?;
        config.save(&session.dir.join(CONFIG_FILE))?;
        if force {
            // A reinitialized protocol starts a new journal
            let _ = std::fs::remove_file(session.dir.join(EVENTS_FILE));
        }

        info!(dir = %session.dir.display(), admin = %admin.short(), "Protocol initialized");
        Ok(session)
    }

    /// Open an initialized data directory
    pub fn open(dir: &Path) -> CliResult<Self> {
        let meta_path = dir.join(SESSION_FILE);
        if !meta_path.exists() {
            return Err(CliError::NotFound(format!(
                "no protocol in {}, run `ausd init` first",
                dir.display()
            )));
        }

        let content = std::fs::read_to_string(&meta_path)?;
        let meta: SessionMeta = serde_json::from_str(&content).map_err(|e| CliError::Config(e.to_string()))?;
        let store = StateStore::new(BinaryStore::open(dir)?);

        debug!(dir = %dir.display(), height = meta.block_height, "Session opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            store,
            meta,
        })
    }

    /// Data directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persisted collaborator state
    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Build a state machine positioned at the next block.
    ///
    /// The clock never runs backwards: a `timestamp` earlier than the last
    /// committed block is raised to it.
    pub fn machine(&self, timestamp: u64) -> CliResult<CliMachine> {
        let state = self
            .store
            .load()?
            .ok_or_else(|| CliError::NotFound(format!("no protocol state in {}", self.dir.display())))?;

        let mut machine = ProtocolStateMachine::from_state(state, self.meta.oracle.clone(), self.meta.fees.clone());
        machine.begin_block(self.meta.block_height + 1, timestamp.max(self.meta.timestamp))?;
        Ok(machine)
    }

    /// Persist the machine's committed state and journal its events
    pub fn commit(&mut self, machine: &mut CliMachine) -> CliResult<Vec<EventRecord>> {
        let events = machine.end_block();
        self.store.save(machine.state())?;

        self.meta.block_height = machine.block_height();
        self.meta.timestamp = machine.timestamp();
        self.meta.oracle = machine.oracle().clone();
        self.meta.fees = machine.fee_router().clone();
        self.write_meta()?;
        self.append_events(&events)?;

        debug!(height = self.meta.block_height, events = events.len(), "Session committed");
        Ok(events)
    }

    /// Journaled events, oldest first
    pub fn events(&self) -> CliResult<Vec<EventRecord>> {
        let path = self.dir.join(EVENTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line).map_err(|e| CliError::Config(e.to_string()))?);
        }
        Ok(events)
    }

    fn write_meta(&self) -> CliResult<()> {
        let content = serde_json::to_string_pretty(&self.meta).map_err(|e| CliError::Config(e.to_string()))?;
        let path = self.dir.join(SESSION_FILE);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn append_events(&self, events: &[EventRecord]) -> CliResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(EVENTS_FILE))?;
        for record in events {
            let line = serde_json::to_string(record).map_err(|e| CliError::Config(e.to_string()))?;
            writeln!(file, "{}", line)?;
        }
        file.sync_all()?;
        Ok(())
    }
}
