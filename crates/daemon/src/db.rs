use std::path::Path;

use async_trait::async_trait;
use fleet_core::model::{
    Command, CommandId, CommandStatus, Machine, MachineId, NewCommand, Script,
};
use fleet_core::store::{CasOutcome, Repository, StoreError};
use serde::{Deserialize, Serialize};
use surrealdb::{
    engine::any::{connect, Any},
    Surreal,
};
use tokio::sync::Mutex;

/// Idempotent schema, applied at startup.
const SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS machine SCHEMALESS;
DEFINE INDEX IF NOT EXISTS machine_name ON TABLE machine FIELDS name;
DEFINE TABLE IF NOT EXISTS script SCHEMALESS;
DEFINE TABLE IF NOT EXISTS command SCHEMALESS;
DEFINE INDEX IF NOT EXISTS command_machine_status ON TABLE command FIELDS machine_id, status;
DEFINE TABLE IF NOT EXISTS counter SCHEMALESS;
"#;

const COMMAND_FIELDS: &str =
    "command_id, machine_id, script_name, status, output, created_at_ms, completed_at_ms";

/// Database wrapper for embedded SurrealDB.
#[derive(Clone)]
pub struct Db {
    inner: Surreal<Any>,
}

impl Db {
    /// Connect to an embedded SurrealKV datastore at `db_dir`.
    pub async fn connect(db_dir: &Path) -> anyhow::Result<Self> {
        Self::connect_endpoint(format!("surrealkv://{}", db_dir.display())).await
    }

    /// Connect by endpoint; the scheme picks the engine (`surrealkv://`, `mem://`).
    pub async fn connect_endpoint(endpoint: String) -> anyhow::Result<Self> {
        let db = connect(endpoint).await?;
        db.use_ns("fleet").use_db("fleet").await?;
        Ok(Self { inner: db })
    }

    pub fn inner(&self) -> &Surreal<Any> {
        &self.inner
    }

    pub async fn apply_schema(&self) -> anyhow::Result<()> {
        self.inner.query(SCHEMA).await?.check()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MachineRow {
    machine_id: MachineId,
    name: String,
    last_seen_ms: i64,
}

impl From<MachineRow> for Machine {
    fn from(row: MachineRow) -> Self {
        Machine {
            id: row.machine_id,
            name: row.name,
            last_seen_ms: row.last_seen_ms,
        }
    }
}

impl From<&Machine> for MachineRow {
    fn from(m: &Machine) -> Self {
        MachineRow {
            machine_id: m.id.clone(),
            name: m.name.clone(),
            last_seen_ms: m.last_seen_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScriptRow {
    name: String,
    content: String,
}

// Record ids are kept out of rows; `command_id` mirrors the numeric record key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommandRow {
    command_id: i64,
    machine_id: MachineId,
    script_name: String,
    status: CommandStatus,
    #[serde(default)]
    output: String,
    created_at_ms: i64,
    #[serde(default)]
    completed_at_ms: Option<i64>,
}

impl CommandRow {
    fn from_command(c: &Command) -> Result<Self, StoreError> {
        Ok(CommandRow {
            command_id: record_key(c.id)?,
            machine_id: c.machine_id.clone(),
            script_name: c.script_name.clone(),
            status: c.status,
            output: c.output.clone(),
            created_at_ms: c.created_at_ms,
            completed_at_ms: c.completed_at_ms,
        })
    }

    fn into_command(self) -> Result<Command, StoreError> {
        let id = CommandId::try_from(self.command_id)
            .map_err(|_| StoreError::Corrupt(format!("negative command id {}", self.command_id)))?;
        Ok(Command {
            id,
            machine_id: self.machine_id,
            script_name: self.script_name,
            status: self.status,
            output: self.output,
            created_at_ms: self.created_at_ms,
            completed_at_ms: self.completed_at_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CounterRow {
    value: i64,
}

fn backend(e: surrealdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn record_key(id: CommandId) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Corrupt(format!("command id {id} out of range")))
}

/// [`Repository`] over embedded SurrealDB.
///
/// Writes that allocate ids or swap command state are serialized through
/// `write_lock`, so concurrent callers never race on the counter record or see
/// a transaction conflict instead of a clean compare-and-swap result.
pub struct SurrealRepository {
    db: Db,
    write_lock: Mutex<()>,
}

impl SurrealRepository {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    async fn select_commands(
        &self,
        query: String,
        machine_id: &str,
        status: Option<CommandStatus>,
    ) -> Result<Vec<Command>, StoreError> {
        let mut q = self
            .db
            .inner()
            .query(query)
            .bind(("machine", machine_id.to_string()));
        if let Some(status) = status {
            q = q.bind(("status", status.as_str().to_string()));
        }
        let mut resp = q.await.map_err(backend)?;
        let rows: Vec<CommandRow> = resp.take(0).map_err(backend)?;
        rows.into_iter().map(CommandRow::into_command).collect()
    }
}

#[async_trait]
impl Repository for SurrealRepository {
    async fn get_machine(&self, id: &str) -> Result<Option<Machine>, StoreError> {
        let mut resp = self
            .db
            .inner()
            .query("SELECT machine_id, name, last_seen_ms FROM type::thing('machine', $id);")
            .bind(("id", id.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<MachineRow> = resp.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(Machine::from))
    }

    async fn find_machine_by_name(&self, name: &str) -> Result<Option<Machine>, StoreError> {
        let mut resp = self
            .db
            .inner()
            .query(
                "SELECT machine_id, name, last_seen_ms FROM machine WHERE name = $name \
                 ORDER BY last_seen_ms DESC LIMIT 1;",
            )
            .bind(("name", name.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<MachineRow> = resp.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(Machine::from))
    }

    async fn put_machine(&self, machine: Machine) -> Result<(), StoreError> {
        self.db
            .inner()
            .query("UPSERT type::thing('machine', $id) CONTENT $row RETURN NONE;")
            .bind(("id", machine.id.clone()))
            .bind(("row", MachineRow::from(&machine)))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, StoreError> {
        let mut resp = self
            .db
            .inner()
            .query("SELECT machine_id, name, last_seen_ms FROM machine;")
            .await
            .map_err(backend)?;
        let rows: Vec<MachineRow> = resp.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(Machine::from).collect())
    }

    async fn get_script(&self, name: &str) -> Result<Option<Script>, StoreError> {
        let mut resp = self
            .db
            .inner()
            .query("SELECT name, content FROM type::thing('script', $name);")
            .bind(("name", name.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<ScriptRow> = resp.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(|r| Script {
            name: r.name,
            content: r.content,
        }))
    }

    async fn put_script(&self, script: Script) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let created = self.get_script(&script.name).await?.is_none();
        self.db
            .inner()
            .query("UPSERT type::thing('script', $name) CONTENT $row RETURN NONE;")
            .bind(("name", script.name.clone()))
            .bind((
                "row",
                ScriptRow {
                    name: script.name,
                    content: script.content,
                },
            ))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(created)
    }

    async fn insert_command(&self, new: NewCommand) -> Result<Command, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut resp = self
            .db
            .inner()
            .query("UPSERT counter:command SET value = (value ?? 0) + 1 RETURN AFTER;")
            .await
            .map_err(backend)?;
        let counters: Vec<CounterRow> = resp.take(0).map_err(backend)?;
        let next = counters
            .into_iter()
            .next()
            .map(|c| c.value)
            .ok_or_else(|| StoreError::Corrupt("command counter returned no value".into()))?;

        let row = CommandRow {
            command_id: next,
            machine_id: new.machine_id,
            script_name: new.script_name,
            status: CommandStatus::Pending,
            output: String::new(),
            created_at_ms: new.created_at_ms,
            completed_at_ms: None,
        };
        self.db
            .inner()
            .query("CREATE type::thing('command', $id) CONTENT $row RETURN NONE;")
            .bind(("id", next))
            .bind(("row", row.clone()))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        row.into_command()
    }

    async fn get_command(&self, id: CommandId) -> Result<Option<Command>, StoreError> {
        let mut resp = self
            .db
            .inner()
            .query(format!(
                "SELECT {COMMAND_FIELDS} FROM type::thing('command', $id);"
            ))
            .bind(("id", record_key(id)?))
            .await
            .map_err(backend)?;
        let rows: Vec<CommandRow> = resp.take(0).map_err(backend)?;
        rows.into_iter().next().map(CommandRow::into_command).transpose()
    }

    async fn commands_for_machine(
        &self,
        machine_id: &str,
        status: Option<CommandStatus>,
    ) -> Result<Vec<Command>, StoreError> {
        let filter = if status.is_some() {
            "machine_id = $machine AND status = $status"
        } else {
            "machine_id = $machine"
        };
        let query = format!(
            "SELECT {COMMAND_FIELDS} FROM command WHERE {filter} ORDER BY command_id ASC;"
        );
        self.select_commands(query, machine_id, status).await
    }

    async fn compare_and_swap_command(
        &self,
        id: CommandId,
        expected: CommandStatus,
        replacement: Command,
    ) -> Result<CasOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;

        let row = CommandRow::from_command(&Command { id, ..replacement })?;
        let mut resp = self
            .db
            .inner()
            .query(
                "UPDATE type::thing('command', $id) CONTENT $row \
                 WHERE status = $expected RETURN AFTER;",
            )
            .bind(("id", record_key(id)?))
            .bind(("row", row))
            .bind(("expected", expected.as_str().to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<CommandRow> = resp.take(0).map_err(backend)?;

        if let Some(row) = rows.into_iter().next() {
            return Ok(CasOutcome::Swapped(row.into_command()?));
        }
        match self.get_command(id).await? {
            Some(current) => Ok(CasOutcome::Conflict(current)),
            None => Ok(CasOutcome::Missing),
        }
    }
}
