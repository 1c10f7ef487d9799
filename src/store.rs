//! Application state shared with the caregiver dashboard.
//!
//! The voice session only reads a snapshot once per open and applies a few
//! mutations requested by the model. Everything else about this data is owned
//! elsewhere; stores here only load and save.

use crate::error::{EvaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: u64,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub pending_appointments: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    /// Short machine-readable kind, e.g. `PASSA_MAL`.
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub client: Option<String>,
    /// Unix time in milliseconds.
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: u64,
    pub client_name: String,
    /// What is due: a medication name or a consultation description.
    pub description: String,
    /// Free-form time as shown on the dashboard ("08:00", "2025-03-01 14:30").
    pub time: String,
    #[serde(default)]
    pub done: bool,
}

/// Read-only bundle baked into the session's opening instruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSnapshot {
    pub clients: Vec<Client>,
    pub alerts: Vec<Alert>,
    pub appointments: Vec<Appointment>,
}

impl ContextSnapshot {
    pub fn pending_appointments(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.iter().filter(|a| !a.done)
    }
}

/// Externally owned application state.
pub trait CareStore: Send + Sync {
    fn snapshot(&self) -> Result<ContextSnapshot>;

    fn insert_client(&self, name: &str, phone: &str) -> Result<Client>;

    fn push_alert(&self, kind: &str, description: &str, client: Option<&str>) -> Result<Alert>;

    /// Mark the first pending appointment of `client_name` whose description
    /// mentions `medication` as done.
    ///
    /// The client name must match in full, ignoring case; the medication may be
    /// part of the description. Returns `None` if nothing matched or either
    /// argument is blank.
    fn confirm_medication(&self, client_name: &str, medication: &str)
    -> Result<Option<Appointment>>;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn mentions(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

/// State plus id generator; ids are millisecond timestamps kept strictly increasing.
#[derive(Debug, Default, Clone)]
struct StoreState {
    data: ContextSnapshot,
    last_id: u64,
}

impl StoreState {
    fn next_id(&mut self) -> u64 {
        self.last_id = now_millis().max(self.last_id + 1);
        self.last_id
    }

    fn insert_client(&mut self, name: &str, phone: &str) -> Client {
        let client = Client {
            id: self.next_id(),
            name: name.trim().to_string(),
            phone: phone.trim().to_string(),
            pending_appointments: 0,
        };
        self.data.clients.push(client.clone());
        client
    }

    fn push_alert(&mut self, kind: &str, description: &str, client: Option<&str>) -> Alert {
        let alert = Alert {
            id: self.next_id(),
            kind: kind.to_string(),
            description: description.to_string(),
            client: client.map(str::to_string),
            created_at: now_millis(),
        };
        self.data.alerts.push(alert.clone());
        alert
    }

    fn confirm_medication(&mut self, client_name: &str, medication: &str) -> Option<Appointment> {
        if client_name.trim().is_empty() || medication.trim().is_empty() {
            return None;
        }
        let appointment = self.data.appointments.iter_mut().find(|a| {
            !a.done && same_name(&a.client_name, client_name) && mentions(&a.description, medication)
        })?;
        appointment.done = true;
        let confirmed = appointment.clone();

        if let Some(client) = self
            .data
            .clients
            .iter_mut()
            .find(|c| same_name(&c.name, &confirmed.client_name))
        {
            client.pending_appointments = client.pending_appointments.saturating_sub(1);
        }
        Some(confirmed)
    }
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> EvaError {
    EvaError::Store {
        message: format!("state lock poisoned: {}", e),
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: ContextSnapshot) -> Self {
        let last_id = snapshot
            .clients
            .iter()
            .map(|c| c.id)
            .chain(snapshot.alerts.iter().map(|a| a.id))
            .chain(snapshot.appointments.iter().map(|a| a.id))
            .max()
            .unwrap_or(0);
        Self {
            state: Mutex::new(StoreState {
                data: snapshot,
                last_id,
            }),
        }
    }

    /// Apply `change` to a copy of the state and keep it only if `persist` succeeds.
    ///
    /// The lock is held throughout, so mutations are persisted in the order applied.
    fn transact<R>(
        &self,
        change: impl FnOnce(&mut StoreState) -> R,
        persist: impl FnOnce(&ContextSnapshot, &R) -> Result<()>,
    ) -> Result<R> {
        let mut state = self.state.lock().map_err(lock_err)?;
        let mut next = state.clone();
        let result = change(&mut next);
        persist(&next.data, &result)?;
        *state = next;
        Ok(result)
    }
}

impl CareStore for MemoryStore {
    fn snapshot(&self) -> Result<ContextSnapshot> {
        Ok(self.state.lock().map_err(lock_err)?.data.clone())
    }

    fn insert_client(&self, name: &str, phone: &str) -> Result<Client> {
        self.transact(|s| s.insert_client(name, phone), |_, _| Ok(()))
    }

    fn push_alert(&self, kind: &str, description: &str, client: Option<&str>) -> Result<Alert> {
        self.transact(|s| s.push_alert(kind, description, client), |_, _| Ok(()))
    }

    fn confirm_medication(
        &self,
        client_name: &str,
        medication: &str,
    ) -> Result<Option<Appointment>> {
        self.transact(|s| s.confirm_medication(client_name, medication), |_, _| Ok(()))
    }
}

/// JSON-file store: loads once, saves after every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let snapshot = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| EvaError::Store {
                message: format!("invalid state file {}: {}", path.display(), e),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ContextSnapshot::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), "loaded application state");

        Ok(Self {
            path: path.to_path_buf(),
            inner: MemoryStore::with_snapshot(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `snapshot` to a temporary file and rename it over the state file.
    fn save(&self, snapshot: &ContextSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot).map_err(|e| EvaError::Store {
            message: format!("failed to encode state: {}", e),
        })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CareStore for JsonFileStore {
    fn snapshot(&self) -> Result<ContextSnapshot> {
        self.inner.snapshot()
    }

    fn insert_client(&self, name: &str, phone: &str) -> Result<Client> {
        self.inner
            .transact(|s| s.insert_client(name, phone), |data, _| self.save(data))
    }

    fn push_alert(&self, kind: &str, description: &str, client: Option<&str>) -> Result<Alert> {
        self.inner.transact(
            |s| s.push_alert(kind, description, client),
            |data, _| self.save(data),
        )
    }

    fn confirm_medication(
        &self,
        client_name: &str,
        medication: &str,
    ) -> Result<Option<Appointment>> {
        self.inner.transact(
            |s| s.confirm_medication(client_name, medication),
            |data, confirmed| match confirmed {
                Some(_) => self.save(data),
                None => Ok(()),
            },
        )
    }
}
