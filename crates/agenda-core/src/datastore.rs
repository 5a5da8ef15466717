use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::account::{Professional, Profile};
use crate::appointment::{Appointment, AppointmentLog};
use crate::backend::{Backend, TimeRange};
use crate::client::Client;
use crate::contract::{Contract, DocumentStore};
use crate::payment::Payment;

const CLIENTS_FILE: &str = "clients.data";
const APPOINTMENTS_FILE: &str = "appointments.data";
const PAYMENTS_FILE: &str = "payments.data";
const CONTRACTS_FILE: &str = "contracts.data";
const PROFESSIONALS_FILE: &str = "professionals.data";
const PROFILES_FILE: &str = "profiles.data";
const LOGS_FILE: &str = "appointment_logs.data";
const DOCUMENTS_DIR: &str = "contracts";

/// JSON-lines tables under one data directory; one file per table, each
/// rewritten atomically on every change.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        for name in [
            CLIENTS_FILE,
            APPOINTMENTS_FILE,
            PAYMENTS_FILE,
            CONTRACTS_FILE,
            PROFESSIONALS_FILE,
            PROFILES_FILE,
            LOGS_FILE,
        ] {
            let path = data_dir.join(name);
            if !path.exists() {
                fs::write(&path, "")
                    .with_context(|| format!("failed to create {}", path.display()))?;
            }
        }

        info!(data_dir = %data_dir.display(), "opened datastore");
        Ok(Self { data_dir })
    }

    pub fn documents(&self) -> DocumentStore {
        DocumentStore::new(self.data_dir.join(DOCUMENTS_DIR))
    }

    fn path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Vec<T>> {
        load_jsonl(&self.path(name)).with_context(|| format!("failed to load {name}"))
    }

    fn save<T: Serialize>(&self, name: &str, rows: &[T]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.path(name), rows).with_context(|| format!("failed to save {name}"))
    }

    fn insert_with_id<T: Serialize + DeserializeOwned + Clone>(
        &self,
        name: &str,
        mut row: T,
        id_of: impl Fn(&T) -> u64,
        set_id: impl FnOnce(&mut T, u64),
    ) -> anyhow::Result<T> {
        let mut rows: Vec<T> = self.load(name)?;
        let id = next_id(rows.iter().map(&id_of));
        set_id(&mut row, id);
        rows.push(row.clone());
        self.save(name, &rows)?;
        debug!(table = name, id, "inserted row");
        Ok(row)
    }

    fn replace_by<T, K>(&self, name: &str, row: &T, key: impl Fn(&T) -> K) -> anyhow::Result<()>
    where
        T: Serialize + DeserializeOwned + Clone,
        K: PartialEq + std::fmt::Debug,
    {
        let mut rows: Vec<T> = self.load(name)?;
        let wanted = key(row);
        let slot = rows
            .iter_mut()
            .find(|existing| key(existing) == wanted)
            .ok_or_else(|| anyhow!("row {wanted:?} not found in {name}"))?;
        *slot = row.clone();
        self.save(name, &rows)?;
        debug!(table = name, key = ?wanted, "updated row");
        Ok(())
    }
}

pub fn next_id(ids: impl Iterator<Item = u64>) -> u64 {
    ids.max().unwrap_or(0) + 1
}

impl Backend for DataStore {
    #[tracing::instrument(skip(self))]
    fn clients(&self, professional_id: u64) -> anyhow::Result<Vec<Client>> {
        let mut clients: Vec<Client> = self.load(CLIENTS_FILE)?;
        clients.retain(|c| c.professional_id == professional_id);
        clients.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(clients)
    }

    #[tracing::instrument(skip(self, client), fields(name = %client.name))]
    fn insert_client(&self, client: Client) -> anyhow::Result<Client> {
        self.insert_with_id(CLIENTS_FILE, client, |c| c.id, |c, id| c.id = id)
    }

    #[tracing::instrument(skip(self, client), fields(id = client.id))]
    fn update_client(&self, client: &Client) -> anyhow::Result<()> {
        self.replace_by(CLIENTS_FILE, client, |c| c.id)
    }

    #[tracing::instrument(skip(self))]
    fn appointments(&self, professional_id: u64, range: TimeRange) -> anyhow::Result<Vec<Appointment>> {
        let rows: Vec<Appointment> = self.load(APPOINTMENTS_FILE)?;
        let mut out: Vec<(Option<DateTime<Utc>>, Appointment)> = rows
            .into_iter()
            .filter(|a| a.professional_id == professional_id)
            .map(|a| (a.starts_at(), a))
            .filter(|(at, _)| match at {
                Some(at) => range.contains(*at),
                None => range.is_unbounded(),
            })
            .collect();
        // None sorts first for Option; flip it so unparseable rows go last.
        out.sort_by_key(|(at, a)| (at.is_none(), *at, a.id));
        debug!(count = out.len(), "loaded appointments");
        Ok(out.into_iter().map(|(_, a)| a).collect())
    }

    #[tracing::instrument(skip(self, appointment), fields(client = appointment.client_id))]
    fn insert_appointment(&self, appointment: Appointment) -> anyhow::Result<Appointment> {
        self.insert_with_id(APPOINTMENTS_FILE, appointment, |a| a.id, |a, id| a.id = id)
    }

    #[tracing::instrument(skip(self, appointment), fields(id = appointment.id))]
    fn update_appointment(&self, appointment: &Appointment) -> anyhow::Result<()> {
        self.replace_by(APPOINTMENTS_FILE, appointment, |a| a.id)
    }

    #[tracing::instrument(skip(self))]
    fn payments(&self, professional_id: u64) -> anyhow::Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self.load(PAYMENTS_FILE)?;
        payments.retain(|p| p.professional_id == professional_id);
        payments.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        Ok(payments)
    }

    #[tracing::instrument(skip(self, payment), fields(client = payment.client_id))]
    fn insert_payment(&self, payment: Payment) -> anyhow::Result<Payment> {
        self.insert_with_id(PAYMENTS_FILE, payment, |p| p.id, |p, id| p.id = id)
    }

    #[tracing::instrument(skip(self, payment), fields(id = payment.id))]
    fn update_payment(&self, payment: &Payment) -> anyhow::Result<()> {
        self.replace_by(PAYMENTS_FILE, payment, |p| p.id)
    }

    #[tracing::instrument(skip(self))]
    fn contracts(&self, professional_id: u64) -> anyhow::Result<Vec<Contract>> {
        let mut contracts: Vec<Contract> = self.load(CONTRACTS_FILE)?;
        contracts.retain(|c| c.professional_id == professional_id);
        contracts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(contracts)
    }

    #[tracing::instrument(skip(self, contract), fields(title = %contract.title))]
    fn insert_contract(&self, contract: Contract) -> anyhow::Result<Contract> {
        self.insert_with_id(CONTRACTS_FILE, contract, |c| c.id, |c, id| c.id = id)
    }

    #[tracing::instrument(skip(self, contract), fields(id = contract.id))]
    fn update_contract(&self, contract: &Contract) -> anyhow::Result<()> {
        self.replace_by(CONTRACTS_FILE, contract, |c| c.id)
    }

    #[tracing::instrument(skip(self))]
    fn professionals(&self) -> anyhow::Result<Vec<Professional>> {
        self.load(PROFESSIONALS_FILE)
    }

    #[tracing::instrument(skip(self, professional), fields(email = %professional.email))]
    fn insert_professional(&self, professional: Professional) -> anyhow::Result<Professional> {
        self.insert_with_id(PROFESSIONALS_FILE, professional, |p| p.id, |p, id| p.id = id)
    }

    #[tracing::instrument(skip(self))]
    fn profiles(&self) -> anyhow::Result<Vec<Profile>> {
        self.load(PROFILES_FILE)
    }

    #[tracing::instrument(skip(self, profile), fields(email = %profile.email))]
    fn insert_profile(&self, profile: Profile) -> anyhow::Result<Profile> {
        let mut rows: Vec<Profile> = self.load(PROFILES_FILE)?;
        if rows.iter().any(|p| p.email.eq_ignore_ascii_case(&profile.email)) {
            return Err(anyhow!("a profile with email {} already exists", profile.email));
        }
        rows.push(profile.clone());
        self.save(PROFILES_FILE, &rows)?;
        Ok(profile)
    }

    #[tracing::instrument(skip(self, profile), fields(id = %profile.id))]
    fn update_profile(&self, profile: &Profile) -> anyhow::Result<()> {
        self.replace_by(PROFILES_FILE, profile, |p| p.id)
    }

    #[tracing::instrument(skip(self, now))]
    fn append_log(
        &self,
        appointment_id: u64,
        action: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AppointmentLog> {
        let log = AppointmentLog {
            id: 0,
            appointment_id,
            action: action.to_string(),
            created_at: now,
        };
        self.insert_with_id(LOGS_FILE, log, |l| l.id, |l, id| l.id = id)
    }

    #[tracing::instrument(skip(self))]
    fn recent_logs(&self, professional_id: u64, limit: usize) -> anyhow::Result<Vec<AppointmentLog>> {
        let owned: Vec<u64> = self
            .appointments(professional_id, TimeRange::default())?
            .into_iter()
            .map(|a| a.id)
            .collect();
        let mut logs: Vec<AppointmentLog> = self.load(LOGS_FILE)?;
        logs.retain(|l| owned.contains(&l.appointment_id));
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        logs.truncate(limit);
        Ok(logs)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
