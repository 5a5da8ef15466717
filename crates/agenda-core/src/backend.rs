use chrono::{DateTime, Utc};

use crate::account::{Professional, Profile};
use crate::appointment::{Appointment, AppointmentLog};
use crate::client::Client;
use crate::contract::Contract;
use crate::payment::Payment;

/// Inclusive start, exclusive end. `None` on either side leaves it open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| start <= at) && self.end.is_none_or(|end| at < end)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

impl From<crate::week::WeekWindow> for TimeRange {
    fn from(window: crate::week::WeekWindow) -> Self {
        Self::between(window.start, window.end)
    }
}

/// The persistence collaborator. Every listing is scoped to one
/// professional; inserts assign the next free id and return the stored row.
pub trait Backend {
    /// Ordered by name.
    fn clients(&self, professional_id: u64) -> anyhow::Result<Vec<Client>>;
    fn insert_client(&self, client: Client) -> anyhow::Result<Client>;
    fn update_client(&self, client: &Client) -> anyhow::Result<()>;

    /// Ordered by start time. A bounded range only returns rows whose
    /// timestamp parses and falls inside it; an unbounded one returns every
    /// row, unparseable ones last.
    fn appointments(&self, professional_id: u64, range: TimeRange) -> anyhow::Result<Vec<Appointment>>;
    fn insert_appointment(&self, appointment: Appointment) -> anyhow::Result<Appointment>;
    fn update_appointment(&self, appointment: &Appointment) -> anyhow::Result<()>;

    /// Newest first.
    fn payments(&self, professional_id: u64) -> anyhow::Result<Vec<Payment>>;
    fn insert_payment(&self, payment: Payment) -> anyhow::Result<Payment>;
    fn update_payment(&self, payment: &Payment) -> anyhow::Result<()>;

    /// Newest first.
    fn contracts(&self, professional_id: u64) -> anyhow::Result<Vec<Contract>>;
    fn insert_contract(&self, contract: Contract) -> anyhow::Result<Contract>;
    fn update_contract(&self, contract: &Contract) -> anyhow::Result<()>;

    fn professionals(&self) -> anyhow::Result<Vec<Professional>>;
    fn insert_professional(&self, professional: Professional) -> anyhow::Result<Professional>;

    fn profiles(&self) -> anyhow::Result<Vec<Profile>>;
    fn insert_profile(&self, profile: Profile) -> anyhow::Result<Profile>;
    fn update_profile(&self, profile: &Profile) -> anyhow::Result<()>;

    fn append_log(
        &self,
        appointment_id: u64,
        action: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AppointmentLog>;

    /// Newest first, limited to logs of this professional's appointments.
    fn recent_logs(&self, professional_id: u64, limit: usize) -> anyhow::Result<Vec<AppointmentLog>>;
}
