use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::datetime::{format_timestamp, local_date, parse_timestamp};

pub const DEFAULT_DURATION_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "completed" | "done" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(anyhow::anyhow!("unknown appointment status: {other}")),
        }
    }
}

/// A booked slot. `datetime` is kept as the text the backend delivered so
/// that rows with a damaged timestamp can still be listed and edited; grid
/// placement goes through [`Appointment::starts_at`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: u64,

    pub datetime: String,

    pub status: AppointmentStatus,

    #[serde(default)]
    pub notes: Option<String>,

    pub client_id: u64,

    pub professional_id: u64,

    #[serde(default)]
    pub service: Option<String>,

    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
}

fn default_duration() -> u32 {
    DEFAULT_DURATION_MINUTES
}

impl Appointment {
    pub fn new_scheduled(
        id: u64,
        professional_id: u64,
        client_id: u64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            datetime: format_timestamp(at),
            status: AppointmentStatus::Scheduled,
            notes: None,
            client_id,
            professional_id,
            service: None,
            duration_minutes: DEFAULT_DURATION_MINUTES,
        }
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.datetime)
    }

    pub fn local_date(&self, tz: Tz) -> Option<chrono::NaiveDate> {
        self.starts_at().map(|at| local_date(at, tz))
    }

    pub fn reschedule(&mut self, at: DateTime<Utc>) {
        self.datetime = format_timestamp(at);
    }
}

/// Audit row written on every appointment mutation; read back by the
/// dashboard activity feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentLog {
    pub id: u64,
    pub appointment_id: u64,
    pub action: String,
    pub created_at: DateTime<Utc>,
}
