use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientTier {
    #[default]
    Active,
    Vip,
    Inactive,
}

impl ClientTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Vip => "vip",
            Self::Inactive => "inactive",
        }
    }

    /// VIP clients count as active in roster statistics.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::Vip)
    }
}

impl std::str::FromStr for ClientTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "vip" => Ok(Self::Vip),
            "inactive" => Ok(Self::Inactive),
            other => Err(anyhow::anyhow!("unknown client tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub professional_id: u64,
    #[serde(default)]
    pub tier: ClientTier,
}

impl Client {
    pub fn new(id: u64, professional_id: u64, name: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            email: None,
            phone: None,
            created_at: now,
            professional_id,
            tier: ClientTier::Active,
        }
    }

    /// Case-insensitive match against name and email.
    pub fn matches_text(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self
                .email
                .as_deref()
                .is_some_and(|email| email.to_lowercase().contains(&needle))
    }
}
