use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Overdue,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Pending => "pending",
            Self::Overdue => "overdue",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paid" => Ok(Self::Paid),
            "pending" => Ok(Self::Pending),
            "overdue" => Ok(Self::Overdue),
            other => Err(anyhow::anyhow!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    #[default]
    Pix,
    Card,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Pix => "pix",
            Self::Card => "card",
            Self::Transfer => "transfer",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "pix" => Ok(Self::Pix),
            "card" => Ok(Self::Card),
            "transfer" => Ok(Self::Transfer),
            other => Err(anyhow::anyhow!("unknown payment method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: u64,
    pub client_id: u64,
    #[serde(default)]
    pub appointment_id: Option<u64>,
    #[serde(default)]
    pub service: Option<String>,
    pub amount_cents: i64,
    pub date: NaiveDate,
    pub status: PaymentStatus,
    #[serde(default)]
    pub method: PaymentMethod,
    pub professional_id: u64,
}

/// Parses a money amount such as `150`, `150.5` or `150,50` into cents.
/// Signs, more than two decimals and amounts past `i64` are rejected.
pub fn parse_amount_cents(raw: &str) -> anyhow::Result<i64> {
    let normalized = raw.trim().replace(',', ".");
    let (whole, frac) = match normalized.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (normalized.as_str(), ""),
    };
    let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() || frac.len() > 2 || !all_digits(whole) || !all_digits(frac) {
        return Err(anyhow::anyhow!("invalid amount: {raw}"));
    }
    let whole: i64 = whole
        .parse()
        .map_err(|_| anyhow::anyhow!("amount too large: {raw}"))?;
    let frac: i64 = if frac.is_empty() {
        0
    } else {
        let parsed: i64 = frac
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid amount: {raw}"))?;
        if frac.len() == 1 { parsed * 10 } else { parsed }
    };
    whole
        .checked_mul(100)
        .and_then(|cents| cents.checked_add(frac))
        .ok_or_else(|| anyhow::anyhow!("amount too large: {raw}"))
}

pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
