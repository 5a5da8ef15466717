//! Aggregates behind the payments, clients, admin and reports screens.
//! All of it is counting and summing over rows already fetched.

use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, NaiveDate, Weekday};
use chrono_tz::Tz;

use crate::account::{Profile, ProfileStatus, Role};
use crate::appointment::{Appointment, AppointmentStatus};
use crate::backend::TimeRange;
use crate::client::{Client, ClientTier};
use crate::datetime::local_midnight;
use crate::payment::{Payment, PaymentStatus};
use crate::week::{DAYS_PER_WEEK, WeekWindow, days_of_week};

pub const TOP_SERVICES_LIMIT: usize = 3;
const UNSPECIFIED_SERVICE: &str = "(unspecified)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaymentTotals {
    pub paid: i64,
    pub pending: i64,
    pub overdue: i64,
}

impl PaymentTotals {
    pub fn from_payments(payments: &[Payment]) -> Self {
        let mut totals = Self::default();
        for payment in payments {
            match payment.status {
                PaymentStatus::Paid => totals.paid += payment.amount_cents,
                PaymentStatus::Pending => totals.pending += payment.amount_cents,
                PaymentStatus::Overdue => totals.overdue += payment.amount_cents,
            }
        }
        totals
    }

    pub fn outstanding(&self) -> i64 {
        self.pending + self.overdue
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub total: usize,
    pub active: usize,
    pub vip: usize,
}

impl ClientStats {
    pub fn from_clients(clients: &[Client]) -> Self {
        Self {
            total: clients.len(),
            active: clients.iter().filter(|c| c.tier.is_active()).count(),
            vip: clients.iter().filter(|c| c.tier == ClientTier::Vip).count(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total: usize,
    pub admins: usize,
    pub active: usize,
}

impl UserStats {
    pub fn from_profiles(profiles: &[Profile]) -> Self {
        Self {
            total: profiles.len(),
            admins: profiles.iter().filter(|p| p.role == Role::Admin).count(),
            active: profiles
                .iter()
                .filter(|p| p.status == ProfileStatus::Active)
                .count(),
        }
    }

    pub fn active_percent(&self) -> u32 {
        percent(self.active, self.total)
    }
}

/// Rounded integer percentage; zero when `whole` is zero.
pub fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

/// Local-midnight bounds of the calendar month containing `date`.
pub fn month_range(date: NaiveDate, tz: Tz) -> TimeRange {
    let first = date.with_day(1).unwrap_or(date);
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    }
    .unwrap_or(first);
    TimeRange::between(local_midnight(first, tz), local_midnight(next, tz))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodStats {
    pub appointments: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub unique_clients: usize,
    pub revenue: i64,
}

impl PeriodStats {
    /// `appointments` must already be limited to the period; payments are
    /// filtered here by local date against `first..=last`.
    pub fn compute(
        appointments: &[Appointment],
        payments: &[Payment],
        first: NaiveDate,
        last: NaiveDate,
    ) -> Self {
        let unique_clients: HashSet<u64> = appointments.iter().map(|a| a.client_id).collect();
        let revenue = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Paid && p.date >= first && p.date <= last)
            .map(|p| p.amount_cents)
            .sum();
        Self {
            appointments: appointments.len(),
            completed: count_status(appointments, AppointmentStatus::Completed),
            cancelled: count_status(appointments, AppointmentStatus::Cancelled),
            unique_clients: unique_clients.len(),
            revenue,
        }
    }

    /// Share of the period's appointments that were completed.
    pub fn completion_percent(&self) -> u32 {
        percent(self.completed, self.appointments)
    }
}

fn count_status(appointments: &[Appointment], status: AppointmentStatus) -> usize {
    appointments.iter().filter(|a| a.status == status).count()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekdayRow {
    pub day: NaiveDate,
    pub weekday: Weekday,
    pub appointments: usize,
    pub revenue: i64,
}

/// Per-day appointment counts and paid revenue for the week in `window`.
/// Always seven rows, Sunday first.
pub fn weekday_breakdown(
    window: &WeekWindow,
    appointments: &[Appointment],
    payments: &[Payment],
    tz: Tz,
) -> Vec<WeekdayRow> {
    let days = days_of_week(window.first_day);
    let mut rows: Vec<WeekdayRow> = days
        .iter()
        .map(|day| WeekdayRow {
            day: *day,
            weekday: day.weekday(),
            appointments: 0,
            revenue: 0,
        })
        .collect();

    for appt in appointments {
        if let Some(day) = appt.local_date(tz)
            && let Some(idx) = days.iter().position(|d| *d == day)
        {
            rows[idx].appointments += 1;
        }
    }
    for payment in payments {
        if payment.status != PaymentStatus::Paid {
            continue;
        }
        if let Some(idx) = days.iter().position(|d| *d == payment.date) {
            rows[idx].revenue += payment.amount_cents;
        }
    }

    debug_assert_eq!(rows.len(), DAYS_PER_WEEK);
    rows
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRow {
    pub name: String,
    pub count: usize,
    pub revenue: i64,
}

/// Services ranked by appointment count, then revenue, then name.
pub fn top_services(appointments: &[Appointment], payments: &[Payment], limit: usize) -> Vec<ServiceRow> {
    let mut by_name: BTreeMap<String, ServiceRow> = BTreeMap::new();

    for appt in appointments {
        if appt.status == AppointmentStatus::Cancelled {
            continue;
        }
        let name = service_name(appt.service.as_deref());
        by_name
            .entry(name.clone())
            .or_insert_with(|| ServiceRow {
                name,
                count: 0,
                revenue: 0,
            })
            .count += 1;
    }
    for payment in payments {
        if payment.status != PaymentStatus::Paid {
            continue;
        }
        let name = service_name(payment.service.as_deref());
        if let Some(row) = by_name.get_mut(&name) {
            row.revenue += payment.amount_cents;
        }
    }

    let mut rows: Vec<ServiceRow> = by_name.into_values().collect();
    rows.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(b.revenue.cmp(&a.revenue))
            .then(a.name.cmp(&b.name))
    });
    rows.truncate(limit);
    rows
}

fn service_name(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNSPECIFIED_SERVICE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::payment::PaymentMethod;

    const SP: Tz = chrono_tz::America::Sao_Paulo;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn payment(id: u64, cents: i64, status: PaymentStatus, day: NaiveDate, service: &str) -> Payment {
        Payment {
            id,
            client_id: id,
            appointment_id: None,
            service: Some(service.to_string()),
            amount_cents: cents,
            date: day,
            status,
            method: PaymentMethod::Pix,
            professional_id: 1,
        }
    }

    fn appt(id: u64, client: u64, raw: &str, service: &str, status: AppointmentStatus) -> Appointment {
        Appointment {
            id,
            datetime: raw.to_string(),
            status,
            notes: None,
            client_id: client,
            professional_id: 1,
            service: Some(service.to_string()),
            duration_minutes: 60,
        }
    }

    #[test]
    fn payment_totals_split_by_status() {
        let payments = vec![
            payment(1, 15_000, PaymentStatus::Paid, date(2024, 9, 24), "Consult"),
            payment(2, 12_000, PaymentStatus::Pending, date(2024, 9, 23), "Review"),
            payment(3, 8_000, PaymentStatus::Overdue, date(2024, 9, 22), "Follow-up"),
            payment(4, 15_000, PaymentStatus::Paid, date(2024, 9, 21), "Consult"),
        ];
        let totals = PaymentTotals::from_payments(&payments);
        assert_eq!(totals.paid, 30_000);
        assert_eq!(totals.pending, 12_000);
        assert_eq!(totals.overdue, 8_000);
        assert_eq!(totals.outstanding(), 20_000);
    }

    #[test]
    fn percent_handles_empty() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(2, 3), 67);
    }

    #[test]
    fn month_range_covers_whole_month() {
        let range = month_range(date(2024, 12, 15), SP);
        let inside = Utc
            .with_ymd_and_hms(2024, 12, 31, 23, 0, 0)
            .single()
            .expect("valid instant");
        let outside = Utc
            .with_ymd_and_hms(2025, 1, 1, 3, 0, 0)
            .single()
            .expect("valid instant");
        assert!(range.contains(inside));
        assert!(!range.contains(outside));
    }

    #[test]
    fn period_and_weekday_breakdown() {
        let appts = vec![
            appt(1, 10, "2024-09-23T09:00:00-03:00", "Consult", AppointmentStatus::Completed),
            appt(2, 10, "2024-09-23T11:00:00-03:00", "Review", AppointmentStatus::Scheduled),
            appt(3, 11, "2024-09-25T14:00:00-03:00", "Consult", AppointmentStatus::Cancelled),
            appt(4, 12, "broken", "Consult", AppointmentStatus::Scheduled),
        ];
        let payments = vec![
            payment(1, 15_000, PaymentStatus::Paid, date(2024, 9, 23), "Consult"),
            payment(2, 9_000, PaymentStatus::Pending, date(2024, 9, 25), "Review"),
        ];

        let stats = PeriodStats::compute(&appts, &payments, date(2024, 9, 1), date(2024, 9, 30));
        assert_eq!(stats.appointments, 4);
        assert_eq!(stats.unique_clients, 3);
        assert_eq!(stats.revenue, 15_000);
        assert_eq!(stats.completion_percent(), 25);

        let window = WeekWindow::containing(date(2024, 9, 25), SP);
        let rows = weekday_breakdown(&window, &appts, &payments, SP);
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0].weekday, Weekday::Sun);
        assert_eq!(rows[1].appointments, 2);
        assert_eq!(rows[1].revenue, 15_000);
        assert_eq!(rows[3].appointments, 1);
        assert_eq!(rows[3].revenue, 0);

        let top = top_services(&appts, &payments, TOP_SERVICES_LIMIT);
        assert_eq!(top[0].name, "Consult");
        assert_eq!(top[0].count, 2);
        assert_eq!(top[0].revenue, 15_000);
        assert_eq!(top[1].name, "Review");
    }
}
