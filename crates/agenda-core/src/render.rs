use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::account::Profile;
use crate::appointment::{Appointment, AppointmentLog, AppointmentStatus};
use crate::client::Client;
use crate::config::Config;
use crate::contract::Contract;
use crate::datetime::{format_local, relative_time};
use crate::payment::{Payment, PaymentStatus, format_cents};
use crate::report::{PaymentTotals, PeriodStats, ServiceRow, WeekdayRow};
use crate::week::{HOURS_PER_DAY, WeekGrid};

const CELL_WIDTH: usize = 14;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Renders the 7×24 grid. Cells show the client name; a cell holding
    /// more than one appointment gets a `+N` suffix. With `compact`, hours
    /// with no appointment on any day are left out.
    #[tracing::instrument(skip(self, out, grid, client_names))]
    pub fn write_week_grid<W: Write>(
        &self,
        mut out: W,
        grid: &WeekGrid<'_>,
        client_names: &HashMap<u64, String>,
        compact: bool,
    ) -> anyhow::Result<()> {
        let window = grid.window();
        writeln!(
            out,
            "Week of {} to {}",
            window.first_day.format("%Y-%m-%d"),
            window.last_day().format("%Y-%m-%d")
        )?;

        let mut headers = vec!["Hour".to_string()];
        headers.extend(grid.days().iter().map(|d| d.format("%a %d/%m").to_string()));

        let mut rows = Vec::with_capacity(HOURS_PER_DAY);
        for (hour, label) in grid.hour_slots().into_iter().enumerate() {
            let cells: Vec<String> = (0..grid.days().len())
                .map(|day_idx| self.grid_cell(grid.cell(day_idx, hour), client_names))
                .collect();
            if compact && cells.iter().all(String::is_empty) {
                continue;
            }
            let mut row = vec![label];
            row.extend(cells);
            rows.push(row);
        }

        write_table(&mut out, headers, rows)?;

        let conflicts = grid.conflicts();
        if !conflicts.is_empty() {
            writeln!(out)?;
            writeln!(out, "{}", self.paint("Double bookings:", "31"))?;
            for conflict in conflicts {
                let ids = conflict
                    .appointments
                    .iter()
                    .map(|a| format!("#{}", a.id))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(
                    out,
                    "  {} {:02}:00  {}",
                    conflict.day.format("%Y-%m-%d"),
                    conflict.hour,
                    ids
                )?;
            }
        }

        if grid.unplaced_count() > 0 {
            writeln!(
                out,
                "{} appointment(s) with an unreadable date were left out",
                grid.unplaced_count()
            )?;
        }
        Ok(())
    }

    fn grid_cell(&self, cell: &[&Appointment], client_names: &HashMap<u64, String>) -> String {
        let Some(first) = cell
            .iter()
            .find(|a| a.status != AppointmentStatus::Cancelled)
            .or_else(|| cell.first())
        else {
            return String::new();
        };
        let name = client_names
            .get(&first.client_id)
            .cloned()
            .unwrap_or_else(|| format!("client {}", first.client_id));
        let mut text = truncate(&name, CELL_WIDTH);
        if cell.len() > 1 {
            text = format!("{} +{}", truncate(&name, CELL_WIDTH - 3), cell.len() - 1);
        }
        match first.status {
            AppointmentStatus::Scheduled => self.paint(&text, "36"),
            AppointmentStatus::Completed => self.paint(&text, "32"),
            AppointmentStatus::Cancelled => self.paint(&text, "2"),
        }
    }

    pub fn print_week_grid(
        &self,
        grid: &WeekGrid<'_>,
        client_names: &HashMap<u64, String>,
        compact: bool,
    ) -> anyhow::Result<()> {
        self.write_week_grid(io::stdout().lock(), grid, client_names, compact)
    }

    #[tracing::instrument(skip(self, appointments, client_names, tz))]
    pub fn print_appointments(
        &self,
        appointments: &[Appointment],
        client_names: &HashMap<u64, String>,
        tz: Tz,
    ) -> anyhow::Result<()> {
        let headers = ["ID", "When", "Client", "Service", "Status", "Notes"]
            .map(String::from)
            .to_vec();
        let rows = appointments
            .iter()
            .map(|appt| {
                let when = appt
                    .starts_at()
                    .map(|at| format_local(at, tz, "%Y-%m-%d %H:%M"))
                    .unwrap_or_else(|| self.paint("invalid date", "31"));
                vec![
                    self.paint(&appt.id.to_string(), "33"),
                    when,
                    client_names
                        .get(&appt.client_id)
                        .cloned()
                        .unwrap_or_default(),
                    appt.service.clone().unwrap_or_default(),
                    appt.status.as_str().to_string(),
                    appt.notes.clone().unwrap_or_default(),
                ]
            })
            .collect();
        write_table(io::stdout().lock(), headers, rows)
    }

    #[tracing::instrument(skip(self, clients))]
    pub fn print_clients(&self, clients: &[Client]) -> anyhow::Result<()> {
        let headers = ["ID", "Name", "Email", "Phone", "Tier", "Since"]
            .map(String::from)
            .to_vec();
        let rows = clients
            .iter()
            .map(|c| {
                vec![
                    self.paint(&c.id.to_string(), "33"),
                    c.name.clone(),
                    c.email.clone().unwrap_or_default(),
                    c.phone.clone().unwrap_or_default(),
                    c.tier.as_str().to_string(),
                    c.created_at.format("%Y-%m-%d").to_string(),
                ]
            })
            .collect();
        write_table(io::stdout().lock(), headers, rows)
    }

    #[tracing::instrument(skip(self, payments, client_names))]
    pub fn print_payments(
        &self,
        payments: &[Payment],
        client_names: &HashMap<u64, String>,
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Date", "Client", "Service", "Amount", "Method", "Status"]
            .map(String::from)
            .to_vec();
        let rows = payments
            .iter()
            .map(|p| {
                let status = match p.status {
                    PaymentStatus::Paid => self.paint(p.status.as_str(), "32"),
                    PaymentStatus::Pending => self.paint(p.status.as_str(), "33"),
                    PaymentStatus::Overdue => self.paint(p.status.as_str(), "31"),
                };
                vec![
                    self.paint(&p.id.to_string(), "33"),
                    p.date.format("%Y-%m-%d").to_string(),
                    client_names.get(&p.client_id).cloned().unwrap_or_default(),
                    p.service.clone().unwrap_or_default(),
                    format_cents(p.amount_cents),
                    p.method.as_str().to_string(),
                    status,
                ]
            })
            .collect();
        write_table(io::stdout().lock(), headers, rows)
    }

    pub fn print_payment_totals(&self, totals: &PaymentTotals) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out)?;
        writeln!(out, "paid      {}", format_cents(totals.paid))?;
        writeln!(out, "pending   {}", format_cents(totals.pending))?;
        writeln!(out, "overdue   {}", format_cents(totals.overdue))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, contracts, client_names))]
    pub fn print_contracts(
        &self,
        contracts: &[Contract],
        client_names: &HashMap<u64, String>,
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Title", "Client", "Status", "Created", "Signed", "Document"]
            .map(String::from)
            .to_vec();
        let rows = contracts
            .iter()
            .map(|c| {
                vec![
                    self.paint(&c.id.to_string(), "33"),
                    c.title.clone(),
                    c.client_id
                        .and_then(|id| client_names.get(&id).cloned())
                        .unwrap_or_default(),
                    c.status.as_str().to_string(),
                    c.created_at.format("%Y-%m-%d").to_string(),
                    c.signed_at
                        .map(|at| at.format("%Y-%m-%d").to_string())
                        .unwrap_or_default(),
                    c.document_path.clone(),
                ]
            })
            .collect();
        write_table(io::stdout().lock(), headers, rows)
    }

    #[tracing::instrument(skip(self, profiles))]
    pub fn print_profiles(&self, profiles: &[Profile]) -> anyhow::Result<()> {
        let headers = ["ID", "Name", "Email", "Role", "Status"]
            .map(String::from)
            .to_vec();
        let rows = profiles
            .iter()
            .map(|p| {
                vec![
                    p.id.to_string(),
                    p.name.clone(),
                    p.email.clone(),
                    p.role.as_str().to_string(),
                    p.status.as_str().to_string(),
                ]
            })
            .collect();
        write_table(io::stdout().lock(), headers, rows)
    }

    pub fn print_report(
        &self,
        title: &str,
        stats: &PeriodStats,
        weekdays: &[WeekdayRow],
        services: &[ServiceRow],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", self.paint(title, "1"))?;
        writeln!(out, "appointments     {}", stats.appointments)?;
        writeln!(out, "unique clients   {}", stats.unique_clients)?;
        writeln!(out, "revenue          {}", format_cents(stats.revenue))?;
        writeln!(out, "completion rate  {}%", stats.completion_percent())?;
        writeln!(out)?;

        let rows = weekdays
            .iter()
            .map(|row| {
                vec![
                    row.weekday.to_string(),
                    row.day.format("%Y-%m-%d").to_string(),
                    row.appointments.to_string(),
                    format_cents(row.revenue),
                ]
            })
            .collect();
        write_table(
            &mut out,
            ["Day", "Date", "Appointments", "Revenue"].map(String::from).to_vec(),
            rows,
        )?;
        writeln!(out)?;

        let rows = services
            .iter()
            .map(|row| vec![row.name.clone(), row.count.to_string(), format_cents(row.revenue)])
            .collect();
        write_table(
            &mut out,
            ["Service", "Count", "Revenue"].map(String::from).to_vec(),
            rows,
        )
    }

    pub fn print_activity(
        &self,
        logs: &[(AppointmentLog, Option<String>)],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if logs.is_empty() {
            writeln!(out, "no recent activity")?;
        }
        for (log, client) in logs {
            writeln!(
                out,
                "  #{} {} {}  ({})",
                log.appointment_id,
                log.action,
                client.as_deref().unwrap_or(""),
                relative_time(log.created_at, now)
            )?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn truncate(text: &str, max: usize) -> String {
    if UnicodeWidthStr::width(text) <= max {
        return text.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + w + 1 > max {
            break;
        }
        width += w;
        out.push(ch);
    }
    out.push('…');
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (idx, header) in headers.iter().enumerate() {
        write!(writer, "{:width$} ", header, width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, width) in widths.iter().enumerate() {
            let cell = row.get(idx).map(String::as_str).unwrap_or("");
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
