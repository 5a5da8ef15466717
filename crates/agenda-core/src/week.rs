//! Weekly calendar grid: Sunday-anchored week windows, 7×24 cell
//! bucketing of appointments, and week-to-week navigation.
//!
//! Everything here is a pure function of a reference date, an appointment
//! slice and a timezone. Fetching the appointments for a window is the
//! caller's job; [`WeekView`] only sequences the responses.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{debug, trace};

use crate::appointment::Appointment;
use crate::datetime::{local_date, local_midnight};
use crate::session::{FetchSequencer, RequestToken};

pub const DAYS_PER_WEEK: usize = 7;
pub const HOURS_PER_DAY: usize = 24;
pub const WEEK_START: Weekday = Weekday::Sun;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prev" | "previous" | "back" => Ok(Self::Previous),
            "next" | "forward" => Ok(Self::Next),
            other => Err(anyhow::anyhow!("unknown direction: {other}")),
        }
    }
}

fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days)).unwrap_or(date)
}

/// The Sunday of the week containing `date`.
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    let diff = i64::from(date.weekday().num_days_from_sunday());
    add_days(date, -diff)
}

/// Sunday..Saturday of the week containing `date`.
pub fn days_of_week(date: NaiveDate) -> [NaiveDate; DAYS_PER_WEEK] {
    let start = start_of_week(date);
    std::array::from_fn(|idx| add_days(start, idx as i64))
}

/// `"00:00"` through `"23:00"`.
pub fn hour_slots() -> [String; HOURS_PER_DAY] {
    std::array::from_fn(|hour| format!("{hour:02}:00"))
}

/// Hour of a slot label. Accepts `"HH:00"` and bare `"HH"`; anything else,
/// including hours past 23, is `None`.
pub fn parse_hour_label(label: &str) -> Option<u32> {
    let trimmed = label.trim();
    let hour_part = match trimmed.split_once(':') {
        Some((hour, minutes)) => {
            if minutes != "00" {
                return None;
            }
            hour
        }
        None => trimmed,
    };
    if hour_part.is_empty() || hour_part.len() > 2 {
        return None;
    }
    let hour: u32 = hour_part.parse().ok()?;
    (hour < HOURS_PER_DAY as u32).then_some(hour)
}

pub fn navigate(current: NaiveDate, direction: Direction) -> NaiveDate {
    match direction {
        Direction::Previous => add_days(current, -7),
        Direction::Next => add_days(current, 7),
    }
}

/// The local calendar date at `now`.
pub fn reset_to_today(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    local_date(now, tz)
}

pub fn today(tz: Tz) -> NaiveDate {
    reset_to_today(Utc::now(), tz)
}

/// Local (date, hour) slot of an appointment, or `None` if its timestamp
/// does not parse.
fn slot_of(appointment: &Appointment, tz: Tz) -> Option<(NaiveDate, u32)> {
    let local = appointment.starts_at()?.with_timezone(&tz);
    Some((local.date_naive(), local.hour()))
}

/// First appointment, in input order, sitting in the `day`×`hour_label`
/// cell. Other appointments in the same cell are not reported; use
/// [`bucket_all`] to see every one of them.
pub fn bucket<'a>(
    appointments: &'a [Appointment],
    day: NaiveDate,
    hour_label: &str,
    tz: Tz,
) -> Option<&'a Appointment> {
    let hour = parse_hour_label(hour_label)?;
    appointments
        .iter()
        .find(|appt| slot_of(appt, tz) == Some((day, hour)))
}

pub fn bucket_all<'a>(
    appointments: &'a [Appointment],
    day: NaiveDate,
    hour_label: &str,
    tz: Tz,
) -> Vec<&'a Appointment> {
    let Some(hour) = parse_hour_label(hour_label) else {
        return vec![];
    };
    appointments
        .iter()
        .filter(|appt| slot_of(appt, tz) == Some((day, hour)))
        .collect()
}

/// Half-open `[start, end)` interval between local midnight of a Sunday and
/// local midnight of the following Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    pub first_day: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WeekWindow {
    pub fn containing(date: NaiveDate, tz: Tz) -> Self {
        let first_day = start_of_week(date);
        Self {
            first_day,
            start: local_midnight(first_day, tz),
            end: local_midnight(add_days(first_day, DAYS_PER_WEEK as i64), tz),
        }
    }

    pub fn containing_instant(at: DateTime<Utc>, tz: Tz) -> Self {
        Self::containing(local_date(at, tz), tz)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn last_day(&self) -> NaiveDate {
        add_days(self.first_day, DAYS_PER_WEEK as i64 - 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotConflict<'a> {
    pub day: NaiveDate,
    pub hour: u32,
    pub appointments: Vec<&'a Appointment>,
}

/// The fully bucketed 7×24 grid for one week.
#[derive(Debug, Clone)]
pub struct WeekGrid<'a> {
    window: WeekWindow,
    days: [NaiveDate; DAYS_PER_WEEK],
    cells: [[Vec<&'a Appointment>; HOURS_PER_DAY]; DAYS_PER_WEEK],
    unplaced: usize,
}

impl<'a> WeekGrid<'a> {
    #[tracing::instrument(skip(appointments, tz), fields(count = appointments.len()))]
    pub fn build(reference: NaiveDate, appointments: &'a [Appointment], tz: Tz) -> Self {
        let window = WeekWindow::containing(reference, tz);
        let days = days_of_week(reference);
        let mut cells: [[Vec<&'a Appointment>; HOURS_PER_DAY]; DAYS_PER_WEEK] =
            std::array::from_fn(|_| std::array::from_fn(|_| Vec::new()));
        let mut unplaced = 0_usize;

        for appt in appointments {
            let Some((day, hour)) = slot_of(appt, tz) else {
                trace!(id = appt.id, raw = %appt.datetime, "skipping unparseable timestamp");
                unplaced += 1;
                continue;
            };
            let Some(day_idx) = days.iter().position(|d| *d == day) else {
                continue;
            };
            cells[day_idx][hour as usize].push(appt);
        }

        debug!(
            first_day = %window.first_day,
            unplaced,
            "built week grid"
        );

        Self {
            window,
            days,
            cells,
            unplaced,
        }
    }

    pub fn window(&self) -> WeekWindow {
        self.window
    }

    pub fn days(&self) -> &[NaiveDate; DAYS_PER_WEEK] {
        &self.days
    }

    pub fn hour_slots(&self) -> [String; HOURS_PER_DAY] {
        hour_slots()
    }

    /// Every appointment in a cell, input order. Out-of-range indices give
    /// an empty slice.
    pub fn cell(&self, day_idx: usize, hour: usize) -> &[&'a Appointment] {
        self.cells
            .get(day_idx)
            .and_then(|row| row.get(hour))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first(&self, day_idx: usize, hour: usize) -> Option<&'a Appointment> {
        self.cell(day_idx, hour).first().copied()
    }

    pub fn lookup(&self, day: NaiveDate, hour_label: &str) -> &[&'a Appointment] {
        let Some(hour) = parse_hour_label(hour_label) else {
            return &[];
        };
        match self.days.iter().position(|d| *d == day) {
            Some(day_idx) => self.cell(day_idx, hour as usize),
            None => &[],
        }
    }

    /// Cells holding more than one appointment, ordered by day then hour.
    pub fn conflicts(&self) -> Vec<SlotConflict<'a>> {
        let mut out = Vec::new();
        for (day_idx, row) in self.cells.iter().enumerate() {
            for (hour, cell) in row.iter().enumerate() {
                if cell.len() > 1 {
                    out.push(SlotConflict {
                        day: self.days[day_idx],
                        hour: hour as u32,
                        appointments: cell.clone(),
                    });
                }
            }
        }
        out
    }

    pub fn placed_count(&self) -> usize {
        self.cells.iter().flatten().map(Vec::len).sum()
    }

    /// Appointments dropped because their timestamp did not parse.
    pub fn unplaced_count(&self) -> usize {
        self.unplaced
    }
}

/// Reference date plus the appointment list last fetched for its week.
///
/// Responses are only applied when their token is the latest one issued, so
/// a slow fetch for a week the user already navigated away from cannot
/// overwrite the current week's data.
#[derive(Debug, Clone)]
pub struct WeekView {
    reference_date: NaiveDate,
    tz: Tz,
    sequencer: FetchSequencer,
    appointments: Vec<Appointment>,
}

impl WeekView {
    pub fn new(reference_date: NaiveDate, tz: Tz) -> Self {
        Self {
            reference_date,
            tz,
            sequencer: FetchSequencer::default(),
            appointments: vec![],
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn window(&self) -> WeekWindow {
        WeekWindow::containing(self.reference_date, self.tz)
    }

    pub fn navigate(&mut self, direction: Direction) {
        self.reference_date = navigate(self.reference_date, direction);
        self.sequencer.invalidate();
    }

    pub fn reset_to_today(&mut self, now: DateTime<Utc>) {
        self.reference_date = reset_to_today(now, self.tz);
        self.sequencer.invalidate();
    }

    /// Starts a fetch for the current window. The returned token must be
    /// handed back to [`WeekView::apply_fetch`] with the response.
    pub fn begin_fetch(&mut self) -> (RequestToken, WeekWindow) {
        (self.sequencer.begin(), self.window())
    }

    /// Applies a fetch response; returns `false` when the response is stale
    /// and was discarded.
    pub fn apply_fetch(&mut self, token: RequestToken, appointments: Vec<Appointment>) -> bool {
        if !self.sequencer.accept(token) {
            debug!(?token, "discarding stale week fetch");
            return false;
        }
        self.appointments = appointments;
        true
    }

    pub fn appointments(&self) -> &[Appointment] {
        &self.appointments
    }

    pub fn grid(&self) -> WeekGrid<'_> {
        WeekGrid::build(self.reference_date, &self.appointments, self.tz)
    }
}
