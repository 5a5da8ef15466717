use anyhow::{Context, anyhow};
use chrono::{Duration, Timelike};
use tracing::{info, instrument, warn};

use super::{Ctx, parse_id};
use crate::appointment::{Appointment, AppointmentStatus};
use crate::backend::TimeRange;
use crate::cli::split_modifiers;
use crate::datetime::{local_midnight, parse_date_expr};
use crate::week::{Direction, WeekView, WeekWindow, bucket_all};

const DASHBOARD_LIMIT: usize = 3;

/// Fetches the current window into `view`, discarding the response if a
/// newer fetch was started meanwhile.
pub(super) fn refresh(ctx: &Ctx<'_>, view: &mut WeekView) -> anyhow::Result<()> {
    let (token, window) = view.begin_fetch();
    let rows = ctx
        .backend
        .appointments(ctx.pid(), TimeRange::from(window))
        .context("failed to fetch week appointments")?;
    if !view.apply_fetch(token, rows) {
        warn!(?token, "week fetch superseded");
    }
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_week(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let mut date_arg = None;
    let mut steps: Vec<Direction> = Vec::new();
    let mut compact = ctx.cfg.get_bool("week.compact").unwrap_or(false);

    for arg in args {
        match arg.as_str() {
            "--compact" => compact = true,
            "--full" => compact = false,
            other => match other.parse::<Direction>() {
                Ok(direction) => steps.push(direction),
                Err(_) if date_arg.is_none() => date_arg = Some(arg),
                Err(_) => return Err(anyhow!("unexpected week argument: {other}")),
            },
        }
    }

    let mut view = WeekView::new(ctx.date_arg(date_arg)?, ctx.session.timezone);
    for direction in steps {
        view.navigate(direction);
    }
    refresh(ctx, &mut view)?;

    info!(reference = %view.reference_date(), "rendering week");
    let grid = view.grid();
    ctx.renderer
        .print_week_grid(&grid, &ctx.client_names()?, compact)
}

#[instrument(skip(ctx))]
pub(super) fn cmd_today(ctx: &Ctx<'_>) -> anyhow::Result<()> {
    let tz = ctx.session.timezone;
    let today = ctx.today();
    let range = TimeRange::between(
        local_midnight(today, tz),
        local_midnight(today + Duration::days(1), tz),
    );
    let todays = ctx.backend.appointments(ctx.pid(), range)?;
    let names = ctx.client_names()?;

    println!(
        "Today, {}: {} appointment(s)",
        today.format("%A %d %B %Y"),
        todays.len()
    );
    let shown: Vec<Appointment> = todays.into_iter().take(DASHBOARD_LIMIT).collect();
    ctx.renderer.print_appointments(&shown, &names, tz)?;

    let logs = ctx.backend.recent_logs(ctx.pid(), DASHBOARD_LIMIT)?;
    let all = ctx.backend.appointments(ctx.pid(), TimeRange::default())?;
    let with_clients: Vec<_> = logs
        .into_iter()
        .map(|log| {
            let client = all
                .iter()
                .find(|a| a.id == log.appointment_id)
                .and_then(|a| names.get(&a.client_id).cloned());
            (log, client)
        })
        .collect();

    println!();
    println!("Recent activity");
    ctx.renderer.print_activity(&with_clients, ctx.now)
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_appointments(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let all = args.iter().any(|a| a == "--all");
    let date_arg = args.iter().find(|a| a.as_str() != "--all");

    let range = if all {
        TimeRange::default()
    } else {
        WeekWindow::containing(ctx.date_arg(date_arg)?, ctx.session.timezone).into()
    };
    let rows = ctx.backend.appointments(ctx.pid(), range)?;
    ctx.renderer
        .print_appointments(&rows, &ctx.client_names()?, ctx.session.timezone)
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_book(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let client_id = parse_id(args.first(), "client")?;
    let when = args
        .get(1)
        .ok_or_else(|| anyhow!("book requires a date/time, e.g. 2024-09-24T14:00"))?;
    let (rest, mods) = split_modifiers(&args[2..], &["service", "note", "duration"]);
    if !rest.is_empty() {
        return Err(anyhow!("unexpected book arguments: {rest}"));
    }

    let client = ctx.find_client(client_id)?;
    let at = parse_date_expr(when, ctx.now, ctx.session.timezone)?;

    let mut appt = Appointment::new_scheduled(0, ctx.pid(), client.id, at);
    for (key, value) in mods {
        match key.as_str() {
            "service" => appt.service = Some(value),
            "note" => appt.notes = Some(value),
            "duration" => {
                appt.duration_minutes = value
                    .parse()
                    .with_context(|| format!("invalid duration: {value}"))?;
            }
            _ => {}
        }
    }

    warn_on_double_booking(ctx, &appt)?;

    let appt = ctx.backend.insert_appointment(appt)?;
    ctx.backend.append_log(appt.id, "booked", ctx.now)?;
    println!("Booked appointment {} for {}.", appt.id, client.name);
    Ok(())
}

fn warn_on_double_booking(ctx: &Ctx<'_>, appt: &Appointment) -> anyhow::Result<()> {
    let tz = ctx.session.timezone;
    let (Some(at), Some(day)) = (appt.starts_at(), appt.local_date(tz)) else {
        return Ok(());
    };
    let week = ctx
        .backend
        .appointments(ctx.pid(), WeekWindow::containing_instant(at, tz).into())?;
    let label = format!("{:02}:00", at.with_timezone(&tz).hour());
    let clashes: Vec<String> = bucket_all(&week, day, &label, tz)
        .into_iter()
        .filter(|other| other.id != appt.id && other.status == AppointmentStatus::Scheduled)
        .map(|other| format!("#{}", other.id))
        .collect();
    if !clashes.is_empty() {
        warn!(slot = %label, clashes = ?clashes, "double booking");
        println!(
            "Warning: {} {} already has {}.",
            day.format("%Y-%m-%d"),
            label,
            clashes.join(", ")
        );
    }
    Ok(())
}

fn transition(
    ctx: &Ctx<'_>,
    args: &[String],
    target: AppointmentStatus,
) -> anyhow::Result<()> {
    let id = parse_id(args.first(), "appointment")?;
    let mut appt = ctx.find_appointment(id)?;
    if appt.status.is_final() {
        return Err(anyhow!(
            "appointment {id} is already {}",
            appt.status.as_str()
        ));
    }
    appt.status = target;
    ctx.backend.update_appointment(&appt)?;
    ctx.backend.append_log(id, target.as_str(), ctx.now)?;
    println!("Appointment {id} marked {}.", target.as_str());
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_complete(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    transition(ctx, args, AppointmentStatus::Completed)
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_cancel(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    transition(ctx, args, AppointmentStatus::Cancelled)
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_reschedule(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let id = parse_id(args.first(), "appointment")?;
    let when = args
        .get(1)
        .ok_or_else(|| anyhow!("reschedule requires a new date/time"))?;
    let mut appt = ctx.find_appointment(id)?;
    if appt.status != AppointmentStatus::Scheduled {
        return Err(anyhow!(
            "only scheduled appointments can be moved; {id} is {}",
            appt.status.as_str()
        ));
    }

    let at = parse_date_expr(when, ctx.now, ctx.session.timezone)?;
    appt.reschedule(at);
    warn_on_double_booking(ctx, &appt)?;
    ctx.backend.update_appointment(&appt)?;
    ctx.backend.append_log(id, "rescheduled", ctx.now)?;
    println!("Appointment {id} moved to {}.", appt.datetime);
    Ok(())
}
