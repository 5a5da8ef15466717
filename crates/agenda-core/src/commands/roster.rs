use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{Datelike, Months};
use tracing::{info, instrument};

use super::{Ctx, parse_id};
use crate::backend::TimeRange;
use crate::cli::split_modifiers;
use crate::client::{Client, ClientTier};
use crate::contract::{Contract, ContractStatus, SignaturePosition};
use crate::payment::{Payment, PaymentMethod, PaymentStatus, format_cents, parse_amount_cents};
use crate::report::{
    ClientStats, PaymentTotals, PeriodStats, TOP_SERVICES_LIMIT, month_range, top_services,
    weekday_breakdown,
};
use crate::week::WeekWindow;

const CLIENT_KEYS: &[&str] = &["name", "email", "phone", "tier"];

#[instrument(skip(ctx, args))]
pub(super) fn cmd_clients(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let needle = args.join(" ");
    let clients = ctx.backend.clients(ctx.pid())?;
    let stats = ClientStats::from_clients(&clients);

    let shown: Vec<Client> = if needle.trim().is_empty() {
        clients
    } else {
        clients
            .into_iter()
            .filter(|c| c.matches_text(needle.trim()))
            .collect()
    };
    ctx.renderer.print_clients(&shown)?;
    println!();
    println!(
        "{} client(s), {} active, {} vip",
        stats.total, stats.active, stats.vip
    );
    Ok(())
}

fn validate_email(raw: &str) -> anyhow::Result<String> {
    let email = raw.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(anyhow!("invalid email address: {raw}"));
    }
    Ok(email.to_string())
}

fn apply_client_fields(client: &mut Client, mods: Vec<(String, String)>) -> anyhow::Result<()> {
    for (key, value) in mods {
        match key.as_str() {
            "name" => {
                let name = value.trim();
                if name.is_empty() {
                    return Err(anyhow!("client name cannot be empty"));
                }
                client.name = name.to_string();
            }
            "email" if value.trim().is_empty() => client.email = None,
            "email" => client.email = Some(validate_email(&value)?),
            "phone" if value.trim().is_empty() => client.phone = None,
            "phone" => client.phone = Some(value.trim().to_string()),
            "tier" => client.tier = value.parse::<ClientTier>()?,
            _ => {}
        }
    }
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_client_add(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let (name, mods) = split_modifiers(args, &CLIENT_KEYS[1..]);
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("client name is required"));
    }

    let mut client = Client::new(0, ctx.pid(), name.to_string(), ctx.now);
    apply_client_fields(&mut client, mods)?;
    let client = ctx.backend.insert_client(client)?;
    println!("Created client {} ({}).", client.id, client.name);
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_client_edit(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let id = parse_id(args.first(), "client")?;
    let (rest, mods) = split_modifiers(&args[1..], CLIENT_KEYS);
    if !rest.is_empty() {
        return Err(anyhow!("unexpected client-edit arguments: {rest}"));
    }
    if mods.is_empty() {
        return Err(anyhow!("nothing to change; use name:, email:, phone: or tier:"));
    }

    let mut client = ctx.find_client(id)?;
    apply_client_fields(&mut client, mods)?;
    ctx.backend.update_client(&client)?;
    println!("Updated client {id}.");
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_payments(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let filter = args
        .first()
        .map(|raw| raw.parse::<PaymentStatus>())
        .transpose()?;
    let payments = ctx.backend.payments(ctx.pid())?;
    let totals = PaymentTotals::from_payments(&payments);

    let shown: Vec<Payment> = payments
        .into_iter()
        .filter(|p| filter.is_none_or(|status| p.status == status))
        .collect();
    ctx.renderer.print_payments(&shown, &ctx.client_names()?)?;
    ctx.renderer.print_payment_totals(&totals)
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_pay(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let client_id = parse_id(args.first(), "client")?;
    let amount = args
        .get(1)
        .ok_or_else(|| anyhow!("pay requires an amount, e.g. 150.00"))?;
    let (rest, mods) = split_modifiers(
        &args[2..],
        &["status", "method", "service", "date", "appointment"],
    );
    if !rest.is_empty() {
        return Err(anyhow!("unexpected pay arguments: {rest}"));
    }

    let client = ctx.find_client(client_id)?;
    let mut payment = Payment {
        id: 0,
        client_id: client.id,
        appointment_id: None,
        service: None,
        amount_cents: parse_amount_cents(amount)?,
        date: ctx.today(),
        status: PaymentStatus::Pending,
        method: PaymentMethod::default(),
        professional_id: ctx.pid(),
    };

    for (key, value) in mods {
        match key.as_str() {
            "status" => payment.status = value.parse()?,
            "method" => payment.method = value.parse()?,
            "service" => payment.service = Some(value),
            "date" => payment.date = ctx.date_arg(Some(&value))?,
            "appointment" => {
                let appt = ctx.find_appointment(parse_id(Some(&value), "appointment")?)?;
                if appt.client_id != client.id {
                    return Err(anyhow!(
                        "appointment {} belongs to another client",
                        appt.id
                    ));
                }
                payment.appointment_id = Some(appt.id);
                if payment.service.is_none() {
                    payment.service = appt.service;
                }
            }
            _ => {}
        }
    }

    let payment = ctx.backend.insert_payment(payment)?;
    println!(
        "Recorded payment {} of {} for {} ({}).",
        payment.id,
        format_cents(payment.amount_cents),
        client.name,
        payment.status.as_str()
    );
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_markpaid(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let id = parse_id(args.first(), "payment")?;
    let mut payment = ctx
        .backend
        .payments(ctx.pid())?
        .into_iter()
        .find(|p| p.id == id)
        .ok_or_else(|| anyhow!("payment {id} not found"))?;
    if payment.status == PaymentStatus::Paid {
        println!("Payment {id} is already paid.");
        return Ok(());
    }
    payment.status = PaymentStatus::Paid;
    ctx.backend.update_payment(&payment)?;
    println!("Payment {id} marked paid.");
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_report(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let tz = ctx.session.timezone;
    let date = ctx.date_arg(args.first())?;
    let first = date.with_day(1).unwrap_or(date);
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(first);

    let month_appts = ctx.backend.appointments(ctx.pid(), month_range(date, tz))?;
    let payments = ctx.backend.payments(ctx.pid())?;
    let month_payments: Vec<Payment> = payments
        .iter()
        .filter(|p| p.date >= first && p.date <= last)
        .cloned()
        .collect();

    let window = WeekWindow::containing(date, tz);
    let week_appts = ctx
        .backend
        .appointments(ctx.pid(), TimeRange::from(window))?;

    let stats = PeriodStats::compute(&month_appts, &payments, first, last);
    let weekdays = weekday_breakdown(&window, &week_appts, &payments, tz);
    let services = top_services(&month_appts, &month_payments, TOP_SERVICES_LIMIT);

    info!(month = %first.format("%Y-%m"), appointments = stats.appointments, "built report");
    ctx.renderer.print_report(
        &format!("Report for {}", first.format("%B %Y")),
        &stats,
        &weekdays,
        &services,
    )
}

#[instrument(skip(ctx))]
pub(super) fn cmd_contracts(ctx: &Ctx<'_>) -> anyhow::Result<()> {
    let contracts = ctx.backend.contracts(ctx.pid())?;
    ctx.renderer
        .print_contracts(&contracts, &ctx.client_names()?)
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_contract_add(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let mut client_id = None;
    let mut words: Vec<&str> = Vec::new();
    for arg in args {
        match arg.strip_prefix("client:") {
            Some(raw) => client_id = Some(parse_id(Some(&raw.to_string()), "client")?),
            None => words.push(arg),
        }
    }

    let Some((file, title)) = words.split_last() else {
        return Err(anyhow!("contract-add requires TITLE and FILE.pdf"));
    };
    let title = title.join(" ");
    if title.trim().is_empty() {
        return Err(anyhow!("contract title is required"));
    }
    if let Some(id) = client_id {
        ctx.find_client(id)?;
    }

    let document_path = ctx
        .store
        .documents()
        .upload_pdf(ctx.pid(), Path::new(file), ctx.now)
        .context("failed to upload contract document")?;

    let contract = ctx.backend.insert_contract(Contract {
        id: 0,
        title: title.trim().to_string(),
        client_id,
        document_path,
        signed_document_path: None,
        status: ContractStatus::Pending,
        signature_positions: Vec::new(),
        created_at: ctx.now,
        signed_at: None,
        professional_id: ctx.pid(),
    })?;
    println!("Created contract {} ({}).", contract.id, contract.title);
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_contract_sign(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    let id = parse_id(args.first(), "contract")?;
    let positions = args[1..]
        .iter()
        .map(|raw| raw.parse::<SignaturePosition>())
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut contract = ctx
        .backend
        .contracts(ctx.pid())?
        .into_iter()
        .find(|c| c.id == id)
        .ok_or_else(|| anyhow!("contract {id} not found"))?;
    contract.sign(positions, ctx.now)?;
    ctx.backend.update_contract(&contract)?;
    println!(
        "Contract {id} signed at {} position(s).",
        contract.signature_positions.len()
    );
    Ok(())
}
