use anyhow::anyhow;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::Ctx;
use crate::account::{Professional, Profile, ProfileStatus, Role, SubscriptionStatus};
use crate::backend::Backend;
use crate::cli::split_modifiers;
use crate::datastore::DataStore;
use crate::report::UserStats;

fn validate_email(raw: &str) -> anyhow::Result<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(anyhow!("invalid email address: {raw}"));
    }
    Ok(email)
}

/// Creates the tenant account and its first administrator profile.
#[instrument(skip(store, args))]
pub(super) fn cmd_professional_init(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    let Some((email, name)) = args.split_last() else {
        return Err(anyhow!("professional-init requires NAME and EMAIL"));
    };
    let name = name.join(" ");
    if name.trim().is_empty() {
        return Err(anyhow!("professional name is required"));
    }
    let email = validate_email(email)?;

    if store
        .professionals()?
        .iter()
        .any(|p| p.email.eq_ignore_ascii_case(&email))
    {
        return Err(anyhow!("a professional with email {email} already exists"));
    }

    let professional = store.insert_professional(Professional {
        id: 0,
        name: name.trim().to_string(),
        email: email.clone(),
        subscription_status: SubscriptionStatus::Inactive,
    })?;
    let profile = store.insert_profile(Profile::new(
        professional.name.clone(),
        email,
        Role::Admin,
        professional.id,
    ))?;

    info!(professional = professional.id, profile = %profile.id, "initialized professional");
    println!(
        "Created professional {} ({}) with administrator profile {}.",
        professional.id, professional.name, profile.id
    );
    Ok(())
}

fn team(ctx: &Ctx<'_>) -> anyhow::Result<Vec<Profile>> {
    Ok(ctx
        .backend
        .profiles()?
        .into_iter()
        .filter(|p| p.professional_id == ctx.pid())
        .collect())
}

fn find_member(ctx: &Ctx<'_>, key: Option<&String>) -> anyhow::Result<Profile> {
    let key = key.ok_or_else(|| anyhow!("profile id or email is required"))?;
    let by_id = Uuid::parse_str(key.trim()).ok();
    team(ctx)?
        .into_iter()
        .find(|p| Some(p.id) == by_id || p.email.eq_ignore_ascii_case(key.trim()))
        .ok_or_else(|| anyhow!("no profile matches '{key}'"))
}

/// Refuses a change that would leave the professional without an active
/// administrator.
fn ensure_admin_remains(ctx: &Ctx<'_>, changed: &Profile) -> anyhow::Result<()> {
    if changed.is_admin() {
        return Ok(());
    }
    let others = team(ctx)?
        .into_iter()
        .filter(|p| p.id != changed.id && p.is_admin())
        .count();
    if others == 0 {
        warn!(profile = %changed.id, "refusing to remove last administrator");
        return Err(anyhow!(
            "{} is the last active administrator",
            changed.email
        ));
    }
    Ok(())
}

#[instrument(skip(ctx))]
pub(super) fn cmd_users(ctx: &Ctx<'_>) -> anyhow::Result<()> {
    ctx.session.require_admin()?;
    let profiles = team(ctx)?;
    let stats = UserStats::from_profiles(&profiles);
    ctx.renderer.print_profiles(&profiles)?;
    println!();
    println!(
        "{} user(s), {} admin(s), {}% active",
        stats.total,
        stats.admins,
        stats.active_percent()
    );
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_user_add(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    ctx.session.require_admin()?;
    let (text, mods) = split_modifiers(args, &["role", "status"]);
    let words: Vec<&str> = text.split_whitespace().collect();
    let Some((email, name)) = words.split_last() else {
        return Err(anyhow!("user-add requires NAME and EMAIL"));
    };
    let name = name.join(" ");
    if name.is_empty() {
        return Err(anyhow!("user name is required"));
    }

    let mut profile = Profile::new(name, validate_email(email)?, Role::User, ctx.pid());
    for (key, value) in mods {
        match key.as_str() {
            "role" => profile.role = value.parse()?,
            "status" => profile.status = value.parse()?,
            _ => {}
        }
    }

    let profile = ctx.backend.insert_profile(profile)?;
    println!(
        "Added {} ({}) as {}.",
        profile.name,
        profile.email,
        profile.role.as_str()
    );
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_user_role(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    ctx.session.require_admin()?;
    let mut profile = find_member(ctx, args.first())?;
    let role: Role = args
        .get(1)
        .ok_or_else(|| anyhow!("user-role requires admin or user"))?
        .parse()?;

    profile.role = role;
    ensure_admin_remains(ctx, &profile)?;
    ctx.backend.update_profile(&profile)?;
    println!("{} is now {}.", profile.email, role.as_str());
    Ok(())
}

#[instrument(skip(ctx, args))]
pub(super) fn cmd_user_status(ctx: &Ctx<'_>, args: &[String]) -> anyhow::Result<()> {
    ctx.session.require_admin()?;
    let mut profile = find_member(ctx, args.first())?;
    let status: ProfileStatus = args
        .get(1)
        .ok_or_else(|| anyhow!("user-status requires active or inactive"))?
        .parse()?;

    profile.status = status;
    ensure_admin_remains(ctx, &profile)?;
    ctx.backend.update_profile(&profile)?;
    println!("{} is now {}.", profile.email, status.as_str());
    Ok(())
}
