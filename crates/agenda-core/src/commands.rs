mod admin;
mod calendar;
mod roster;

use std::collections::HashMap;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, instrument};

use crate::appointment::Appointment;
use crate::backend::{Backend, TimeRange};
use crate::cli::Invocation;
use crate::client::Client;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{local_date, parse_date_expr};
use crate::render::Renderer;
use crate::session::Session;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "week",
        "today",
        "dashboard",
        "appointments",
        "book",
        "complete",
        "cancel",
        "reschedule",
        "clients",
        "client-add",
        "client-edit",
        "payments",
        "pay",
        "markpaid",
        "report",
        "contracts",
        "contract-add",
        "contract-sign",
        "users",
        "user-add",
        "user-role",
        "user-status",
        "professional-init",
        "config",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Everything a command handler may touch, passed explicitly.
pub struct Ctx<'a> {
    pub backend: &'a dyn Backend,
    pub store: &'a DataStore,
    pub session: &'a Session,
    pub cfg: &'a Config,
    pub renderer: &'a Renderer,
    pub now: DateTime<Utc>,
}

impl Ctx<'_> {
    fn pid(&self) -> u64 {
        self.session.professional_id
    }

    fn today(&self) -> NaiveDate {
        local_date(self.now, self.session.timezone)
    }

    /// Local date of an optional date expression, defaulting to today.
    fn date_arg(&self, raw: Option<&String>) -> anyhow::Result<NaiveDate> {
        match raw {
            Some(raw) => {
                let at = parse_date_expr(raw, self.now, self.session.timezone)?;
                Ok(local_date(at, self.session.timezone))
            }
            None => Ok(self.today()),
        }
    }

    fn client_names(&self) -> anyhow::Result<HashMap<u64, String>> {
        Ok(self
            .backend
            .clients(self.pid())?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect())
    }

    fn find_client(&self, id: u64) -> anyhow::Result<Client> {
        self.backend
            .clients(self.pid())?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow!("client {id} not found"))
    }

    fn find_appointment(&self, id: u64) -> anyhow::Result<Appointment> {
        self.backend
            .appointments(self.pid(), TimeRange::default())?
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow!("appointment {id} not found"))
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();

    debug!(command, args = ?inv.args, "dispatching command");

    match command {
        "professional-init" => return admin::cmd_professional_init(store, &inv.args),
        "config" => return cmd_config(cfg),
        "help" => return cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let session = Session::resolve(cfg, store)?;
    let ctx = Ctx {
        backend: store,
        store,
        session: &session,
        cfg,
        renderer,
        now,
    };
    let args = inv.args.as_slice();

    match command {
        "week" => calendar::cmd_week(&ctx, args),
        "today" | "dashboard" => calendar::cmd_today(&ctx),
        "appointments" => calendar::cmd_appointments(&ctx, args),
        "book" => calendar::cmd_book(&ctx, args),
        "complete" => calendar::cmd_complete(&ctx, args),
        "cancel" => calendar::cmd_cancel(&ctx, args),
        "reschedule" => calendar::cmd_reschedule(&ctx, args),
        "clients" => roster::cmd_clients(&ctx, args),
        "client-add" => roster::cmd_client_add(&ctx, args),
        "client-edit" => roster::cmd_client_edit(&ctx, args),
        "payments" => roster::cmd_payments(&ctx, args),
        "pay" => roster::cmd_pay(&ctx, args),
        "markpaid" => roster::cmd_markpaid(&ctx, args),
        "report" => roster::cmd_report(&ctx, args),
        "contracts" => roster::cmd_contracts(&ctx),
        "contract-add" => roster::cmd_contract_add(&ctx, args),
        "contract-sign" => roster::cmd_contract_sign(&ctx, args),
        "users" => admin::cmd_users(&ctx),
        "user-add" => admin::cmd_user_add(&ctx, args),
        "user-role" => admin::cmd_user_role(&ctx, args),
        "user-status" => admin::cmd_user_status(&ctx, args),
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn parse_id(raw: Option<&String>, what: &str) -> anyhow::Result<u64> {
    let raw = raw.ok_or_else(|| anyhow!("{what} id is required"))?;
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("invalid {what} id: {raw}"))
}

fn cmd_config(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<(&String, &String)> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k} = {v}");
    }
    for file in &cfg.loaded_files {
        println!("# loaded {}", file.display());
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "usage: agenda [-v|-q] [--agendarc FILE] [--data DIR] [--rc KEY=VALUE] <command> [args]

calendar
  week [DATE] [next|prev]... [--compact]     weekly grid, Sunday to Saturday
  today | dashboard                          today's agenda and recent activity
  appointments [DATE] [--all]                appointments of a week as a list
  book CLIENT DATETIME [service:S] [note:N] [duration:MIN]
  complete ID | cancel ID
  reschedule ID DATETIME

clients and money
  clients [TEXT]
  client-add NAME [email:E] [phone:P] [tier:active|vip|inactive]
  client-edit ID [name:N] [email:E] [phone:P] [tier:T]
  payments [paid|pending|overdue]
  pay CLIENT AMOUNT [status:S] [method:cash|pix|card|transfer] [service:S] [date:D] [appointment:ID]
  markpaid ID
  report [DATE]

contracts
  contracts
  contract-add TITLE FILE.pdf [client:ID]
  contract-sign ID X,Y[@PAGE]...

administration
  professional-init NAME EMAIL
  users
  user-add NAME EMAIL [role:admin|user] [status:active|inactive]
  user-role PROFILE admin|user
  user-status PROFILE active|inactive

  config | help | version"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::{TempDir, tempdir};

    use super::{Ctx, admin, calendar, expand_command_abbrev, known_command_names, roster};
    use crate::account::{ProfileStatus, Role};
    use crate::appointment::AppointmentStatus;
    use crate::backend::{Backend, TimeRange};
    use crate::client::Client;
    use crate::config::Config;
    use crate::datastore::DataStore;
    use crate::payment::PaymentStatus;
    use crate::render::Renderer;
    use crate::session::Session;

    const SP: chrono_tz::Tz = chrono_tz::America::Sao_Paulo;

    struct Fixture {
        _dir: TempDir,
        store: DataStore,
        cfg: Config,
        renderer: Renderer,
        now: DateTime<Utc>,
    }

    impl Fixture {
        /// A professional with one admin (`ana@clinic.test`) and one client.
        fn new() -> Self {
            let dir = tempdir().expect("tempdir");
            let store = DataStore::open(dir.path()).expect("open datastore");
            admin::cmd_professional_init(&store, &strings(&["Ana", "Souza", "ana@clinic.test"]))
                .expect("professional init");
            let now = Utc
                .with_ymd_and_hms(2024, 9, 20, 13, 0, 0)
                .single()
                .expect("valid now");
            store
                .insert_client(Client::new(0, 1, "Bruno Lima".to_string(), now))
                .expect("insert client");
            Self {
                _dir: dir,
                store,
                cfg: Config::default(),
                renderer: Renderer::plain(),
                now,
            }
        }

        fn session(&self, email: &str) -> Session {
            let profile = self
                .store
                .profiles()
                .expect("load profiles")
                .into_iter()
                .find(|p| p.email == email)
                .expect("profile exists");
            Session::new(profile, SP)
        }

        fn ctx<'a>(&'a self, session: &'a Session) -> Ctx<'a> {
            Ctx {
                backend: &self.store,
                store: &self.store,
                session,
                cfg: &self.cfg,
                renderer: &self.renderer,
                now: self.now,
            }
        }

        fn status_of(&self, id: u64) -> AppointmentStatus {
            self.store
                .appointments(1, TimeRange::default())
                .expect("load appointments")
                .into_iter()
                .find(|a| a.id == id)
                .expect("appointment exists")
                .status
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn abbreviations_resolve_uniquely() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("we", &known), Some("week"));
        assert_eq!(expand_command_abbrev("clients", &known), Some("clients"));
        assert_eq!(expand_command_abbrev("contract", &known), None);
        assert_eq!(expand_command_abbrev("resch", &known), Some("reschedule"));
        assert_eq!(expand_command_abbrev("zzz", &known), None);
    }

    #[test]
    fn final_appointments_cannot_transition_again() {
        let fx = Fixture::new();
        let session = fx.session("ana@clinic.test");
        let ctx = fx.ctx(&session);

        calendar::cmd_book(&ctx, &strings(&["1", "2024-09-24T14:00", "service:Consulta"]))
            .expect("book first");
        calendar::cmd_book(&ctx, &strings(&["1", "2024-09-25T10:00"])).expect("book second");

        calendar::cmd_cancel(&ctx, &strings(&["1"])).expect("cancel");
        let err = calendar::cmd_complete(&ctx, &strings(&["1"])).expect_err("complete after cancel");
        assert!(err.to_string().contains("already cancelled"));
        assert_eq!(fx.status_of(1), AppointmentStatus::Cancelled);

        calendar::cmd_complete(&ctx, &strings(&["2"])).expect("complete");
        assert!(calendar::cmd_cancel(&ctx, &strings(&["2"])).is_err());
        assert_eq!(fx.status_of(2), AppointmentStatus::Completed);

        let logs = fx.store.recent_logs(1, 10).expect("recent logs");
        assert_eq!(logs.len(), 4);
        assert_eq!(logs[0].action, "completed");
    }

    #[test]
    fn only_scheduled_appointments_can_be_rescheduled() {
        let fx = Fixture::new();
        let session = fx.session("ana@clinic.test");
        let ctx = fx.ctx(&session);

        calendar::cmd_book(&ctx, &strings(&["1", "2024-09-24T14:00"])).expect("book");
        let before = fx
            .store
            .appointments(1, TimeRange::default())
            .expect("load")[0]
            .datetime
            .clone();

        calendar::cmd_reschedule(&ctx, &strings(&["1", "2024-09-24T16:00"])).expect("move");
        let moved = fx
            .store
            .appointments(1, TimeRange::default())
            .expect("load")[0]
            .datetime
            .clone();
        assert_ne!(before, moved);
        assert_eq!(moved, "2024-09-24T19:00:00Z");

        calendar::cmd_complete(&ctx, &strings(&["1"])).expect("complete");
        assert!(calendar::cmd_reschedule(&ctx, &strings(&["1", "2024-09-26T09:00"])).is_err());
        assert!(calendar::cmd_reschedule(&ctx, &strings(&["9", "2024-09-26T09:00"])).is_err());
    }

    #[test]
    fn admin_commands_reject_regular_users() {
        let fx = Fixture::new();
        let admin_session = fx.session("ana@clinic.test");
        admin::cmd_user_add(&fx.ctx(&admin_session), &strings(&["Carla", "carla@clinic.test"]))
            .expect("add user");

        let user_session = fx.session("carla@clinic.test");
        assert_eq!(user_session.profile.role, Role::User);
        let ctx = fx.ctx(&user_session);
        assert!(admin::cmd_users(&ctx).is_err());
        assert!(admin::cmd_user_add(&ctx, &strings(&["Davi", "davi@clinic.test"])).is_err());
        assert!(admin::cmd_user_role(&ctx, &strings(&["carla@clinic.test", "admin"])).is_err());
        assert!(admin::cmd_user_status(&ctx, &strings(&["ana@clinic.test", "inactive"])).is_err());

        assert_eq!(fx.store.profiles().expect("profiles").len(), 2);
        assert_eq!(fx.session("carla@clinic.test").profile.role, Role::User);
    }

    #[test]
    fn last_active_admin_is_kept() {
        let fx = Fixture::new();
        let session = fx.session("ana@clinic.test");
        let ctx = fx.ctx(&session);

        assert!(admin::cmd_user_role(&ctx, &strings(&["ana@clinic.test", "user"])).is_err());
        assert!(admin::cmd_user_status(&ctx, &strings(&["ana@clinic.test", "inactive"])).is_err());
        let ana = fx.session("ana@clinic.test").profile;
        assert!(ana.is_admin());

        admin::cmd_user_add(&ctx, &strings(&["Bia", "bia@clinic.test", "role:admin", "status:inactive"]))
            .expect("add inactive admin");
        assert!(admin::cmd_user_role(&ctx, &strings(&["ana@clinic.test", "user"])).is_err());

        admin::cmd_user_status(&ctx, &strings(&["bia@clinic.test", "active"])).expect("activate");
        admin::cmd_user_role(&ctx, &strings(&["ana@clinic.test", "user"])).expect("demote");
        assert_eq!(fx.session("ana@clinic.test").profile.role, Role::User);

        let bia = fx.session("bia@clinic.test").profile;
        assert_eq!(bia.status, ProfileStatus::Active);
        assert!(bia.is_admin());
    }

    #[test]
    fn pay_validates_amount_and_markpaid_settles() {
        let fx = Fixture::new();
        let session = fx.session("ana@clinic.test");
        let ctx = fx.ctx(&session);

        assert!(roster::cmd_pay(&ctx, &strings(&["1", "-0.50"])).is_err());
        assert!(roster::cmd_pay(&ctx, &strings(&["1", "999999999999999999"])).is_err());
        assert!(roster::cmd_pay(&ctx, &strings(&["7", "150"])).is_err());
        assert!(fx.store.payments(1).expect("payments").is_empty());

        roster::cmd_pay(&ctx, &strings(&["1", "150,50", "method:card"])).expect("pay");
        let payments = fx.store.payments(1).expect("payments");
        assert_eq!(payments[0].amount_cents, 15_050);
        assert_eq!(payments[0].status, PaymentStatus::Pending);

        roster::cmd_markpaid(&ctx, &strings(&["1"])).expect("mark paid");
        assert_eq!(fx.store.payments(1).expect("payments")[0].status, PaymentStatus::Paid);
    }
}
