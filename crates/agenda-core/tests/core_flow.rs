use agenda_core::account::{Profile, ProfileStatus, Role};
use agenda_core::appointment::{Appointment, AppointmentStatus};
use agenda_core::backend::{Backend, TimeRange};
use agenda_core::client::Client;
use agenda_core::config::Config;
use agenda_core::contract::{ContractStatus, SignaturePosition};
use agenda_core::datastore::DataStore;
use agenda_core::payment::{Payment, PaymentMethod, PaymentStatus};
use agenda_core::report::PaymentTotals;
use agenda_core::session::Session;
use agenda_core::week::{Direction, WeekView, WeekWindow};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tempfile::tempdir;

const SP: Tz = chrono_tz::America::Sao_Paulo;

fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    SP.with_ymd_and_hms(y, m, d, h, 0, 0)
        .single()
        .expect("valid local time")
        .with_timezone(&Utc)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn seeded_store(dir: &std::path::Path) -> (DataStore, Client) {
    let store = DataStore::open(dir).expect("open datastore");
    let now = local(2024, 9, 20, 10);
    store
        .insert_profile(Profile::new(
            "Dra. Ana".to_string(),
            "ana@clinic.test".to_string(),
            Role::Admin,
            1,
        ))
        .expect("insert profile");
    let client = store
        .insert_client(Client::new(0, 1, "Bruno Lima".to_string(), now))
        .expect("insert client");
    (store, client)
}

#[test]
fn booked_appointments_land_in_their_week_cells() {
    let temp = tempdir().expect("tempdir");
    let (store, client) = seeded_store(temp.path());

    for at in [
        local(2024, 9, 24, 14),
        local(2024, 9, 24, 14),
        local(2024, 9, 26, 9),
        local(2024, 10, 1, 9),
    ] {
        store
            .insert_appointment(Appointment::new_scheduled(0, 1, client.id, at))
            .expect("insert appointment");
    }
    let mut broken = Appointment::new_scheduled(0, 1, client.id, local(2024, 9, 25, 8));
    broken.datetime = "next tuesday-ish".to_string();
    store.insert_appointment(broken).expect("insert broken");

    let mut view = WeekView::new(date(2024, 9, 25), SP);
    let (token, window) = view.begin_fetch();
    let rows = store
        .appointments(1, TimeRange::from(window))
        .expect("fetch week");
    assert_eq!(rows.len(), 3);
    assert!(view.apply_fetch(token, rows));

    let grid = view.grid();
    assert_eq!(grid.days()[0], date(2024, 9, 22));
    assert_eq!(grid.lookup(date(2024, 9, 24), "14:00").len(), 2);
    assert_eq!(grid.lookup(date(2024, 9, 26), "09:00").len(), 1);
    assert!(grid.lookup(date(2024, 9, 24), "15:00").is_empty());
    assert_eq!(grid.conflicts().len(), 1);

    view.navigate(Direction::Next);
    let (token, window) = view.begin_fetch();
    let rows = store.appointments(1, window.into()).expect("fetch next");
    assert!(view.apply_fetch(token, rows));
    assert_eq!(view.grid().lookup(date(2024, 10, 1), "09:00").len(), 1);

    let everything = store
        .appointments(1, TimeRange::default())
        .expect("fetch all");
    assert_eq!(everything.len(), 5);
    assert_eq!(everything[4].datetime, "next tuesday-ish");
}

#[test]
fn stale_fetch_does_not_overwrite_newer_week() {
    let temp = tempdir().expect("tempdir");
    let (store, client) = seeded_store(temp.path());
    store
        .insert_appointment(Appointment::new_scheduled(0, 1, client.id, local(2024, 9, 24, 14)))
        .expect("insert appointment");

    let mut view = WeekView::new(date(2024, 9, 25), SP);
    let (old_token, old_window) = view.begin_fetch();
    view.navigate(Direction::Previous);
    let (new_token, new_window) = view.begin_fetch();

    let newer = store.appointments(1, new_window.into()).expect("fetch new");
    assert!(view.apply_fetch(new_token, newer));
    let older = store.appointments(1, old_window.into()).expect("fetch old");
    assert!(!view.apply_fetch(old_token, older));

    assert!(view.appointments().is_empty());
    assert_eq!(view.window(), WeekWindow::containing(date(2024, 9, 18), SP));
}

#[test]
fn session_resolves_single_active_profile() {
    let temp = tempdir().expect("tempdir");
    let (store, _) = seeded_store(temp.path());
    let mut cfg = Config::default();
    cfg.apply_overrides([("rc.timezone".to_string(), "UTC".to_string())]);

    let session = Session::resolve(&cfg, &store).expect("resolve session");
    assert_eq!(session.professional_id, 1);
    assert_eq!(session.timezone, chrono_tz::UTC);
    assert!(session.require_admin().is_ok());

    let mut helper = Profile::new(
        "Carla".to_string(),
        "carla@clinic.test".to_string(),
        Role::User,
        1,
    );
    helper.status = ProfileStatus::Active;
    store.insert_profile(helper).expect("insert helper");
    assert!(Session::resolve(&cfg, &store).is_err());

    cfg.apply_overrides([("profile".to_string(), "CARLA@clinic.test".to_string())]);
    let session = Session::resolve(&cfg, &store).expect("resolve by email");
    assert!(session.require_admin().is_err());
}

#[test]
fn payments_and_appointment_status_persist() {
    let temp = tempdir().expect("tempdir");
    let (store, client) = seeded_store(temp.path());

    let mut appt = store
        .insert_appointment(Appointment::new_scheduled(0, 1, client.id, local(2024, 9, 24, 14)))
        .expect("insert appointment");
    appt.status = AppointmentStatus::Completed;
    store.update_appointment(&appt).expect("update appointment");
    store
        .append_log(appt.id, "completed", local(2024, 9, 24, 15))
        .expect("append log");

    for (cents, status) in [
        (15_000, PaymentStatus::Paid),
        (12_000, PaymentStatus::Pending),
        (8_000, PaymentStatus::Overdue),
    ] {
        store
            .insert_payment(Payment {
                id: 0,
                client_id: client.id,
                appointment_id: Some(appt.id),
                service: None,
                amount_cents: cents,
                date: date(2024, 9, 24),
                status,
                method: PaymentMethod::Pix,
                professional_id: 1,
            })
            .expect("insert payment");
    }

    let reopened = DataStore::open(temp.path()).expect("reopen datastore");
    let payments = reopened.payments(1).expect("load payments");
    let totals = PaymentTotals::from_payments(&payments);
    assert_eq!(totals.paid, 15_000);
    assert_eq!(totals.outstanding(), 20_000);
    assert!(reopened.payments(2).expect("other tenant").is_empty());

    let stored = reopened
        .appointments(1, TimeRange::default())
        .expect("load appointments");
    assert_eq!(stored[0].status, AppointmentStatus::Completed);

    let logs = reopened.recent_logs(1, 3).expect("recent logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "completed");
    assert!(reopened.recent_logs(2, 3).expect("other tenant").is_empty());
}

#[test]
fn contract_upload_and_signature() {
    let temp = tempdir().expect("tempdir");
    let (store, client) = seeded_store(temp.path());
    let now = local(2024, 9, 20, 10);

    let source = temp.path().join("termo.pdf");
    std::fs::write(&source, b"%PDF-1.4\n%test\n").expect("write pdf");
    let relative = store
        .documents()
        .upload_pdf(1, &source, now)
        .expect("upload pdf");
    assert!(relative.starts_with("1/"));
    assert!(store.documents().resolve(&relative).exists());

    let mut contract = store
        .insert_contract(agenda_core::contract::Contract {
            id: 0,
            title: "Termo de consentimento".to_string(),
            client_id: Some(client.id),
            document_path: relative,
            signed_document_path: None,
            status: ContractStatus::Pending,
            signature_positions: Vec::new(),
            created_at: now,
            signed_at: None,
            professional_id: 1,
        })
        .expect("insert contract");

    let position: SignaturePosition = "120,640@2".parse().expect("position");
    contract.sign(vec![position], now).expect("sign");
    store.update_contract(&contract).expect("update contract");

    let stored = store.contracts(1).expect("load contracts");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, ContractStatus::Signed);
    assert_eq!(stored[0].signature_positions[0].page, 2);
}
