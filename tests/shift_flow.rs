use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};

use drive_ledger::maintenance::{self, DueStatus};
use drive_ledger::model::{AppProfile, Car, MaintenanceTask, UserProfile};
use drive_ledger::report::{self, ReportWindow};
use drive_ledger::storage::Storage;
use drive_ledger::store::{ExpenseInput, RefuelInput};
use drive_ledger::{Action, AppState, GeoFix, LedgerConfig, LedgerError, Phase};

const LON: f64 = -46.6333;

fn lat_for_km(km: f64) -> f64 {
    (km / 6371.0).to_degrees()
}

fn onboarded(now: DateTime<Utc>, config: &LedgerConfig) -> AppState {
    let profile = UserProfile {
        name: "Ana".to_string(),
        car: Car {
            brand: "Fiat".to_string(),
            model: "Argo".to_string(),
            year: Some(2021),
            tank_capacity_l: 48.0,
            km_per_liter: Some(10.0),
        },
        maintenance_reserve_rate: 0.05,
        emergency_reserve_rate: 0.03,
        default_app_profile: Some("app_a".to_string()),
        current_fuel_level: 20.0,
        last_odometer: 20000.0,
    };

    AppState::default()
        .apply(
            Action::UpsertAppProfile(AppProfile {
                id: "app_a".to_string(),
                name: "App A".to_string(),
                commission_rate: 0.12,
                fixed_gross: None,
            }),
            now,
            config,
        )
        .unwrap()
        .apply(Action::UpdateProfile(profile), now, config)
        .unwrap()
        .apply(
            Action::Refuel(RefuelInput {
                price_per_liter: 6.0,
                amount_spent: 60.0,
                liters: 10.0,
                odometer: 20000.0,
                full_tank: false,
                station: Some("Posto Central".to_string()),
            }),
            now,
            config,
        )
        .unwrap()
}

/// Drive `km` north in 100 m steps, one fix every 10 s.
fn drive(state: &mut AppState, from_km: f64, km: f64, at: DateTime<Utc>, config: &LedgerConfig) -> DateTime<Utc> {
    let steps = (km * 10.0).round() as i64;
    let mut t = at;
    for i in 1..=steps {
        t = at + Duration::seconds(10 * i);
        state.record_fix(GeoFix::new(lat_for_km(from_km + i as f64 * 0.1), LON, t), config);
    }
    t
}

#[test]
fn test_full_shift_settles_reference_ride() {
    let config = LedgerConfig::default();
    let start = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap();
    let mut state = onboarded(start, &config)
        .apply(
            Action::StartShift {
                start_odometer: 20000.0,
                app_profile_id: None,
            },
            start,
            &config,
        )
        .unwrap();
    assert_eq!(state.phase, Phase::OnShift);

    // Anchor fix, then 1 km off duty
    state.record_fix(GeoFix::new(0.0, LON, start), &config);
    let t = drive(&mut state, 0.0, 1.0, start, &config);

    state = state.apply(Action::AcceptRide, t, &config).unwrap();
    let t = drive(&mut state, 1.0, 2.5, t, &config);
    state = state.apply(Action::BoardPassenger, t, &config).unwrap();
    let t = drive(&mut state, 3.5, 7.5, t, &config);
    state = state
        .apply(Action::FinishRide { gross: Some(50.0) }, t, &config)
        .unwrap();
    assert_eq!(state.phase, Phase::OnShift);

    let shift = state.shift.as_ref().unwrap();
    assert_eq!(shift.rides.len(), 1);
    let ride = &shift.rides[0];
    assert_relative_eq!(ride.en_route_km, 2.5, epsilon = 1e-6);
    assert_relative_eq!(ride.passenger_km, 7.5, epsilon = 1e-6);
    assert_relative_eq!(ride.breakdown.fuel_cost, 6.0, epsilon = 1e-5);
    assert_relative_eq!(ride.breakdown.app_tax, 6.0, epsilon = 1e-9);
    assert_relative_eq!(ride.breakdown.net_profit, 34.0, epsilon = 1e-5);
    assert_relative_eq!(shift.off_duty_km, 1.0, epsilon = 1e-6);

    // 11 km at 10 km/L from the 30 L after refuel
    assert_relative_eq!(state.profile.current_fuel_level, 30.0 - 1.1, epsilon = 1e-6);

    state = state
        .apply(
            Action::LogExpense(ExpenseInput {
                category: "parking".to_string(),
                amount: 4.0,
                description: None,
                work_expense: true,
            }),
            t,
            &config,
        )
        .unwrap();

    let end = t + Duration::minutes(5);
    state = state
        .apply(Action::EndShift { end_odometer: 20012.0 }, end, &config)
        .unwrap();
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.shift.is_none());
    assert_relative_eq!(state.profile.last_odometer, 20012.0);

    let session = state.sessions.last().unwrap();
    assert_relative_eq!(session.total_gross, 50.0);
    assert_relative_eq!(session.total_net, 30.0, epsilon = 1e-5);
    assert_relative_eq!(session.driven_km(), 12.0);

    let totals = report::aggregate(&state.sessions, ReportWindow::WEEK, end + Duration::days(1));
    assert_eq!(totals.sessions, 1);
    assert_eq!(totals.rides, 1);
    assert_relative_eq!(totals.reserves(), 4.0, epsilon = 1e-9);
    assert_relative_eq!(totals.work_expenses, 4.0);
}

#[test]
fn test_idle_fixes_and_illegal_commands() {
    let config = LedgerConfig::default();
    let now = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap();
    let mut state = onboarded(now, &config);
    let fuel_before = state.profile.current_fuel_level;

    state.record_fix(GeoFix::new(0.0, LON, now), &config);
    drive(&mut state, 0.0, 2.0, now, &config);
    assert_relative_eq!(state.profile.current_fuel_level, fuel_before);

    let err = state.apply(Action::BoardPassenger, now, &config).unwrap_err();
    assert!(matches!(err, LedgerError::IllegalTransition { .. }));
    assert!(err.is_user_error());
    assert_eq!(state.phase, Phase::Idle);

    let err = state
        .apply(Action::FinishRide { gross: Some(10.0) }, now, &config)
        .unwrap_err();
    assert!(matches!(err, LedgerError::IllegalTransition { .. }));
}

#[test]
fn test_ledger_survives_restart_mid_shift() {
    let dir = tempfile::tempdir().unwrap();
    let config = LedgerConfig::default().with_data_dir(dir.path());
    let storage = Storage::new(config.snapshot_path());
    let now = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap();

    let mut state = onboarded(now, &config)
        .apply(
            Action::StartShift {
                start_odometer: 20000.0,
                app_profile_id: None,
            },
            now,
            &config,
        )
        .unwrap()
        .apply(Action::AcceptRide, now, &config)
        .unwrap();
    state.record_fix(GeoFix::new(0.0, LON, now), &config);
    let t = drive(&mut state, 0.0, 1.5, now, &config);
    storage.save(&state).unwrap();

    let mut restored = Storage::new(config.snapshot_path()).load();
    assert_eq!(
        restored.shift.as_ref().map(|s| s.id.clone()),
        state.shift.as_ref().map(|s| s.id.clone())
    );
    assert_eq!(restored.phase, Phase::Accepting);

    // The restored accumulator carries on from the last fix
    let t = drive(&mut restored, 1.5, 0.5, t, &config);
    let shift = restored.shift.as_ref().unwrap();
    assert_relative_eq!(shift.en_route_km, 2.0, epsilon = 1e-6);

    let restored = restored.apply(Action::CancelRide, t, &config).unwrap();
    let shift = restored.shift.as_ref().unwrap();
    assert!(shift.ride.is_none());
    assert!(shift.rides.is_empty());
    assert_relative_eq!(shift.off_duty_km, 2.0, epsilon = 1e-6);
}

#[test]
fn test_maintenance_outlook_from_logged_tasks() {
    let config = LedgerConfig::default();
    let now = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap();
    let state = onboarded(now, &config)
        .apply(
            Action::UpsertMaintenance(MaintenanceTask {
                id: String::new(),
                service: "oil change".to_string(),
                interval_km: 10000.0,
                last_service_odometer: 20000.0,
                last_cost: 300.0,
            }),
            now,
            &config,
        )
        .unwrap();
    assert_eq!(state.maintenance.len(), 1);
    assert!(!state.maintenance[0].id.is_empty());

    let outlook = maintenance::outlook(&state.maintenance, &state.sessions, 27500.0, now, &config);
    assert_relative_eq!(outlook.rate_per_km, 0.03, epsilon = 1e-12);
    assert_eq!(outlook.tasks[0].status, DueStatus::Warning);

    let outlook = maintenance::outlook(&state.maintenance, &state.sessions, 30500.0, now, &config);
    assert_eq!(outlook.tasks[0].status, DueStatus::Urgent);
}
