//! The single owner of ledger state while the app runs.
//!
//! Driver commands and location fixes arrive on separate channels but are
//! handled one at a time by one task, so there is only ever one writer.
//! Each accepted change is written to the snapshot straight away.

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::capabilities::{Haptics, WakeLock};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::live_status::LiveStatus;
use crate::model::AppState;
use crate::phase::Phase;
use crate::sampler::{FixEvent, LocationSource, Subscription};
use crate::storage::Storage;
use crate::store::Action;

const FIX_CHANNEL_CAPACITY: usize = 100;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

pub enum TrackerCommand {
    Apply {
        action: Action,
        reply: oneshot::Sender<LedgerResult<LiveStatus>>,
    },
    Status {
        reply: oneshot::Sender<LiveStatus>,
    },
    Snapshot {
        reply: oneshot::Sender<AppState>,
    },
    Shutdown,
}

/// Cloneable front end of a running tracker
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<TrackerCommand>,
}

impl TrackerHandle {
    pub async fn apply(&self, action: Action) -> LedgerResult<LiveStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TrackerCommand::Apply { action, reply })
            .await
            .map_err(|_| LedgerError::TrackerStopped)?;
        rx.await.map_err(|_| LedgerError::TrackerStopped)?
    }

    pub async fn status(&self) -> LedgerResult<LiveStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TrackerCommand::Status { reply })
            .await
            .map_err(|_| LedgerError::TrackerStopped)?;
        rx.await.map_err(|_| LedgerError::TrackerStopped)
    }

    pub async fn snapshot(&self) -> LedgerResult<AppState> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TrackerCommand::Snapshot { reply })
            .await
            .map_err(|_| LedgerError::TrackerStopped)?;
        rx.await.map_err(|_| LedgerError::TrackerStopped)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(TrackerCommand::Shutdown).await;
    }
}

pub struct Tracker {
    state: AppState,
    config: LedgerConfig,
    storage: Storage,
    source: Box<dyn LocationSource>,
    subscription: Option<Subscription>,
    fix_rx: Option<mpsc::Receiver<FixEvent>>,
    wake_lock: Box<dyn WakeLock>,
    haptics: Box<dyn Haptics>,
    gps_fixes: u64,
    gps_errors: u64,
}

/// Next fix from the current subscription; pends forever without one.
async fn next_fix(rx: &mut Option<mpsc::Receiver<FixEvent>>) -> Option<FixEvent> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Tracker {
    pub fn new(
        state: AppState,
        config: LedgerConfig,
        storage: Storage,
        source: Box<dyn LocationSource>,
        wake_lock: Box<dyn WakeLock>,
        haptics: Box<dyn Haptics>,
    ) -> Self {
        Self {
            state,
            config,
            storage,
            source,
            subscription: None,
            fix_rx: None,
            wake_lock,
            haptics,
            gps_fixes: 0,
            gps_errors: 0,
        }
    }

    /// Start the tracker task. The join handle yields the final state.
    pub fn spawn(self) -> (TrackerHandle, JoinHandle<AppState>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = tokio::spawn(self.run(rx));
        (TrackerHandle { tx }, handle)
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<TrackerCommand>) -> AppState {
        // Resume sampling if the app stopped mid-shift
        if self.state.phase.is_tracking() {
            log::info!("Resuming open shift in {:?}", self.state.phase);
            self.enter_tracking();
        }

        let mut status_tick = interval(Duration::from_secs(self.config.live_status_interval_secs.max(1)));
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(TrackerCommand::Apply { action, reply }) => {
                            let result = self.handle_action(action);
                            let _ = reply.send(result);
                        }
                        Some(TrackerCommand::Status { reply }) => {
                            let _ = reply.send(self.status());
                        }
                        Some(TrackerCommand::Snapshot { reply }) => {
                            let _ = reply.send(self.state.clone());
                        }
                        Some(TrackerCommand::Shutdown) | None => break,
                    }
                }
                event = next_fix(&mut self.fix_rx) => {
                    match event {
                        Some(event) => self.handle_fix(event),
                        None => {
                            log::info!("Location source ended");
                            self.fix_rx = None;
                        }
                    }
                }
                _ = status_tick.tick() => {
                    if self.state.phase.is_tracking() {
                        self.write_live_status();
                    }
                }
            }
        }

        self.leave_tracking();
        self.persist();
        self.write_live_status();
        log::info!("Tracker stopped");
        self.state
    }

    fn handle_action(&mut self, action: Action) -> LedgerResult<LiveStatus> {
        let before = self.state.phase;
        let command = action.command();

        let next = self.state.apply(action, Utc::now(), &self.config).map_err(|e| {
            log::warn!("Rejected: {}", e);
            e
        })?;
        self.state = next;
        self.persist();

        if let Some(command) = command {
            self.haptics.pulse(command.into());
        }
        self.sync_tracking(before, self.state.phase);
        Ok(self.status())
    }

    fn handle_fix(&mut self, event: FixEvent) {
        match event {
            FixEvent::Fix(fix) => {
                self.gps_fixes += 1;
                if !self.state.phase.is_tracking() {
                    return;
                }
                self.state.record_fix(fix, &self.config);
                self.persist();
            }
            FixEvent::Error(e) => {
                // Keep waiting; the source decides whether more fixes come
                self.gps_errors += 1;
                log::warn!("{}", LedgerError::Location(e));
            }
        }
    }

    fn sync_tracking(&mut self, before: Phase, after: Phase) {
        match (before.is_tracking(), after.is_tracking()) {
            (false, true) => self.enter_tracking(),
            (true, false) => self.leave_tracking(),
            _ => {}
        }
    }

    fn enter_tracking(&mut self) {
        // Close any previous subscription before opening a new one
        self.close_subscription();

        let (tx, rx) = mpsc::channel(FIX_CHANNEL_CAPACITY);
        self.subscription = Some(self.source.subscribe(tx));
        self.fix_rx = Some(rx);

        if let Err(e) = self.wake_lock.acquire() {
            log::warn!("Could not keep the screen awake: {}", e);
        }
    }

    fn leave_tracking(&mut self) {
        self.close_subscription();
        self.wake_lock.release();
    }

    fn close_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        // Dropping the receiver discards fixes still queued from the old source
        self.fix_rx = None;
    }

    fn status(&self) -> LiveStatus {
        let mut status = LiveStatus::from_state(&self.state, &self.config, Utc::now());
        status.gps_fixes = self.gps_fixes;
        status.gps_errors = self.gps_errors;
        status
    }

    fn persist(&self) {
        if let Err(e) = self.storage.save(&self.state) {
            log::error!("Failed to save {}: {}", self.storage.path().display(), e);
        }
    }

    fn write_live_status(&self) {
        let path = self.config.live_status_path();
        if let Err(e) = self.status().save(&path) {
            log::debug!("Failed to write {}: {}", path.display(), e);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{HapticCue, NoopWakeLock};
    use crate::geo::GeoFix;
    use crate::store::RefuelInput;
    use std::sync::{Arc, Mutex};

    /// Source whose sender is handed to the test
    #[derive(Clone, Default)]
    struct ManualSource {
        senders: Arc<Mutex<Vec<mpsc::Sender<FixEvent>>>>,
    }

    impl LocationSource for ManualSource {
        fn subscribe(&self, tx: mpsc::Sender<FixEvent>) -> Subscription {
            self.senders.lock().unwrap().push(tx);
            Subscription::new(tokio::spawn(async {}))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingHaptics(Arc<Mutex<Vec<HapticCue>>>);

    impl Haptics for RecordingHaptics {
        fn pulse(&mut self, cue: HapticCue) {
            self.0.lock().unwrap().push(cue);
        }
    }

    fn tracker(dir: &std::path::Path, source: ManualSource, haptics: RecordingHaptics) -> Tracker {
        let config = LedgerConfig::default().with_data_dir(dir);
        let storage = Storage::new(config.snapshot_path());
        let mut state = AppState::default();
        state.profile.car.tank_capacity_l = 50.0;
        state.profile.current_fuel_level = 40.0;
        Tracker::new(
            state,
            config,
            storage,
            Box::new(source),
            Box::new(NoopWakeLock::default()),
            Box::new(haptics),
        )
    }

    async fn send_fix(source: &ManualSource, lat: f64) {
        let tx = source.senders.lock().unwrap().last().cloned().unwrap();
        tx.send(FixEvent::Fix(GeoFix::new(lat, 0.0, Utc::now()))).await.unwrap();
    }

    #[tokio::test]
    async fn test_shift_lifecycle_through_handle() {
        let dir = tempfile::tempdir().unwrap();
        let source = ManualSource::default();
        let haptics = RecordingHaptics::default();
        let (handle, join) = tracker(dir.path(), source.clone(), haptics.clone()).spawn();

        handle
            .apply(Action::StartShift {
                start_odometer: 1000.0,
                app_profile_id: None,
            })
            .await
            .unwrap();
        assert_eq!(source.senders.lock().unwrap().len(), 1);

        send_fix(&source, 0.0).await;
        send_fix(&source, 0.01).await;
        // Fixes and commands use different channels; poll until the fixes land
        let mut off_duty = 0.0;
        for _ in 0..50 {
            off_duty = handle.status().await.unwrap().off_duty_km;
            if off_duty > 0.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(off_duty > 1.0);

        handle.apply(Action::AcceptRide).await.unwrap();
        handle.apply(Action::BoardPassenger).await.unwrap();
        handle.apply(Action::FinishRide { gross: Some(25.0) }).await.unwrap();
        let status = handle.apply(Action::EndShift { end_odometer: 1003.0 }).await.unwrap();
        assert_eq!(status.phase, Phase::Idle);

        // Subscription dropped on the way back to idle
        let stale = source.senders.lock().unwrap()[0].clone();
        assert!(stale.is_closed());

        handle.shutdown().await;
        let state = join.await.unwrap();
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.profile.last_odometer, 1003.0);
        assert!(state.profile.current_fuel_level < 40.0);

        let cues = haptics.0.lock().unwrap().clone();
        assert_eq!(cues.first(), Some(&HapticCue::ShiftStarted));
        assert_eq!(cues.last(), Some(&HapticCue::ShiftEnded));

        let saved = Storage::new(dir.path().join("ledger.json")).load();
        assert_eq!(saved.phase, Phase::Idle);
        assert_eq!(saved.sessions.len(), 1);
        assert_eq!(saved.sessions[0].id, state.sessions[0].id);
    }

    #[tokio::test]
    async fn test_rejected_action_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) =
            tracker(dir.path(), ManualSource::default(), RecordingHaptics::default()).spawn();

        let err = handle.apply(Action::BoardPassenger).await.unwrap_err();
        assert!(matches!(err, LedgerError::IllegalTransition { .. }));
        assert_eq!(handle.status().await.unwrap().phase, Phase::Idle);

        handle.shutdown().await;
        let state = join.await.unwrap();
        assert_eq!(state.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_refuel_mid_shift_survives_later_fixes() {
        let dir = tempfile::tempdir().unwrap();
        let source = ManualSource::default();
        let (handle, join) =
            tracker(dir.path(), source.clone(), RecordingHaptics::default()).spawn();

        handle
            .apply(Action::StartShift {
                start_odometer: 500.0,
                app_profile_id: None,
            })
            .await
            .unwrap();
        let status = handle
            .apply(Action::Refuel(RefuelInput {
                price_per_liter: 6.0,
                full_tank: true,
                station: Some("Ipiranga".to_string()),
                ..RefuelInput::default()
            }))
            .await
            .unwrap();
        assert_eq!(status.fuel_level_l, 50.0);

        send_fix(&source, 0.0).await;
        send_fix(&source, 0.01).await;
        let mut level = 50.0;
        for _ in 0..50 {
            level = handle.status().await.unwrap().fuel_level_l;
            if level < 50.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(level < 50.0);

        handle.shutdown().await;
        join.await.unwrap();

        let saved = Storage::new(dir.path().join("ledger.json")).load();
        assert_eq!(saved.refuels.len(), 1);
        assert!(saved.station_prices.contains_key("Ipiranga"));
        assert!(saved.profile.current_fuel_level > 49.0);
        assert!(saved.profile.current_fuel_level < 50.0);
    }

    #[tokio::test]
    async fn test_open_shift_resumes_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let source = ManualSource::default();
        let mut tracker = tracker(dir.path(), source.clone(), RecordingHaptics::default());
        tracker.state = tracker
            .state
            .apply(
                Action::StartShift {
                    start_odometer: 10.0,
                    app_profile_id: None,
                },
                Utc::now(),
                &tracker.config,
            )
            .unwrap();
        assert!(!tracker.is_subscribed());

        let (handle, join) = tracker.spawn();
        assert_eq!(handle.status().await.unwrap().phase, Phase::OnShift);
        assert_eq!(source.senders.lock().unwrap().len(), 1);

        handle.shutdown().await;
        let state = join.await.unwrap();
        assert_eq!(state.phase, Phase::OnShift);
        assert!(source.senders.lock().unwrap()[0].is_closed());
    }

    #[tokio::test]
    async fn test_one_subscription_per_shift() {
        let dir = tempfile::tempdir().unwrap();
        let source = ManualSource::default();
        let (handle, join) =
            tracker(dir.path(), source.clone(), RecordingHaptics::default()).spawn();

        for day in 0..3 {
            handle
                .apply(Action::StartShift {
                    start_odometer: 100.0 * day as f64,
                    app_profile_id: None,
                })
                .await
                .unwrap();
            handle.apply(Action::AcceptRide).await.unwrap();
            handle.apply(Action::CancelRide).await.unwrap();
            handle
                .apply(Action::EndShift {
                    end_odometer: 100.0 * day as f64 + 50.0,
                })
                .await
                .unwrap();
        }

        let senders = source.senders.lock().unwrap().clone();
        assert_eq!(senders.len(), 3);
        assert!(senders.iter().all(|tx| tx.is_closed()));

        handle.shutdown().await;
        assert_eq!(join.await.unwrap().sessions.len(), 3);
    }
}
