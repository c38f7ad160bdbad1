//! Location sources.
//!
//! A source pushes fixes into a channel from its own task. The returned
//! `Subscription` owns that task; cancelling or dropping it stops delivery,
//! so two subscriptions never feed the tracker at once as long as the old
//! handle is released first.

use chrono::{Duration as ChronoDuration, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::geo::GeoFix;

/// What a location source delivers
#[derive(Debug, Clone, PartialEq)]
pub enum FixEvent {
    Fix(GeoFix),
    Error(String),
}

/// Continuous location updates
pub trait LocationSource: Send + Sync {
    fn subscribe(&self, tx: Sender<FixEvent>) -> Subscription;
}

/// Handle to a running location subscription
#[derive(Debug)]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle: Some(handle) }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Forward one event, returning false once the receiver is gone.
async fn deliver(tx: &Sender<FixEvent>, event: FixEvent, name: &str, count: &mut u64) -> bool {
    match tx.send(event).await {
        Ok(()) => {
            *count += 1;
            if *count % 50 == 0 {
                log::debug!("[{}] {} fixes", name, count);
            }
            true
        }
        Err(_) => {
            log::debug!("[{}] Channel closed after {} fixes", name, count);
            false
        }
    }
}

/// Synthetic drive heading steadily north-east from a start point
#[derive(Debug, Clone)]
pub struct SimulatedRoute {
    pub start_lat: f64,
    pub start_lon: f64,
    /// Degrees moved per fix on each axis
    pub step_deg: f64,
    pub period: Duration,
}

impl SimulatedRoute {
    pub fn new(start_lat: f64, start_lon: f64, period: Duration) -> Self {
        Self {
            start_lat,
            start_lon,
            step_deg: 0.0002,
            period,
        }
    }
}

impl LocationSource for SimulatedRoute {
    fn subscribe(&self, tx: Sender<FixEvent>) -> Subscription {
        let route = self.clone();
        Subscription::new(tokio::spawn(async move {
            let mut ticker = interval(route.period);
            let mut seq = 0u64;
            let mut count = 0u64;

            loop {
                ticker.tick().await;
                // Every 20th fix repeats the previous position (parked)
                let s = (seq - seq / 20) as f64;
                seq += 1;
                let fix = GeoFix::new(
                    route.start_lat + s * route.step_deg,
                    route.start_lon + s * route.step_deg * (1.0 + (s * 0.1).sin() * 0.2),
                    Utc::now(),
                )
                .with_accuracy(5.0 + (s * 0.1).sin() * 2.0);

                if !deliver(&tx, FixEvent::Fix(fix), "sim", &mut count).await {
                    break;
                }
            }
        }))
    }
}

/// Replays a recorded drive from a JSON-lines file of `GeoFix` values.
///
/// Fix timestamps are shifted to the replay start so reports line up with
/// the current day. Unparseable lines are delivered as fix errors.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    pub path: PathBuf,
    pub period: Duration,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>, period: Duration) -> Self {
        Self {
            path: path.into(),
            period,
        }
    }

    pub fn read_events(&self) -> std::io::Result<Vec<FixEvent>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut events = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<GeoFix>(&line) {
                Ok(fix) => events.push(FixEvent::Fix(fix)),
                Err(e) => events.push(FixEvent::Error(format!("line {}: {}", n + 1, e))),
            }
        }
        Ok(events)
    }
}

impl LocationSource for ReplaySource {
    fn subscribe(&self, tx: Sender<FixEvent>) -> Subscription {
        let source = self.clone();
        Subscription::new(tokio::spawn(async move {
            let events = match source.read_events() {
                Ok(events) => events,
                Err(e) => {
                    let _ = tx
                        .send(FixEvent::Error(format!("{}: {}", source.path.display(), e)))
                        .await;
                    return;
                }
            };

            let first = events.iter().find_map(|e| match e {
                FixEvent::Fix(f) => Some(f.timestamp),
                FixEvent::Error(_) => None,
            });
            let offset = first
                .map(|t| Utc::now() - t)
                .unwrap_or_else(ChronoDuration::zero);

            let mut ticker = interval(source.period);
            let mut count = 0u64;
            for event in events {
                ticker.tick().await;
                let event = match event {
                    FixEvent::Fix(mut fix) => {
                        fix.timestamp += offset;
                        FixEvent::Fix(fix)
                    }
                    other => other,
                };
                if !deliver(&tx, event, "replay", &mut count).await {
                    return;
                }
            }
            log::info!("[replay] Finished {} after {} events", source.path.display(), count);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_simulated_route_delivers_and_cancels() {
        let (tx, mut rx) = mpsc::channel(16);
        let route = SimulatedRoute::new(-23.55, -46.63, Duration::from_millis(5));
        let mut sub = route.subscribe(tx);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (FixEvent::Fix(a), FixEvent::Fix(b)) => assert!(b.latitude > a.latitude),
            other => panic!("unexpected events {:?}", other),
        }

        sub.cancel();
        assert!(!sub.is_active());
        // Sender dropped with the aborted task, so the stream ends
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_replay_reports_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"latitude":1.0,"longitude":2.0,"timestamp":"2026-01-01T10:00:00Z"}}"#
        )
        .unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(
            file,
            r#"{{"latitude":1.001,"longitude":2.0,"timestamp":"2026-01-01T10:00:05Z"}}"#
        )
        .unwrap();

        let source = ReplaySource::new(file.path(), Duration::from_millis(1));
        let (tx, mut rx) = mpsc::channel(16);
        let _sub = source.subscribe(tx);

        let mut fixes = 0;
        let mut errors = 0;
        while let Some(event) = rx.recv().await {
            match event {
                FixEvent::Fix(_) => fixes += 1,
                FixEvent::Error(_) => errors += 1,
            }
        }
        assert_eq!(fixes, 2);
        assert_eq!(errors, 1);
    }
}
