//! Maintenance reserve rate and service due dates derived from logged tasks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::model::{MaintenanceTask, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DueStatus {
    Urgent,
    Warning,
    Ok,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub service: String,
    pub due_odometer: f64,
    pub remaining_km: f64,
    pub status: DueStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceOutlook {
    pub rate_per_km: f64,
    pub rolling_km: f64,
    /// Reserve needed for the distance driven over the rolling window
    pub monthly_reserve: f64,
    /// Most urgent first
    pub tasks: Vec<TaskStatus>,
}

/// Sum of `last_cost / interval` over all tasks, or the default rate when
/// nothing is configured.
pub fn reserve_rate_per_km(tasks: &[MaintenanceTask], default_rate: f64) -> f64 {
    if tasks.is_empty() {
        return default_rate;
    }
    tasks
        .iter()
        .map(|t| t.last_cost.max(0.0) / t.interval_km.max(1.0))
        .sum()
}

/// Km driven in sessions started within the last `days`.
pub fn rolling_km(sessions: &[Session], now: DateTime<Utc>, days: u32) -> f64 {
    let since = now - Duration::days(i64::from(days));
    sessions
        .iter()
        .filter(|s| s.date >= since)
        .map(Session::driven_km)
        .sum()
}

pub fn task_status(task: &MaintenanceTask, current_odometer: f64, warning_km: f64) -> TaskStatus {
    let due_odometer = task.last_service_odometer + task.interval_km.max(1.0);
    let remaining_km = due_odometer - current_odometer;
    let status = if remaining_km <= 0.0 {
        DueStatus::Urgent
    } else if remaining_km <= warning_km {
        DueStatus::Warning
    } else {
        DueStatus::Ok
    };

    TaskStatus {
        task_id: task.id.clone(),
        service: task.service.clone(),
        due_odometer,
        remaining_km,
        status,
    }
}

pub fn outlook(
    tasks: &[MaintenanceTask],
    sessions: &[Session],
    current_odometer: f64,
    now: DateTime<Utc>,
    config: &LedgerConfig,
) -> MaintenanceOutlook {
    let rate_per_km = reserve_rate_per_km(tasks, config.default_maintenance_rate_per_km);
    let rolling_km = rolling_km(sessions, now, config.rolling_window_days);

    let mut statuses: Vec<TaskStatus> = tasks
        .iter()
        .map(|t| task_status(t, current_odometer, config.maintenance_warning_km))
        .collect();
    statuses.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then(a.remaining_km.total_cmp(&b.remaining_km))
    });

    MaintenanceOutlook {
        rate_per_km,
        rolling_km,
        monthly_reserve: rate_per_km * rolling_km,
        tasks: statuses,
    }
}
