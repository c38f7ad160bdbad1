//! Rolling totals over closed sessions and the tabular export.
//!
//! Everything here reads history and never changes it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::model::Session;

/// Reporting window counted back from "now"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportWindow {
    Days(u32),
}

impl ReportWindow {
    pub const WEEK: ReportWindow = ReportWindow::Days(7);
    pub const FORTNIGHT: ReportWindow = ReportWindow::Days(15);
    pub const MONTH: ReportWindow = ReportWindow::Days(30);

    pub fn start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ReportWindow::Days(days) => now - Duration::days(i64::from(days)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub sessions: usize,
    pub rides: usize,
    pub gross: f64,
    pub net: f64,
    pub fuel_cost: f64,
    pub app_tax: f64,
    pub maintenance_reserve: f64,
    pub emergency_reserve: f64,
    pub work_expenses: f64,
    pub km: f64,
}

impl PeriodTotals {
    pub fn reserves(&self) -> f64 {
        self.maintenance_reserve + self.emergency_reserve
    }

    /// Net per km driven, zero when nothing was driven.
    pub fn net_per_km(&self) -> f64 {
        if self.km > 0.0 {
            self.net / self.km
        } else {
            0.0
        }
    }
}

pub fn aggregate(sessions: &[Session], window: ReportWindow, now: DateTime<Utc>) -> PeriodTotals {
    let since = window.start(now);
    let mut totals = PeriodTotals::default();

    for session in sessions.iter().filter(|s| s.date >= since) {
        totals.sessions += 1;
        totals.rides += session.rides.len();
        totals.gross += session.total_gross;
        totals.net += session.total_net;
        totals.work_expenses += session.total_expenses();
        totals.km += session.driven_km();

        for ride in &session.rides {
            totals.fuel_cost += ride.breakdown.fuel_cost;
            totals.app_tax += ride.breakdown.app_tax;
            totals.maintenance_reserve += ride.breakdown.maintenance_reserve;
            totals.emergency_reserve += ride.breakdown.emergency_reserve;
        }
    }

    totals
}

/// Comma-separated export of closed sessions: date, gross, net, km.
pub fn sessions_csv(sessions: &[Session]) -> String {
    let mut csv = String::from("date,gross,net,km\n");
    for s in sessions {
        let _ = writeln!(
            csv,
            "{},{:.2},{:.2},{:.1}",
            s.date.format("%Y-%m-%d %H:%M"),
            s.total_gross,
            s.total_net,
            s.driven_km()
        );
    }
    csv
}
