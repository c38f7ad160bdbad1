use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::model::AppState;
use crate::store::Action;

/// Whole-snapshot persistence of the ledger as pretty JSON
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. A missing or unreadable snapshot yields an empty
    /// state; a corrupt one is moved aside to `<name>.corrupt` first.
    pub fn load(&self) -> AppState {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Cannot read {}: {}, starting empty", self.path.display(), e);
                }
                return AppState::default();
            }
        };

        match serde_json::from_slice::<AppState>(&bytes) {
            Ok(state) => state,
            Err(e) => {
                let aside = self.path.with_extension("corrupt");
                log::warn!(
                    "Snapshot {} is corrupt ({}), moving it to {} and starting empty",
                    self.path.display(),
                    e,
                    aside.display()
                );
                if let Err(e) = fs::rename(&self.path, &aside) {
                    log::warn!("Failed to move corrupt snapshot aside: {}", e);
                }
                AppState::default()
            }
        }
    }

    /// Apply one action straight to the snapshot on disk.
    ///
    /// While a shift is open the running tracker owns the snapshot and
    /// rewrites it on every fix, so the change is refused instead of being
    /// silently overwritten.
    pub fn apply_offline(&self, action: Action, now: DateTime<Utc>, config: &LedgerConfig) -> LedgerResult<AppState> {
        let state = self.load();
        if let Some(shift) = state.shift.as_ref() {
            return Err(LedgerError::ShiftInProgress(shift.id.clone()));
        }
        let next = state.apply(action, now, config)?;
        self.save(&next)?;
        Ok(next)
    }

    /// Rewrite the snapshot through a temp file so a crash mid-write keeps
    /// the previous version.
    pub fn save(&self, state: &AppState) -> LedgerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| LedgerError::Storage(format!("rename {}: {}", tmp.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::store::{ExpenseInput, RefuelInput};

    #[test]
    fn test_missing_snapshot_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("ledger.json"));
        assert_eq!(storage.load(), AppState::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("nested").join("ledger.json"));

        let mut state = AppState::default();
        state.profile.name = "Ana".to_string();
        state.profile.current_fuel_level = 22.5;
        state.phase = Phase::Idle;
        storage.save(&state).unwrap();

        assert_eq!(storage.load(), state);
        assert!(!storage.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_offline_update_refused_while_shift_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::default().with_data_dir(dir.path());
        let storage = Storage::new(config.snapshot_path());
        let now = Utc::now();

        let open = AppState::default()
            .apply(
                Action::StartShift {
                    start_odometer: 100.0,
                    app_profile_id: None,
                },
                now,
                &config,
            )
            .unwrap();
        storage.save(&open).unwrap();

        let refuel = Action::Refuel(RefuelInput {
            price_per_liter: 6.0,
            liters: 10.0,
            ..RefuelInput::default()
        });
        let err = storage.apply_offline(refuel, now, &config).unwrap_err();
        assert!(matches!(err, LedgerError::ShiftInProgress(_)));
        assert!(err.is_user_error());
        assert!(storage.load().refuels.is_empty());
    }

    #[test]
    fn test_offline_update_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::default().with_data_dir(dir.path());
        let storage = Storage::new(config.snapshot_path());

        let expense = Action::LogExpense(ExpenseInput {
            category: "wash".to_string(),
            amount: 20.0,
            description: None,
            work_expense: false,
        });
        let state = storage.apply_offline(expense, Utc::now(), &config).unwrap();
        assert_eq!(state.expenses.len(), 1);
        assert_eq!(storage.load().expenses.len(), 1);
    }

    #[test]
    fn test_corrupt_snapshot_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, b"{\"profile\": [broken").unwrap();

        let storage = Storage::new(&path);
        assert_eq!(storage.load(), AppState::default());
        assert!(path.with_extension("corrupt").exists());
        assert!(!path.exists());
    }
}
