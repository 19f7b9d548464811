//! Hourly Reconciliation — per-user usage rollups with anomaly flagging.
//!
//! Runs a few minutes past the hour, after the engine has flushed the
//! slot it was driving. Aggregates every execution row that touched the
//! (date, hour) cell into one usage record per user and flags users whose
//! token spend per successful click exceeds the anomaly ratio.

use chrono::NaiveDate;

use clickflow_core::error::Result;
use clickflow_core::types::UsageRecord;
use clickflow_store::PlanStore;

/// Reconcile one completed (date, hour) cell. Returns the saved records;
/// an empty vec means no task clicked in that hour.
///
/// Re-running over the same cell overwrites the same records, so the
/// trigger can fire as often as it likes.
pub fn reconcile_hour(
    store: &PlanStore,
    date: NaiveDate,
    hour: u8,
    anomaly_ratio: f64,
) -> Result<Vec<UsageRecord>> {
    let rollup = store.user_hour_rollup(date, hour);
    let mut records = Vec::with_capacity(rollup.len());

    for (user_id, clicks, success, tokens) in rollup {
        let anomalous = is_anomalous(success, tokens, anomaly_ratio);
        if anomalous {
            tracing::warn!(
                "Anomalous usage for {user_id} on {date} hour {hour}: \
                 {tokens} tokens for {success} successes ({clicks} clicks)"
            );
        }
        let record = UsageRecord {
            user_id,
            date,
            hour,
            clicks,
            success,
            tokens,
            anomalous,
        };
        store.save_usage_record(&record)?;
        records.push(record);
    }

    tracing::info!(
        "Reconciled {date} hour {hour}: {} user(s), {} flagged",
        records.len(),
        records.iter().filter(|r| r.anomalous).count()
    );
    Ok(records)
}

/// Spend ratio check. Any spend with zero successes is anomalous; with
/// successes, tokens per success above the ratio trips the flag.
fn is_anomalous(success: u32, tokens: u32, ratio: f64) -> bool {
    if tokens == 0 {
        return false;
    }
    if success == 0 {
        return true;
    }
    tokens as f64 / success as f64 > ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clickflow_core::types::{
        ActiveWindow, AttemptLog, DailyPlan, HourlyExecution, Task, TaskStatus,
    };

    fn temp_store(name: &str) -> (PlanStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("clickflow-reconcile-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).ok();
        (PlanStore::open(&dir.join("store.db")).unwrap(), dir)
    }

    fn seed_user_hour(
        store: &PlanStore,
        user: &str,
        date: NaiveDate,
        hour: u8,
        successes: u32,
        failures: u32,
        tokens_per_success: u32,
    ) {
        let mut task = Task::new(
            user,
            "https://example.com",
            "https://ref.example",
            "VN",
            ActiveWindow::FullDay,
            100,
        );
        task.status = TaskStatus::Running;
        store.save_task(&task).unwrap();

        let mut targets = [0u32; 24];
        targets[hour as usize] = successes + failures;
        let plan = DailyPlan::new(&task.id, date, targets);
        store.save_plan(&plan).unwrap();

        let mut exec = HourlyExecution::new(&plan.id, hour, successes + failures);
        for i in 0..(successes + failures) {
            let success = i < successes;
            exec.record_attempt(
                AttemptLog {
                    timestamp: Utc::now(),
                    success,
                    duration_ms: 20,
                    error: if success { None } else { Some("timeout".into()) },
                },
                if success { tokens_per_success } else { 0 },
            );
        }
        store.save_execution(&exec).unwrap();
    }

    #[test]
    fn test_rollup_one_record_per_user() {
        let (store, dir) = temp_store("rollup");
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        seed_user_hour(&store, "alice", date, 10, 5, 2, 1);
        seed_user_hour(&store, "alice", date, 10, 3, 0, 1);
        seed_user_hour(&store, "bob", date, 10, 4, 4, 1);

        let records = reconcile_hour(&store, date, 10, 3.0).unwrap();
        assert_eq!(records.len(), 2);

        let alice = records.iter().find(|r| r.user_id == "alice").unwrap();
        // Two tasks fold into one row: 7+3 clicks, 8 successes, 8 tokens
        assert_eq!(alice.clicks, 10);
        assert_eq!(alice.success, 8);
        assert_eq!(alice.tokens, 8);
        assert!(!alice.anomalous);

        let bob = records.iter().find(|r| r.user_id == "bob").unwrap();
        assert_eq!(bob.clicks, 8);
        assert_eq!(bob.success, 4);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_anomaly_flag_on_high_spend_ratio() {
        let (store, dir) = temp_store("anomaly");
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        // 4 tokens per success against a ratio of 3.0
        seed_user_hour(&store, "carol", date, 14, 2, 0, 4);
        seed_user_hour(&store, "dave", date, 14, 2, 0, 2);

        let records = reconcile_hour(&store, date, 14, 3.0).unwrap();
        let carol = records.iter().find(|r| r.user_id == "carol").unwrap();
        let dave = records.iter().find(|r| r.user_id == "dave").unwrap();
        assert!(carol.anomalous);
        assert!(!dave.anomalous);

        // Persisted form carries the flag too
        let saved = store.usage_records_for(date, 14);
        assert!(saved.iter().any(|r| r.user_id == "carol" && r.anomalous));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_hour_yields_no_records() {
        let (store, dir) = temp_store("empty");
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        let records = reconcile_hour(&store, date, 3, 3.0).unwrap();
        assert!(records.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rerun_overwrites_instead_of_duplicating() {
        let (store, dir) = temp_store("rerun");
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        seed_user_hour(&store, "erin", date, 9, 3, 1, 1);

        reconcile_hour(&store, date, 9, 3.0).unwrap();
        reconcile_hour(&store, date, 9, 3.0).unwrap();

        let saved = store.usage_records_for(date, 9);
        assert_eq!(saved.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_is_anomalous_edges() {
        assert!(!is_anomalous(0, 0, 3.0));
        assert!(is_anomalous(0, 5, 3.0), "spend with zero successes");
        assert!(!is_anomalous(2, 6, 3.0), "exactly at ratio is fine");
        assert!(is_anomalous(2, 7, 3.0));
    }
}
