//! SQLite-backed Plan Store: tasks, daily plans, hourly executions,
//! daily summaries, and reconciliation usage records.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use clickflow_core::error::{ClickflowError, Result};
use clickflow_core::types::{
    ActiveWindow, AttemptLog, DailyPlan, DailySummary, HourlyExecution, SummaryStatus, Task,
    TaskStatus, UsageRecord, VisitorStrategy,
};

/// Durable store for everything the scheduler needs to resume after a crash.
pub struct PlanStore {
    conn: rusqlite::Connection,
}

const DATE_FMT: &str = "%Y-%m-%d";

impl PlanStore {
    /// Open or create the store database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| ClickflowError::Store(format!("DB open: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| ClickflowError::Store(format!("DB busy timeout: {e}")))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                target_url TEXT NOT NULL,
                referer TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                active_window TEXT NOT NULL,
                daily_click_target INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                status_reason TEXT,
                created_at TEXT NOT NULL
            );

            -- One plan per (task, calendar day)
            CREATE TABLE IF NOT EXISTS daily_plans (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                date TEXT NOT NULL,
                hourly_targets TEXT NOT NULL,    -- JSON array of 24 ints
                current_strategy TEXT NOT NULL DEFAULT 'lightweight',
                UNIQUE (task_id, date),
                FOREIGN KEY (task_id) REFERENCES tasks(id)
            );

            -- One row per (plan, non-zero hour); counters updated per attempt
            CREATE TABLE IF NOT EXISTS hourly_executions (
                id TEXT PRIMARY KEY,
                plan_id TEXT NOT NULL,
                hour INTEGER NOT NULL,
                target_clicks INTEGER NOT NULL,
                actual_clicks INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                fail_count INTEGER NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                log TEXT NOT NULL DEFAULT '[]',  -- JSON array, append-only
                UNIQUE (plan_id, hour),
                FOREIGN KEY (plan_id) REFERENCES daily_plans(id)
            );

            CREATE TABLE IF NOT EXISTS daily_summaries (
                task_id TEXT NOT NULL,
                date TEXT NOT NULL,
                total_clicks INTEGER NOT NULL,
                total_success INTEGER NOT NULL,
                total_fail INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (task_id, date)
            );

            -- Per-user hourly rollups written by reconciliation
            CREATE TABLE IF NOT EXISTS usage_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                hour INTEGER NOT NULL,
                clicks INTEGER NOT NULL,
                success INTEGER NOT NULL,
                tokens INTEGER NOT NULL,
                anomalous INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, date, hour)
            );
         ",
            )
            .map_err(|e| ClickflowError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Tasks ──────────────────────────────────────

    /// Save (upsert) a task.
    pub fn save_task(&self, task: &Task) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO tasks
                 (id, user_id, target_url, referer, country, active_window,
                  daily_click_target, status, status_reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    task.id,
                    task.user_id,
                    task.target_url,
                    task.referer,
                    task.country,
                    task.active_window.as_str(),
                    task.daily_click_target,
                    task.status.as_str(),
                    task.status_reason,
                    task.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| ClickflowError::Store(format!("Save task: {e}")))?;
        Ok(())
    }

    /// Load one task by ID.
    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.conn
            .query_row(
                "SELECT id, user_id, target_url, referer, country, active_window,
                        daily_click_target, status, status_reason, created_at
                 FROM tasks WHERE id = ?1",
                [id],
                Self::map_task,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    ClickflowError::NotFound(format!("task {id}"))
                }
                other => ClickflowError::Store(format!("Get task: {other}")),
            })
    }

    /// Load all tasks, oldest first.
    pub fn load_tasks(&self) -> Vec<Task> {
        self.query_tasks("SELECT id, user_id, target_url, referer, country, active_window, daily_click_target, status, status_reason, created_at FROM tasks ORDER BY created_at")
    }

    /// All tasks currently in `running` status.
    pub fn running_tasks(&self) -> Vec<Task> {
        self.query_tasks("SELECT id, user_id, target_url, referer, country, active_window, daily_click_target, status, status_reason, created_at FROM tasks WHERE status = 'running' ORDER BY created_at")
    }

    fn query_tasks(&self, sql: &str) -> Vec<Task> {
        let mut stmt = match self.conn.prepare(sql) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rows = stmt.query_map([], Self::map_task).ok();
        rows.map(|r| r.filter_map(|t| t.ok()).collect())
            .unwrap_or_default()
    }

    fn map_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
        let window: String = row.get(5)?;
        let status: String = row.get(7)?;
        let created_at: String = row.get(9)?;
        Ok(Task {
            id: row.get(0)?,
            user_id: row.get(1)?,
            target_url: row.get(2)?,
            referer: row.get(3)?,
            country: row.get(4)?,
            active_window: ActiveWindow::parse(&window),
            daily_click_target: row.get(6)?,
            status: TaskStatus::parse(&status),
            status_reason: row.get(8)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// Transition a task's status.
    pub fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let n = self
            .conn
            .execute(
                "UPDATE tasks SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )
            .map_err(|e| ClickflowError::Store(format!("Set task status: {e}")))?;
        if n == 0 {
            return Err(ClickflowError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    /// Terminate a task, recording why.
    pub fn terminate_task(&self, id: &str, reason: &str) -> Result<()> {
        let n = self
            .conn
            .execute(
                "UPDATE tasks SET status = 'terminated', status_reason = ?1 WHERE id = ?2",
                rusqlite::params![reason, id],
            )
            .map_err(|e| ClickflowError::Store(format!("Terminate task: {e}")))?;
        if n == 0 {
            return Err(ClickflowError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    // ─── Daily Plans ──────────────────────────────────────

    /// Save (upsert) a daily plan.
    pub fn save_plan(&self, plan: &DailyPlan) -> Result<()> {
        let targets = serde_json::to_string(&plan.hourly_targets.to_vec())
            .map_err(|e| ClickflowError::Store(format!("Serialize targets: {e}")))?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO daily_plans
                 (id, task_id, date, hourly_targets, current_strategy)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    plan.id,
                    plan.task_id,
                    plan.date.format(DATE_FMT).to_string(),
                    targets,
                    plan.current_strategy.as_str(),
                ],
            )
            .map_err(|e| ClickflowError::Store(format!("Save plan: {e}")))?;
        Ok(())
    }

    /// The plan for a given (task, date), if one exists.
    pub fn plan_for(&self, task_id: &str, date: NaiveDate) -> Result<Option<DailyPlan>> {
        let result = self.conn.query_row(
            "SELECT id, task_id, date, hourly_targets, current_strategy
             FROM daily_plans WHERE task_id = ?1 AND date = ?2",
            rusqlite::params![task_id, date.format(DATE_FMT).to_string()],
            Self::map_plan,
        );
        match result {
            Ok(plan) => Ok(Some(plan)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ClickflowError::Store(format!("Plan lookup: {e}"))),
        }
    }

    /// Load one plan by ID.
    pub fn get_plan(&self, id: &str) -> Result<DailyPlan> {
        self.conn
            .query_row(
                "SELECT id, task_id, date, hourly_targets, current_strategy
                 FROM daily_plans WHERE id = ?1",
                [id],
                Self::map_plan,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    ClickflowError::NotFound(format!("plan {id}"))
                }
                other => ClickflowError::Store(format!("Get plan: {other}")),
            })
    }

    /// All plans dated `date`.
    pub fn plans_for_date(&self, date: NaiveDate) -> Vec<DailyPlan> {
        let mut stmt = match self.conn.prepare(
            "SELECT id, task_id, date, hourly_targets, current_strategy
             FROM daily_plans WHERE date = ?1",
        ) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rows = stmt
            .query_map([date.format(DATE_FMT).to_string()], Self::map_plan)
            .ok();
        rows.map(|r| r.filter_map(|p| p.ok()).collect())
            .unwrap_or_default()
    }

    fn map_plan(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyPlan> {
        let date_str: String = row.get(2)?;
        let targets_str: String = row.get(3)?;
        let strategy: String = row.get(4)?;

        let targets_vec: Vec<u32> = serde_json::from_str(&targets_str).unwrap_or_default();
        let mut hourly_targets = [0u32; 24];
        for (i, v) in targets_vec.into_iter().take(24).enumerate() {
            hourly_targets[i] = v;
        }

        Ok(DailyPlan {
            id: row.get(0)?,
            task_id: row.get(1)?,
            date: NaiveDate::parse_from_str(&date_str, DATE_FMT)
                .unwrap_or_else(|_| Utc::now().date_naive()),
            hourly_targets,
            current_strategy: VisitorStrategy::parse(&strategy),
        })
    }

    /// Persist a strategy escalation on a plan.
    pub fn set_plan_strategy(&self, plan_id: &str, strategy: VisitorStrategy) -> Result<()> {
        self.conn
            .execute(
                "UPDATE daily_plans SET current_strategy = ?1 WHERE id = ?2",
                rusqlite::params![strategy.as_str(), plan_id],
            )
            .map_err(|e| ClickflowError::Store(format!("Set strategy: {e}")))?;
        Ok(())
    }

    // ─── Hourly Executions ──────────────────────────────────────

    /// Save (upsert) an hourly execution, counters and log included.
    pub fn save_execution(&self, exec: &HourlyExecution) -> Result<()> {
        let log = serde_json::to_string(&exec.log)
            .map_err(|e| ClickflowError::Store(format!("Serialize log: {e}")))?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO hourly_executions
                 (id, plan_id, hour, target_clicks, actual_clicks,
                  success_count, fail_count, tokens_used, log)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    exec.id,
                    exec.plan_id,
                    exec.hour,
                    exec.target_clicks,
                    exec.actual_clicks,
                    exec.success_count,
                    exec.fail_count,
                    exec.tokens_used,
                    log,
                ],
            )
            .map_err(|e| ClickflowError::Store(format!("Save execution: {e}")))?;
        Ok(())
    }

    /// The execution row for (plan, hour), if one exists.
    pub fn execution_for(&self, plan_id: &str, hour: u8) -> Result<Option<HourlyExecution>> {
        let result = self.conn.query_row(
            "SELECT id, plan_id, hour, target_clicks, actual_clicks,
                    success_count, fail_count, tokens_used, log
             FROM hourly_executions WHERE plan_id = ?1 AND hour = ?2",
            rusqlite::params![plan_id, hour],
            Self::map_execution,
        );
        match result {
            Ok(exec) => Ok(Some(exec)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ClickflowError::Store(format!("Execution lookup: {e}"))),
        }
    }

    /// All execution rows for a plan, by hour.
    pub fn executions_for_plan(&self, plan_id: &str) -> Vec<HourlyExecution> {
        let mut stmt = match self.conn.prepare(
            "SELECT id, plan_id, hour, target_clicks, actual_clicks,
                    success_count, fail_count, tokens_used, log
             FROM hourly_executions WHERE plan_id = ?1 ORDER BY hour",
        ) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rows = stmt.query_map([plan_id], Self::map_execution).ok();
        rows.map(|r| r.filter_map(|e| e.ok()).collect())
            .unwrap_or_default()
    }

    fn map_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<HourlyExecution> {
        let log_str: String = row.get(8)?;
        let log: Vec<AttemptLog> = serde_json::from_str(&log_str).unwrap_or_default();
        Ok(HourlyExecution {
            id: row.get(0)?,
            plan_id: row.get(1)?,
            hour: row.get(2)?,
            target_clicks: row.get(3)?,
            actual_clicks: row.get(4)?,
            success_count: row.get(5)?,
            fail_count: row.get(6)?,
            tokens_used: row.get(7)?,
            log,
        })
    }

    /// Per-user rollup of one (date, hour) slot across all plans:
    /// `(user_id, clicks, successes, tokens)`. Reconciliation input.
    pub fn user_hour_rollup(&self, date: NaiveDate, hour: u8) -> Vec<(String, u32, u32, u32)> {
        let mut stmt = match self.conn.prepare(
            "SELECT t.user_id,
                    SUM(e.actual_clicks), SUM(e.success_count), SUM(e.tokens_used)
             FROM hourly_executions e
             JOIN daily_plans p ON e.plan_id = p.id
             JOIN tasks t ON p.task_id = t.id
             WHERE p.date = ?1 AND e.hour = ?2
             GROUP BY t.user_id",
        ) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rows = stmt
            .query_map(
                rusqlite::params![date.format(DATE_FMT).to_string(), hour],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                    ))
                },
            )
            .ok();
        rows.map(|r| r.filter_map(|x| x.ok()).collect())
            .unwrap_or_default()
    }

    // ─── Daily Summaries ──────────────────────────────────────

    /// Upsert the (task, date) summary.
    pub fn upsert_summary(&self, summary: &DailySummary) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO daily_summaries
                 (task_id, date, total_clicks, total_success, total_fail, total_tokens, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    summary.task_id,
                    summary.date.format(DATE_FMT).to_string(),
                    summary.total_clicks,
                    summary.total_success,
                    summary.total_fail,
                    summary.total_tokens,
                    summary.status.as_str(),
                ],
            )
            .map_err(|e| ClickflowError::Store(format!("Upsert summary: {e}")))?;
        Ok(())
    }

    /// The stored summary for (task, date), if any.
    pub fn summary_for(&self, task_id: &str, date: NaiveDate) -> Result<Option<DailySummary>> {
        let result = self.conn.query_row(
            "SELECT task_id, date, total_clicks, total_success, total_fail, total_tokens, status
             FROM daily_summaries WHERE task_id = ?1 AND date = ?2",
            rusqlite::params![task_id, date.format(DATE_FMT).to_string()],
            |row| {
                let date_str: String = row.get(1)?;
                let status: String = row.get(6)?;
                Ok(DailySummary {
                    task_id: row.get(0)?,
                    date: NaiveDate::parse_from_str(&date_str, DATE_FMT)
                        .unwrap_or_else(|_| Utc::now().date_naive()),
                    total_clicks: row.get(2)?,
                    total_success: row.get(3)?,
                    total_fail: row.get(4)?,
                    total_tokens: row.get(5)?,
                    status: SummaryStatus::parse(&status),
                })
            },
        );
        match result {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ClickflowError::Store(format!("Summary lookup: {e}"))),
        }
    }

    // ─── Usage Records ──────────────────────────────────────

    /// Upsert a reconciliation usage record; one row per (user, date, hour).
    pub fn save_usage_record(&self, record: &UsageRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO usage_records
                 (user_id, date, hour, clicks, success, tokens, anomalous, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (user_id, date, hour) DO UPDATE SET
                     clicks = excluded.clicks,
                     success = excluded.success,
                     tokens = excluded.tokens,
                     anomalous = excluded.anomalous",
                rusqlite::params![
                    record.user_id,
                    record.date.format(DATE_FMT).to_string(),
                    record.hour,
                    record.clicks,
                    record.success,
                    record.tokens,
                    record.anomalous as i32,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| ClickflowError::Store(format!("Save usage record: {e}")))?;
        Ok(())
    }

    /// Usage records for one (date, hour) slot.
    pub fn usage_records_for(&self, date: NaiveDate, hour: u8) -> Vec<UsageRecord> {
        let mut stmt = match self.conn.prepare(
            "SELECT user_id, date, hour, clicks, success, tokens, anomalous
             FROM usage_records WHERE date = ?1 AND hour = ?2 ORDER BY id",
        ) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rows = stmt
            .query_map(
                rusqlite::params![date.format(DATE_FMT).to_string(), hour],
                |row| {
                    let date_str: String = row.get(1)?;
                    Ok(UsageRecord {
                        user_id: row.get(0)?,
                        date: NaiveDate::parse_from_str(&date_str, DATE_FMT)
                            .unwrap_or_else(|_| Utc::now().date_naive()),
                        hour: row.get(2)?,
                        clicks: row.get(3)?,
                        success: row.get(4)?,
                        tokens: row.get(5)?,
                        anomalous: row.get::<_, i32>(6)? != 0,
                    })
                },
            )
            .ok();
        rows.map(|r| r.filter_map(|x| x.ok()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clickflow_core::types::ActiveWindow;

    fn temp_store(name: &str) -> (PlanStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("clickflow-store-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).ok();
        (PlanStore::open(&dir.join("test.db")).unwrap(), dir)
    }

    fn sample_task() -> Task {
        Task::new(
            "user-1",
            "https://example.com/landing",
            "https://google.com",
            "VN",
            ActiveWindow::DayAndEvening,
            120,
        )
    }

    #[test]
    fn test_open_and_migrate() {
        let (store, dir) = temp_store("migrate");
        assert!(store.load_tasks().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_task_roundtrip_and_status() {
        let (store, dir) = temp_store("task");
        let task = sample_task();
        store.save_task(&task).unwrap();

        let loaded = store.get_task(&task.id).unwrap();
        assert_eq!(loaded.user_id, "user-1");
        assert_eq!(loaded.active_window, ActiveWindow::DayAndEvening);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert!(store.running_tasks().is_empty());

        store.set_task_status(&task.id, TaskStatus::Running).unwrap();
        assert_eq!(store.running_tasks().len(), 1);

        store.terminate_task(&task.id, "quota exhausted").unwrap();
        let terminated = store.get_task(&task.id).unwrap();
        assert_eq!(terminated.status, TaskStatus::Terminated);
        assert_eq!(terminated.status_reason.as_deref(), Some("quota exhausted"));
        assert!(store.running_tasks().is_empty());

        assert!(matches!(
            store.set_task_status("task-missing", TaskStatus::Terminated),
            Err(ClickflowError::NotFound(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_plan_unique_per_day() {
        let (store, dir) = temp_store("plan");
        let task = sample_task();
        store.save_task(&task).unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let mut targets = [0u32; 24];
        targets[9] = 5;
        let plan = DailyPlan::new(&task.id, date, targets);
        store.save_plan(&plan).unwrap();

        let found = store.plan_for(&task.id, date).unwrap().unwrap();
        assert_eq!(found.id, plan.id);
        assert_eq!(found.hourly_targets[9], 5);
        assert_eq!(found.current_strategy, VisitorStrategy::Lightweight);
        assert!(store.plan_for(&task.id, date.succ_opt().unwrap()).unwrap().is_none());
        assert_eq!(store.plans_for_date(date).len(), 1);

        store.set_plan_strategy(&plan.id, VisitorStrategy::Browser).unwrap();
        assert_eq!(
            store.get_plan(&plan.id).unwrap().current_strategy,
            VisitorStrategy::Browser
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_execution_roundtrip() {
        let (store, dir) = temp_store("exec");
        let mut exec = HourlyExecution::new("plan-x", 14, 10);
        store.save_execution(&exec).unwrap();

        exec.record_attempt(
            AttemptLog {
                timestamp: Utc::now(),
                success: true,
                duration_ms: 200,
                error: None,
            },
            1,
        );
        store.save_execution(&exec).unwrap();

        let loaded = store.execution_for("plan-x", 14).unwrap().unwrap();
        assert_eq!(loaded.actual_clicks, 1);
        assert_eq!(loaded.success_count, 1);
        assert_eq!(loaded.tokens_used, 1);
        assert_eq!(loaded.log.len(), 1);
        assert_eq!(loaded.remaining(), 9);
        assert!(store.execution_for("plan-x", 15).unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_user_hour_rollup_groups_by_user() {
        let (store, dir) = temp_store("rollup");
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        for (user, tokens) in [("alice", 2u32), ("bob", 9u32)] {
            let task = Task::new(user, "https://example.com", "", "", ActiveWindow::FullDay, 50);
            store.save_task(&task).unwrap();
            let plan = DailyPlan::new(&task.id, date, [1u32; 24]);
            store.save_plan(&plan).unwrap();
            let mut exec = HourlyExecution::new(&plan.id, 10, 3);
            exec.actual_clicks = 3;
            exec.success_count = 2;
            exec.fail_count = 1;
            exec.tokens_used = tokens;
            store.save_execution(&exec).unwrap();
        }

        let mut rollup = store.user_hour_rollup(date, 10);
        rollup.sort();
        assert_eq!(rollup.len(), 2);
        assert_eq!(rollup[0], ("alice".into(), 3, 2, 2));
        assert_eq!(rollup[1], ("bob".into(), 3, 2, 9));
        // Other hours have no rows
        assert!(store.user_hour_rollup(date, 11).is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_summary_upsert() {
        let (store, dir) = temp_store("summary");
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let first = DailySummary::from_totals("task-1", date, 10, 4, 6, 4);
        store.upsert_summary(&first).unwrap();
        let second = DailySummary::from_totals("task-1", date, 20, 20, 0, 20);
        store.upsert_summary(&second).unwrap();

        let loaded = store.summary_for("task-1", date).unwrap().unwrap();
        assert_eq!(loaded.total_clicks, 20);
        assert_eq!(loaded.status, SummaryStatus::Success);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_usage_records() {
        let (store, dir) = temp_store("usage");
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let record = UsageRecord {
            user_id: "carol".into(),
            date,
            hour: 8,
            clicks: 12,
            success: 3,
            tokens: 11,
            anomalous: true,
        };
        store.save_usage_record(&record).unwrap();

        let loaded = store.usage_records_for(date, 8);
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].anomalous);
        assert_eq!(loaded[0].tokens, 11);
        std::fs::remove_dir_all(&dir).ok();
    }
}
