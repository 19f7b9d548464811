//! Recurring triggers — three tokio loops on one fixed-offset clock.
//!
//! Each trigger re-derives its work from the store on every tick, so a
//! crashed or skipped run is healed by the next one. All three also fire
//! once at startup to catch up on anything the downtime missed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use tokio::sync::Mutex;

use clickflow_core::config::ClickflowConfig;
use clickflow_core::error::{ClickflowError, Result};
use clickflow_core::types::{DailyPlan, HourlyExecution, UsageRecord};
use clickflow_store::PlanStore;

use crate::engine::ExecutionEngine;
use crate::plan::build_hourly_targets;
use crate::reconcile::reconcile_hour;

pub struct Scheduler {
    store: Arc<Mutex<PlanStore>>,
    engine: Arc<ExecutionEngine>,
    config: ClickflowConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<Mutex<PlanStore>>,
        engine: Arc<ExecutionEngine>,
        config: ClickflowConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.config.scheduler.timezone_offset_hours * 3600).ok_or_else(
            || {
                ClickflowError::Config(format!(
                    "invalid timezone offset: {}h",
                    self.config.scheduler.timezone_offset_hours
                ))
            },
        )
    }

    fn now_local(&self) -> Result<DateTime<FixedOffset>> {
        Ok(Utc::now().with_timezone(&self.offset()?))
    }

    /// Generate today's plan for every running task that lacks one.
    /// Returns the number of plans created; existing plans are untouched.
    pub async fn trigger_daily_plan_generation(&self, date: NaiveDate) -> Result<usize> {
        let store = self.store.lock().await;
        let tasks = store.running_tasks();
        let mut created = 0;

        for task in tasks {
            if store.plan_for(&task.id, date)?.is_some() {
                tracing::debug!("Task {} already planned for {date}", task.id);
                continue;
            }
            let targets = {
                let mut rng = rand::thread_rng();
                build_hourly_targets(
                    task.daily_click_target,
                    &task.active_window,
                    self.config.plan.variance,
                    &mut rng,
                )
            };
            let plan = DailyPlan::new(&task.id, date, targets);
            store.save_plan(&plan)?;
            for (hour, &target) in targets.iter().enumerate() {
                if target > 0 {
                    store.save_execution(&HourlyExecution::new(&plan.id, hour as u8, target))?;
                }
            }
            tracing::info!(
                "Planned task {} for {date}: {} clicks over {} hour(s)",
                task.id,
                task.daily_click_target,
                targets.iter().filter(|&&t| t > 0).count()
            );
            created += 1;
        }
        Ok(created)
    }

    /// Drive every (plan, hour) slot due in the given hour of `date`.
    /// Slots run concurrently; returns how many were driven.
    pub async fn trigger_hourly_execution(&self, date: NaiveDate, hour: u8) -> Result<usize> {
        let due: Vec<String> = {
            let store = self.store.lock().await;
            store
                .plans_for_date(date)
                .into_iter()
                .filter(|p| p.hourly_targets[hour as usize] > 0)
                .map(|p| p.id)
                .collect()
        };

        let mut handles = Vec::with_capacity(due.len());
        for plan_id in &due {
            let engine = Arc::clone(&self.engine);
            let plan_id = plan_id.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = engine.run_hour(&plan_id, hour).await {
                    tracing::error!("Hour {hour} of plan {plan_id} failed: {e}");
                }
            }));
        }
        futures::future::join_all(handles).await;
        Ok(due.len())
    }

    /// Reconcile the hour that just completed. At local midnight this is
    /// hour 23 of the previous day.
    pub async fn trigger_reconciliation(&self) -> Result<Vec<UsageRecord>> {
        let now = self.now_local()?;
        let (date, hour) = previous_hour(now.date_naive(), now.hour() as u8);
        let store = self.store.lock().await;
        reconcile_hour(&store, date, hour, self.config.reconcile.anomaly_ratio)
    }

    /// Run the three trigger loops forever. Each fires once immediately,
    /// then waits for its next boundary.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let daily = {
            let s = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    match s.now_local() {
                        Ok(now) => {
                            if let Err(e) = s.trigger_daily_plan_generation(now.date_naive()).await
                            {
                                tracing::error!("Daily plan generation failed: {e}");
                            }
                            // Re-read the clock: the trigger itself takes time
                            match s.now_local() {
                                Ok(after) => tokio::time::sleep(until_next_day(after)).await,
                                Err(_) => tokio::time::sleep(Duration::from_secs(60)).await,
                            }
                        }
                        Err(e) => {
                            tracing::error!("Clock error in daily loop: {e}");
                            tokio::time::sleep(Duration::from_secs(60)).await;
                        }
                    }
                }
            })
        };

        let hourly = {
            let s = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    match s.now_local() {
                        Ok(now) => {
                            let date = now.date_naive();
                            let hour = now.hour() as u8;
                            match s.trigger_hourly_execution(date, hour).await {
                                Ok(n) if n > 0 => {
                                    tracing::info!("Hour {hour}: drove {n} plan slot(s)")
                                }
                                Ok(_) => {}
                                Err(e) => tracing::error!("Hourly execution failed: {e}"),
                            }
                            // The slots above run for most of the hour, so the
                            // sleep must start from a fresh clock read
                            match s.now_local() {
                                Ok(after) => tokio::time::sleep(until_next_hour(after)).await,
                                Err(_) => tokio::time::sleep(Duration::from_secs(60)).await,
                            }
                        }
                        Err(e) => {
                            tracing::error!("Clock error in hourly loop: {e}");
                            tokio::time::sleep(Duration::from_secs(60)).await;
                        }
                    }
                }
            })
        };

        let usage = {
            let s = Arc::clone(&self);
            let minute = self.config.reconcile.minute_offset;
            tokio::spawn(async move {
                loop {
                    if let Err(e) = s.trigger_reconciliation().await {
                        tracing::error!("Reconciliation failed: {e}");
                    }
                    match s.now_local() {
                        Ok(now) => tokio::time::sleep(until_minute_past_hour(now, minute)).await,
                        Err(_) => tokio::time::sleep(Duration::from_secs(60)).await,
                    }
                }
            })
        };

        // The loops never return; surface whichever panics first.
        let (r, _, _) = futures::future::join3(daily, hourly, usage).await;
        r.map_err(|e| ClickflowError::Store(format!("Scheduler loop panicked: {e}")))?;
        Ok(())
    }
}

/// The (date, hour) cell immediately before the given local (date, hour).
pub fn previous_hour(date: NaiveDate, hour: u8) -> (NaiveDate, u8) {
    if hour == 0 {
        (date - chrono::Duration::days(1), 23)
    } else {
        (date, hour - 1)
    }
}

/// Time until the next local midnight.
pub fn until_next_day(now: DateTime<FixedOffset>) -> Duration {
    let tomorrow = (now.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| now.naive_local());
    to_duration(tomorrow - now.naive_local())
}

/// Time until the top of the next hour.
pub fn until_next_hour(now: DateTime<FixedOffset>) -> Duration {
    let secs_into_hour = (now.minute() * 60 + now.second()) as u64;
    Duration::from_secs(3600 - secs_into_hour.min(3599))
}

/// Time until the next HH:`minute` boundary (this hour if still ahead,
/// otherwise the next one).
pub fn until_minute_past_hour(now: DateTime<FixedOffset>, minute: u32) -> Duration {
    let minute = minute.min(59);
    let secs_into_hour = (now.minute() * 60 + now.second()) as i64;
    let target = (minute * 60) as i64;
    let delta = if secs_into_hour < target {
        target - secs_into_hour
    } else {
        3600 - secs_into_hour + target
    };
    Duration::from_secs(delta.max(1) as u64)
}

fn to_duration(d: chrono::Duration) -> Duration {
    d.to_std().unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use clickflow_core::types::{ActiveWindow, Task, TaskStatus, VisitorStrategy};
    use clickflow_store::TokenLedger;
    use clickflow_visitor::{ProxyPool, VisitorFactory};

    fn local(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        NaiveDate::from_ymd_opt(2026, 8, 27)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
            .and_local_timezone(offset)
            .single()
            .unwrap()
    }

    #[test]
    fn test_until_next_hour() {
        assert_eq!(until_next_hour(local(10, 0, 0)), Duration::from_secs(3600));
        assert_eq!(until_next_hour(local(10, 59, 0)), Duration::from_secs(60));
        assert_eq!(until_next_hour(local(10, 30, 30)), Duration::from_secs(1770));
    }

    #[test]
    fn test_until_next_day() {
        assert_eq!(
            until_next_day(local(0, 0, 0)),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(until_next_day(local(23, 59, 50)), Duration::from_secs(10));
    }

    #[test]
    fn test_until_minute_past_hour() {
        // 10:02 → 10:05 is 3 minutes away
        assert_eq!(
            until_minute_past_hour(local(10, 2, 0), 5),
            Duration::from_secs(180)
        );
        // 10:05 exactly → next boundary is 11:05
        assert_eq!(
            until_minute_past_hour(local(10, 5, 0), 5),
            Duration::from_secs(3600)
        );
        // 10:30 → 11:05
        assert_eq!(
            until_minute_past_hour(local(10, 30, 0), 5),
            Duration::from_secs(2100)
        );
    }

    #[test]
    fn test_previous_hour_wraps_midnight() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        assert_eq!(previous_hour(date, 10), (date, 9));
        assert_eq!(
            previous_hour(date, 0),
            (NaiveDate::from_ymd_opt(2026, 8, 26).unwrap(), 23)
        );
    }

    fn scheduler(name: &str) -> (Arc<Scheduler>, Arc<Mutex<PlanStore>>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("clickflow-triggers-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).ok();

        let store = Arc::new(Mutex::new(PlanStore::open(&dir.join("store.db")).unwrap()));
        let ledger = Arc::new(Mutex::new(
            TokenLedger::open(&dir.join("ledger.db")).unwrap(),
        ));
        let mut config = ClickflowConfig::default();
        config.scheduler.timezone_offset_hours = 0;
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            VisitorFactory::standard(),
            Arc::new(ProxyPool::new(None)),
            EngineSettings::from_config(&config),
        ));
        (
            Arc::new(Scheduler::new(Arc::clone(&store), engine, config)),
            store,
            dir,
        )
    }

    #[tokio::test]
    async fn test_plan_generation_is_idempotent() {
        let (sched, store, dir) = scheduler("planidem");
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();

        let mut task = Task::new(
            "user-1",
            "https://example.com",
            "https://ref.example",
            "VN",
            ActiveWindow::Business,
            90,
        );
        task.status = TaskStatus::Running;
        store.lock().await.save_task(&task).unwrap();

        assert_eq!(sched.trigger_daily_plan_generation(date).await.unwrap(), 1);
        assert_eq!(sched.trigger_daily_plan_generation(date).await.unwrap(), 0);

        let s = store.lock().await;
        let plan = s.plan_for(&task.id, date).unwrap().unwrap();
        assert_eq!(plan.hourly_targets.iter().sum::<u32>(), 90);
        assert_eq!(plan.current_strategy, VisitorStrategy::Lightweight);

        // Execution rows only for the in-window hours with volume
        let execs = s.executions_for_plan(&plan.id);
        assert!(!execs.is_empty());
        for e in &execs {
            assert_eq!(e.target_clicks, plan.hourly_targets[e.hour as usize]);
            assert!(e.target_clicks > 0);
        }
        drop(s);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_plan_generation_skips_non_running_tasks() {
        let (sched, store, dir) = scheduler("skippending");
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();

        let task = Task::new(
            "user-1",
            "https://example.com",
            "",
            "",
            ActiveWindow::FullDay,
            50,
        );
        // Default status is pending
        store.lock().await.save_task(&task).unwrap();

        assert_eq!(sched.trigger_daily_plan_generation(date).await.unwrap(), 0);
        assert!(store
            .lock()
            .await
            .plan_for(&task.id, date)
            .unwrap()
            .is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_hourly_trigger_counts_due_slots() {
        let (sched, store, dir) = scheduler("due");
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();

        for user in ["a", "b"] {
            let mut task = Task::new(
                user,
                "https://example.com",
                "",
                "",
                ActiveWindow::FullDay,
                24,
            );
            task.status = TaskStatus::Running;
            store.lock().await.save_task(&task).unwrap();
            let mut targets = [0u32; 24];
            targets[7] = if user == "a" { 3 } else { 0 };
            targets[8] = 2;
            let plan = DailyPlan::new(&task.id, date, targets);
            let s = store.lock().await;
            s.save_plan(&plan).unwrap();
            for (hour, &t) in targets.iter().enumerate() {
                if t > 0 {
                    s.save_execution(&HourlyExecution::new(&plan.id, hour as u8, t))
                        .unwrap();
                }
            }
        }

        // Hour 7 is due for one plan, hour 8 for both, hour 9 for none.
        // Neither user has tokens, so the engine terminates the tasks
        // instead of visiting; the trigger still counts the due slots.
        assert_eq!(sched.trigger_hourly_execution(date, 7).await.unwrap(), 1);
        assert_eq!(sched.trigger_hourly_execution(date, 8).await.unwrap(), 2);
        assert_eq!(sched.trigger_hourly_execution(date, 9).await.unwrap(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
