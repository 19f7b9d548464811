//! Execution Engine — drives one (plan, hour) slot to completion.
//!
//! Every invocation starts from `remaining = target - actual` read out of
//! the store, so re-invocation after a crash (or an accidental double
//! trigger) redoes at most the attempts that were never flushed and never
//! overshoots the hourly target.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tokio::sync::Mutex;

use clickflow_core::config::ClickflowConfig;
use clickflow_core::error::{ClickflowError, Result};
use clickflow_core::types::{
    AttemptLog, DailyPlan, DailySummary, HourlyExecution, Task, TaskStatus, VisitorStrategy,
};
use clickflow_store::{PlanStore, TokenLedger};
use clickflow_visitor::{ProxyPool, VisitRequest, VisitorFactory};

/// Totals for one hour after a `run_hour` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourOutcome {
    pub total_clicks: u32,
    pub success_count: u32,
    pub fail_count: u32,
    pub tokens_used: u32,
}

impl HourOutcome {
    fn from_execution(exec: &HourlyExecution) -> Self {
        Self {
            total_clicks: exec.actual_clicks,
            success_count: exec.success_count,
            fail_count: exec.fail_count,
            tokens_used: exec.tokens_used,
        }
    }
}

/// Engine tunables, lifted out of the full config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub attempt_timeout: Duration,
    pub edge_trim_secs: u32,
    pub user_agent: String,
    pub lightweight_cost: u32,
    pub browser_cost: u32,
    /// Whole hours east of UTC — the business-day clock.
    pub timezone_offset_hours: i32,
}

impl EngineSettings {
    pub fn from_config(config: &ClickflowConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(config.engine.attempt_timeout_secs),
            edge_trim_secs: config.engine.edge_trim_secs,
            user_agent: config.engine.user_agent.clone(),
            lightweight_cost: config.tokens.lightweight_cost,
            browser_cost: config.tokens.browser_cost,
            timezone_offset_hours: config.scheduler.timezone_offset_hours,
        }
    }

    fn cost(&self, strategy: VisitorStrategy) -> u32 {
        match strategy {
            VisitorStrategy::Lightweight => self.lightweight_cost,
            VisitorStrategy::Browser => self.browser_cost,
        }
    }

    fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.timezone_offset_hours * 3600).ok_or_else(|| {
            ClickflowError::Config(format!(
                "invalid timezone offset: {}h",
                self.timezone_offset_hours
            ))
        })
    }
}

/// The engine. One instance per process, shared by all trigger loops;
/// collaborators are injected so tests can run it against doubles.
pub struct ExecutionEngine {
    store: Arc<Mutex<PlanStore>>,
    ledger: Arc<Mutex<TokenLedger>>,
    visitors: VisitorFactory,
    proxies: Arc<ProxyPool>,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<Mutex<PlanStore>>,
        ledger: Arc<Mutex<TokenLedger>>,
        visitors: VisitorFactory,
        proxies: Arc<ProxyPool>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            visitors,
            proxies,
            settings,
        }
    }

    /// Drive one (plan, hour) slot. Safe to re-invoke at any time: when the
    /// slot is already satisfied this returns the stored totals untouched.
    pub async fn run_hour(&self, plan_id: &str, hour: u8) -> Result<HourOutcome> {
        let (plan, task, mut exec) = {
            let store = self.store.lock().await;
            let plan = store.get_plan(plan_id)?;
            let task = store.get_task(&plan.task_id)?;
            let exec = store.execution_for(plan_id, hour)?.ok_or_else(|| {
                ClickflowError::NotFound(format!("execution for plan {plan_id} hour {hour}"))
            })?;
            (plan, task, exec)
        };

        let remaining = exec.remaining();
        if remaining == 0 {
            tracing::debug!("Hour {hour} of plan {plan_id} already satisfied, nothing to do");
            return Ok(HourOutcome::from_execution(&exec));
        }

        match task.status {
            TaskStatus::Running => {}
            TaskStatus::Pending | TaskStatus::Terminated => {
                tracing::debug!(
                    "Task {} is {}, skipping hour {hour}",
                    task.id,
                    task.status.as_str()
                );
                return Ok(HourOutcome::from_execution(&exec));
            }
        }

        let strategy = plan.current_strategy;
        let cost = self.settings.cost(strategy);

        // Conservative whole-hour quota gate: terminate rather than run
        // into debt partway through.
        let check = {
            self.ledger
                .lock()
                .await
                .check_balance(&task.user_id, remaining * cost)?
        };
        if !check.sufficient {
            let reason = format!(
                "token balance {} below {} required for hour {hour}",
                check.balance,
                remaining * cost
            );
            tracing::warn!("Terminating task {}: {reason}", task.id);
            self.store.lock().await.terminate_task(&task.id, &reason)?;
            return Ok(HourOutcome::from_execution(&exec));
        }

        let instants = self.attempt_instants(&plan, hour, remaining)?;
        tracing::info!(
            "Running hour {hour} of plan {plan_id}: {remaining} attempts via {} strategy",
            strategy.as_str()
        );

        let visitor = self.visitors.for_strategy(strategy);
        for at in instants {
            let now = Utc::now();
            if at > now {
                if let Ok(wait) = (at - now).to_std() {
                    tokio::time::sleep(wait).await;
                }
            }

            // A stop/terminate that landed during the sleep cancels the
            // rest of the hour; the finished attempts stay consistent.
            let current_status = { self.store.lock().await.get_task(&task.id)?.status };
            match current_status {
                TaskStatus::Running => {}
                TaskStatus::Pending | TaskStatus::Terminated => {
                    tracing::info!(
                        "Task {} became {} mid-hour, stopping",
                        task.id,
                        current_status.as_str()
                    );
                    break;
                }
            }

            // Per-attempt re-check: completed attempts are never rolled
            // back, the loop just stops drawing on an empty balance.
            let unit = { self.ledger.lock().await.check_balance(&task.user_id, cost)? };
            if !unit.sufficient {
                tracing::info!(
                    "Balance {} below unit cost {cost} for task {}, stopping hour early",
                    unit.balance,
                    task.id
                );
                break;
            }

            let proxy = self.proxies.next().await;
            let request = VisitRequest {
                url: task.target_url.clone(),
                referer: task.referer.clone(),
                proxy,
                user_agent: self.settings.user_agent.clone(),
                timeout: self.settings.attempt_timeout,
            };
            let outcome = visitor.visit(&request).await;

            let mut raced_out = false;
            let tokens = if outcome.success {
                let context = format!("visit plan={plan_id} hour={hour}");
                let consumed = {
                    self.ledger
                        .lock()
                        .await
                        .consume(&task.user_id, cost, &context)?
                };
                if consumed {
                    cost
                } else {
                    // Balance raced to zero between check and consume
                    raced_out = true;
                    0
                }
            } else {
                0
            };

            // A success whose consume lost the race counts as a failure:
            // no token was charged, so no click is credited.
            let success = outcome.success && !raced_out;
            let error = if raced_out {
                Some("token balance exhausted".into())
            } else {
                outcome.error
            };
            exec.record_attempt(
                AttemptLog {
                    timestamp: Utc::now(),
                    success,
                    duration_ms: outcome.duration_ms,
                    error,
                },
                tokens,
            );

            // Best-effort flush per attempt: a store hiccup here costs at
            // most the unflushed attempts on the next re-derivation.
            if let Err(e) = self.store.lock().await.save_execution(&exec) {
                tracing::warn!("Failed to persist attempt for plan {plan_id} hour {hour}: {e}");
            }

            if raced_out {
                break;
            }
        }

        // An operator pause or terminate that landed mid-hour stands as-is;
        // the failure policy only judges hours the task was running through.
        let final_status = { self.store.lock().await.get_task(&task.id)?.status };
        if final_status == TaskStatus::Running {
            self.apply_failure_policy(&plan, &task, &exec).await?;
        }

        if plan.last_active_hour() == Some(hour) {
            self.recompute_summary(&plan, &task).await?;
        }

        Ok(HourOutcome::from_execution(&exec))
    }

    /// Target instants for this run, sorted ascending, all inside the hour.
    fn attempt_instants(
        &self,
        plan: &DailyPlan,
        hour: u8,
        count: u32,
    ) -> Result<Vec<DateTime<Utc>>> {
        let offset = self.settings.offset()?;
        let hour_start = plan
            .date
            .and_hms_opt(hour as u32, 0, 0)
            .ok_or_else(|| ClickflowError::Plan(format!("invalid hour {hour}")))?
            .and_local_timezone(offset)
            .single()
            .ok_or_else(|| ClickflowError::Plan("ambiguous hour start".into()))?
            .with_timezone(&Utc);

        let offsets = {
            let mut rng = rand::thread_rng();
            sample_offsets(count, 3600, self.settings.edge_trim_secs, &mut rng)
        };
        Ok(offsets
            .into_iter()
            .map(|secs| hour_start + chrono::Duration::seconds(secs as i64))
            .collect())
    }

    /// Strategy escalation and task termination on a fully-failed hour.
    async fn apply_failure_policy(
        &self,
        plan: &DailyPlan,
        task: &Task,
        exec: &HourlyExecution,
    ) -> Result<()> {
        if exec.actual_clicks == 0 || exec.success_count > 0 {
            return Ok(());
        }
        match plan.current_strategy {
            VisitorStrategy::Lightweight => {
                tracing::warn!(
                    "Hour {} of plan {} had zero successes, escalating to browser strategy",
                    exec.hour,
                    plan.id
                );
                self.store
                    .lock()
                    .await
                    .set_plan_strategy(&plan.id, VisitorStrategy::Browser)?;
            }
            VisitorStrategy::Browser => {
                let reason = format!(
                    "zero successes in hour {} on browser strategy, target unreachable",
                    exec.hour
                );
                tracing::warn!("Terminating task {}: {reason}", task.id);
                self.store.lock().await.terminate_task(&task.id, &reason)?;
            }
        }
        Ok(())
    }

    /// Aggregate every hour of the plan into the (task, date) summary.
    pub async fn recompute_summary(&self, plan: &DailyPlan, task: &Task) -> Result<DailySummary> {
        let store = self.store.lock().await;
        let executions = store.executions_for_plan(&plan.id);
        let (mut clicks, mut success, mut fail, mut tokens) = (0u32, 0u32, 0u32, 0u32);
        for e in &executions {
            clicks += e.actual_clicks;
            success += e.success_count;
            fail += e.fail_count;
            tokens += e.tokens_used;
        }
        let summary = DailySummary::from_totals(&task.id, plan.date, clicks, success, fail, tokens);
        store.upsert_summary(&summary)?;
        tracing::info!(
            "Daily summary for task {} on {}: {} clicks, {} ok, {} failed ({})",
            task.id,
            plan.date,
            clicks,
            success,
            fail,
            summary.status.as_str()
        );
        Ok(summary)
    }
}

/// Draw `count` second-offsets inside an hour span: rejection-sampled from
/// a normal centered on the midpoint (sd = span/6), trimmed at both edges,
/// sorted ascending. Falls back to uniform draws if the normal cannot be
/// constructed.
pub fn sample_offsets(count: u32, span_secs: u32, trim_secs: u32, rng: &mut impl Rng) -> Vec<u32> {
    let trim = trim_secs.min(span_secs / 3);
    let lo = trim as f64;
    let hi = (span_secs - trim) as f64;
    let mean = span_secs as f64 / 2.0;
    let sd = span_secs as f64 / 6.0;

    let mut offsets: Vec<u32> = match Normal::new(mean, sd) {
        Ok(normal) => (0..count)
            .map(|_| {
                // Rejection sampling: redraw anything outside the trimmed
                // window so every instant lands inside the hour
                loop {
                    let draw = normal.sample(rng);
                    if draw >= lo && draw <= hi {
                        return draw as u32;
                    }
                }
            })
            .collect(),
        Err(_) => (0..count).map(|_| rng.gen_range(lo..=hi) as u32).collect(),
    };
    offsets.sort_unstable();
    offsets
}
