//! Task, plan, and execution data model — the entities the scheduler
//! persists and mutates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A user-defined automation unit producing synthetic traffic for one URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: String,
    /// Owning user — token quota is charged against this account.
    pub user_id: String,
    /// URL every visit targets.
    pub target_url: String,
    /// Referer header sent with each visit.
    pub referer: String,
    /// Country tag (informational, used for proxy selection upstream).
    pub country: String,
    /// Hours of the day during which this task may run.
    pub active_window: ActiveWindow,
    /// Total clicks to distribute across one day (1..=10000).
    pub daily_click_target: u32,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Why the task left `Running` (quota exhaustion, sustained failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(
        user_id: &str,
        target_url: &str,
        referer: &str,
        country: &str,
        active_window: ActiveWindow,
        daily_click_target: u32,
    ) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            target_url: target_url.to_string(),
            referer: referer.to_string(),
            country: country.to_string(),
            active_window,
            daily_click_target: daily_click_target.clamp(1, 10_000),
            status: TaskStatus::Pending,
            status_reason: None,
            created_at: Utc::now(),
        }
    }
}

/// Task lifecycle status. Closed set — every transition site matches
/// exhaustively so a new status cannot slip past a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Terminated,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => TaskStatus::Running,
            "terminated" => TaskStatus::Terminated,
            _ => TaskStatus::Pending,
        }
    }
}

/// The subset of the 24 hours during which a task may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveWindow {
    /// 00:00–24:00.
    FullDay,
    /// 06:00–24:00.
    DayAndEvening,
    /// 09:00–18:00.
    Business,
    /// Admin-defined range, `start..end` in whole hours.
    Custom { start: u8, end: u8 },
}

impl ActiveWindow {
    /// Eligible hours, ascending.
    pub fn hours(&self) -> Vec<u8> {
        let (start, end) = self.bounds();
        (start..end).collect()
    }

    /// Half-open `[start, end)` hour bounds, clamped to the day.
    pub fn bounds(&self) -> (u8, u8) {
        match self {
            ActiveWindow::FullDay => (0, 24),
            ActiveWindow::DayAndEvening => (6, 24),
            ActiveWindow::Business => (9, 18),
            ActiveWindow::Custom { start, end } => {
                let start = (*start).min(23);
                let end = (*end).clamp(start + 1, 24);
                (start, end)
            }
        }
    }

    /// Whether `hour` falls inside the window.
    pub fn contains(&self, hour: u8) -> bool {
        let (start, end) = self.bounds();
        hour >= start && hour < end
    }

    /// Stable string form for the store (`custom:6-22` for custom ranges).
    pub fn as_str(&self) -> String {
        match self {
            ActiveWindow::FullDay => "full_day".to_string(),
            ActiveWindow::DayAndEvening => "day_and_evening".to_string(),
            ActiveWindow::Business => "business".to_string(),
            ActiveWindow::Custom { start, end } => format!("custom:{start}-{end}"),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "full_day" => ActiveWindow::FullDay,
            "day_and_evening" => ActiveWindow::DayAndEvening,
            "business" => ActiveWindow::Business,
            other => {
                if let Some(range) = other.strip_prefix("custom:") {
                    if let Some((a, b)) = range.split_once('-') {
                        if let (Ok(start), Ok(end)) = (a.parse(), b.parse()) {
                            return ActiveWindow::Custom { start, end };
                        }
                    }
                }
                ActiveWindow::FullDay
            }
        }
    }
}

/// The mechanism used to perform one visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitorStrategy {
    /// Plain HTTP GET — cheap, one token per successful visit.
    Lightweight,
    /// Browser-profile client — expensive, more realistic.
    Browser,
}

impl VisitorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitorStrategy::Lightweight => "lightweight",
            VisitorStrategy::Browser => "browser",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "browser" => VisitorStrategy::Browser,
            _ => VisitorStrategy::Lightweight,
        }
    }
}

/// Per-day click allocation for one task. At most one per (task, day).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPlan {
    pub id: String,
    pub task_id: String,
    pub date: NaiveDate,
    /// Clicks per hour; zeros outside the active window.
    /// Invariant: the sum equals the task's `daily_click_target` exactly.
    pub hourly_targets: [u32; 24],
    /// Escalated by the engine after a fully-failed hour.
    pub current_strategy: VisitorStrategy,
}

impl DailyPlan {
    pub fn new(task_id: &str, date: NaiveDate, hourly_targets: [u32; 24]) -> Self {
        Self {
            id: format!("plan-{}", uuid::Uuid::new_v4()),
            task_id: task_id.to_string(),
            date,
            hourly_targets,
            current_strategy: VisitorStrategy::Lightweight,
        }
    }

    /// Highest hour with a non-zero target, if any.
    pub fn last_active_hour(&self) -> Option<u8> {
        self.hourly_targets
            .iter()
            .enumerate()
            .rev()
            .find(|&(_, &t)| t > 0)
            .map(|(h, _)| h as u8)
    }
}

/// One line of the append-only per-attempt log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptLog {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress record for one (plan, hour) slot.
///
/// Invariants, held at every persisted point:
/// `actual_clicks <= target_clicks` and
/// `success_count + fail_count == actual_clicks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyExecution {
    pub id: String,
    pub plan_id: String,
    /// 0..=23.
    pub hour: u8,
    pub target_clicks: u32,
    pub actual_clicks: u32,
    pub success_count: u32,
    pub fail_count: u32,
    pub tokens_used: u32,
    pub log: Vec<AttemptLog>,
}

impl HourlyExecution {
    pub fn new(plan_id: &str, hour: u8, target_clicks: u32) -> Self {
        Self {
            id: format!("exec-{}", uuid::Uuid::new_v4()),
            plan_id: plan_id.to_string(),
            hour,
            target_clicks,
            actual_clicks: 0,
            success_count: 0,
            fail_count: 0,
            tokens_used: 0,
            log: Vec::new(),
        }
    }

    /// Attempts still owed for this hour. Zero means the slot is satisfied
    /// and a re-invocation is a no-op.
    pub fn remaining(&self) -> u32 {
        self.target_clicks.saturating_sub(self.actual_clicks)
    }

    /// Record one attempt outcome. Counter updates stay internally
    /// consistent even if the caller crashes right after.
    pub fn record_attempt(&mut self, entry: AttemptLog, tokens: u32) {
        self.actual_clicks += 1;
        if entry.success {
            self.success_count += 1;
            self.tokens_used += tokens;
        } else {
            self.fail_count += 1;
        }
        self.log.push(entry);
    }
}

/// Day-level rollup status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Success,
    Partial,
    Failed,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Success => "success",
            SummaryStatus::Partial => "partial",
            SummaryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => SummaryStatus::Success,
            "partial" => SummaryStatus::Partial,
            _ => SummaryStatus::Failed,
        }
    }
}

/// Aggregated result of one (task, day), upserted after the final hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub task_id: String,
    pub date: NaiveDate,
    pub total_clicks: u32,
    pub total_success: u32,
    pub total_fail: u32,
    pub total_tokens: u32,
    pub status: SummaryStatus,
}

impl DailySummary {
    /// Build a summary from hourly counters. Failed when nothing succeeded,
    /// Success when every performed click succeeded (and at least one did).
    pub fn from_totals(
        task_id: &str,
        date: NaiveDate,
        total_clicks: u32,
        total_success: u32,
        total_fail: u32,
        total_tokens: u32,
    ) -> Self {
        let status = if total_success == 0 {
            SummaryStatus::Failed
        } else if total_fail == 0 {
            SummaryStatus::Success
        } else {
            SummaryStatus::Partial
        };
        Self {
            task_id: task_id.to_string(),
            date,
            total_clicks,
            total_success,
            total_fail,
            total_tokens,
            status,
        }
    }
}

/// Per-user hourly usage rollup emitted by reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub hour: u8,
    pub clicks: u32,
    pub success: u32,
    pub tokens: u32,
    /// Soft fraud/bug signal: tokens-per-success above the configured ratio.
    pub anomalous: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_window_hours() {
        assert_eq!(ActiveWindow::FullDay.hours().len(), 24);
        assert_eq!(ActiveWindow::DayAndEvening.hours(), (6..24).collect::<Vec<u8>>());
        assert_eq!(ActiveWindow::Business.hours(), (9..18).collect::<Vec<u8>>());
        let custom = ActiveWindow::Custom { start: 20, end: 23 };
        assert_eq!(custom.hours(), vec![20, 21, 22]);
        assert!(custom.contains(20));
        assert!(!custom.contains(23));
    }

    #[test]
    fn test_active_window_roundtrip() {
        for w in [
            ActiveWindow::FullDay,
            ActiveWindow::DayAndEvening,
            ActiveWindow::Business,
            ActiveWindow::Custom { start: 7, end: 19 },
        ] {
            assert_eq!(ActiveWindow::parse(&w.as_str()), w);
        }
        // Garbage falls back to the widest window
        assert_eq!(ActiveWindow::parse("nonsense"), ActiveWindow::FullDay);
    }

    #[test]
    fn test_custom_window_clamped() {
        // end <= start degenerates to a one-hour window rather than panicking
        let w = ActiveWindow::Custom { start: 10, end: 9 };
        assert_eq!(w.bounds(), (10, 11));
    }

    #[test]
    fn test_record_attempt_invariants() {
        let mut exec = HourlyExecution::new("plan-1", 9, 5);
        exec.record_attempt(
            AttemptLog {
                timestamp: Utc::now(),
                success: true,
                duration_ms: 120,
                error: None,
            },
            1,
        );
        exec.record_attempt(
            AttemptLog {
                timestamp: Utc::now(),
                success: false,
                duration_ms: 30_000,
                error: Some("timeout".into()),
            },
            0,
        );
        assert_eq!(exec.actual_clicks, 2);
        assert_eq!(exec.success_count + exec.fail_count, exec.actual_clicks);
        assert_eq!(exec.tokens_used, 1);
        assert_eq!(exec.remaining(), 3);
        assert_eq!(exec.log.len(), 2);
    }

    #[test]
    fn test_summary_status_mapping() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(DailySummary::from_totals("t", d, 0, 0, 0, 0).status, SummaryStatus::Failed);
        assert_eq!(DailySummary::from_totals("t", d, 10, 10, 0, 10).status, SummaryStatus::Success);
        assert_eq!(DailySummary::from_totals("t", d, 10, 7, 3, 7).status, SummaryStatus::Partial);
    }

    #[test]
    fn test_last_active_hour() {
        let mut targets = [0u32; 24];
        targets[3] = 2;
        targets[21] = 1;
        let plan = DailyPlan::new("task-1", NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), targets);
        assert_eq!(plan.last_active_hour(), Some(21));

        let empty = DailyPlan::new("task-1", plan.date, [0u32; 24]);
        assert_eq!(empty.last_active_hour(), None);
    }

    #[test]
    fn test_task_target_clamped() {
        let task = Task::new("u1", "https://example.com", "", "VN", ActiveWindow::FullDay, 0);
        assert_eq!(task.daily_click_target, 1);
        let task = Task::new("u1", "https://example.com", "", "VN", ActiveWindow::FullDay, 99_999);
        assert_eq!(task.daily_click_target, 10_000);
    }
}
