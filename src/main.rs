//! # ClickFlow — Time-Windowed Click Scheduler
//!
//! Distributes each task's daily click target across its active hours,
//! drives the clicks against a per-user token ledger, and reconciles
//! usage every hour.
//!
//! Usage:
//!   clickflow run                              # Start the scheduler daemon
//!   clickflow task add --user u1 --url URL     # Register a task
//!   clickflow task start <id>                  # Set a task running
//!   clickflow plan generate                    # Plan today by hand
//!   clickflow tokens grant u1 500              # Fund a user

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use clickflow_core::config::ClickflowConfig;
use clickflow_core::types::{ActiveWindow, Task, TaskStatus};
use clickflow_scheduler::{reconcile_hour, EngineSettings, ExecutionEngine, Scheduler};
use clickflow_store::{PlanStore, TokenLedger};
use clickflow_visitor::{ProxyPool, VisitorFactory};

#[derive(Parser)]
#[command(
    name = "clickflow",
    version,
    about = "⏱️  ClickFlow — time-windowed click scheduler with token quotas"
)]
struct Cli {
    /// Config file (default: ~/.clickflow/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler daemon (default when no subcommand given)
    Run,
    /// Manage click tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Generate daily plans by hand
    Plan {
        /// Date to plan (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Drive one (plan, hour) slot immediately
    Hour {
        plan_id: String,
        hour: u8,
    },
    /// Reconcile one completed hour
    Reconcile {
        /// Date (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
        hour: u8,
    },
    /// Show the daily summary for a task
    Summary {
        task_id: String,
        /// Date (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Manage token balances
    Tokens {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Register a new task (starts in pending)
    Add {
        #[arg(long)]
        user: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        referer: String,
        #[arg(long, default_value = "")]
        country: String,
        /// Active window: full_day | day_and_evening | business | custom:S-E
        #[arg(long, default_value = "full_day")]
        window: String,
        /// Daily click target (clamped to 1..=10000)
        #[arg(long, default_value = "100")]
        target: u32,
    },
    /// List all tasks
    List,
    /// Set a task running
    Start { id: String },
    /// Pause a task (back to pending)
    Stop { id: String },
    /// Permanently terminate a task
    Terminate {
        id: String,
        #[arg(long, default_value = "terminated by operator")]
        reason: String,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Add tokens to a user's balance
    Grant { user: String, amount: u32 },
    /// Show a user's balance and recent audit trail
    Balance { user: String },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn parse_date(s: Option<&str>) -> Result<NaiveDate> {
    match s {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD")),
        None => Ok(Utc::now().date_naive()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "clickflow=debug"
    } else {
        "clickflow=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => ClickflowConfig::load_from(Path::new(&expand_path(path)))?,
        None => ClickflowConfig::load()?,
    };

    let db_path = expand_path(&config.db_path);
    let store = Arc::new(Mutex::new(PlanStore::open(Path::new(&db_path))?));
    // Ledger tables live in the same sqlite file, separate connection
    let ledger = Arc::new(Mutex::new(TokenLedger::open(Path::new(&db_path))?));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config, store, ledger).await,
        Command::Task { action } => handle_task(action, &store).await,
        Command::Plan { date } => {
            let date = parse_date(date.as_deref())?;
            let scheduler = build_scheduler(config, store, ledger);
            let created = scheduler.trigger_daily_plan_generation(date).await?;
            println!("📅 Created {created} plan(s) for {date}");
            Ok(())
        }
        Command::Hour { plan_id, hour } => {
            anyhow::ensure!(hour < 24, "hour must be 0..=23");
            let engine = build_engine(&config, Arc::clone(&store), ledger);
            let outcome = engine.run_hour(&plan_id, hour).await?;
            println!(
                "⚙️  Hour {hour}: {} clicks ({} ok, {} failed), {} tokens",
                outcome.total_clicks,
                outcome.success_count,
                outcome.fail_count,
                outcome.tokens_used
            );
            Ok(())
        }
        Command::Reconcile { date, hour } => {
            anyhow::ensure!(hour < 24, "hour must be 0..=23");
            let date = parse_date(date.as_deref())?;
            let store = store.lock().await;
            let records = reconcile_hour(&store, date, hour, config.reconcile.anomaly_ratio)?;
            println!("🔎 {date} hour {hour}: {} user record(s)", records.len());
            for r in &records {
                let flag = if r.anomalous { " ⚠️ anomalous" } else { "" };
                println!(
                    "   {} — {} clicks, {} ok, {} tokens{flag}",
                    r.user_id, r.clicks, r.success, r.tokens
                );
            }
            Ok(())
        }
        Command::Summary { task_id, date } => {
            let date = parse_date(date.as_deref())?;
            let store = store.lock().await;
            match store.summary_for(&task_id, date)? {
                Some(s) => {
                    println!("📊 {task_id} on {date} [{}]", s.status.as_str());
                    println!(
                        "   {} clicks — {} ok, {} failed, {} tokens",
                        s.total_clicks, s.total_success, s.total_fail, s.total_tokens
                    );
                }
                None => println!("No summary for {task_id} on {date}"),
            }
            Ok(())
        }
        Command::Tokens { action } => handle_tokens(action, &ledger).await,
    }
}

async fn run_daemon(
    config: ClickflowConfig,
    store: Arc<Mutex<PlanStore>>,
    ledger: Arc<Mutex<TokenLedger>>,
) -> Result<()> {
    println!("⏱️  ClickFlow v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database: {}", expand_path(&config.db_path));
    println!(
        "   🕐 Timezone:  UTC{:+}",
        config.scheduler.timezone_offset_hours
    );
    if let Some(endpoint) = &config.proxy.endpoint {
        println!("   🔌 Proxy API: {endpoint}");
    }
    println!();

    let scheduler = build_scheduler(config, store, ledger);
    scheduler.run().await?;
    Ok(())
}

fn build_engine(
    config: &ClickflowConfig,
    store: Arc<Mutex<PlanStore>>,
    ledger: Arc<Mutex<TokenLedger>>,
) -> ExecutionEngine {
    ExecutionEngine::new(
        store,
        ledger,
        VisitorFactory::standard(),
        Arc::new(ProxyPool::new(config.proxy.endpoint.clone())),
        EngineSettings::from_config(config),
    )
}

fn build_scheduler(
    config: ClickflowConfig,
    store: Arc<Mutex<PlanStore>>,
    ledger: Arc<Mutex<TokenLedger>>,
) -> Arc<Scheduler> {
    let engine = Arc::new(build_engine(&config, Arc::clone(&store), ledger));
    Arc::new(Scheduler::new(store, engine, config))
}

async fn handle_task(action: TaskAction, store: &Arc<Mutex<PlanStore>>) -> Result<()> {
    let store = store.lock().await;
    match action {
        TaskAction::Add {
            user,
            url,
            referer,
            country,
            window,
            target,
        } => {
            let task = Task::new(
                &user,
                &url,
                &referer,
                &country,
                ActiveWindow::parse(&window),
                target,
            );
            store.save_task(&task)?;
            println!("✅ Task created: {}", task.id);
            println!(
                "   {} clicks/day in {} window ({})",
                task.daily_click_target,
                task.active_window.as_str(),
                task.target_url
            );
            println!("   Run `clickflow task start {}` to activate it", task.id);
        }
        TaskAction::List => {
            let tasks = store.load_tasks();
            if tasks.is_empty() {
                println!("No tasks yet. Add one with `clickflow task add`.");
            }
            for t in tasks {
                let reason = t
                    .status_reason
                    .map(|r| format!(" — {r}"))
                    .unwrap_or_default();
                println!(
                    "{} [{}] {} → {} clicks/day, {} window{reason}",
                    t.id,
                    t.status.as_str(),
                    t.target_url,
                    t.daily_click_target,
                    t.active_window.as_str()
                );
            }
        }
        TaskAction::Start { id } => {
            store.set_task_status(&id, TaskStatus::Running)?;
            println!("▶️  Task {id} running");
        }
        TaskAction::Stop { id } => {
            store.set_task_status(&id, TaskStatus::Pending)?;
            println!("⏸️  Task {id} paused");
        }
        TaskAction::Terminate { id, reason } => {
            store.terminate_task(&id, &reason)?;
            println!("🛑 Task {id} terminated");
        }
    }
    Ok(())
}

async fn handle_tokens(action: TokenAction, ledger: &Arc<Mutex<TokenLedger>>) -> Result<()> {
    let ledger = ledger.lock().await;
    match action {
        TokenAction::Grant { user, amount } => {
            let balance = ledger.grant(&user, amount, "cli grant")?;
            println!("💰 Granted {amount} tokens to {user} (balance: {balance})");
        }
        TokenAction::Balance { user } => {
            println!("💰 {user}: {} tokens", ledger.balance(&user)?);
            for (amount, context) in ledger.audit_trail(&user, 10) {
                println!("   {amount:+} — {context}");
            }
        }
    }
    Ok(())
}
