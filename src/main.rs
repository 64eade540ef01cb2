//! docket-monitor - command line entry point
//!
//! Runs the monitoring loop, the dashboard API, or one-off case management
//! commands against the configured database.

use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use docket_monitor::{
    api,
    budget::CostLedger,
    case::Priority,
    config::Config,
    monitor::{CaseMonitor, MonitorOptions},
    notify::{
        DiscordNotifier, NotificationGate, NotificationManager, RateLimit, SlackNotifier,
        TeamsNotifier, WebhookNotifier,
    },
    sources::{BridgePaidSource, CourtListenerSource},
    store::{CaseStore, SqliteCaseStore},
    util::format_cents,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "docket-monitor", version, about = "Budget-aware court docket monitor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitoring loop until interrupted
    Run,
    /// Run the dashboard API alongside the monitoring loop
    Serve {
        /// Serve the API without polling
        #[arg(long)]
        no_monitor: bool,
    },
    /// Start monitoring a case, or change its priority
    Add {
        case_number: String,
        court_id: String,
        #[arg(long, default_value_t = Priority::Medium)]
        priority: Priority,
    },
    /// Stop monitoring a case
    Remove { case_number: String },
    /// List monitored cases
    List,
    /// Check one case now, ignoring its poll interval
    Check { case_number: String },
    /// Show quarter-to-date spend
    Costs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docket_monitor=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let monitor = Arc::new(build_monitor(&config).await?);

    match cli.command {
        Command::Run => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(api::shutdown_signal(tx));
            monitor.run(rx).await;
        }
        Command::Serve { no_monitor } => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(api::shutdown_signal(tx));

            let poller = if no_monitor {
                None
            } else {
                let monitor = Arc::clone(&monitor);
                let rx = rx.clone();
                Some(tokio::spawn(async move { monitor.run(rx).await }))
            };

            let state = Arc::new(api::AppState::new(Arc::clone(&monitor)));
            api::serve(state, &config.bind_addr(), rx).await?;

            if let Some(handle) = poller {
                handle.await?;
            }
        }
        Command::Add {
            case_number,
            court_id,
            priority,
        } => {
            let case = monitor.add_case(&case_number, &court_id, priority).await?;
            println!(
                "Monitoring {} ({}) at {} priority",
                case.case_number, case.court_id, case.priority
            );
        }
        Command::Remove { case_number } => {
            monitor.remove_case(&case_number).await?;
            println!("Removed {}", case_number);
        }
        Command::List => {
            let cases = monitor.list_cases().await?;
            if cases.is_empty() {
                println!("No cases monitored");
            }
            for case in cases {
                let last = case
                    .last_checked
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<24} {:<8} {:<7} last checked {}{}",
                    case.case_number,
                    case.court_id,
                    case.priority.as_str(),
                    last,
                    if case.notifications_enabled { "" } else { " (muted)" }
                );
            }
        }
        Command::Check { case_number } => {
            let outcome = monitor.force_check(&case_number, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Costs => {
            let summary = monitor.ledger().summary(Utc::now()).await;
            println!("Quarter:   {}", summary.quarter);
            println!("Budget:    {}", format_cents(summary.quarterly_budget_cents));
            println!("Buffer:    {}", format_cents(summary.safety_buffer_cents));
            println!("Spent:     {}", format_cents(summary.spent_cents));
            println!("Remaining: {}", format_cents(summary.remaining_cents));
            println!("Resets:    {}", summary.resets_at.format("%Y-%m-%d %H:%M UTC"));
            for (operation, totals) in &summary.by_operation {
                println!(
                    "  {:<18} {:>4} queries {:>5} pages {:>8}",
                    operation.as_str(),
                    totals.queries,
                    totals.pages,
                    format_cents(totals.cost_cents)
                );
            }
        }
    }

    Ok(())
}

async fn build_monitor(config: &Config) -> anyhow::Result<CaseMonitor> {
    let store: Arc<dyn CaseStore> =
        Arc::new(SqliteCaseStore::new(config.database_path.clone()).await?);
    let ledger = CostLedger::load(config.budget, config.pricing, Arc::clone(&store), Utc::now()).await?;
    info!(
        quarter_spent = %format_cents(ledger.cumulative_spend(Utc::now()).await),
        allowance = %format_cents(config.budget.allowance_cents()),
        "Loaded cost ledger"
    );

    let sources = &config.sources;
    let free = match &sources.courtlistener_base_url {
        Some(base) => CourtListenerSource::with_base_url(base.clone(), sources.courtlistener_token.clone()),
        None => CourtListenerSource::new(sources.courtlistener_token.clone()),
    };
    let mut monitor = CaseMonitor::new(store, Arc::new(ledger), MonitorOptions::from(config))
        .with_free_source(Arc::new(free));

    match &sources.paid_bridge_url {
        Some(url) => {
            monitor = monitor.with_paid_source(Arc::new(BridgePaidSource::new(
                url.clone(),
                sources.paid_bridge_key.clone(),
            )));
        }
        None => warn!("PACER_BRIDGE_URL not set; only free docket data will be used"),
    }

    let notify = &config.notifications;
    let mut manager = NotificationManager::new();
    if let Some(url) = &notify.slack_webhook_url {
        manager.add_sink(Arc::new(SlackNotifier::new(url.clone())));
    }
    if let Some(url) = &notify.discord_webhook_url {
        manager.add_sink(Arc::new(DiscordNotifier::new(url.clone())));
    }
    if let Some(url) = &notify.teams_webhook_url {
        manager.add_sink(Arc::new(TeamsNotifier::new(url.clone())));
    }
    if let Some(url) = &notify.webhook_url {
        manager.add_sink(Arc::new(WebhookNotifier::new(
            url.clone(),
            notify.webhook_secret.clone(),
        )));
    }

    if manager.is_empty() {
        warn!("No notifiers configured; new docket entries will only be logged");
    } else {
        info!(sinks = manager.len(), "Notifications enabled");
        let rate_limit = (notify.rate_limit_per_hour > 0)
            .then(|| RateLimit::per_hour(notify.rate_limit_per_hour));
        monitor = monitor.with_notifier(NotificationGate::new(
            Arc::new(manager),
            notify.document_types.iter().copied(),
            rate_limit,
        ));
    }

    Ok(monitor)
}
