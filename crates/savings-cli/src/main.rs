//! savings - terminal front end for savings-sync.
//!
//! Logs in (or reuses the stored session), loads accounts, transactions and
//! notifications, prints a dashboard summary and then keeps the unread
//! notification counter fresh until Ctrl+C.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use savings_core::models::User;
use savings_core::projection::{account_totals, transaction_totals, RecentActivity};
use savings_core::utils::{format_money, truncate};
use savings_core::{Config, Projection, Store};

// ============================================================================
// Constants
// ============================================================================

const LOG_FILE: &str = "savings.log";

/// Width of the description column in the recent-activity table.
const DESCRIPTION_WIDTH: usize = 32;

const USAGE: &str = "\
Usage: savings [OPTIONS]

Options:
  --once      Print the dashboard and exit instead of watching notifications
  --logout    Forget the stored session and exit
  -h, --help  Show this help

Environment:
  SAVINGS_API_URL     API base URL (default http://localhost:8080/api)
  SAVINGS_POLL_SECS   Unread-notification poll interval in seconds
  SAVINGS_EMAIL       Login email
  SAVINGS_PASSWORD    Login password (prompted for when unset)
  RUST_LOG            Log filter (default warn)";

/// Initialize the tracing subscriber: stderr plus a log file in the data dir.
fn init_tracing(data_dir: &Path) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    let file_appender = tracing_appender::rolling::never(data_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }
    if let Some(unknown) = args.iter().find(|a| !matches!(a.as_str(), "--once" | "--logout")) {
        anyhow::bail!("Unknown argument: {}\n\n{}", unknown, USAGE);
    }
    let once = args.iter().any(|a| a == "--once");
    let logout = args.iter().any(|a| a == "--logout");

    let mut config = Config::load()?;
    let data_dir = config.data_dir()?;
    let _log_guard = init_tracing(&data_dir)?;
    info!(api = %config.api_base_url, "savings starting");

    let store = Store::from_config(&config)?;

    if logout {
        store.restore_session();
        store.logout();
        println!("Logged out.");
        return Ok(());
    }

    let user = match store.restore_session() {
        Some(user) => user,
        None => login(&store, &mut config).await?,
    };
    println!("Hello, {} <{}>", user.name, user.email);

    load_dashboard(&store).await;
    print_dashboard(&store);

    if once {
        return Ok(());
    }

    watch_notifications(&store).await?;
    info!("savings shutting down");
    Ok(())
}

async fn login(store: &Store, config: &mut Config) -> Result<User> {
    let email = match std::env::var("SAVINGS_EMAIL").ok().filter(|e| !e.trim().is_empty()) {
        Some(email) => email,
        None => prompt_line("Email", config.last_email.as_deref())?,
    };
    let password = match std::env::var("SAVINGS_PASSWORD").ok().filter(|p| !p.is_empty()) {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let user = store
        .login(&email, &password)
        .await
        .map_err(|e| anyhow::anyhow!("Login failed: {}", e.user_message()))?;

    config.last_email = Some(user.email.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    Ok(user)
}

fn prompt_line(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("{} [{}]: ", label, d),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim();
    match (line.is_empty(), default) {
        (true, Some(d)) => Ok(d.to_string()),
        (true, None) => anyhow::bail!("{} is required", label),
        (false, _) => Ok(line.to_string()),
    }
}

/// Load everything the dashboard shows. Failures are reported and the
/// affected section stays empty.
async fn load_dashboard(store: &Store) {
    let (accounts, transactions, notifications) = tokio::join!(
        store.load_accounts(),
        store.load_transactions(None),
        store.load_notifications(),
    );

    for (what, result) in [
        ("accounts", accounts),
        ("transactions", transactions),
        ("notifications", notifications),
    ] {
        if let Err(e) = result {
            eprintln!("Could not load {}: {}", what, e.user_message());
        }
    }
}

fn print_dashboard(store: &Store) {
    let caches = store.caches();

    let accounts = caches.accounts.snapshot();
    let totals = account_totals(&accounts);
    println!();
    println!(
        "Accounts: {} ({} active)   Total balance: {}",
        totals.count,
        totals.active_count,
        format_money(totals.total_balance)
    );

    let transactions = caches.transactions.snapshot();
    let tx_totals = transaction_totals(&transactions);
    println!(
        "Deposits: {}   Withdrawals: {}   Net: {}",
        format_money(tx_totals.deposits),
        format_money(tx_totals.withdrawals),
        format_money(tx_totals.net)
    );

    let recent = RecentActivity::default().project(&transactions);
    if !recent.is_empty() {
        println!();
        println!("Recent activity:");
        for tx in recent.iter() {
            println!(
                "  {}  {:<9} {:>14}  {:<12} {}",
                tx.timestamp.format("%Y-%m-%d %H:%M"),
                tx.type_label(),
                format_money(tx.amount),
                tx.account_number,
                truncate(tx.description.as_deref().unwrap_or(""), DESCRIPTION_WIDTH)
            );
        }
    }

    println!();
    println!("Unread notifications: {}", caches.unread_count.snapshot());
}

async fn watch_notifications(store: &Store) -> Result<()> {
    let _printer = store.caches().unread_count.subscribe(|count| {
        println!("Unread notifications: {}", count);
    });
    let scope = store
        .watch_unread_count()
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    println!(
        "Watching notifications every {}s. Press Ctrl+C to stop.",
        store.unread_poller().period().as_secs()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    scope.release();
    Ok(())
}
