//! # Bing Daily Wallpaper
//!
//! A background service that applies Microsoft Bing's image of the day as the
//! desktop wallpaper and keeps a bounded cache of recent images.
//!
//! ## Architecture
//! - `updater.rs` - Fetch/apply/prune/persist sequence under a single-flight guard
//! - `scheduler.rs` - Launch trigger, recurring timer, on-demand triggers
//! - `cache.rs` - Image cache directory: atomic save, listing, retention pruning
//! - `bing.rs` - Bing image archive client
//! - `config.rs` - Preferences, markets, resolutions, persistence
//! - `settings.rs` - User preference actions
//! - `wallpaper.rs` - COSMIC, GNOME, and feh wallpaper backends
//! - `service.rs` / `dbus_client.rs` - D-Bus control surface and its client
//! - `daemon.rs` - Service wiring and the headless one-shot update
//!
//! ## CLI Usage
//! - No arguments or `--daemon`: run the background service
//! - `--fetch`, `-f`: fetch and apply once, then exit
//! - `--update`, `-u`: ask the running service to update now
//! - `--status`, `--history`, `--set <key> <value>`
//! - `--help`, `-h` / `--version`, `-v`

mod autostart;   // XDG autostart registration
mod bing;        // Bing image archive client
mod cache;       // On-disk image cache
mod config;      // Preferences and their persistence
mod daemon;      // Background service wiring
mod dbus_client; // D-Bus client used by the CLI
mod error;       // Update error taxonomy
mod notify;      // Desktop notifications
mod scheduler;   // Update timer and triggers
mod service;     // D-Bus service
mod settings;    // Preference actions
mod updater;     // Update orchestration
mod wallpaper;   // Desktop wallpaper backends

#[cfg(test)]
mod testing;

use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::dbus_client::WallpaperClient;

const DEFAULT_LOG_FILTER: &str = "bing_daily_wallpaper=info";

/// Logs go to stderr so command output on stdout stays clean.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("bing-daily-wallpaper");

    match args.get(1).map(String::as_str) {
        None | Some("--daemon") => match daemon::run_daemon().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "background service failed");
                ExitCode::FAILURE
            }
        },
        Some("--fetch" | "-f") => match daemon::run_headless().await {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
        Some("--update" | "-u") => with_service(|client| async move {
            println!("{}", client.update_now().await.map_err(|e| e.to_string())?);
            Ok(())
        })
        .await,
        Some("--status") => print_status().await,
        Some("--history") => print_history().await,
        Some("--set") => match (args.get(2), args.get(3)) {
            (Some(key), Some(value)) => {
                let (key, value) = (key.clone(), value.clone());
                with_service(|client| async move { client.set(&key, &value).await }).await
            }
            _ => {
                eprintln!("Usage: {program} --set <key> <value>");
                ExitCode::FAILURE
            }
        },
        Some("--help" | "-h") => {
            print_help(program);
            ExitCode::SUCCESS
        }
        Some("--version" | "-v") => {
            println!("bing-daily-wallpaper {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some(other) => {
            eprintln!("Unknown argument: {other}");
            eprintln!("Use --help for usage information");
            ExitCode::FAILURE
        }
    }
}

/// Runs `f` against the running service, reporting any failure.
async fn with_service<F, Fut>(f: F) -> ExitCode
where
    F: FnOnce(WallpaperClient) -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let client = match WallpaperClient::connect().await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Background service is not running ({e}). Start it with --daemon.");
            return ExitCode::FAILURE;
        }
    };
    match f(client).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Prints the service status, or the saved state when the service is down.
async fn print_status() -> ExitCode {
    if let Ok(client) = WallpaperClient::connect().await {
        return match client.status().await {
            Ok(status) => {
                println!("Status:    {} ({})", status.text, status.state);
                println!("Wallpaper: {}", or_none(&status.current_wallpaper));
                println!("Next run:  {}", or_none(&status.next_run));
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    match daemon::open_preferences() {
        Ok(preferences) => {
            let prefs = preferences.snapshot();
            println!("Status:    background service not running");
            let preview = prefs.last_preview.unwrap_or_default();
            println!("Wallpaper: {}", or_none(&preview.file_path));
            if !preview.title.is_empty() {
                println!("Image:     {}", preview.title);
            }
            if let Some(link) = preview.link {
                println!("Details:   {link}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Lists cached images, from the service if it is running.
async fn print_history() -> ExitCode {
    let items = match WallpaperClient::connect().await {
        Ok(client) => match client.history().await {
            Ok(items) => items,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
        Err(_) => match daemon::open_preferences() {
            Ok(preferences) => service::history(&preferences.snapshot().download_directory),
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    if items.is_empty() {
        println!("No cached images");
    }
    for item in items {
        println!("{:<10}  {}", item.date, item.path);
    }
    ExitCode::SUCCESS
}

fn or_none(value: &str) -> &str {
    if value.is_empty() {
        "(none)"
    } else {
        value
    }
}

fn print_help(program: &str) {
    println!("Bing Daily Wallpaper\n");
    println!("Usage: {program} [OPTIONS]\n");
    println!("Options:");
    println!("  (none), --daemon       Run the background service");
    println!("  --fetch, -f            Fetch and apply today's image once (no service)");
    println!("  --update, -u           Ask the running service to update now");
    println!("  --status               Show status, current wallpaper, and next run");
    println!("  --history              List cached images, newest first");
    println!("  --set <key> <value>    Change a setting on the running service");
    println!("                         keys: resolution, market, custom-market, style,");
    println!("                               interval, retention, launch-at-login");
    println!(
        "                         intervals (minutes): {:?}",
        config::ALLOWED_INTERVALS
    );
    println!(
        "                         suggested retention: {:?}",
        config::RETENTION_CHOICES
    );
    println!("                         markets:");
    for market in config::MARKETS {
        println!("                           {:<6} {}", market.code, market.name);
    }
    println!("  --version, -v          Show version information");
    println!("  --help, -h             Show this help message");
}
