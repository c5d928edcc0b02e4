//! # Background Service
//!
//! Wires the collaborators together and runs until interrupted:
//! preferences, the Bing client, the desktop backend, the scheduler, and the
//! D-Bus surface. A missing session bus is not fatal; the timer keeps
//! updating the wallpaper without it.
//!
//! Also hosts the headless one-shot update used by `--fetch`.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::autostart::{LoginRegistrar, XdgAutostart};
use crate::bing::BingClient;
use crate::config::{JsonPreferencesStore, PreferencesHandle};
use crate::notify::{DesktopNotifier, Notifier};
use crate::scheduler::Scheduler;
use crate::service;
use crate::settings::SettingsController;
use crate::updater::{Trigger, UpdateOrchestrator, UpdateOutcome};
use crate::wallpaper::DesktopBackend;

/// Maximum number of attempts for a headless update
const MAX_ATTEMPTS: u32 = 3;

/// Initial delay between headless retries. Doubles each attempt: 10s, 20s.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(10);

type BoxError = Box<dyn Error + Send + Sync>;

/// Loads preferences from the per-user store (or `$BING_DAILY_CONFIG`).
pub fn open_preferences() -> Result<PreferencesHandle, BoxError> {
    let store = JsonPreferencesStore::from_env().ok_or("could not determine config directory")?;
    info!(path = %store.path().display(), "loading preferences");
    Ok(PreferencesHandle::load(Arc::new(store)))
}

fn build_orchestrator(
    preferences: PreferencesHandle,
    notifier: Arc<dyn Notifier>,
) -> Result<Arc<UpdateOrchestrator>, BoxError> {
    let backend = DesktopBackend::detect();
    info!(?backend, "using wallpaper backend");
    Ok(Arc::new(UpdateOrchestrator::new(
        Arc::new(BingClient::from_env()?),
        Arc::new(backend),
        notifier,
        preferences,
    )))
}

/// Shows the first-run welcome once and remembers that it did.
pub fn show_welcome_once(preferences: &PreferencesHandle, notifier: &dyn Notifier) -> bool {
    if preferences.snapshot().onboarding_complete {
        return false;
    }
    notifier.notify(
        "Bing Daily Wallpaper",
        "Your desktop will now show the Bing image of the day.",
    );
    preferences.mutate(|p| p.onboarding_complete = true);
    true
}

/// Brings the autostart entry in line with the saved preference.
fn sync_login_registration(preferences: &PreferencesHandle, registrar: &dyn LoginRegistrar) {
    let wanted = preferences.snapshot().launch_at_login;
    if registrar.is_enabled() != wanted {
        if let Err(e) = registrar.set_enabled(wanted) {
            warn!(error = %e, "could not sync launch at login");
        }
    }
}

/// Runs the background service until Ctrl+C.
pub async fn run_daemon() -> Result<(), BoxError> {
    let preferences = open_preferences()?;
    let notifier: Arc<dyn Notifier> = Arc::new(DesktopNotifier::default());
    let orchestrator = build_orchestrator(preferences.clone(), Arc::clone(&notifier))?;
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&orchestrator)));

    let registrar = Arc::new(XdgAutostart::for_current_user()?);
    sync_login_registration(&preferences, registrar.as_ref());
    show_welcome_once(&preferences, notifier.as_ref());

    let settings = Arc::new(SettingsController::new(
        preferences.clone(),
        Arc::clone(&scheduler),
        registrar,
    ));

    // Held for the lifetime of the service; dropping it releases the name.
    let _connection = match service::serve(settings).await {
        Ok(connection) => {
            tokio::spawn(service::forward_changes(
                connection.clone(),
                orchestrator.subscribe_status(),
                preferences.subscribe(),
            ));
            Some(connection)
        }
        Err(e) => {
            warn!(error = %e, "session bus unavailable, running without D-Bus control");
            None
        }
    };

    scheduler.start(preferences.snapshot().update_interval_minutes);
    info!("background service running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.stop();
    Ok(())
}

/// Runs an update, retrying failures with exponential backoff.
pub async fn update_with_retries(
    orchestrator: &UpdateOrchestrator,
    attempts: u32,
    initial_delay: Duration,
) -> UpdateOutcome {
    let mut delay = initial_delay;
    let mut outcome = UpdateOutcome::Failed("no attempt made".to_string());

    for attempt in 0..attempts {
        if attempt > 0 {
            println!("Retry {} of {} in {} seconds...", attempt, attempts - 1, delay.as_secs());
            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        outcome = orchestrator.update(Trigger::Manual).await;
        match &outcome {
            UpdateOutcome::Failed(message) => eprintln!("Attempt {} failed: {}", attempt + 1, message),
            _ => return outcome,
        }
    }
    outcome
}

/// One-shot update without the background service. Returns true on success.
pub async fn run_headless() -> Result<bool, BoxError> {
    let preferences = open_preferences()?;
    let orchestrator =
        build_orchestrator(preferences.clone(), Arc::new(DesktopNotifier::default()))?;

    println!(
        "Fetching Bing image for market: {}",
        preferences.snapshot().resolved_market()
    );

    match update_with_retries(&orchestrator, MAX_ATTEMPTS, INITIAL_RETRY_DELAY).await {
        UpdateOutcome::Failed(message) => {
            eprintln!("All {MAX_ATTEMPTS} attempts failed. Last error: {message}");
            Ok(false)
        }
        outcome => {
            println!("{outcome}");
            Ok(true)
        }
    }
}
