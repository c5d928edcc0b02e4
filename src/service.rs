//! # Wallpaper Service Module
//!
//! Exposes the updater and the preference actions on the session bus so a
//! tray, settings window, or the CLI can drive the background service.
//!
//! ## D-Bus Interface
//!
//! Service name: `org.bingdaily.Wallpaper1`
//! Object path: `/org/bingdaily/Wallpaper1`
//!
//! ### Methods
//! - `UpdateNow()` - Run a manual update and return its outcome
//! - `GetStatus()` - Current `(state, text)` of the updater
//! - `GetPreferences()` - Preferences as JSON
//! - `GetCurrentWallpaper()` - Path of the applied image (empty if none)
//! - `GetNextRun()` - Next timer tick (empty when stopped)
//! - `GetHistory()` - Cached images, newest first
//! - `SetResolution`, `SetMarket`, `SetCustomMarket`, `SetWallpaperStyle`,
//!   `SetUpdateInterval`, `SetRetentionCount`, `SetLaunchAtLogin`
//!
//! ### Signals
//! - `StatusChanged(state: String, text: String)`
//! - `PreferencesChanged(json: String)`

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use zbus::{interface, Connection, SignalContext};

use crate::cache;
use crate::config::{Preferences, WallpaperStyle};
use crate::settings::{SettingsController, SettingsError};
use crate::updater::{Trigger, UpdateStatus};

/// D-Bus service name
pub const SERVICE_NAME: &str = "org.bingdaily.Wallpaper1";

/// D-Bus object path
pub const OBJECT_PATH: &str = "/org/bingdaily/Wallpaper1";

/// A cached image, as listed by `GetHistory`.
#[derive(Debug, Clone, PartialEq, Eq, zbus::zvariant::Type, Serialize, Deserialize)]
pub struct CachedImageInfo {
    /// Full path of the cached file
    pub path: String,
    pub file_name: String,
    /// Feature date as YYYY-MM-DD, empty when the name carries none
    pub date: String,
}

impl From<SettingsError> for zbus::fdo::Error {
    fn from(err: SettingsError) -> Self {
        zbus::fdo::Error::InvalidArgs(err.to_string())
    }
}

/// Feature date from a cache file name (`20240601_en-US_...` → `2024-06-01`).
pub fn date_from_file_name(file_name: &str) -> String {
    file_name
        .get(..8)
        .and_then(|token| chrono::NaiveDate::parse_from_str(token, "%Y%m%d").ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Lists the cache directory, newest first.
pub fn history(directory: &Path) -> Vec<CachedImageInfo> {
    match cache::list(directory) {
        Ok(files) => files
            .into_iter()
            .map(|file| {
                let file_name = file.file_name();
                CachedImageInfo {
                    path: file.path.to_string_lossy().to_string(),
                    date: date_from_file_name(&file_name),
                    file_name,
                }
            })
            .collect(),
        Err(e) => {
            debug!(dir = %directory.display(), error = %e, "no cache directory to list");
            Vec::new()
        }
    }
}

/// The D-Bus object. All state lives behind the settings controller.
pub struct WallpaperService {
    settings: Arc<SettingsController>,
}

impl WallpaperService {
    pub fn new(settings: Arc<SettingsController>) -> Self {
        Self { settings }
    }

    fn preferences(&self) -> Preferences {
        self.settings.preferences().snapshot()
    }
}

#[interface(name = "org.bingdaily.Wallpaper1")]
impl WallpaperService {
    /// Runs a manual update and returns a one-line description of the outcome.
    async fn update_now(&self) -> zbus::fdo::Result<String> {
        let outcome = self
            .settings
            .scheduler()
            .trigger(Trigger::Manual)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(outcome.to_string())
    }

    /// Current updater state name and status text
    async fn get_status(&self) -> (String, String) {
        let status = self.settings.scheduler().orchestrator().status();
        (status.state_name().to_string(), status.display_text())
    }

    async fn get_preferences(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.preferences()).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Path of the applied wallpaper, empty if nothing has been applied yet
    async fn get_current_wallpaper(&self) -> String {
        self.preferences()
            .last_preview
            .map(|preview| preview.file_path)
            .unwrap_or_default()
    }

    async fn get_next_run(&self) -> String {
        self.settings.scheduler().next_run_string().await
    }

    async fn get_history(&self) -> Vec<CachedImageInfo> {
        history(&self.preferences().download_directory)
    }

    async fn set_resolution(&self, id: String) -> zbus::fdo::Result<()> {
        Ok(self.settings.set_resolution(&id)?)
    }

    async fn set_market(&self, code: String) -> zbus::fdo::Result<()> {
        Ok(self.settings.set_market(&code)?)
    }

    async fn set_custom_market(&self, code: String) -> zbus::fdo::Result<()> {
        Ok(self.settings.set_custom_market(&code)?)
    }

    async fn set_wallpaper_style(&self, style: String) -> zbus::fdo::Result<()> {
        let style: WallpaperStyle = style.parse().map_err(zbus::fdo::Error::InvalidArgs)?;
        self.settings.set_wallpaper_style(style);
        Ok(())
    }

    async fn set_update_interval(&self, minutes: u32) -> zbus::fdo::Result<()> {
        Ok(self.settings.set_update_interval(minutes)?)
    }

    async fn set_retention_count(&self, count: u32) {
        self.settings.set_retention_count(count);
    }

    async fn set_launch_at_login(&self, enabled: bool) -> zbus::fdo::Result<()> {
        Ok(self.settings.set_launch_at_login(enabled)?)
    }

    // === Signals ===

    /// Emitted whenever the updater status changes
    #[zbus(signal)]
    async fn status_changed(ctx: &SignalContext<'_>, state: &str, text: &str) -> zbus::Result<()>;

    /// Emitted after every persisted preference change
    #[zbus(signal)]
    async fn preferences_changed(ctx: &SignalContext<'_>, json: &str) -> zbus::Result<()>;
}

/// Claims the service name and exports the object on the session bus.
pub async fn serve(settings: Arc<SettingsController>) -> zbus::Result<Connection> {
    let connection = zbus::connection::Builder::session()?
        .name(SERVICE_NAME)?
        .serve_at(OBJECT_PATH, WallpaperService::new(settings))?
        .build()
        .await?;
    info!(name = SERVICE_NAME, path = OBJECT_PATH, "D-Bus service registered");
    Ok(connection)
}

/// Re-emits status and preference changes as D-Bus signals until either
/// channel closes.
pub async fn forward_changes(
    connection: Connection,
    mut status: watch::Receiver<UpdateStatus>,
    mut preferences: watch::Receiver<Preferences>,
) {
    let iface = match connection
        .object_server()
        .interface::<_, WallpaperService>(OBJECT_PATH)
        .await
    {
        Ok(iface) => iface,
        Err(e) => {
            debug!(error = %e, "service object not found, not forwarding signals");
            return;
        }
    };
    let ctx = iface.signal_context();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if let Err(e) = WallpaperService::status_changed(
                    ctx,
                    current.state_name(),
                    &current.display_text(),
                )
                .await
                {
                    debug!(error = %e, "failed to emit StatusChanged");
                }
            }
            changed = preferences.changed() => {
                if changed.is_err() {
                    break;
                }
                let json = serde_json::to_string(&*preferences.borrow_and_update()).unwrap_or_default();
                if let Err(e) = WallpaperService::preferences_changed(ctx, &json).await {
                    debug!(error = %e, "failed to emit PreferencesChanged");
                }
            }
        }
    }
}
