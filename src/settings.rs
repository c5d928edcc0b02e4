//! # Preference Actions
//!
//! The user-facing preference changes. Each action validates its input,
//! persists through the shared [`PreferencesHandle`], then kicks the
//! scheduler the way the change requires:
//!
//! | Action | Follow-up |
//! |--------|-----------|
//! | resolution, market, custom market | immediate `Settings` update |
//! | wallpaper style | re-apply cached image, then update |
//! | update interval | timer restart |
//! | retention count | none (next prune) |
//! | launch at login | none |
//!
//! Rejected actions leave preferences untouched and trigger nothing.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::autostart::LoginRegistrar;
use crate::config::{self, PreferencesHandle, Resolution, WallpaperStyle, ALLOWED_INTERVALS};
use crate::scheduler::Scheduler;
use crate::updater::Trigger;

/// Reasons a preference action was rejected.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown resolution '{0}' (expected one of: 4k, 1440p, 1080p)")]
    UnknownResolution(String),

    #[error("unknown market '{0}'")]
    UnknownMarket(String),

    #[error("custom market must not be empty")]
    EmptyMarket,

    #[error("invalid market code '{0}' (use letters, digits and '-', like de-CH)")]
    InvalidMarket(String),

    #[error("unsupported update interval {0} minutes")]
    UnsupportedInterval(u32),

    #[error("could not change launch at login: {0}")]
    LoginRegistration(#[from] std::io::Error),
}

/// Applies preference changes and their follow-up work.
pub struct SettingsController {
    preferences: PreferencesHandle,
    scheduler: Arc<Scheduler>,
    registrar: Arc<dyn LoginRegistrar>,
}

impl SettingsController {
    pub fn new(
        preferences: PreferencesHandle,
        scheduler: Arc<Scheduler>,
        registrar: Arc<dyn LoginRegistrar>,
    ) -> Self {
        Self {
            preferences,
            scheduler,
            registrar,
        }
    }

    pub fn preferences(&self) -> &PreferencesHandle {
        &self.preferences
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn set_resolution(&self, id: &str) -> Result<(), SettingsError> {
        let resolution =
            Resolution::by_id(id).ok_or_else(|| SettingsError::UnknownResolution(id.to_string()))?;
        info!(resolution = %resolution.id, "resolution changed");
        self.preferences.mutate(|p| p.resolution = resolution);
        self.scheduler.trigger(Trigger::Settings);
        Ok(())
    }

    /// Selects a listed market and clears any custom market.
    pub fn set_market(&self, code: &str) -> Result<(), SettingsError> {
        let market =
            config::find_market(code).ok_or_else(|| SettingsError::UnknownMarket(code.to_string()))?;
        info!(market = market.code, "market changed");
        self.preferences.mutate(|p| {
            p.market = market.code.to_string();
            p.custom_market.clear();
        });
        self.scheduler.trigger(Trigger::Settings);
        Ok(())
    }

    /// Switches to a free-form market code.
    pub fn set_custom_market(&self, code: &str) -> Result<(), SettingsError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(SettingsError::EmptyMarket);
        }
        // The code ends up in cache file names and request URLs.
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(SettingsError::InvalidMarket(code.to_string()));
        }
        info!(market = code, "custom market changed");
        self.preferences.mutate(|p| {
            p.market.clear();
            p.custom_market = code.to_string();
        });
        self.scheduler.trigger(Trigger::Settings);
        Ok(())
    }

    pub fn set_wallpaper_style(&self, style: WallpaperStyle) {
        info!(%style, "wallpaper style changed");
        self.preferences.mutate(|p| p.wallpaper_style = style);
        self.scheduler.trigger_restyle();
    }

    pub fn set_update_interval(&self, minutes: u32) -> Result<(), SettingsError> {
        if !ALLOWED_INTERVALS.contains(&minutes) {
            return Err(SettingsError::UnsupportedInterval(minutes));
        }
        info!(minutes, "update interval changed");
        self.preferences.mutate(|p| p.update_interval_minutes = minutes);
        self.scheduler.restart(minutes);
        Ok(())
    }

    /// Takes effect at the next prune.
    pub fn set_retention_count(&self, count: u32) {
        info!(count, "retention count changed");
        self.preferences.mutate(|p| p.retention_count = count);
    }

    /// Registers or unregisters first; preferences change only on success.
    pub fn set_launch_at_login(&self, enabled: bool) -> Result<(), SettingsError> {
        self.registrar.set_enabled(enabled)?;
        self.preferences.mutate(|p| p.launch_at_login = enabled);
        Ok(())
    }
}
