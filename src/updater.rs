//! # Wallpaper Updater
//!
//! Runs the fetch → download → apply → prune → persist sequence for today's
//! image. This is the only place where preferences are mutated as a result
//! of an update.
//!
//! ## Concurrency
//! [`UpdateOrchestrator::update`] is guarded by an atomic flag: a call that
//! arrives while another update is in flight returns
//! [`UpdateOutcome::Skipped`] immediately. Triggers are dropped, never queued.
//! The flag is cleared by a drop guard, so it is released on every exit path.
//!
//! ## Idempotence
//! Each image is identified by a fingerprint of its start date, the resolved
//! market, and the resolution id. When the fingerprint matches the last
//! applied one and the cached file still exists, the update stops after the
//! metadata request.
//!
//! ## Errors
//! Network, parse, and I/O errors never escape `update`. They become an
//! [`UpdateStatus::Error`], a notification, and [`UpdateOutcome::Failed`].
//! The next trigger is the retry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bing::{self, ImageDescriptor, ImageSource};
use crate::cache;
use crate::config::{ImagePreview, PreferencesHandle, WallpaperStyle};
use crate::error::{Result, UpdateError};
use crate::notify::Notifier;
use crate::wallpaper::WallpaperSetter;

/// Maximum length of the status text, in characters.
pub const STATUS_TEXT_LIMIT: usize = 63;

const APP_TITLE: &str = "Bing Daily Wallpaper";
const STATUS_PREFIX: &str = "Bing Daily";
const DEFAULT_DESCRIPTION: &str = "Bing daily image";
const DEFAULT_STATUS_TITLE: &str = "New wallpaper";

/// Why an update was requested. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Launch,
    Scheduled,
    Manual,
    Settings,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Launch => "Launch",
            Trigger::Scheduled => "Scheduled",
            Trigger::Manual => "Manual",
            Trigger::Settings => "Settings",
        };
        f.write_str(name)
    }
}

/// User-visible state of the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    Idle,
    Checking { trigger: Trigger },
    Current { title: String },
    Error { message: String },
}

impl UpdateStatus {
    /// Short machine-readable state name.
    pub fn state_name(&self) -> &'static str {
        match self {
            UpdateStatus::Idle => "idle",
            UpdateStatus::Checking { .. } => "checking",
            UpdateStatus::Current { .. } => "current",
            UpdateStatus::Error { .. } => "error",
        }
    }

    /// Status line, capped at [`STATUS_TEXT_LIMIT`] characters.
    pub fn display_text(&self) -> String {
        let text = match self {
            UpdateStatus::Idle => APP_TITLE.to_string(),
            UpdateStatus::Checking { trigger } => format!("{STATUS_PREFIX} - {trigger}: checking..."),
            UpdateStatus::Current { title } => format!("{STATUS_PREFIX} - {title}"),
            UpdateStatus::Error { .. } => format!("{STATUS_PREFIX} - Error"),
        };
        truncate_chars(text, STATUS_TEXT_LIMIT)
    }
}

fn truncate_chars(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

/// Result of one call to [`UpdateOrchestrator::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Another update was in flight; this trigger was dropped.
    Skipped,
    /// The service had no image today.
    NoImage,
    /// Same fingerprint and the cached file still exists.
    Unchanged,
    /// A new image was downloaded, cached, and handed to the setter.
    Applied { path: PathBuf },
    Failed(String),
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Skipped => write!(f, "An update is already in progress"),
            UpdateOutcome::NoImage => write!(f, "No image available today"),
            UpdateOutcome::Unchanged => write!(f, "Wallpaper is already current"),
            UpdateOutcome::Applied { path } => write!(f, "Applied: {}", path.display()),
            UpdateOutcome::Failed(message) => write!(f, "Update failed: {message}"),
        }
    }
}

/// Identifies "this image under these settings".
pub fn fingerprint(start_date: &str, market: &str, resolution_id: &str) -> String {
    format!("{start_date}{market}{resolution_id}")
}

/// Cache file name for an image: `{start_date}_{market}_{origin file name}`.
///
/// Path separators in the market are replaced so the name never points
/// into a subdirectory.
pub fn cache_file_name(image: &ImageDescriptor, market: &str) -> String {
    format!(
        "{}_{}_{}",
        image.start_date,
        market.replace(['/', '\\'], "_"),
        bing::origin_file_name(&image.url)
    )
}

/// Runs [`cache::save`] on the blocking pool.
async fn save_to_cache(directory: &Path, file_name: &str, bytes: Vec<u8>) -> Result<PathBuf> {
    let directory = directory.to_path_buf();
    let file_name = file_name.to_string();
    tokio::task::spawn_blocking(move || cache::save(&directory, &file_name, &bytes))
        .await
        .map_err(|e| UpdateError::Io(std::io::Error::other(e)))?
}

async fn prune_cache(directory: &Path, retention_count: u32) {
    let directory = directory.to_path_buf();
    if let Err(e) =
        tokio::task::spawn_blocking(move || cache::prune(&directory, retention_count)).await
    {
        warn!(error = %e, "cache prune task failed");
    }
}

/// Holds the update flag for as long as it lives.
struct UpdateGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> UpdateGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Coordinates a wallpaper update across its collaborators.
pub struct UpdateOrchestrator {
    source: Arc<dyn ImageSource>,
    setter: Arc<dyn WallpaperSetter>,
    notifier: Arc<dyn Notifier>,
    preferences: PreferencesHandle,
    status: watch::Sender<UpdateStatus>,
    updating: AtomicBool,
}

impl UpdateOrchestrator {
    pub fn new(
        source: Arc<dyn ImageSource>,
        setter: Arc<dyn WallpaperSetter>,
        notifier: Arc<dyn Notifier>,
        preferences: PreferencesHandle,
    ) -> Self {
        let (status, _rx) = watch::channel(UpdateStatus::Idle);
        Self {
            source,
            setter,
            notifier,
            preferences,
            status,
            updating: AtomicBool::new(false),
        }
    }

    /// Current status.
    pub fn status(&self) -> UpdateStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<UpdateStatus> {
        self.status.subscribe()
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    fn set_status(&self, status: UpdateStatus) {
        debug!(status = %status.display_text(), "status changed");
        self.status.send_replace(status);
    }

    /// Runs one update attempt. Never fails; see [`UpdateOutcome`].
    pub async fn update(&self, trigger: Trigger) -> UpdateOutcome {
        let Some(_guard) = UpdateGuard::acquire(&self.updating) else {
            debug!(%trigger, "update already in flight, dropping trigger");
            return UpdateOutcome::Skipped;
        };

        info!(%trigger, "checking for today's image");
        self.set_status(UpdateStatus::Checking { trigger });

        match self.run().await {
            Ok(outcome) => {
                info!(%trigger, %outcome, "update finished");
                outcome
            }
            Err(err) => {
                let message = err.to_string();
                warn!(%trigger, error = %message, "update failed");
                self.set_status(UpdateStatus::Error {
                    message: message.clone(),
                });
                self.notifier.notify("Update Failed", &message);
                UpdateOutcome::Failed(message)
            }
        }
    }

    async fn run(&self) -> Result<UpdateOutcome> {
        let prefs = self.preferences.snapshot();
        let market = prefs.resolved_market().to_string();

        let Some(image) = self
            .source
            .fetch_todays_image(&prefs.resolution, &market)
            .await?
        else {
            info!(%market, "no image available today");
            self.set_status(UpdateStatus::Idle);
            return Ok(UpdateOutcome::NoImage);
        };

        let fingerprint = fingerprint(&image.start_date, &market, &prefs.resolution.id);
        let is_new = prefs.last_applied_image_id.as_deref() != Some(fingerprint.as_str());
        let has_cached_file = prefs
            .last_preview
            .as_ref()
            .is_some_and(|preview| Path::new(&preview.file_path).exists());

        let outcome = if is_new || !has_cached_file {
            debug!(%fingerprint, is_new, has_cached_file, "downloading image");
            let bytes = self.source.download(&image.url).await?;
            let file_name = cache_file_name(&image, &market);
            let path = save_to_cache(&prefs.download_directory, &file_name, bytes).await?;

            self.apply_wallpaper(&path, prefs.wallpaper_style).await;
            prune_cache(&prefs.download_directory, prefs.retention_count).await;

            let preview = ImagePreview {
                title: image.title.clone().unwrap_or_else(|| image.start_date.clone()),
                description: image
                    .copyright
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
                file_name,
                file_path: path.to_string_lossy().to_string(),
                link: image.copyright_link.clone(),
            };
            // Fingerprint and preview always change together.
            self.preferences.mutate(|p| {
                p.last_applied_image_id = Some(fingerprint);
                p.last_preview = Some(preview);
            });

            self.notifier.notify(
                "Wallpaper Updated",
                image.title.as_deref().unwrap_or(DEFAULT_STATUS_TITLE),
            );
            UpdateOutcome::Applied { path }
        } else {
            debug!(%fingerprint, "image already applied and cached");
            UpdateOutcome::Unchanged
        };

        self.set_status(UpdateStatus::Current {
            title: image
                .title
                .unwrap_or_else(|| DEFAULT_STATUS_TITLE.to_string()),
        });
        Ok(outcome)
    }

    /// Re-applies the cached preview image with the current style.
    ///
    /// Shares the update guard, so it is skipped while an update runs.
    pub async fn reapply_current(&self) -> bool {
        let Some(_guard) = UpdateGuard::acquire(&self.updating) else {
            return false;
        };

        let prefs = self.preferences.snapshot();
        let Some(preview) = prefs.last_preview else {
            return false;
        };
        let path = PathBuf::from(&preview.file_path);
        if !path.exists() {
            debug!(path = %path.display(), "cached wallpaper is gone, nothing to re-apply");
            return false;
        }
        self.apply_wallpaper(&path, prefs.wallpaper_style).await
    }

    /// Hands the image to the setter. Failures are logged, never propagated.
    async fn apply_wallpaper(&self, path: &Path, style: WallpaperStyle) -> bool {
        let setter = Arc::clone(&self.setter);
        let target = path.to_path_buf();
        match tokio::task::spawn_blocking(move || setter.apply(&target, style)).await {
            Ok(Ok(())) => {
                info!(path = %path.display(), %style, "wallpaper applied");
                true
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "could not apply wallpaper, image stays cached");
                false
            }
            Err(e) => {
                warn!(error = %e, "wallpaper setter task failed");
                false
            }
        }
    }
}

impl fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("status", &*self.status.borrow())
            .field("updating", &self.is_updating())
            .finish_non_exhaustive()
    }
}
