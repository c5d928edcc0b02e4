//! # Configuration Module
//!
//! Handles user preference persistence and defines the available Bing
//! regional markets, resolutions, and wallpaper styles.
//!
//! ## Preference Storage
//! Preferences are stored as JSON in:
//! `~/.config/bing-daily-wallpaper/preferences.json`
//! (overridable with the `BING_DAILY_CONFIG` environment variable).
//!
//! Loading never fails: a missing or unreadable file yields defaults, and
//! individual missing fields fall back to their default values.
//!
//! ## Shared State
//! [`PreferencesHandle`] is the single process-wide owner of the current
//! preferences. Every mutation is persisted immediately and published to
//! subscribers (the D-Bus service forwards these snapshots to clients).

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Environment variable that overrides the preferences file location.
pub const CONFIG_PATH_ENV: &str = "BING_DAILY_CONFIG";

/// Market used when neither a listed nor a custom market is selected.
pub const DEFAULT_MARKET: &str = "en-US";

/// Update intervals (minutes) a user may choose from.
pub const ALLOWED_INTERVALS: [u32; 7] = [15, 30, 60, 120, 360, 720, 1440];

/// Suggested retention counts offered to the user.
pub const RETENTION_CHOICES: [u32; 6] = [7, 14, 30, 60, 100, 200];

const DEFAULT_INTERVAL_MINUTES: u32 = 360;
const DEFAULT_RETENTION_COUNT: u32 = 30;

/// Represents a Bing regional market.
///
/// Bing serves different "Image of the Day" content based on geographic region.
/// Each market has a unique code (e.g., "en-US") used in API requests.
#[derive(Debug, Clone, Copy)]
pub struct Market {
    /// The market code used in Bing API requests (e.g., "en-US", "de-DE")
    pub code: &'static str,
    /// Human-readable market name for display
    pub name: &'static str,
}

/// All listed Bing regional markets (sorted alphabetically by name).
pub const MARKETS: &[Market] = &[
    Market { code: "en-AU", name: "Australia" },
    Market { code: "pt-BR", name: "Brazil" },
    Market { code: "en-CA", name: "Canada" },
    Market { code: "zh-CN", name: "China" },
    Market { code: "da-DK", name: "Denmark" },
    Market { code: "fi-FI", name: "Finland" },
    Market { code: "fr-FR", name: "France" },
    Market { code: "de-DE", name: "Germany" },
    Market { code: "en-IN", name: "India" },
    Market { code: "it-IT", name: "Italy" },
    Market { code: "ja-JP", name: "Japan" },
    Market { code: "nl-NL", name: "Netherlands" },
    Market { code: "en-NZ", name: "New Zealand" },
    Market { code: "nb-NO", name: "Norway" },
    Market { code: "pl-PL", name: "Poland" },
    Market { code: "ru-RU", name: "Russia" },
    Market { code: "ko-KR", name: "South Korea" },
    Market { code: "es-ES", name: "Spain" },
    Market { code: "sv-SE", name: "Sweden" },
    Market { code: "en-GB", name: "United Kingdom" },
    Market { code: "en-US", name: "United States" },
];

/// Returns the listed market with the given code, if any.
pub fn find_market(code: &str) -> Option<&'static Market> {
    MARKETS.iter().find(|m| m.code == code)
}

/// Requested image resolution.
///
/// `id` participates in the image fingerprint, so two resolutions with the
/// same dimensions but different ids are treated as different settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub label: String,
}

impl Resolution {
    fn known(id: &str, width: u32, height: u32, label: &str) -> Self {
        Self {
            id: id.to_string(),
            width,
            height,
            label: label.to_string(),
        }
    }

    pub fn uhd_4k() -> Self {
        Self::known("4k", 3840, 2160, "4K (3840×2160)")
    }

    pub fn qhd_1440p() -> Self {
        Self::known("1440p", 2560, 1440, "1440p (2560×1440)")
    }

    pub fn full_hd() -> Self {
        Self::known("1080p", 1920, 1080, "1080p (1920×1080)")
    }

    /// All resolutions a user can pick.
    pub fn choices() -> [Self; 3] {
        [Self::uhd_4k(), Self::qhd_1440p(), Self::full_hd()]
    }

    /// Looks up a known resolution by id.
    pub fn by_id(id: &str) -> Option<Self> {
        Self::choices().into_iter().find(|r| r.id == id)
    }

    fn is_valid(&self) -> bool {
        !self.id.is_empty() && self.width > 0 && self.height > 0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::uhd_4k()
    }
}

/// Accepts any JSON value for the resolution field and falls back to the
/// default resolution when it is not a usable resolution object.
fn lenient_resolution<'de, D>(deserializer: D) -> Result<Resolution, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value::<Resolution>(value)
        .ok()
        .filter(Resolution::is_valid)
        .unwrap_or_default())
}

/// How the wallpaper image is fitted to the screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WallpaperStyle {
    #[default]
    Fill,
    Fit,
    Stretch,
    Center,
    Tile,
    Span,
}

impl WallpaperStyle {
    pub const ALL: [WallpaperStyle; 6] = [
        WallpaperStyle::Fill,
        WallpaperStyle::Fit,
        WallpaperStyle::Stretch,
        WallpaperStyle::Center,
        WallpaperStyle::Tile,
        WallpaperStyle::Span,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WallpaperStyle::Fill => "fill",
            WallpaperStyle::Fit => "fit",
            WallpaperStyle::Stretch => "stretch",
            WallpaperStyle::Center => "center",
            WallpaperStyle::Tile => "tile",
            WallpaperStyle::Span => "span",
        }
    }
}

impl fmt::Display for WallpaperStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WallpaperStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| format!("unknown wallpaper style: {s}"))
    }
}

/// Snapshot of the most recently applied image.
///
/// Used both for display and as the cache-hit check on the next update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePreview {
    pub title: String,
    pub description: String,
    pub file_name: String,
    pub file_path: String,
    /// "Learn more" page for the image, when the service gave one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// User preferences for the application.
///
/// Persisted to `~/.config/bing-daily-wallpaper/preferences.json` as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Requested image resolution (invalid objects fall back to 4K on load)
    #[serde(deserialize_with = "lenient_resolution")]
    pub resolution: Resolution,
    /// Selected listed market code; empty when a custom market is in use
    pub market: String,
    /// Free-form market code entered by the user
    pub custom_market: String,
    /// Minutes between scheduled updates
    pub update_interval_minutes: u32,
    /// Number of cached images to keep (0 = keep everything)
    pub retention_count: u32,
    /// Directory where downloaded images are cached
    pub download_directory: PathBuf,
    /// Whether the service registers itself to start at login
    pub launch_at_login: bool,
    /// How the wallpaper is fitted to the screen
    pub wallpaper_style: WallpaperStyle,
    /// Fingerprint of the image that was last downloaded and applied
    pub last_applied_image_id: Option<String>,
    /// Snapshot of the last applied image
    pub last_preview: Option<ImagePreview>,
    /// Set once the first-run welcome has been shown
    pub onboarding_complete: bool,
}

impl Default for Preferences {
    /// Creates the default preferences.
    ///
    /// - `resolution`: 4K
    /// - `market`: "en-US"
    /// - `update_interval_minutes`: 360
    /// - `retention_count`: 30
    /// - `download_directory`: `~/Pictures/BingDaily/`
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            market: DEFAULT_MARKET.to_string(),
            custom_market: String::new(),
            update_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            retention_count: DEFAULT_RETENTION_COUNT,
            download_directory: default_download_directory(),
            launch_at_login: false,
            wallpaper_style: WallpaperStyle::default(),
            last_applied_image_id: None,
            last_preview: None,
            onboarding_complete: false,
        }
    }
}

impl Preferences {
    /// Effective market code: the listed market, else the custom market,
    /// else "en-US".
    pub fn resolved_market(&self) -> &str {
        if !self.market.is_empty() {
            &self.market
        } else if !self.custom_market.is_empty() {
            &self.custom_market
        } else {
            DEFAULT_MARKET
        }
    }

    /// Repairs values that deserialized but violate invariants.
    fn normalize(mut self) -> Self {
        if self.update_interval_minutes == 0 {
            self.update_interval_minutes = DEFAULT_INTERVAL_MINUTES;
        }
        self
    }
}

fn default_download_directory() -> PathBuf {
    match dirs::picture_dir() {
        Some(pictures) => pictures.join("BingDaily"),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bing-wallpapers"),
    }
}

/// Load/save contract for the preferences record.
///
/// `load` never fails (defaults on any error) and `save` is best-effort.
pub trait PreferencesStore: Send + Sync {
    fn load(&self) -> Preferences;
    fn save(&self, preferences: &Preferences);
}

/// Stores preferences as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonPreferencesStore {
    path: PathBuf,
}

impl JsonPreferencesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `$BING_DAILY_CONFIG`, or the default per-user location.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(Self::default_path)
            .map(Self::new)
    }

    /// `~/.config/bing-daily-wallpaper/preferences.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bing-daily-wallpaper/preferences.json"))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Parses a preferences document, falling back to defaults when the
    /// document itself is not valid JSON.
    fn parse(content: &str) -> Preferences {
        serde_json::from_str::<Preferences>(content)
            .map(Preferences::normalize)
            .unwrap_or_else(|e| {
                warn!(error = %e, "preferences file is unreadable, using defaults");
                Preferences::default()
            })
    }

    fn try_save(&self, preferences: &Preferences) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {e}"))?;
        }

        let content = serde_json::to_string_pretty(preferences)
            .map_err(|e| format!("Failed to serialize preferences: {e}"))?;

        crate::cache::write_atomic(&self.path, content.as_bytes())
            .map_err(|e| format!("Failed to write preferences: {e}"))
    }
}

impl PreferencesStore for JsonPreferencesStore {
    fn load(&self) -> Preferences {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no preferences file, using defaults");
                Preferences::default()
            }
        }
    }

    fn save(&self, preferences: &Preferences) {
        if let Err(e) = self.try_save(preferences) {
            warn!(path = %self.path.display(), error = %e, "could not save preferences");
        }
    }
}

struct SharedPreferences {
    store: Arc<dyn PreferencesStore>,
    tx: watch::Sender<Preferences>,
    write_lock: Mutex<()>,
}

/// Process-wide preferences with save-after-every-mutation semantics.
#[derive(Clone)]
pub struct PreferencesHandle {
    inner: Arc<SharedPreferences>,
}

impl PreferencesHandle {
    /// Loads preferences from `store` once; later mutations write back to it.
    pub fn load(store: Arc<dyn PreferencesStore>) -> Self {
        let initial = store.load();
        let (tx, _rx) = watch::channel(initial);
        Self {
            inner: Arc::new(SharedPreferences {
                store,
                tx,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Current preferences.
    pub fn snapshot(&self) -> Preferences {
        self.inner.tx.borrow().clone()
    }

    /// Receiver that observes every persisted snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.inner.tx.subscribe()
    }

    /// Applies `f`, persists the result, then publishes it.
    ///
    /// Mutations are serialised so the file on disk always matches the
    /// latest published snapshot.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Preferences) -> R) -> R {
        let _guard = self
            .inner
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut preferences = self.snapshot();
        let result = f(&mut preferences);
        self.inner.store.save(&preferences);
        self.inner.tx.send_replace(preferences);
        result
    }
}

impl fmt::Debug for PreferencesHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferencesHandle")
            .field("preferences", &*self.inner.tx.borrow())
            .finish()
    }
}
