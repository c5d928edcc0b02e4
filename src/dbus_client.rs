//! # D-Bus Client Module
//!
//! Client side of the wallpaper service, used by the command line to talk to
//! a running background service.
//!
//! ```ignore
//! let client = WallpaperClient::connect().await?;
//! println!("{}", client.update_now().await?);
//! ```

use zbus::{proxy, Connection};

use crate::service::CachedImageInfo;

/// D-Bus proxy for the wallpaper service
#[proxy(
    interface = "org.bingdaily.Wallpaper1",
    default_service = "org.bingdaily.Wallpaper1",
    default_path = "/org/bingdaily/Wallpaper1",
    gen_blocking = false
)]
trait WallpaperService {
    async fn update_now(&self) -> zbus::Result<String>;

    async fn get_status(&self) -> zbus::Result<(String, String)>;

    async fn get_current_wallpaper(&self) -> zbus::Result<String>;

    async fn get_next_run(&self) -> zbus::Result<String>;

    async fn get_history(&self) -> zbus::Result<Vec<CachedImageInfo>>;

    async fn set_resolution(&self, id: &str) -> zbus::Result<()>;

    async fn set_market(&self, code: &str) -> zbus::Result<()>;

    async fn set_custom_market(&self, code: &str) -> zbus::Result<()>;

    async fn set_wallpaper_style(&self, style: &str) -> zbus::Result<()>;

    async fn set_update_interval(&self, minutes: u32) -> zbus::Result<()>;

    async fn set_retention_count(&self, count: u32) -> zbus::Result<()>;

    async fn set_launch_at_login(&self, enabled: bool) -> zbus::Result<()>;
}

/// Status of a running service, as printed by `--status`.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub state: String,
    pub text: String,
    pub current_wallpaper: String,
    pub next_run: String,
}

/// High-level client for a running background service
pub struct WallpaperClient {
    proxy: WallpaperServiceProxy<'static>,
}

impl WallpaperClient {
    /// Connect to the wallpaper service
    ///
    /// Fails if no service owns the name on the session bus.
    pub async fn connect() -> zbus::Result<Self> {
        let connection = Connection::session().await?;
        let proxy = WallpaperServiceProxy::new(&connection).await?;
        // Proxies are created lazily, so check the service answers.
        proxy.get_status().await?;
        Ok(Self { proxy })
    }

    pub async fn update_now(&self) -> zbus::Result<String> {
        self.proxy.update_now().await
    }

    pub async fn status(&self) -> zbus::Result<ServiceStatus> {
        let (state, text) = self.proxy.get_status().await?;
        Ok(ServiceStatus {
            state,
            text,
            current_wallpaper: self.proxy.get_current_wallpaper().await?,
            next_run: self.proxy.get_next_run().await?,
        })
    }

    pub async fn history(&self) -> zbus::Result<Vec<CachedImageInfo>> {
        self.proxy.get_history().await
    }

    /// Applies a `--set <key> <value>` pair.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let result = match key {
            "resolution" => self.proxy.set_resolution(value).await,
            "market" => self.proxy.set_market(value).await,
            "custom-market" => self.proxy.set_custom_market(value).await,
            "style" => self.proxy.set_wallpaper_style(value).await,
            "interval" => {
                let minutes = parse_number(key, value)?;
                self.proxy.set_update_interval(minutes).await
            }
            "retention" => {
                let count = parse_number(key, value)?;
                self.proxy.set_retention_count(count).await
            }
            "launch-at-login" => {
                let enabled = parse_flag(value)?;
                self.proxy.set_launch_at_login(enabled).await
            }
            other => return Err(format!("Unknown setting '{other}'")),
        };
        result.map_err(|e| e.to_string())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("{key} expects a whole number, got '{value}'"))
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(format!("launch-at-login expects on or off, got '{value}'")),
    }
}
