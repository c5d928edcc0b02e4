//! # Desktop Wallpaper Backends
//!
//! Applies an image file as the desktop background. The backend is chosen
//! from `XDG_CURRENT_DESKTOP`:
//!
//! - **COSMIC**: writes the RON background config and restarts `cosmic-bg`
//! - **Everything else**: the `wallpaper` crate. If it fails (unsupported
//!   desktop, Flatpak sandbox), GNOME-family sessions (GNOME, Unity, Budgie,
//!   Pantheon) fall back to `gsettings` and the rest to `feh`.
//!
//! Applying is best-effort from the updater's point of view: a failure is
//! logged but the image stays cached.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::WallpaperStyle;

/// Errors raised by a wallpaper backend.
#[derive(Debug, Error)]
pub enum WallpaperError {
    #[error("could not find home directory")]
    NoHome,

    #[error("{command} failed: {detail}")]
    Command { command: String, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sets the desktop background.
pub trait WallpaperSetter: Send + Sync {
    fn apply(&self, image_path: &Path, style: WallpaperStyle) -> Result<(), WallpaperError>;
}

/// Checks if the application is running inside a Flatpak sandbox.
///
/// Flatpak creates a `/.flatpak-info` file inside the sandbox.
pub fn is_flatpak() -> bool {
    Path::new("/.flatpak-info").exists()
}

/// Runs a command on the host system, prefixing `flatpak-spawn --host`
/// when sandboxed.
fn run_host_command(cmd: &str, args: &[&str]) -> std::io::Result<Output> {
    if is_flatpak() {
        let mut spawn_args = vec!["--host", cmd];
        spawn_args.extend(args);
        Command::new("flatpak-spawn").args(&spawn_args).output()
    } else {
        Command::new(cmd).args(args).output()
    }
}

/// Starts a command in the background on the host system (non-blocking).
///
/// A watcher thread waits on the child so it is reaped when it exits.
fn spawn_host_command(cmd: &str) -> std::io::Result<()> {
    let mut child = if is_flatpak() {
        Command::new("flatpak-spawn").args(["--host", cmd]).spawn()?
    } else {
        Command::new(cmd).spawn()?
    };
    let name = cmd.to_string();
    std::thread::spawn(move || match child.wait() {
        Ok(status) => debug!(command = %name, %status, "background command exited"),
        Err(e) => debug!(command = %name, error = %e, "could not wait on background command"),
    });
    Ok(())
}

/// Runs a host command and turns a non-zero exit into an error.
fn run_checked(cmd: &str, args: &[&str]) -> Result<(), WallpaperError> {
    let output = run_host_command(cmd, args)?;
    if output.status.success() {
        Ok(())
    } else {
        Err(WallpaperError::Command {
            command: cmd.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Desktop environments with a known way to set the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesktopBackend {
    Cosmic,
    Gnome,
    Feh,
}

impl DesktopBackend {
    /// Picks a backend for the current session.
    pub fn detect() -> Self {
        let desktop = std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default();
        Self::from_desktop(&desktop)
    }

    fn from_desktop(desktop: &str) -> Self {
        let desktop = desktop.to_ascii_uppercase();
        if desktop.contains("COSMIC") {
            DesktopBackend::Cosmic
        } else if ["GNOME", "UNITY", "BUDGIE", "PANTHEON"]
            .iter()
            .any(|name| desktop.contains(name))
        {
            DesktopBackend::Gnome
        } else {
            DesktopBackend::Feh
        }
    }
}

impl WallpaperSetter for DesktopBackend {
    fn apply(&self, image_path: &Path, style: WallpaperStyle) -> Result<(), WallpaperError> {
        debug!(backend = ?self, path = %image_path.display(), %style, "setting wallpaper");
        match self {
            DesktopBackend::Cosmic => apply_cosmic(image_path, style),
            DesktopBackend::Gnome | DesktopBackend::Feh => match apply_generic(image_path, style) {
                Ok(()) => Ok(()),
                Err(e) => {
                    warn!(error = %e, "wallpaper crate failed, falling back to desktop command");
                    self.apply_fallback(image_path, style)
                }
            },
        }
    }
}

impl DesktopBackend {
    fn apply_fallback(&self, image_path: &Path, style: WallpaperStyle) -> Result<(), WallpaperError> {
        match self {
            DesktopBackend::Gnome => apply_gnome(image_path, style),
            _ => apply_feh(image_path, style),
        }
    }
}

/// `wallpaper` crate mode for a style.
fn wallpaper_mode(style: WallpaperStyle) -> wallpaper::Mode {
    match style {
        WallpaperStyle::Fill => wallpaper::Mode::Crop,
        WallpaperStyle::Fit => wallpaper::Mode::Fit,
        WallpaperStyle::Stretch => wallpaper::Mode::Stretch,
        WallpaperStyle::Center => wallpaper::Mode::Center,
        WallpaperStyle::Tile => wallpaper::Mode::Tile,
        WallpaperStyle::Span => wallpaper::Mode::Span,
    }
}

/// Sets mode then image through the `wallpaper` crate, which knows the
/// common Linux desktops (GNOME family, KDE, XFCE, LXDE, MATE, Deepin).
fn apply_generic(image_path: &Path, style: WallpaperStyle) -> Result<(), WallpaperError> {
    let path = image_path.to_str().ok_or_else(|| WallpaperError::Command {
        command: "wallpaper".to_string(),
        detail: format!("path is not valid UTF-8: {}", image_path.display()),
    })?;
    wallpaper::set_mode(wallpaper_mode(style)).map_err(crate_error)?;
    wallpaper::set_from_path(path).map_err(crate_error)?;
    Ok(())
}

/// COSMIC scaling mode for a style. COSMIC has no tile/center/span modes,
/// so those zoom like Fill.
fn cosmic_scaling_mode(style: WallpaperStyle) -> &'static str {
    match style {
        WallpaperStyle::Fit => "Fit((0.0, 0.0, 0.0))",
        WallpaperStyle::Stretch => "Stretch",
        WallpaperStyle::Fill | WallpaperStyle::Center | WallpaperStyle::Tile | WallpaperStyle::Span => {
            "Zoom"
        }
    }
}

/// Renders the COSMIC background config (RON) for an image.
fn cosmic_config(image_path: &Path, style: WallpaperStyle) -> String {
    format!(
        r#"(
    output: "all",
    source: Path("{}"),
    filter_by_theme: false,
    rotation_frequency: 300,
    filter_method: Lanczos,
    scaling_mode: {},
    sampling_method: Alphanumeric,
)"#,
        image_path.display(),
        cosmic_scaling_mode(style)
    )
}

/// COSMIC reads `~/.config/cosmic/com.system76.CosmicBackground/v1/all` on
/// startup and has no reload call, so `cosmic-bg` is restarted.
fn apply_cosmic(image_path: &Path, style: WallpaperStyle) -> Result<(), WallpaperError> {
    // home_dir() rather than config_dir(): inside Flatpak config_dir() is
    // the sandboxed path, but COSMIC reads the real ~/.config on the host.
    let config_path: PathBuf = dirs::home_dir()
        .ok_or(WallpaperError::NoHome)?
        .join(".config/cosmic/com.system76.CosmicBackground/v1/all");

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config_path, cosmic_config(image_path, style))?;

    // SIGTERM makes COSMIC restart cosmic-bg with the new config
    let _ = run_host_command("pkill", &["-TERM", "-x", "cosmic-bg"]);
    std::thread::sleep(Duration::from_millis(1000));

    match run_host_command("pgrep", &["-x", "cosmic-bg"]) {
        Ok(output) if output.status.success() => Ok(()),
        _ => {
            // Not running, so start it ourselves
            spawn_host_command("cosmic-bg")?;
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        }
    }
}

/// `org.gnome.desktop.background picture-options` value for a style.
fn gnome_picture_option(style: WallpaperStyle) -> &'static str {
    match style {
        WallpaperStyle::Fill => "zoom",
        WallpaperStyle::Fit => "scaled",
        WallpaperStyle::Stretch => "stretched",
        WallpaperStyle::Center => "centered",
        WallpaperStyle::Tile => "wallpaper",
        WallpaperStyle::Span => "spanned",
    }
}

fn apply_gnome(image_path: &Path, style: WallpaperStyle) -> Result<(), WallpaperError> {
    let uri = url::Url::from_file_path(image_path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file://{}", image_path.display()));
    const SCHEMA: &str = "org.gnome.desktop.background";

    run_checked("gsettings", &["set", SCHEMA, "picture-options", gnome_picture_option(style)])?;
    run_checked("gsettings", &["set", SCHEMA, "picture-uri", &uri])?;
    // Older GNOME versions lack the dark key.
    let _ = run_host_command("gsettings", &["set", SCHEMA, "picture-uri-dark", &uri]);
    Ok(())
}

/// `feh` arguments (before the image path) for a style.
fn feh_args(style: WallpaperStyle) -> &'static [&'static str] {
    match style {
        WallpaperStyle::Fill => &["--bg-fill"],
        WallpaperStyle::Fit => &["--bg-max"],
        WallpaperStyle::Stretch => &["--bg-scale"],
        WallpaperStyle::Center => &["--bg-center"],
        WallpaperStyle::Tile => &["--bg-tile"],
        WallpaperStyle::Span => &["--no-xinerama", "--bg-fill"],
    }
}

fn apply_feh(image_path: &Path, style: WallpaperStyle) -> Result<(), WallpaperError> {
    let path = image_path.to_string_lossy();
    let mut args: Vec<&str> = feh_args(style).to_vec();
    args.push(&path);
    run_checked("feh", &args)
}
