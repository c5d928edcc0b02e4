//! # Launch at Login
//!
//! Registers the background service to start with the desktop session via an
//! XDG autostart entry at `~/.config/autostart/bing-daily-wallpaper.desktop`.

use std::path::PathBuf;
use tracing::info;

const DESKTOP_FILE_NAME: &str = "bing-daily-wallpaper.desktop";

/// Query/enable/disable automatic start at login.
pub trait LoginRegistrar: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool) -> std::io::Result<()>;
}

/// XDG autostart implementation of [`LoginRegistrar`].
#[derive(Debug, Clone)]
pub struct XdgAutostart {
    autostart_dir: PathBuf,
    exec: PathBuf,
}

impl XdgAutostart {
    /// Registrar for the current user and the running executable.
    pub fn for_current_user() -> std::io::Result<Self> {
        let autostart_dir = dirs::config_dir()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "Could not find config directory")
            })?
            .join("autostart");
        let exec = std::env::current_exe()?;
        Ok(Self::new(autostart_dir, exec))
    }

    pub fn new(autostart_dir: impl Into<PathBuf>, exec: impl Into<PathBuf>) -> Self {
        Self {
            autostart_dir: autostart_dir.into(),
            exec: exec.into(),
        }
    }

    fn entry_path(&self) -> PathBuf {
        self.autostart_dir.join(DESKTOP_FILE_NAME)
    }

    fn entry_content(&self) -> String {
        format!(
            r#"[Desktop Entry]
Type=Application
Name=Bing Daily Wallpaper
Comment=Apply the Bing image of the day as the desktop wallpaper
Exec="{}" --daemon
Icon=preferences-desktop-wallpaper
Terminal=false
X-GNOME-Autostart-enabled=true
"#,
            self.exec.display()
        )
    }
}

impl LoginRegistrar for XdgAutostart {
    fn is_enabled(&self) -> bool {
        self.entry_path().is_file()
    }

    fn set_enabled(&self, enabled: bool) -> std::io::Result<()> {
        let path = self.entry_path();
        if enabled {
            std::fs::create_dir_all(&self.autostart_dir)?;
            std::fs::write(&path, self.entry_content())?;
            info!(path = %path.display(), "enabled launch at login");
        } else {
            match std::fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "disabled launch at login"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
