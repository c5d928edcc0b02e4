//! In-memory collaborators shared by the unit tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::autostart::LoginRegistrar;
use crate::bing::{ImageDescriptor, ImageSource};
use crate::config::{Preferences, PreferencesHandle, PreferencesStore, Resolution, WallpaperStyle};
use crate::error::{Result, UpdateError};
use crate::notify::Notifier;
use crate::updater::UpdateOrchestrator;
use crate::wallpaper::{WallpaperError, WallpaperSetter};

/// Starts with the JPEG magic bytes.
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

pub fn descriptor(start_date: &str, url: &str, title: Option<&str>) -> ImageDescriptor {
    ImageDescriptor {
        url: url.to_string(),
        start_date: start_date.to_string(),
        title: title.map(str::to_string),
        copyright: None,
        copyright_link: None,
    }
}

/// Writes a file with the given modification time.
pub fn cached_file(dir: &Path, name: &str, modified: SystemTime) -> PathBuf {
    std::fs::create_dir_all(dir).expect("create cache dir");
    let path = dir.join(name);
    let file = std::fs::File::create(&path).expect("create cached file");
    file.set_modified(modified).expect("set mtime");
    path
}

#[derive(Default)]
pub struct MemoryStore {
    preferences: Mutex<Preferences>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn with_preferences(preferences: Preferences) -> Self {
        Self {
            preferences: Mutex::new(preferences),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Preferences {
        self.preferences.lock().expect("store lock").clone()
    }
}

impl PreferencesStore for MemoryStore {
    fn load(&self) -> Preferences {
        self.current()
    }

    fn save(&self, preferences: &Preferences) {
        *self.preferences.lock().expect("store lock") = preferences.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pauses a fetch until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct FakeSource {
    image: Mutex<Option<ImageDescriptor>>,
    fetch_error: Option<String>,
    download_error: Mutex<Option<String>>,
    gate: Option<Arc<Gate>>,
    fetches: AtomicUsize,
    downloads: AtomicUsize,
    last_request: Mutex<Option<(Resolution, String)>>,
}

impl FakeSource {
    pub fn with_image(image: ImageDescriptor) -> Self {
        Self {
            image: Mutex::new(Some(image)),
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fetch_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Gate::default()));
        self
    }

    pub fn gate(&self) -> Arc<Gate> {
        Arc::clone(self.gate.as_ref().expect("source is not gated"))
    }

    pub fn set_image(&self, image: Option<ImageDescriptor>) {
        *self.image.lock().expect("image lock") = image;
    }

    pub fn fail_downloads(&self, message: &str) {
        *self.download_error.lock().expect("error lock") = Some(message.to_string());
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<(Resolution, String)> {
        self.last_request.lock().expect("request lock").clone()
    }
}

#[async_trait]
impl ImageSource for FakeSource {
    async fn fetch_todays_image(
        &self,
        resolution: &Resolution,
        market: &str,
    ) -> Result<Option<ImageDescriptor>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().expect("request lock") =
            Some((resolution.clone(), market.to_string()));

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(message) = &self.fetch_error {
            return Err(UpdateError::Network(message.clone()));
        }
        Ok(self.image.lock().expect("image lock").clone())
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.download_error.lock().expect("error lock").clone() {
            return Err(UpdateError::Network(message));
        }
        Ok(JPEG_BYTES.to_vec())
    }
}

#[derive(Default)]
pub struct RecordingSetter {
    fail: bool,
    applied: Mutex<Vec<(PathBuf, WallpaperStyle)>>,
}

impl RecordingSetter {
    pub fn applied(&self) -> Vec<(PathBuf, WallpaperStyle)> {
        self.applied.lock().expect("setter lock").clone()
    }
}

impl WallpaperSetter for RecordingSetter {
    fn apply(&self, image_path: &Path, style: WallpaperStyle) -> std::result::Result<(), WallpaperError> {
        self.applied
            .lock()
            .expect("setter lock")
            .push((image_path.to_path_buf(), style));
        if self.fail {
            return Err(WallpaperError::Command {
                command: "feh".into(),
                detail: "cannot open display".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().expect("notifier lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, summary: &str, body: &str) {
        self.messages
            .lock()
            .expect("notifier lock")
            .push((summary.to_string(), body.to_string()));
    }
}

#[derive(Default)]
pub struct FakeRegistrar {
    enabled: AtomicBool,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeRegistrar {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LoginRegistrar for FakeRegistrar {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) -> std::io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "autostart directory is read-only",
            ));
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

/// An orchestrator wired to fakes, caching into a temporary directory.
pub struct Harness {
    pub orchestrator: Arc<UpdateOrchestrator>,
    pub source: Arc<FakeSource>,
    pub setter: Arc<RecordingSetter>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryStore>,
    pub handle: PreferencesHandle,
    dir: TempDir,
}

impl Harness {
    pub fn new(source: FakeSource) -> Self {
        Self::build(source, RecordingSetter::default())
    }

    pub fn with_failing_setter(source: FakeSource) -> Self {
        Self::build(
            source,
            RecordingSetter {
                fail: true,
                ..RecordingSetter::default()
            },
        )
    }

    fn build(source: FakeSource, setter: RecordingSetter) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let preferences = Preferences {
            download_directory: dir.path().join("BingDaily"),
            ..Preferences::default()
        };
        let store = Arc::new(MemoryStore::with_preferences(preferences));
        let handle = PreferencesHandle::load(store.clone());
        let source = Arc::new(source);
        let setter = Arc::new(setter);
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Arc::new(UpdateOrchestrator::new(
            source.clone(),
            setter.clone(),
            notifier.clone(),
            handle.clone(),
        ));
        Self {
            orchestrator,
            source,
            setter,
            notifier,
            store,
            handle,
            dir,
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.dir.path().join("BingDaily")
    }

    pub fn preferences(&self) -> Preferences {
        self.handle.snapshot()
    }

    pub fn set_preferences(&self, f: impl FnOnce(&mut Preferences)) {
        self.handle.mutate(f);
    }
}
