//! Package directory watcher
//!
//! Polls one directory for package files and reports created, modified and
//! deleted packages to its listeners. Each tick first re-checks every
//! tracked file, then discovers new ones; all events of a tick are delivered
//! before the next tick starts.

use std::collections::HashMap;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use modhost_kernel::config::RuntimeConfig;
use modhost_kernel::{ModuleError, ModuleResult};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Watch event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    /// Package file appeared
    Created,
    /// Package file changed on disk
    Modified,
    /// Package file disappeared
    Deleted,
}

/// Watch event
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub timestamp: Instant,
}

impl WatchEvent {
    /// Create a new watch event
    pub fn new(kind: WatchEventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            timestamp: Instant::now(),
        }
    }
}

/// Outcome of a listener callback
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives watch events.
///
/// Called on the polling thread. A listener must not call back into
/// [`ChangeWatcher::poll_once`].
pub trait WatchListener: Send + Sync {
    fn on_watch_event(&self, event: &WatchEvent) -> ListenerResult;
}

/// Watch configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directory scanned for new packages
    pub directory: PathBuf,
    /// Polling interval
    pub interval: Duration,
    /// File extensions to watch
    pub extensions: Vec<String>,
    /// Ignore patterns (`*suffix`, `prefix*` or exact file names)
    pub ignore_patterns: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::from_runtime(&RuntimeConfig::default())
    }
}

impl WatchConfig {
    /// Create a config for a directory with default settings
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Take the watcher settings of a runtime configuration
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            directory: config.watch_dir.clone(),
            interval: config.poll_interval(),
            extensions: config.extensions.clone(),
            ignore_patterns: config.ignore_patterns.clone(),
        }
    }

    /// Set the polling interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Add file extension to watch
    pub fn with_extension(mut self, ext: &str) -> Self {
        self.extensions.push(ext.to_string());
        self
    }

    /// Add ignore pattern
    pub fn with_ignore(mut self, pattern: &str) -> Self {
        self.ignore_patterns.push(pattern.to_string());
        self
    }

    /// Check if a path should be watched
    pub fn should_watch(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.extensions.is_empty() && !self.extensions.iter().any(|e| e == ext) {
            return false;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        !self.ignore_patterns.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix('*') {
                file_name.ends_with(suffix)
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                file_name.starts_with(prefix)
            } else {
                file_name == pattern
            }
        })
    }
}

/// What a tick compares: modification time and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Polling change watcher
pub struct ChangeWatcher {
    config: WatchConfig,
    tracked: Mutex<HashMap<PathBuf, FileStamp>>,
    listeners: RwLock<Vec<Arc<dyn WatchListener>>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    // Held for the whole tick so ticks never interleave.
    tick: Mutex<()>,
}

impl ChangeWatcher {
    /// Create a new change watcher
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            tracked: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            shutdown_tx: Mutex::new(None),
            tick: Mutex::new(()),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Start tracking an existing file.
    ///
    /// Returns `false` if the path is not a file or already tracked.
    pub fn track<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        let Some(stamp) = FileStamp::read(path) else {
            warn!("Cannot track {:?}: not a file", path);
            return false;
        };
        let mut tracked = self.tracked.lock();
        if tracked.contains_key(path) {
            return false;
        }
        tracked.insert(path.to_path_buf(), stamp);
        true
    }

    /// Stop tracking a file
    pub fn untrack<P: AsRef<Path>>(&self, path: P) -> bool {
        self.tracked.lock().remove(path.as_ref()).is_some()
    }

    pub fn is_tracking<P: AsRef<Path>>(&self, path: P) -> bool {
        self.tracked.lock().contains_key(path.as_ref())
    }

    /// Tracked paths, sorted
    pub fn tracked(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.tracked.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Add a listener
    pub fn subscribe(&self, listener: Arc<dyn WatchListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Run one polling tick and deliver its events.
    ///
    /// Returns the delivered events.
    pub fn poll_once(&self) -> Vec<WatchEvent> {
        let _tick = self.tick.lock();
        let mut events = Vec::new();

        let snapshot: Vec<(PathBuf, FileStamp)> = self
            .tracked
            .lock()
            .iter()
            .map(|(path, stamp)| (path.clone(), *stamp))
            .collect();

        for (path, stamp) in snapshot {
            match FileStamp::read(&path) {
                None => {
                    self.tracked.lock().remove(&path);
                    events.push(WatchEvent::new(WatchEventKind::Deleted, path));
                }
                Some(current) if current != stamp => {
                    self.tracked.lock().insert(path.clone(), current);
                    events.push(WatchEvent::new(WatchEventKind::Modified, path));
                }
                Some(_) => {}
            }
        }

        let mut discovered = Vec::new();
        match fs::read_dir(&self.config.directory) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !self.config.should_watch(&path) {
                        continue;
                    }
                    let Some(stamp) = FileStamp::read(&path) else {
                        continue;
                    };
                    let mut tracked = self.tracked.lock();
                    if tracked.contains_key(&path) {
                        continue;
                    }
                    tracked.insert(path.clone(), stamp);
                    discovered.push(path);
                }
            }
            Err(e) => debug!("Cannot scan {:?}: {}", self.config.directory, e),
        }
        discovered.sort();
        events.extend(
            discovered
                .into_iter()
                .map(|path| WatchEvent::new(WatchEventKind::Created, path)),
        );

        if !events.is_empty() {
            debug!("Watch tick produced {} events", events.len());
            self.deliver(&events);
        }
        events
    }

    fn deliver(&self, events: &[WatchEvent]) {
        let listeners = self.listeners.read().clone();
        for event in events {
            for listener in &listeners {
                match catch_unwind(AssertUnwindSafe(|| listener.on_watch_event(event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("Listener failed on {:?} {:?}: {}", event.kind, event.path, e)
                    }
                    Err(_) => error!("Listener panicked on {:?} {:?}", event.kind, event.path),
                }
            }
        }
    }

    /// Spawn the polling task on the current tokio runtime
    pub fn start(self: &Arc<Self>) -> ModuleResult<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ModuleError::Watch(e.to_string()))?;

        let mut shutdown = self.shutdown_tx.lock();
        if shutdown.is_some() {
            return Err(ModuleError::Watch("watcher already running".to_string()));
        }
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *shutdown = Some(shutdown_tx);
        drop(shutdown);

        info!(
            "Watching {:?} every {:?}",
            self.config.directory, self.config.interval
        );

        let watcher = Arc::clone(self);
        let interval = self.config.interval;
        Ok(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let tick = watcher.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || tick.poll_once()).await {
                            error!("Watch tick failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Change watcher shutting down");
                        return;
                    }
                }
            }
        }))
    }

    /// Stop the polling task
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            info!("Stopping change watcher");
            let _ = tx.try_send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.lock().is_some()
    }
}
