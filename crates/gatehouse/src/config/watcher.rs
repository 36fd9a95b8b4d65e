//! Hot reload of the configuration file.
//!
//! The watch is placed on the directory holding the file rather than on the
//! file itself. Editors that save by writing a sibling and renaming it over
//! the original replace the inode, which silently ends a per-file watch.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::Config;

/// Sends every successfully parsed revision of one configuration file to the
/// receiver returned by [`ConfigWatcher::new`]. Revisions that fail to load
/// are logged and skipped, so the receiver only ever sees valid configs.
pub struct ConfigWatcher {
    file: PathBuf,
    dir: PathBuf,
    file_name: Option<OsString>,
    updates: mpsc::UnboundedSender<Config>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Config>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        (
            Self {
                file: path.to_path_buf(),
                dir,
                file_name: path.file_name().map(OsString::from),
                updates,
            },
            rx,
        )
    }

    /// Whether `event` may have changed the watched file's contents.
    fn touches_file(&self, event: &Event) -> bool {
        let changes_contents = match event.kind {
            EventKind::Create(_) => true,
            EventKind::Modify(ModifyKind::Metadata(_)) => false,
            EventKind::Modify(_) => true,
            _ => false,
        };
        changes_contents
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.file_name.as_deref())
    }

    fn reload(&self) {
        match Config::from_file(&self.file) {
            Ok(config) => {
                info!(path = ?self.file, entry = %config.entry, "Config file changed, reloading");
                let _ = self.updates.send(config);
            }
            Err(e) => {
                error!("Failed to reload config: {}. Keeping current configuration.", e);
            }
        }
    }

    /// Start watching. Events stop once the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        if !self.file.is_file() {
            return Err(notify::Error::path_not_found().add_path(self.file.clone()));
        }

        let dir = self.dir.clone();
        let file = self.file.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if self.touches_file(&event) => self.reload(),
                Ok(event) => debug!(kind = ?event.kind, "ignoring unrelated watch event"),
                Err(e) => error!("Watch error: {:?}", e),
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = ?file, dir = ?dir, "Config watcher started");
        Ok(watcher)
    }
}
