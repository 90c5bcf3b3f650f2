//! Watches a local calendar file for changes made by other processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error};

use crate::error::{ResourceError, ResourceResult};
use crate::event_loop::{EventSender, ResourceEvent};

/// Posts `ResourceEvent::FileChanged` when the watched file is modified,
/// created or removed.
///
/// The parent directory is watched rather than the file itself, so that
/// editors which replace the file by renaming over it are still seen.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
    paused: Arc<AtomicBool>,
}

impl FileWatcher {
    pub fn new(path: &Path, events: EventSender) -> ResourceResult<Self> {
        let dir = path
            .parent()
            .ok_or_else(|| ResourceError::InvalidSettings(format!("{} has no parent", path.display())))?
            .to_path_buf();
        let target = path.to_path_buf();
        let paused = Arc::new(AtomicBool::new(false));
        let paused_flag = paused.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {
                        if paused_flag.load(Ordering::SeqCst) {
                            return;
                        }
                        if event.paths.iter().any(|p| p == &target) {
                            events.send(ResourceEvent::FileChanged);
                        }
                    }
                    _ => {}
                },
                Err(e) => error!("File watcher error: {}", e),
            }
        })
        .map_err(|e| ResourceError::LoadFailed(format!("Cannot watch {}: {e}", dir.display())))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| ResourceError::LoadFailed(format!("Cannot watch {}: {e}", dir.display())))?;
        debug!("Started watching {}", path.display());

        Ok(FileWatcher {
            _watcher: watcher,
            path: path.to_path_buf(),
            paused,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ignore changes until `resume()`, e.g. while writing the file ourselves.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("path", &self.path)
            .field("paused", &self.paused.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoopHandle;
    use crate::settings::ResourceId;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn paused_watcher_ignores_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alarms.ics");
        std::fs::write(&path, "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n").unwrap();

        let id = ResourceId::file_resource(1);
        let (handle, mut dispatch) = EventLoopHandle::channel();
        let watcher = FileWatcher::new(&path, handle.sender(id)).unwrap();
        assert_eq!(watcher.path(), path);

        watcher.pause();
        std::fs::write(&path, "paused write").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(dispatch.try_recv().is_err());

        watcher.resume();
        std::fs::write(&path, "seen write").unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(5), dispatch.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.resource, id);
        assert!(matches!(seen.event, ResourceEvent::FileChanged));
    }
}
