//! Storage for a resource held in one calendar file.
//!
//! Local files are read and written in place. Remote files are mirrored in a
//! private cache file: loads download into the cache before reading it, and
//! saves write the cache before uploading it. At most one download or upload
//! runs at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ResourceError, ResourceResult};
use crate::event::AlarmEvent;
use crate::event_loop::{EventSender, JobId, ResourceEvent};
use crate::format::Compatibility;
use crate::ics::{ParsedCalendar, generate_calendar, parse_calendar, read_version};
use crate::location::Location;
use crate::settings::{ResourceId, SharedSettings};
use crate::transport::Transport;
use crate::utils::{hash_bytes, hash_file};
use crate::watcher::FileWatcher;

use super::{Completion, FileResource, FileStorage, Progress, ResourceContext, ResourceCore};

/// A resource backed by a single local or remote calendar file.
pub type SingleFileResource = FileResource<SingleFile>;

#[derive(Debug)]
struct Job {
    id: JobId,
    handle: JoinHandle<()>,
}

pub struct SingleFile {
    events: EventSender,
    transport: Arc<dyn Transport>,
    cache_dir: PathBuf,
    save_delay: Duration,
    watch_files: bool,
    /// Where the next save goes; captured at load time
    save_url: Option<Location>,
    /// Hash of the file content the event cache reflects
    current_hash: Option<String>,
    /// The cache holds events parsed from `current_hash` content
    parsed: bool,
    first_load: bool,
    file_read_only: bool,
    modified: bool,
    next_job: JobId,
    download: Option<Job>,
    upload: Option<Job>,
    save_timer: Option<JoinHandle<()>>,
    save_write_through: bool,
    watcher: Option<FileWatcher>,
    write_count: u64,
}

impl SingleFileResource {
    pub fn new(settings: SharedSettings, context: &ResourceContext) -> Self {
        let id = settings.read().id();
        let storage = SingleFile {
            events: context.events.sender(id),
            transport: context.transport.clone(),
            cache_dir: context.cache_dir.clone(),
            save_delay: context.save_delay,
            watch_files: context.watch_files,
            save_url: None,
            current_hash: None,
            parsed: false,
            first_load: true,
            file_read_only: false,
            modified: false,
            next_job: 0,
            download: None,
            upload: None,
            save_timer: None,
            save_write_through: false,
            watcher: None,
            write_count: 0,
        };
        FileResource::with_storage(settings, context.notifier.clone(), storage)
    }

    /// Rewrite a convertible calendar in the current format.
    ///
    /// Refused if the resource failed to load, is read-only or disabled, or
    /// if the file is already current or not in a format we can convert.
    pub fn update_storage_format(&mut self) -> ResourceResult<()> {
        self.upgrade_format()
    }

    pub fn current_hash(&self) -> Option<&str> {
        self.storage.current_hash.as_deref()
    }

    /// Number of times the calendar has been written.
    pub fn write_count(&self) -> u64 {
        self.storage.write_count
    }

    /// Local file written by saves: the calendar itself or the remote cache.
    pub fn local_file(&self) -> Option<PathBuf> {
        match self.storage.save_url.as_ref()? {
            Location::Local(path) => Some(path.clone()),
            Location::Remote(_) => Some(self.storage.cache_path(self.core.id())),
        }
    }
}

impl SingleFile {
    fn cache_path(&self, id: ResourceId) -> PathBuf {
        self.cache_dir.join(format!("resource_{}.ics", id.0))
    }

    fn next_job_id(&mut self) -> JobId {
        self.next_job += 1;
        self.next_job
    }

    /// Create a missing local file, and find out whether we can write it.
    fn prepare_local_file(&mut self, path: &Path) -> ResourceResult<()> {
        if path.exists() {
            self.file_read_only = std::fs::metadata(path)?.permissions().readonly();
            return Ok(());
        }

        let create_failed = |reason: String| ResourceError::CreateFailed {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| create_failed(e.to_string()))?;
        }
        std::fs::File::create(path).map_err(|e| create_failed(e.to_string()))?;
        // Being allowed to create a file doesn't guarantee being able to write it.
        std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| create_failed(format!("not writable: {e}")))?;

        self.file_read_only = false;
        info!(path = %path.display(), "Created calendar file");
        Ok(())
    }

    fn start_watching(&mut self, path: &Path) {
        if !self.watch_files || self.watcher.as_ref().is_some_and(|w| w.path() == path) {
            return;
        }
        match FileWatcher::new(path, self.events.clone()) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => warn!(path = %path.display(), "Not watching calendar file: {}", e),
        }
    }

    /// Write calendar content without reacting to our own change.
    fn write_file(&self, path: &Path, content: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(watcher) = &self.watcher {
            watcher.pause();
        }
        let result = std::fs::write(path, content);
        if let Some(watcher) = &self.watcher {
            watcher.resume();
        }
        result
    }

    /// Read and parse a local file, unless its content is what we already
    /// hold.
    fn read_local_file(
        &mut self,
        core: &ResourceCore,
        path: &Path,
    ) -> ResourceResult<Option<ParsedCalendar>> {
        let content = std::fs::read(path)
            .map_err(|e| ResourceError::LoadFailed(format!("{}: {e}", path.display())))?;
        let mut hash = hash_bytes(&content);

        if self.parsed && self.current_hash.as_deref() == Some(hash.as_str()) {
            debug!(resource = %core.id(), "Calendar file unchanged");
            return Ok(None);
        }

        let parsed = String::from_utf8(content)
            .map_err(|e| ResourceError::IcsParse(e.to_string()))
            .and_then(|text| parse_calendar(&text));
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                // Never overwrite a file we couldn't understand.
                self.save_url = None;
                self.parsed = false;
                return Err(ResourceError::LoadFailed(format!("{}: {e}", path.display())));
            }
        };

        if parsed.is_new() && !self.file_read_only && !core.read_only() {
            let stamped = generate_calendar(std::iter::empty());
            self.write_file(path, stamped.as_bytes())
                .map_err(|e| ResourceError::LoadFailed(format!("{}: {e}", path.display())))?;
            hash = hash_bytes(stamped.as_bytes());
            debug!(resource = %core.id(), "Stamped new calendar file with format version");
        }

        core.persist_hash(&hash);
        self.current_hash = Some(hash);
        self.parsed = true;
        self.modified = false;
        Ok(Some(parsed))
    }

    fn start_download(&mut self, url: Url, dest: PathBuf) {
        let job = self.next_job_id();
        let transport = self.transport.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let part = dest.with_extension("ics.part");
            let result = async {
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                transport.download(&url, &part).await?;
                tokio::fs::rename(&part, &dest).await?;
                Ok::<(), ResourceError>(())
            }
            .await;

            if let Err(e) = &result {
                warn!(job, "Download failed: {}", e);
                let _ = tokio::fs::remove_file(&part).await;
            }
            events.send(ResourceEvent::DownloadFinished {
                job,
                result: result.map_err(|e| e.to_string()),
            });
        });

        debug!(job, "Started download");
        self.download = Some(Job { id: job, handle });
    }

    fn start_upload(&mut self, src: PathBuf, url: Url) {
        let job = self.next_job_id();
        let transport = self.transport.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let result = transport.upload(&src, &url).await;
            if let Err(e) = &result {
                warn!(job, "Upload failed: {}", e);
            }
            events.send(ResourceEvent::UploadFinished {
                job,
                result: result.map_err(|e| e.to_string()),
            });
        });

        debug!(job, "Started upload");
        self.upload = Some(Job { id: job, handle });
    }

    fn check_editable(&self) -> ResourceResult<()> {
        if self.download.is_some() {
            return Err(ResourceError::InProgress);
        }
        if self.save_url.is_none() {
            return Err(ResourceError::NotLoaded);
        }
        Ok(())
    }
}

impl FileStorage for SingleFile {
    fn do_load(
        &mut self,
        core: &mut ResourceCore,
        read_through: bool,
    ) -> ResourceResult<Progress<Option<ParsedCalendar>>> {
        if self.is_busy() {
            return Err(ResourceError::InProgress);
        }

        let location = core.location().ok_or(ResourceError::NotConfigured)?;
        self.save_url = Some(location.clone());

        if self.first_load {
            self.first_load = false;
            self.current_hash = core.persisted_hash();
        }

        match location {
            Location::Local(path) => {
                self.prepare_local_file(&path)?;
                self.start_watching(&path);
                self.read_local_file(core, &path).map(Progress::Done)
            }
            Location::Remote(url) => {
                let cache = self.cache_path(core.id());
                self.file_read_only = false;
                if read_through || !cache.exists() {
                    self.start_download(url, cache);
                    Ok(Progress::Started)
                } else {
                    self.read_local_file(core, &cache).map(Progress::Done)
                }
            }
        }
    }

    fn do_save(
        &mut self,
        core: &mut ResourceCore,
        write_through: bool,
        force: bool,
    ) -> ResourceResult<Progress> {
        if !self.modified && !force {
            return Ok(Progress::Done(()));
        }
        let location = self.save_url.clone().ok_or(ResourceError::NotLoaded)?;

        let (path, upload_to) = match location {
            Location::Local(path) => (path, None),
            Location::Remote(url) => {
                if self.is_busy() {
                    return Err(ResourceError::InProgress);
                }
                (self.cache_path(core.id()), write_through.then_some(url))
            }
        };

        let content = generate_calendar(core.events().values());
        self.write_file(&path, content.as_bytes())
            .map_err(|e| ResourceError::SaveFailed(format!("{}: {e}", path.display())))?;
        self.write_count += 1;

        let hash = hash_bytes(content.as_bytes());
        core.persist_hash(&hash);
        self.current_hash = Some(hash);
        self.parsed = true;
        self.modified = false;
        debug!(resource = %core.id(), path = %path.display(), "Saved calendar");

        match upload_to {
            Some(url) => {
                self.start_upload(path, url);
                Ok(Progress::Started)
            }
            None => Ok(Progress::Done(())),
        }
    }

    fn do_add_event(&mut self, _core: &mut ResourceCore, _event: &AlarmEvent) -> ResourceResult<()> {
        self.check_editable()?;
        self.modified = true;
        Ok(())
    }

    fn do_update_event(
        &mut self,
        _core: &mut ResourceCore,
        _event: &AlarmEvent,
    ) -> ResourceResult<()> {
        self.check_editable()?;
        self.modified = true;
        Ok(())
    }

    fn do_delete_event(&mut self, _core: &mut ResourceCore, _uid: &str) -> ResourceResult<()> {
        self.check_editable()?;
        self.modified = true;
        Ok(())
    }

    fn schedule_save(&mut self, write_through: bool) {
        self.save_write_through |= write_through;
        if self.save_timer.is_some() {
            return;
        }

        let events = self.events.clone();
        let delay = self.save_delay;
        self.save_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.send(ResourceEvent::SaveTimer);
        }));
    }

    fn cancel_scheduled_save(&mut self) {
        if let Some(timer) = self.save_timer.take() {
            timer.abort();
        }
        self.save_write_through = false;
    }

    fn handle_event(
        &mut self,
        core: &mut ResourceCore,
        event: ResourceEvent,
    ) -> Option<Completion> {
        match event {
            ResourceEvent::DownloadFinished { job, result } => {
                if !self.download.as_ref().is_some_and(|j| j.id == job) {
                    debug!(resource = %core.id(), job, "Ignoring stale download");
                    return None;
                }
                self.download = None;
                let loaded = match result {
                    Ok(()) => {
                        let cache = self.cache_path(core.id());
                        self.read_local_file(core, &cache)
                    }
                    Err(e) => Err(ResourceError::Transfer(e)),
                };
                Some(Completion::Loaded(loaded))
            }
            ResourceEvent::UploadFinished { job, result } => {
                if !self.upload.as_ref().is_some_and(|j| j.id == job) {
                    debug!(resource = %core.id(), job, "Ignoring stale upload");
                    return None;
                }
                self.upload = None;
                let saved = match result {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        // The remote copy is behind the cache; the next save must upload.
                        self.modified = true;
                        Err(ResourceError::Transfer(e))
                    }
                };
                Some(Completion::Saved(saved))
            }
            ResourceEvent::SaveTimer => {
                self.save_timer.take()?;
                let write_through = std::mem::take(&mut self.save_write_through);
                Some(Completion::SaveDue { write_through })
            }
            ResourceEvent::FileChanged => {
                let Some(Location::Local(path)) = self.save_url.as_ref() else {
                    return None;
                };
                let hash = hash_file(path).ok();
                if hash.is_some() && hash == self.current_hash {
                    debug!(resource = %core.id(), "Change notification with unchanged content");
                    return None;
                }
                Some(Completion::ExternallyModified)
            }
        }
    }

    fn disk_compatibility(&self, core: &ResourceCore) -> ResourceResult<Compatibility> {
        let path = match self.save_url.as_ref().ok_or(ResourceError::NotLoaded)? {
            Location::Local(path) => path.clone(),
            Location::Remote(_) => self.cache_path(core.id()),
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ResourceError::LoadFailed(format!("{}: {e}", path.display())))?;
        read_version(&content).map(|(_, compatibility)| compatibility)
    }

    fn invalidate_cache(&mut self) {
        self.current_hash = None;
        self.parsed = false;
        self.modified = false;
        self.watcher = None;
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn file_read_only(&self) -> bool {
        self.file_read_only
    }

    fn is_busy(&self) -> bool {
        self.download.is_some() || self.upload.is_some()
    }

    fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        self.cancel_scheduled_save();
        self.watcher = None;
        if let Some(download) = self.download.take() {
            // Left to finish on its own so the cache file is never half written.
            debug!(job = download.id, "Detaching download");
        }
        self.upload.take().map(|job| job.handle)
    }
}
