//! Fixtures shared by the resource tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use crate::config::ConfigStore;
use crate::error::{ResourceError, ResourceResult};
use crate::event::{AlarmEvent, AlarmType, AlarmTypes};
use crate::event_loop::{Dispatch, EventLoopHandle};
use crate::ics::generate_calendar;
use crate::notification::{Notification, Notifier};
use crate::settings::{ResourceId, ResourceSettings, SharedSettings};
use crate::transport::Transport;

use super::{Resource, ResourceContext, SingleFileResource};

pub(crate) const SAVE_DELAY: Duration = Duration::from_secs(1);

/// Serves `http://calendars.test/<name>` from a directory.
pub(crate) struct FakeTransport {
    root: PathBuf,
    pub downloads: AtomicUsize,
    pub uploads: AtomicUsize,
    /// Refuse every upload while set.
    pub fail_uploads: AtomicBool,
}

impl FakeTransport {
    pub fn new(root: &Path) -> Self {
        std::fs::create_dir_all(root).unwrap();
        FakeTransport {
            root: root.to_path_buf(),
            downloads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            fail_uploads: AtomicBool::new(false),
        }
    }

    pub fn url(name: &str) -> String {
        format!("http://calendars.test/{name}")
    }

    pub fn served_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn path_for(&self, url: &Url) -> PathBuf {
        self.root.join(url.path().trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn download(&self, url: &Url, dest: &Path) -> ResourceResult<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let source = self.path_for(url);
        tokio::fs::copy(&source, dest)
            .await
            .map_err(|e| ResourceError::Transfer(format!("{url}: {e}")))?;
        Ok(())
    }

    async fn upload(&self, src: &Path, url: &Url) -> ResourceResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ResourceError::Transfer(format!("{url}: server refused upload")));
        }
        tokio::fs::copy(src, self.path_for(url))
            .await
            .map_err(|e| ResourceError::Transfer(format!("{url}: {e}")))?;
        Ok(())
    }
}

/// A resource context backed by temporary directories, with both channel
/// receivers kept for inspection.
pub(crate) struct Harness {
    pub dir: TempDir,
    pub store: ConfigStore,
    pub context: ResourceContext,
    pub transport: Arc<FakeTransport>,
    pub dispatch: UnboundedReceiver<Dispatch>,
    pub notifications: UnboundedReceiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new(&dir.path().join("server")));
        let (notifier, notifications) = Notifier::channel();
        let (events, dispatch) = EventLoopHandle::channel();
        let context = ResourceContext {
            notifier,
            events,
            transport: transport.clone(),
            cache_dir: dir.path().join("cache"),
            save_delay: SAVE_DELAY,
            watch_files: false,
        };
        Harness {
            store: ConfigStore::in_memory(),
            dir,
            context,
            transport,
            dispatch,
            notifications,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn settings(&self, url: &str, types: AlarmTypes) -> SharedSettings {
        let mut settings = ResourceSettings::new(
            Some(self.store.clone()),
            "Resource_0",
            ResourceId::file_resource(1),
            url,
            types,
        );
        settings.validate();
        Arc::new(RwLock::new(settings))
    }

    /// A resource for a local file in the temp dir, not yet loaded.
    pub fn local(&self, name: &str, types: AlarmTypes) -> SingleFileResource {
        let url = self.path(name).display().to_string();
        SingleFileResource::new(self.settings(&url, types), &self.context)
    }

    /// A resource for a file served by the fake transport, not yet loaded.
    pub fn remote(&self, name: &str, types: AlarmTypes) -> SingleFileResource {
        SingleFileResource::new(self.settings(&FakeTransport::url(name), types), &self.context)
    }

    /// Wait for the next posted event and hand it to `resource`.
    pub async fn deliver_next(&mut self, resource: &mut dyn Resource) {
        let dispatch = self.dispatch.recv().await.unwrap();
        assert_eq!(dispatch.resource, resource.id());
        resource.handle_event(dispatch.event);
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            notifications.push(n);
        }
        notifications
    }
}

pub(crate) fn alarm(uid: &str, category: AlarmType) -> AlarmEvent {
    AlarmEvent::new(
        category,
        &format!("Alarm {uid}"),
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    )
    .with_uid(uid)
}

pub(crate) fn write_calendar(path: &Path, events: &[AlarmEvent]) {
    std::fs::write(path, generate_calendar(events)).unwrap();
}

/// A calendar in an old but convertible format.
pub(crate) fn write_old_calendar(path: &Path, uids: &[&str]) {
    let mut ics = String::from(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//K Desktop Environment//NONSGML KAlarm//EN\r\nX-KDE-KALARM-VERSION:2.0.0\r\n",
    );
    for uid in uids {
        ics.push_str(&format!(
            "BEGIN:VEVENT\r\nUID:{uid}\r\nSUMMARY:Old {uid}\r\nDTSTART:20200101T100000Z\r\nX-KDE-KALARM-TYPE:ACTIVE\r\nEND:VEVENT\r\n"
        ));
    }
    ics.push_str("END:VCALENDAR\r\n");
    std::fs::write(path, ics).unwrap();
}
