//! Shared fixture: a temp directory served by a spawned service, with a
//! recording dispatch standing in for the framework.

#![allow(dead_code)]

use std::path::PathBuf;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use fsorigin::headers::Headers;
use fsorigin::service::messages::{Request, Response, ServiceSender};
use fsorigin::{Config, Dispatch, SendMode, Service};

pub const PREFIX: &str = "/files/";

/// One observed framework interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Subscribe(String),
    Unsubscribe(String),
    Send { mode: SendMode, name: String, body: Vec<u8> },
}

pub struct RecordingDispatch {
    events: mpsc::UnboundedSender<DispatchEvent>,
}

impl RecordingDispatch {
    pub fn new(events: mpsc::UnboundedSender<DispatchEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Dispatch for RecordingDispatch {
    async fn subscribe(&mut self, suffix: &str) {
        let _ = self.events.send(DispatchEvent::Subscribe(suffix.to_owned()));
    }

    async fn unsubscribe(&mut self, suffix: &str) {
        let _ = self.events.send(DispatchEvent::Unsubscribe(suffix.to_owned()));
    }

    async fn send_async(
        &mut self,
        mode: SendMode,
        name: &str,
        body: &[u8],
        _timeout_ms: u32,
        _priority: i8,
    ) {
        let _ = self.events.send(DispatchEvent::Send {
            mode,
            name: name.to_owned(),
            body: body.to_vec(),
        });
    }
}

pub struct Fixture {
    pub tempdir: TempDir,
    pub handle: ServiceSender,
    pub events: mpsc::UnboundedReceiver<DispatchEvent>,
}

impl Fixture {
    /// Seeds `files` into a temp directory and starts the service over it.
    pub async fn start(files: &[(&str, &[u8])], adjust: impl FnOnce(&mut Config)) -> Self {
        let tempdir = TempDir::new().expect("create temp dir");
        for (name, contents) in files {
            let path = tempdir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create fixture dirs");
            }
            std::fs::write(path, contents).expect("write fixture file");
        }

        let mut config = Config::for_directory(tempdir.path());
        adjust(&mut config);

        let (events_tx, events) = mpsc::unbounded_channel();
        let service = Service::init(config, PREFIX, 0, Box::new(RecordingDispatch::new(events_tx)))
            .await
            .expect("service initializes");
        let handle = service.handle();
        let _ = service.spawn();

        Self { tempdir, handle, events }
    }

    /// Attempts initialization only, for fatal-init assertions.
    pub async fn try_init(
        files: &[(&str, &[u8])],
        adjust: impl FnOnce(&mut Config),
    ) -> (TempDir, Result<Service, fsorigin::InitError>) {
        let tempdir = TempDir::new().expect("create temp dir");
        for (name, contents) in files {
            let path = tempdir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create fixture dirs");
            }
            std::fs::write(path, contents).expect("write fixture file");
        }
        let mut config = Config::for_directory(tempdir.path());
        adjust(&mut config);
        let (events_tx, _events) = mpsc::unbounded_channel();
        let result =
            Service::init(config, PREFIX, 0, Box::new(RecordingDispatch::new(events_tx)))
                .await;
        (tempdir, result)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.tempdir.path().join(name)
    }

    pub fn write_file(&self, name: &str, contents: &[u8]) {
        std::fs::write(self.path(name), contents).expect("write file");
    }

    pub fn remove_file(&self, name: &str) {
        std::fs::remove_file(self.path(name)).expect("remove file");
    }

    pub fn read_file(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.path(name)).expect("read file")
    }

    /// Sends a request with extra header pairs and a body.
    pub async fn request(
        &self,
        endpoint: &str,
        pairs: &[(&str, &[u8])],
        body: &[u8],
    ) -> Response {
        let mut info = Headers::new();
        for (key, value) in pairs {
            info.push(key, value.to_vec());
        }
        let request = Request {
            name: format!("{}{}", PREFIX, endpoint),
            info,
            body: body.to_vec(),
            timeout_ms: 5000,
            priority: 0,
        };
        self.handle
            .request(request)
            .await
            .expect("service replies")
    }

    pub async fn get(&self, endpoint: &str) -> Response {
        self.request(endpoint, &[], b"").await
    }

    /// Forces a refresh and waits until the actor has processed it.
    pub async fn refresh_and_wait(&self) {
        self.handle.refresh();
        // The mailbox is FIFO, so a reply to any request implies the
        // refresh before it completed.
        let _ = self.get("__refresh_barrier__").await;
    }

    pub fn drain_events(&mut self) -> Vec<DispatchEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// The notification sends among `events`.
pub fn sends(events: &[DispatchEvent]) -> Vec<&DispatchEvent> {
    events
        .iter()
        .filter(|e| matches!(e, DispatchEvent::Send { .. }))
        .collect()
}
