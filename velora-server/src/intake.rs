//! Image intake feed
//!
//! The file-delivery side (an FTP server, a mounted share, a sync agent)
//! is an external collaborator; this module owns only the boundary: an
//! [`ImageNotification`] channel that anything can feed, and the
//! normalization of each notification into an [`ImageEvent`] for the
//! correlation task.
//!
//! A small drop-folder poller is included for standalone deployments
//! where images land in a local directory. It is one producer among any;
//! the channel remains the interface.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_graceful_shutdown::SubsystemHandle;

use velora_core::ImageEvent;

use crate::error::ServerError;
use crate::ingest::IngestMsg;

/// File extensions the drop-folder poller treats as evidence images
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// "A new image file became available at this path"
#[derive(Debug, Clone)]
pub struct ImageNotification {
    pub path: PathBuf,
    /// Capture time as known by the producer; when absent the intake
    /// falls back to file metadata, then to arrival time
    pub captured_at: Option<DateTime<Utc>>,
}

/// Turns file-arrival notifications into normalized image events
pub struct ImageIntake {
    rx: mpsc::Receiver<ImageNotification>,
    ingest_tx: mpsc::Sender<IngestMsg>,
    alive: Arc<AtomicBool>,
}

impl ImageIntake {
    pub fn new(
        rx: mpsc::Receiver<ImageNotification>,
        ingest_tx: mpsc::Sender<IngestMsg>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        ImageIntake {
            rx,
            ingest_tx,
            alive,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        self.alive.store(true, Ordering::Relaxed);
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => break,
                n = self.rx.recv() => match n {
                    Some(notification) => self.handle(notification).await?,
                    None => break,
                },
            }
        }
        self.alive.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn handle(&self, notification: ImageNotification) -> Result<(), ServerError> {
        let fallback = notification
            .captured_at
            .or_else(|| file_mtime(&notification.path))
            .unwrap_or_else(Utc::now);
        let event = ImageEvent::from_notification(notification.path, fallback);
        trace!("image {} captured at {}", event.filename, event.captured_at);

        if self.ingest_tx.send(IngestMsg::Image(event)).await.is_err() {
            return Err(ServerError::Shutdown);
        }
        Ok(())
    }
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Polls a local directory for newly arrived image files
pub struct DropFolderWatcher {
    dir: PathBuf,
    poll_interval: Duration,
    notify_tx: mpsc::Sender<ImageNotification>,
    seen: HashSet<PathBuf>,
}

impl DropFolderWatcher {
    pub fn new(
        dir: PathBuf,
        poll_interval: Duration,
        notify_tx: mpsc::Sender<ImageNotification>,
    ) -> Self {
        DropFolderWatcher {
            dir,
            poll_interval,
            notify_tx,
            seen: HashSet::new(),
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        let mut ticker = interval(self.poll_interval);
        // Prime with the existing directory contents so old files are
        // not re-announced on every restart
        self.scan(true).await;
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => return Ok(()),
                _ = ticker.tick() => self.scan(false).await,
            }
        }
    }

    async fn scan(&mut self, prime_only: bool) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read drop folder {}: {}", self.dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !is_image(&path) || self.seen.contains(&path) {
                continue;
            }
            self.seen.insert(path.clone());
            if prime_only {
                continue;
            }
            debug!("new image in drop folder: {}", path.display());
            let notification = ImageNotification {
                captured_at: file_mtime(&path),
                path,
            };
            if self.notify_tx.send(notification).await.is_err() {
                return;
            }
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
