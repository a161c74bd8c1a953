//! File System Monitoring
//!
//! [`FileMonitor`] owns the OS watch subscription and turns `notify` events
//! into [`Notification`]s on a channel. [`WatchAdapter`] drains that channel,
//! filters it through the [`IgnorePolicy`] and records what survives.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::database::{Action, DatabaseError, EventStore};
use crate::engine::ignore::{normalize, IgnorePolicy};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Watcher error: {0}")]
    WatcherError(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Normalized filesystem notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
}

impl Notification {
    /// Translate one raw `notify` event, dropping directory and access events.
    ///
    /// A lone rename half stands for a move across the watch boundary: the
    /// destination half is a creation, the source half a deletion. Halves of
    /// a move inside the tree are paired by [`RenamePairer`] first.
    pub fn from_event(event: &Event) -> Option<Self> {
        let first = event.paths.first()?.clone();
        match &event.kind {
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => None,
            EventKind::Create(_) if !first.is_dir() => Some(Notification::Created(first)),
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::Both => {
                    let to = event.paths.get(1)?.clone();
                    (!to.is_dir()).then_some(Notification::Moved { from: first, to })
                }
                RenameMode::From => Some(Notification::Deleted(first)),
                RenameMode::To => (!first.is_dir()).then_some(Notification::Created(first)),
                // Backends that cannot tell the halves apart (FSEvents).
                _ if first.is_dir() => None,
                _ if first.exists() => Some(Notification::Created(first)),
                _ => Some(Notification::Deleted(first)),
            },
            EventKind::Modify(_) if !first.is_dir() => Some(Notification::Modified(first)),
            EventKind::Remove(_) => Some(Notification::Deleted(first)),
            _ => None,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Notification::Created(_) => Action::Created,
            Notification::Modified(_) => Action::Modified,
            Notification::Deleted(_) => Action::Deleted,
            Notification::Moved { .. } => Action::Moved,
        }
    }

    /// Path the ignore policy judges: the destination for moves
    pub fn subject(&self) -> &Path {
        match self {
            Notification::Created(path)
            | Notification::Modified(path)
            | Notification::Deleted(path) => path,
            Notification::Moved { to, .. } => to,
        }
    }

    /// Path as stored in the event log; moves become `"src -> dst"`
    pub fn event_path(&self) -> String {
        match self {
            Notification::Moved { from, to } => format!(
                "{} -> {}",
                normalize(&from.to_string_lossy()),
                normalize(&to.to_string_lossy())
            ),
            other => normalize(&other.subject().to_string_lossy()),
        }
    }
}

/// How long a source rename half waits for its destination half
pub const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct PendingRename {
    from: PathBuf,
    to: Option<PathBuf>,
    tracker: Option<usize>,
}

impl PendingRename {
    fn into_notification(self) -> Option<Notification> {
        match self.to {
            Some(to) if to.is_dir() => None,
            Some(to) => Some(Notification::Moved { from: self.from, to }),
            None => Some(Notification::Deleted(self.from)),
        }
    }
}

/// Joins the `From`/`To` halves of a rename so a move inside the tree is
/// reported once.
///
/// inotify delivers `From`, `To` and then `Both` for the same cookie; other
/// backends deliver only the halves. A source half with no partner is a move
/// out of the tree and becomes a deletion on [`flush`](Self::flush).
#[derive(Debug, Default)]
pub struct RenamePairer {
    pending: Option<PendingRename>,
}

impl RenamePairer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a source half is waiting for its partner
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one raw event, returning the notifications it completes
    pub fn push(&mut self, event: &Event) -> Vec<Notification> {
        let mut out = Vec::new();
        let tracker = event.tracker();

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                out.extend(self.flush());
                if let Some(from) = event.paths.first() {
                    self.pending = Some(PendingRename {
                        from: from.clone(),
                        to: None,
                        tracker,
                    });
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let pairs = self
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.to.is_none() && p.tracker == tracker);
                if pairs {
                    if let Some(pending) = self.pending.as_mut() {
                        pending.to = event.paths.first().cloned();
                    }
                } else {
                    out.extend(self.flush());
                    out.extend(Notification::from_event(event));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if self.pending.as_ref().is_some_and(|p| p.tracker == tracker) {
                    self.pending = None;
                } else {
                    out.extend(self.flush());
                }
                out.extend(Notification::from_event(event));
            }
            _ => {
                out.extend(self.flush());
                out.extend(Notification::from_event(event));
            }
        }

        out
    }

    /// Resolve a waiting half: a completed pair is a move, a lone source a deletion
    pub fn flush(&mut self) -> Option<Notification> {
        self.pending.take().and_then(PendingRename::into_notification)
    }
}

/// Pair raw events into notifications until the watcher goes away
fn forward(raw: std::sync::mpsc::Receiver<Event>, tx: UnboundedSender<Notification>) {
    let mut pairer = RenamePairer::new();

    loop {
        let next = if pairer.is_pending() {
            match raw.recv_timeout(RENAME_PAIR_WINDOW) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(notification) = pairer.flush() {
                        if tx.send(notification).is_err() {
                            return;
                        }
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => None,
            }
        } else {
            raw.recv().ok()
        };

        let Some(event) = next else { break };
        for notification in pairer.push(&event) {
            if tx.send(notification).is_err() {
                return;
            }
        }
    }

    if let Some(notification) = pairer.flush() {
        let _ = tx.send(notification);
    }
}

/// File system monitor
pub struct FileMonitor {
    watcher: Option<RecommendedWatcher>,
    root: PathBuf,
    recursive: bool,
}

impl FileMonitor {
    /// Create a monitor for `root`, which must be an existing directory
    pub fn new(root: impl AsRef<Path>, recursive: bool) -> Result<Self, MonitorError> {
        let root = absolute(root.as_ref())?;
        if !root.is_dir() {
            return Err(MonitorError::InvalidConfiguration(format!(
                "path does not exist or is not a directory: {}",
                root.display()
            )));
        }

        Ok(Self {
            watcher: None,
            root,
            recursive,
        })
    }

    /// Subscribe to the root and return the notification stream.
    ///
    /// The stream closes once the monitor is stopped or dropped.
    pub fn start(&mut self) -> Result<UnboundedReceiver<Notification>, MonitorError> {
        let (tx, rx) = unbounded_channel();
        let (raw_tx, raw_rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name("fs-audit-renames".to_string())
            .spawn(move || forward(raw_rx, tx))
            .map_err(|e| MonitorError::WatcherError(e.to_string()))?;

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = raw_tx.send(event);
                }
                Err(e) => warn!("Watcher error: {}", e),
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| MonitorError::WatcherError(e.to_string()))?;

        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&self.root, mode)
            .map_err(|e| MonitorError::WatcherError(format!("{}: {}", self.root.display(), e)))?;

        self.watcher = Some(watcher);
        Ok(rx)
    }

    /// Release the OS subscription
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.root) {
                debug!("unwatch {} failed: {}", self.root.display(), e);
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn absolute(path: &Path) -> Result<PathBuf, MonitorError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| MonitorError::InvalidConfiguration(format!("{}: {}", path.display(), e)))
}

/// Feeds surviving notifications into the event store
pub struct WatchAdapter {
    store: Arc<EventStore>,
    policy: IgnorePolicy,
    user: String,
}

impl WatchAdapter {
    pub fn new(store: Arc<EventStore>, policy: IgnorePolicy, user: impl Into<String>) -> Self {
        Self {
            store,
            policy,
            user: user.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Record one notification.
    ///
    /// Returns `None` if the policy dropped it, otherwise the suspicious flag.
    pub fn handle(&self, notification: &Notification) -> Result<Option<bool>, DatabaseError> {
        let subject = notification.subject().to_string_lossy();
        if self.policy.should_ignore(&subject) {
            debug!("ignored {}", subject);
            return Ok(None);
        }

        let action = notification.action();
        let path = notification.event_path();
        let suspicious = self.store.record(&self.user, action, &path)?;

        if suspicious {
            warn!(user = %self.user, action = %action, file = %path, "SUSPICIOUS");
        } else {
            info!(user = %self.user, action = %action, file = %path, "file event");
        }

        Ok(Some(suspicious))
    }

    /// Drain `notifications` until the source closes or `shutdown` resolves.
    ///
    /// Returns the number of recorded events.
    pub async fn run<F>(
        &self,
        mut notifications: UnboundedReceiver<Notification>,
        shutdown: F,
    ) -> Result<usize, MonitorError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut recorded = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Monitoring stopped");
                    break;
                }
                next = notifications.recv() => {
                    let Some(notification) = next else {
                        info!("Notification source closed");
                        break;
                    };
                    match self.handle(&notification) {
                        Ok(Some(_)) => recorded += 1,
                        Ok(None) => {}
                        Err(e @ DatabaseError::StorageUnavailable { .. }) => return Err(e.into()),
                        Err(e) => error!("Failed to record {:?}: {}", notification, e),
                    }
                }
            }
        }

        Ok(recorded)
    }
}
