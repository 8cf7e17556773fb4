//! Polling inbox watcher.
//!
//! Every interval the inbox is walked recursively and each file's size and
//! modification time are compared with the previous snapshot. A changed
//! file is reported only once its fingerprint held for one full interval,
//! so a scene still being written is not picked up early.
//!
//! Files already in the inbox when watching starts form the baseline and
//! are never reported, except those modified after the watcher's cutoff.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

/// Snapshot-diffing watcher over one directory tree.
#[derive(Debug)]
pub struct InboxWatcher {
    root: PathBuf,
    interval: Duration,
    /// Files modified at or after this instant are left out of the baseline
    cutoff: Option<SystemTime>,
    /// Fingerprints already reported (or present at startup)
    reported: HashMap<PathBuf, Fingerprint>,
    /// Changed fingerprints waiting to hold still for one interval
    pending: HashMap<PathBuf, Fingerprint>,
}

impl InboxWatcher {
    pub fn new(root: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            root: root.into(),
            interval,
            cutoff: None,
            reported: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Report files written at or after `cutoff` even if they are present
    /// when the baseline is taken.
    pub fn since(mut self, cutoff: SystemTime) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    /// Record the current contents as the baseline; they produce no events.
    pub async fn prime(&mut self) -> std::io::Result<()> {
        let mut baseline = snapshot(&self.root).await?;
        if let Some(cutoff) = self.cutoff {
            baseline.retain(|_, fingerprint| match fingerprint.modified {
                Some(modified) => modified < cutoff,
                None => true,
            });
        }
        self.reported = baseline;
        self.pending.clear();
        debug!(
            root = %self.root.display(),
            files = self.reported.len(),
            "Inbox baseline recorded"
        );
        Ok(())
    }

    /// Take one snapshot and return the events it settles.
    pub async fn scan(&mut self) -> std::io::Result<Vec<WatchEvent>> {
        let current = snapshot(&self.root).await?;
        let mut events = Vec::new();

        for (path, fingerprint) in &current {
            if self.reported.get(path) == Some(fingerprint) {
                self.pending.remove(path);
                continue;
            }

            if self.pending.get(path) == Some(fingerprint) {
                self.pending.remove(path);
                let kind = if self.reported.contains_key(path) {
                    WatchEventKind::Modified
                } else {
                    WatchEventKind::Created
                };
                self.reported.insert(path.clone(), *fingerprint);
                events.push(WatchEvent {
                    path: path.clone(),
                    kind,
                });
            } else {
                self.pending.insert(path.clone(), *fingerprint);
            }
        }

        self.reported.retain(|path, _| current.contains_key(path));
        self.pending.retain(|path, _| current.contains_key(path));

        events.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(events)
    }

    /// Scan until shutdown, forwarding events to `tx`.
    pub async fn run(mut self, tx: mpsc::Sender<WatchEvent>, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.prime().await {
            warn!(root = %self.root.display(), error = %e, "Failed to read inbox baseline");
        }

        info!(
            root = %self.root.display(),
            interval_ms = self.interval.as_millis() as u64,
            "Watching inbox"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let events = match self.scan().await {
                        Ok(events) => events,
                        Err(e) => {
                            debug!(error = %e, "Inbox scan failed");
                            continue;
                        }
                    };

                    for event in events {
                        debug!(path = %event.path.display(), kind = ?event.kind, "Inbox event");
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }

        debug!("Inbox watcher stopped");
    }
}

/// Newest modification time of any file under `root`.
pub(crate) async fn newest_modification(root: &Path) -> std::io::Result<Option<SystemTime>> {
    Ok(snapshot(root)
        .await?
        .into_values()
        .filter_map(|fingerprint| fingerprint.modified)
        .max())
}

async fn snapshot(root: &Path) -> std::io::Result<HashMap<PathBuf, Fingerprint>> {
    let mut files = HashMap::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // Subdirectories may vanish between listing and reading
            Err(e) if dir != root && e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                dirs.push(entry.path());
            } else if metadata.is_file() {
                files.insert(
                    entry.path(),
                    Fingerprint {
                        len: metadata.len(),
                        modified: metadata.modified().ok(),
                    },
                );
            }
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn watcher(dir: &TempDir) -> InboxWatcher {
        InboxWatcher::new(dir.path(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_existing_files_are_baseline() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.blend"), "x").unwrap();

        let mut watcher = watcher(&dir);
        watcher.prime().await.unwrap();

        assert!(watcher.scan().await.unwrap().is_empty());
        assert!(watcher.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_file_reported_after_one_stable_interval() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher(&dir);
        watcher.prime().await.unwrap();

        let path = dir.path().join("shot.blend");
        std::fs::write(&path, "partial").unwrap();
        assert!(watcher.scan().await.unwrap().is_empty());

        let events = watcher.scan().await.unwrap();
        assert_eq!(
            events,
            vec![WatchEvent {
                path: path.clone(),
                kind: WatchEventKind::Created
            }]
        );

        assert!(watcher.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_growing_file_is_not_reported() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher(&dir);
        watcher.prime().await.unwrap();

        let path = dir.path().join("shot.blend");
        std::fs::write(&path, "a").unwrap();
        assert!(watcher.scan().await.unwrap().is_empty());
        std::fs::write(&path, "ab").unwrap();
        assert!(watcher.scan().await.unwrap().is_empty());
        std::fs::write(&path, "abc").unwrap();
        assert!(watcher.scan().await.unwrap().is_empty());

        assert_eq!(watcher.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_is_modified_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.blend");
        std::fs::write(&path, "v1").unwrap();

        let mut watcher = watcher(&dir);
        watcher.prime().await.unwrap();

        std::fs::write(&path, "version two").unwrap();
        watcher.scan().await.unwrap();
        let events = watcher.scan().await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchEventKind::Modified);
    }

    #[tokio::test]
    async fn test_nested_directories_are_watched() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher(&dir);
        watcher.prime().await.unwrap();

        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("deep.blend"), "x").unwrap();

        watcher.scan().await.unwrap();
        let events = watcher.scan().await.unwrap();
        assert_eq!(events[0].path, nested.join("deep.blend"));
    }

    #[tokio::test]
    async fn test_deleted_then_recreated_is_created_again() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.blend");
        std::fs::write(&path, "x").unwrap();

        let mut watcher = watcher(&dir);
        watcher.prime().await.unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(watcher.scan().await.unwrap().is_empty());

        std::fs::write(&path, "x").unwrap();
        watcher.scan().await.unwrap();
        let events = watcher.scan().await.unwrap();
        assert_eq!(events[0].kind, WatchEventKind::Created);
    }

    #[tokio::test]
    async fn test_files_written_after_cutoff_are_not_baseline() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old.blend");
        std::fs::write(&old, "x").unwrap();

        std::thread::sleep(Duration::from_millis(50));
        let cutoff = SystemTime::now();
        std::thread::sleep(Duration::from_millis(50));

        let fresh = dir.path().join("fresh.blend");
        std::fs::write(&fresh, "x").unwrap();

        let mut watcher = watcher(&dir).since(cutoff);
        watcher.prime().await.unwrap();

        assert!(watcher.scan().await.unwrap().is_empty());
        let events = watcher.scan().await.unwrap();
        assert_eq!(
            events,
            vec![WatchEvent {
                path: fresh,
                kind: WatchEventKind::Created
            }]
        );
    }
}
