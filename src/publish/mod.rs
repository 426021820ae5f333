// Copyright 2024 Felix Engl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::PathsConfig;
use crate::crawl::SnapshotSink;
use crate::runtime::Shutdown;
use crate::tree::Node;
use camino::{Utf8Path, Utf8PathBuf};
use notify::{RecursiveMode, Watcher};
use serde::Serialize;
use std::fs;
use std::hash::Hasher;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use twox_hash::XxHash64;

/// The mirror loop rechecks at least this often even without events.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(1000);
/// Events are coalesced for this long before the mirror is rewritten.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("unable to serialize the tree: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unable to write {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What [Publisher::sync_status] and the sync endpoints report.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub primary_exists: bool,
    pub mirror_exists: bool,
    pub hashes_equal: bool,
}

/// Writes the canonical document and keeps the visualizer's mirror a
/// byte-identical copy of it. All filesystem writes go through one lock.
#[derive(Debug)]
pub struct Publisher {
    primary: Utf8PathBuf,
    mirror: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl Publisher {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            primary: paths.primary.clone(),
            mirror: paths.mirror.clone(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn primary(&self) -> &Utf8Path {
        &self.primary
    }

    pub fn mirror(&self) -> &Utf8Path {
        &self.mirror
    }

    /// Serializes `tree` and replaces first the primary, then the mirror.
    /// Each replacement is temp-file-then-rename, a reader polling either
    /// path never observes a torn document.
    pub fn publish(&self, tree: &Node) -> Result<(), PublishError> {
        let bytes = canonical_bytes(tree)?;
        let _guard = self.lock();
        write_atomic_with_retry(&self.primary, &bytes)?;
        write_atomic_with_retry(&self.mirror, &bytes)?;
        Ok(())
    }

    /// Truncates both documents to the empty root, the visualizer clears
    /// on its next poll.
    pub fn reset(&self) -> Result<(), PublishError> {
        self.publish(&Node::empty_root())
    }

    /// Compares both documents without writing anything.
    pub fn sync_status(&self) -> SyncReport {
        let primary = hash_file(&self.primary);
        let mirror = hash_file(&self.mirror);
        SyncReport {
            primary_exists: primary.is_some(),
            mirror_exists: mirror.is_some(),
            hashes_equal: match (primary, mirror) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// One forced mirror pass. Copies the primary over the mirror when the
    /// contents differ and reports the state afterwards.
    pub fn sync_now(&self) -> Result<SyncReport, PublishError> {
        let _guard = self.lock();
        let primary = hash_file(&self.primary);
        let mirror = hash_file(&self.mirror);
        if let Some(primary_hash) = primary {
            if mirror != Some(primary_hash) {
                let bytes = fs::read(&self.primary).map_err(|source| PublishError::Write {
                    path: self.primary.clone(),
                    source,
                })?;
                write_atomic_with_retry(&self.mirror, &bytes)?;
            }
        }
        drop(_guard);
        Ok(self.sync_status())
    }

    /// Re-mirrors whenever the primary changes on disk, driven by
    /// filesystem notifications with a slow poll as the safety net.
    /// Never writes the primary.
    pub async fn watch(&self, shutdown: Shutdown) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);
        let watcher = notify::recommended_watcher(move |event: Result<notify::Event, notify::Error>| {
            if event.is_ok() {
                let _ = tx.blocking_send(());
            }
        });
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(error) => {
                log::warn!("filesystem watcher unavailable, polling only: {error}");
                self.poll_only(shutdown).await;
                return;
            }
        };
        let watch_target = self
            .primary
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| self.primary.clone());
        if let Err(error) = watcher.watch(watch_target.as_std_path(), RecursiveMode::NonRecursive) {
            log::warn!("unable to watch {watch_target}, polling only: {error}");
            self.poll_only(shutdown).await;
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                received = rx.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tokio::time::sleep(WATCH_DEBOUNCE).await;
                    while rx.try_recv().is_ok() {}
                    self.mirror_if_stale();
                }
                _ = tokio::time::sleep(WATCH_POLL_INTERVAL) => {
                    self.mirror_if_stale();
                }
            }
        }
    }

    async fn poll_only(&self, shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(WATCH_POLL_INTERVAL) => self.mirror_if_stale(),
            }
        }
    }

    fn mirror_if_stale(&self) {
        let report = self.sync_status();
        if report.primary_exists && !report.hashes_equal {
            if let Err(error) = self.sync_now() {
                log::warn!("mirror pass failed: {error}");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SnapshotSink for Publisher {
    fn emit(&self, snapshot: &Node) {
        if let Err(error) = self.publish(snapshot) {
            log::warn!("dropping a snapshot, publish failed: {error}");
        }
    }
}

/// The canonical byte form: compact UTF-8 JSON with the fixed key order
/// and a trailing newline.
pub fn canonical_bytes(tree: &Node) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(tree)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_atomic_with_retry(path: &Utf8Path, bytes: &[u8]) -> Result<(), PublishError> {
    match write_atomic(path, bytes) {
        Ok(()) => Ok(()),
        Err(first) => {
            log::warn!("atomic write of {path} failed, retrying once: {first}");
            write_atomic(path, bytes).map_err(|source| PublishError::Write {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

fn write_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let dir = path.parent().unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(dir)?;
    let mut temp = NamedTempFile::new_in(dir.as_std_path())?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path.as_std_path()).map_err(|error| error.error)?;
    Ok(())
}

fn hash_file(path: &Utf8Path) -> Option<u64> {
    let bytes = fs::read(path).ok()?;
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&bytes);
    Some(hasher.finish())
}

#[cfg(test)]
mod test {
    use super::{canonical_bytes, Publisher};
    use crate::config::PathsConfig;
    use crate::runtime::Shutdown;
    use crate::tree::{Node, NodeKind};
    use camino::Utf8PathBuf;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    fn paths_in(dir: &tempfile::TempDir) -> PathsConfig {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        PathsConfig {
            primary: root.join("data/tree.json"),
            mirror: root.join("viz/tree.json"),
            root,
        }
    }

    fn sample_tree() -> Node {
        let mut root = Node::new("Seed", NodeKind::Root, "http://h.test/");
        root.children
            .push(Node::new("A", NodeKind::Category, "http://h.test/a"));
        root
    }

    #[test]
    fn publish_writes_identical_primary_and_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(&paths_in(&dir));
        publisher.publish(&sample_tree()).unwrap();

        let primary = fs::read(publisher.primary().as_std_path()).unwrap();
        let mirror = fs::read(publisher.mirror().as_std_path()).unwrap();
        assert_eq!(primary, mirror);
        assert_eq!(primary.last(), Some(&b'\n'));

        let report = publisher.sync_status();
        assert!(report.primary_exists && report.mirror_exists && report.hashes_equal);
    }

    #[test]
    fn publish_readback_publish_is_byte_stable() {
        let tree = sample_tree();
        let bytes = canonical_bytes(&tree).unwrap();
        let read_back: Node = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(canonical_bytes(&read_back).unwrap(), bytes);
    }

    #[test]
    fn reset_truncates_to_the_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(&paths_in(&dir));
        publisher.publish(&sample_tree()).unwrap();
        publisher.reset().unwrap();

        let document: Node =
            serde_json::from_slice(&fs::read(publisher.primary().as_std_path()).unwrap()).unwrap();
        assert_eq!(document, Node::empty_root());
        assert!(document.children.is_empty());
    }

    #[test]
    fn sync_now_repairs_a_diverged_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(&paths_in(&dir));
        publisher.publish(&sample_tree()).unwrap();
        fs::write(publisher.mirror().as_std_path(), b"tampered").unwrap();
        assert!(!publisher.sync_status().hashes_equal);

        let report = publisher.sync_now().unwrap();
        assert!(report.hashes_equal);
        assert_eq!(
            fs::read(publisher.primary().as_std_path()).unwrap(),
            fs::read(publisher.mirror().as_std_path()).unwrap()
        );
    }

    #[test]
    fn sync_status_reports_missing_documents() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(&paths_in(&dir));
        let report = publisher.sync_status();
        assert!(!report.primary_exists);
        assert!(!report.mirror_exists);
        assert!(!report.hashes_equal);
    }

    #[tokio::test]
    async fn watch_re_mirrors_an_external_primary_change() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Arc::new(Publisher::new(&paths_in(&dir)));
        publisher.publish(&sample_tree()).unwrap();

        let shutdown = Shutdown::new();
        let watcher = {
            let publisher = Arc::clone(&publisher);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { publisher.watch(shutdown).await })
        };

        // an external writer replaces the primary behind the publisher's back
        let altered = canonical_bytes(&Node::empty_root()).unwrap();
        fs::write(publisher.primary().as_std_path(), &altered).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if publisher.sync_status().hashes_equal
                && fs::read(publisher.mirror().as_std_path()).unwrap() == altered
            {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "mirror never caught up");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        shutdown.cancel();
        watcher.await.unwrap();
    }
}
