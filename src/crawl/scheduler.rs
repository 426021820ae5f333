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

use crate::config::CrawlConfig;
use crate::crawl::{CrawlError, Fetcher, VisitSet};
use crate::engines::ProgressCounters;
use crate::robots::RobotsGate;
use crate::runtime::Shutdown;
use crate::tree::{Node, NodeId, TreeBuilder};
use crate::url::{canonicalize, canonicalize_seed, same_host};
use async_channel::TrySendError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// Receives full tree snapshots while a crawl is running and when it ends.
pub trait SnapshotSink: Send + Sync {
    fn emit(&self, snapshot: &Node);
}

/// Sink for crawls nobody watches live.
#[derive(Debug, Default)]
pub struct NullSink;

impl SnapshotSink for NullSink {
    fn emit(&self, _snapshot: &Node) {}
}

struct CrawlTask {
    node: NodeId,
    url: Url,
    depth: usize,
}

struct CrawlShared {
    config: CrawlConfig,
    seed: Url,
    fetcher: Fetcher,
    robots: RobotsGate,
    visited: Arc<VisitSet>,
    tree: TreeBuilder,
    sink: Arc<dyn SnapshotSink>,
    counters: Arc<ProgressCounters>,
    shutdown: Shutdown,
    /// Tasks enqueued or in flight. The last worker to drop it to zero
    /// closes the queue, which is the drain barrier for the whole pool.
    outstanding: AtomicUsize,
    tx: async_channel::Sender<CrawlTask>,
    rx: async_channel::Receiver<CrawlTask>,
}

/// Runs one breadth-limited crawl session and returns the final tree.
///
/// Per-page failures never escape, they become error nodes. Cancellation
/// through `shutdown` drains the pool and returns the partial tree.
pub async fn run_crawl(
    seed: &str,
    config: CrawlConfig,
    visited: Arc<VisitSet>,
    sink: Arc<dyn SnapshotSink>,
    counters: Arc<ProgressCounters>,
    shutdown: Shutdown,
) -> Result<Node, CrawlError> {
    let config = config.clamped();
    let seed_url = canonicalize_seed(seed)?;
    let fetcher = Fetcher::new(&config).map_err(CrawlError::Client)?;
    let robots = RobotsGate::new(
        fetcher.client().clone(),
        config.user_agent.as_str(),
        config.respect_robots_txt,
    );
    let tree = TreeBuilder::new(seed_url.as_str(), seed_url.as_str());
    visited.claim(seed_url.as_str());

    let (tx, rx) = async_channel::bounded(config.queue_capacity());
    let worker_count = config.max_concurrent_requests;
    let shared = Arc::new(CrawlShared {
        config,
        seed: seed_url.clone(),
        fetcher,
        robots,
        visited,
        tree,
        sink,
        counters,
        shutdown,
        outstanding: AtomicUsize::new(1),
        tx,
        rx,
    });

    shared
        .tx
        .send(CrawlTask {
            node: NodeId::ROOT,
            url: seed_url,
            depth: 0,
        })
        .await
        .ok();

    let workers: Vec<_> = (0..worker_count)
        .map(|worker| tokio::spawn(worker_loop(Arc::clone(&shared), worker)))
        .collect();
    futures::future::join_all(workers).await;

    let snapshot = shared.tree.snapshot();
    shared.sink.emit(&snapshot);
    Ok(snapshot)
}

async fn worker_loop(shared: Arc<CrawlShared>, worker: usize) {
    // Children that did not fit into the bounded queue stay in a local
    // backlog. Without it a full queue can wedge the whole pool with
    // every worker stuck in send.
    let mut backlog: VecDeque<CrawlTask> = VecDeque::new();
    loop {
        while let Some(task) = backlog.pop_front() {
            match shared.tx.try_send(task) {
                Ok(()) => {}
                Err(TrySendError::Full(task)) | Err(TrySendError::Closed(task)) => {
                    backlog.push_front(task);
                    break;
                }
            }
        }
        if shared.shutdown.is_shutdown() {
            break;
        }
        let task = match backlog.pop_front() {
            Some(task) => task,
            None => tokio::select! {
                _ = shared.shutdown.wait() => break,
                received = shared.rx.recv() => match received {
                    Ok(task) => task,
                    Err(_) => break,
                },
            },
        };
        process(&shared, &mut backlog, task).await;
        if shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            shared.rx.close();
        }
    }
    log::debug!("crawl worker {worker} drained");
}

async fn process(shared: &Arc<CrawlShared>, backlog: &mut VecDeque<CrawlTask>, task: CrawlTask) {
    let CrawlTask { node, url, depth } = task;
    shared.counters.record_depth(depth as u64);

    if !shared.robots.allowed(&url).await {
        log::debug!("robots denied {url}");
        shared
            .tree
            .mark_error(node, "robots_denied", "disallowed by the host robots.txt");
        shared.counters.record_error();
        publish_progress(shared);
        return;
    }
    if shared.shutdown.is_shutdown() {
        return;
    }

    let document = match shared.fetcher.fetch(&url).await {
        Ok(document) => document,
        Err(error) => {
            log::debug!("failed to fetch {url}: {error}");
            shared.tree.mark_error(node, error.reason(), &error.to_string());
            shared.counters.record_error();
            publish_progress(shared);
            return;
        }
    };
    shared.counters.record_page();

    if depth == 0 {
        let title = document.title.as_deref().unwrap_or(url.as_str());
        shared.tree.relabel_root(title);
    }

    if depth + 1 < shared.config.max_depth && !shared.shutdown.is_shutdown() {
        let mut accepted = 0usize;
        for href in &document.links {
            if accepted >= shared.config.max_links_per_page {
                break;
            }
            let child = match canonicalize(&url, href) {
                Ok(child) => child,
                Err(_) => continue,
            };
            if !shared.config.follow_external_links && !same_host(&shared.seed, &child) {
                continue;
            }
            accepted += 1;
            if !shared.visited.claim(child.as_str()) {
                continue;
            }
            let child_id = shared.tree.attach(node, child.as_str(), child.as_str());
            shared.counters.record_link();
            if shared.shutdown.is_shutdown() {
                continue;
            }
            shared.outstanding.fetch_add(1, Ordering::AcqRel);
            let task = CrawlTask {
                node: child_id,
                url: child,
                depth: depth + 1,
            };
            match shared.tx.try_send(task) {
                Ok(()) => {}
                Err(TrySendError::Full(task)) | Err(TrySendError::Closed(task)) => {
                    backlog.push_back(task)
                }
            }
        }
    }
    publish_progress(shared);
}

fn publish_progress(shared: &Arc<CrawlShared>) {
    if shared.config.progressive {
        shared.sink.emit(&shared.tree.snapshot());
    }
}

#[cfg(test)]
mod test {
    use super::{run_crawl, NullSink, SnapshotSink};
    use crate::config::CrawlConfig;
    use crate::crawl::{CrawlError, VisitSet};
    use crate::engines::ProgressCounters;
    use crate::runtime::Shutdown;
    use crate::tree::{Node, NodeKind};
    use std::sync::{Arc, Mutex};

    fn config(max_depth: usize, max_links_per_page: usize) -> CrawlConfig {
        CrawlConfig {
            max_depth,
            max_links_per_page,
            request_delay_ms: 0,
            respect_robots_txt: false,
            max_concurrent_requests: 2,
            progressive: false,
            ..CrawlConfig::default()
        }
    }

    async fn crawl(seed: &str, config: CrawlConfig) -> Result<Node, CrawlError> {
        run_crawl(
            seed,
            config,
            Arc::new(VisitSet::new()),
            Arc::new(NullSink),
            Arc::new(ProgressCounters::default()),
            Shutdown::new(),
        )
        .await
    }

    #[tokio::test]
    async fn seed_only_crawl_records_the_title() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><head><title>Seed Page</title></head><body><a href=\"/a\">a</a></body></html>")
            .create_async()
            .await;

        let tree = crawl(&server.url(), config(1, 5)).await.unwrap();
        assert_eq!(tree.name, "Seed Page");
        assert_eq!(tree.kind, NodeKind::Root);
        assert!(tree.children.is_empty());
        assert!(tree.description.starts_with("URL: "));
    }

    #[tokio::test]
    async fn one_level_crawl_filters_and_caps_links() {
        let mut server = mockito::Server::new_async().await;
        let _seed = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(concat!(
                "<html><head><title>Hub</title></head><body>",
                "<a href=\"/a\">a</a>",
                "<a href=\"/b\">b</a>",
                "<a href=\"mailto:x@h.test\">mail</a>",
                "<a href=\"/c.pdf\">doc</a>",
                "<a href=\"/d\">d</a>",
                "<a href=\"/e\">late</a>",
                "</body></html>"
            ))
            .create_async()
            .await;
        for path in ["/a", "/b", "/d"] {
            server
                .mock("GET", path)
                .with_status(200)
                .with_header("content-type", "text/html")
                .with_body("<html><body>leaf</body></html>")
                .create_async()
                .await;
        }

        let tree = crawl(&server.url(), config(2, 3)).await.unwrap();
        let urls: Vec<_> = tree
            .children
            .iter()
            .map(|child| child.url.rsplit('/').next().unwrap().to_string())
            .collect();
        assert_eq!(urls, vec!["a", "b", "d"]);
        assert!(tree.children.iter().all(|c| c.kind == NodeKind::Category));
    }

    #[tokio::test]
    async fn duplicate_links_attach_once() {
        let mut server = mockito::Server::new_async().await;
        let _seed = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body><a href=\"/x\">1</a><a href=\"/x\">2</a></body></html>")
            .create_async()
            .await;
        let _x = server
            .mock("GET", "/x")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>x</body></html>")
            .create_async()
            .await;

        let tree = crawl(&server.url(), config(2, 5)).await.unwrap();
        assert_eq!(tree.children.len(), 1);
        assert!(tree.children[0].url.ends_with("/x"));
    }

    #[tokio::test]
    async fn external_links_are_rejected_when_configured_off() {
        let mut server = mockito::Server::new_async().await;
        let _seed = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(
                "<html><body><a href=\"http://other.test/x\">ext</a><a href=\"/in\">in</a></body></html>",
            )
            .create_async()
            .await;
        let _inside = server
            .mock("GET", "/in")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>in</body></html>")
            .create_async()
            .await;

        let tree = crawl(&server.url(), config(2, 5)).await.unwrap();
        assert_eq!(tree.children.len(), 1);
        assert!(tree.children[0].url.ends_with("/in"));
    }

    #[tokio::test]
    async fn failed_children_become_error_nodes() {
        let mut server = mockito::Server::new_async().await;
        let _seed = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body><a href=\"/gone\">gone</a></body></html>")
            .create_async()
            .await;
        let _gone = server
            .mock("GET", "/gone")
            .with_status(404)
            .create_async()
            .await;

        let tree = crawl(&server.url(), config(2, 5)).await.unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].name, "Error: http_status");
        assert!(tree.children[0].url.ends_with("/gone"));
    }

    #[tokio::test]
    async fn robots_denial_marks_the_child() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /private\n")
            .create_async()
            .await;
        let _seed = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body><a href=\"/private\">p</a></body></html>")
            .create_async()
            .await;

        let mut config = config(2, 5);
        config.respect_robots_txt = true;
        let tree = crawl(&server.url(), config).await.unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].name, "Error: robots_denied");
    }

    #[tokio::test]
    async fn invalid_seeds_fail_before_any_fetch() {
        assert!(matches!(
            crawl("not a url", config(2, 5)).await,
            Err(CrawlError::InvalidSeed(_))
        ));
        assert!(matches!(
            crawl("ftp://h.test/", config(2, 5)).await,
            Err(CrawlError::InvalidSeed(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_crawl_returns_a_valid_partial_tree() {
        let shutdown = Shutdown::new();
        shutdown.cancel();
        let tree = run_crawl(
            "http://h.test/",
            config(3, 5),
            Arc::new(VisitSet::new()),
            Arc::new(NullSink),
            Arc::new(ProgressCounters::default()),
            shutdown,
        )
        .await
        .unwrap();
        assert_eq!(tree.kind, NodeKind::Root);
        assert_eq!(tree.url, "http://h.test/");
        assert!(tree.children.is_empty());
    }

    struct CollectingSink(Mutex<Vec<usize>>);

    impl SnapshotSink for CollectingSink {
        fn emit(&self, snapshot: &Node) {
            self.0.lock().unwrap().push(snapshot.count());
        }
    }

    #[tokio::test]
    async fn progressive_mode_emits_growing_snapshots() {
        let mut server = mockito::Server::new_async().await;
        let _seed = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body><a href=\"/a\">a</a><a href=\"/b\">b</a></body></html>")
            .create_async()
            .await;
        for path in ["/a", "/b"] {
            server
                .mock("GET", path)
                .with_status(200)
                .with_header("content-type", "text/html")
                .with_body("<html><body>leaf</body></html>")
                .create_async()
                .await;
        }

        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let mut config = config(2, 5);
        config.progressive = true;
        run_crawl(
            &server.url(),
            config,
            Arc::new(VisitSet::new()),
            Arc::clone(&sink) as Arc<dyn SnapshotSink>,
            Arc::new(ProgressCounters::default()),
            Shutdown::new(),
        )
        .await
        .unwrap();

        let sizes = sink.0.lock().unwrap();
        // seed page, two leaves and the final snapshot
        assert_eq!(sizes.len(), 4);
        assert_eq!(*sizes.last().unwrap(), 3);
        assert!(sizes.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn visit_set_is_shared_with_the_session() {
        let mut server = mockito::Server::new_async().await;
        let _seed = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body><a href=\"/a\">a</a></body></html>")
            .create_async()
            .await;
        let _a = server
            .mock("GET", "/a")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>a</body></html>")
            .create_async()
            .await;

        let visited = Arc::new(VisitSet::new());
        crawl_with_visited(&server.url(), config(2, 5), Arc::clone(&visited)).await;
        assert_eq!(visited.len(), 2);
        assert!(visited.contains(&format!("{}/a", server.url())));
    }

    async fn crawl_with_visited(seed: &str, config: CrawlConfig, visited: Arc<VisitSet>) {
        run_crawl(
            seed,
            config,
            visited,
            Arc::new(NullSink),
            Arc::new(ProgressCounters::default()),
            Shutdown::new(),
        )
        .await
        .unwrap();
    }
}
