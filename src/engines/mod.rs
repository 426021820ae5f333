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

mod external;
mod progress;

pub use external::*;
pub use progress::*;

use crate::adapters::{adapt_osint_json, adapt_recursive_json, adapt_search_csv, AdapterError};
use crate::config::Configs;
use crate::crawl::{run_crawl, CrawlError, SnapshotSink, VisitSet};
use crate::publish::{PublishError, Publisher};
use crate::runtime::Shutdown;
use crate::url::canonicalize_seed;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// The four engine seats. At most one of them is ever active.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EngineSlot {
    Http,
    Toc,
    Onionsearch,
    Torbot,
}

/// Lifecycle of one engine slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SlotStatus {
    Idle,
    Running,
    Stopping,
    Error,
}

/// What the control plane sees of one slot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotState {
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SlotState {
    fn idle() -> Self {
        Self {
            status: SlotStatus::Idle,
            started_at: None,
            last_error: None,
        }
    }
}

/// The whole supervisor picture, returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<EngineSlot>,
    pub engines: HashMap<EngineSlot, SlotState>,
    pub counters: ProgressSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Why an engine could not start, finish, or stop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("busy")]
    Busy,
    #[error("engine {0} is not running")]
    NotRunning(EngineSlot),
    #[error("{0}")]
    Validation(String),
    #[error("the SOCKS endpoint {0}:{1} is unreachable")]
    SocksUnreachable(String, u16),
    #[error("the engine exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("the engine exited with {0}")]
    NonZeroExit(std::process::ExitStatus),
    #[error("unable to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("engine io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Crawl(#[from] CrawlError),
}

/// Start parameters of the built-in breadth-limited crawler.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpCrawlRequest {
    pub url: String,
    pub max_depth: Option<usize>,
    pub max_links_per_page: Option<usize>,
    pub progressive: Option<bool>,
}

/// Start parameters of the hidden-service tree crawler.
#[derive(Debug, Clone, Deserialize)]
pub struct TocRequest {
    pub url: String,
    pub socks_host: Option<String>,
    pub socks_port: Option<u16>,
}

/// Start parameters of the onion search engine.
#[derive(Debug, Clone, Deserialize)]
pub struct OnionSearchRequest {
    pub query: String,
    pub engines: Option<Vec<String>>,
    pub limit: Option<u32>,
}

/// Start parameters of the OSINT scanner.
#[derive(Debug, Clone, Deserialize)]
pub struct TorbotRequest {
    pub url: String,
    pub depth: Option<u32>,
    pub socks_host: Option<String>,
    pub socks_port: Option<u16>,
    pub disable_socks5: Option<bool>,
    pub info_mode: Option<bool>,
    pub output_format: Option<String>,
}

struct RunningEngine {
    slot: EngineSlot,
    shutdown: Shutdown,
    handle: Option<JoinHandle<()>>,
}

struct SupervisorInner {
    slots: HashMap<EngineSlot, SlotState>,
    running: Option<RunningEngine>,
    last_error: Option<String>,
}

/// Owns the engine registry of the process: guarantees at most one run
/// across all four slots, performs the session reset on every start, and
/// serializes state transitions.
pub struct Supervisor {
    configs: Configs,
    publisher: Arc<Publisher>,
    visited: Arc<VisitSet>,
    counters: Arc<ProgressCounters>,
    shutdown: Shutdown,
    inner: Mutex<SupervisorInner>,
}

impl Supervisor {
    /// `shutdown` is the server-level signal, every engine run gets a
    /// child of it so server teardown cancels whatever is active.
    pub fn new(configs: Configs, publisher: Arc<Publisher>, shutdown: Shutdown) -> Arc<Self> {
        Arc::new(Self {
            configs,
            publisher,
            visited: Arc::new(VisitSet::new()),
            counters: Arc::new(ProgressCounters::default()),
            shutdown,
            inner: Mutex::new(SupervisorInner {
                slots: EngineSlot::iter().map(|slot| (slot, SlotState::idle())).collect(),
                running: None,
                last_error: None,
            }),
        })
    }

    pub fn counters(&self) -> &Arc<ProgressCounters> {
        &self.counters
    }

    pub fn start_http(self: &Arc<Self>, request: HttpCrawlRequest) -> Result<(), EngineError> {
        validate_url(&request.url)?;
        self.launch(EngineSlot::Http, move |supervisor, shutdown| async move {
            supervisor.http_engine(request, shutdown).await
        })
    }

    pub fn start_toc(self: &Arc<Self>, request: TocRequest) -> Result<(), EngineError> {
        validate_url(&request.url)?;
        self.launch(EngineSlot::Toc, move |supervisor, shutdown| async move {
            supervisor.toc_engine(request, shutdown).await
        })
    }

    pub fn start_onionsearch(
        self: &Arc<Self>,
        request: OnionSearchRequest,
    ) -> Result<(), EngineError> {
        if request.query.trim().is_empty() {
            return Err(EngineError::Validation("query must not be empty".to_string()));
        }
        self.launch(EngineSlot::Onionsearch, move |supervisor, shutdown| async move {
            supervisor.onionsearch_engine(request, shutdown).await
        })
    }

    pub fn start_torbot(self: &Arc<Self>, request: TorbotRequest) -> Result<(), EngineError> {
        validate_url(&request.url)?;
        self.launch(EngineSlot::Torbot, move |supervisor, shutdown| async move {
            supervisor.torbot_engine(request, shutdown).await
        })
    }

    /// Signals cancellation and returns immediately, callers poll the
    /// status to observe the drain.
    pub fn stop(&self, slot: EngineSlot) -> Result<(), EngineError> {
        let mut inner = self.lock();
        match &inner.running {
            Some(running) if running.slot == slot => {
                running.shutdown.cancel();
                if let Some(state) = inner.slots.get_mut(&slot) {
                    state.status = SlotStatus::Stopping;
                }
                Ok(())
            }
            _ => Err(EngineError::NotRunning(slot)),
        }
    }

    pub fn status(&self) -> StatusReport {
        let inner = self.lock();
        StatusReport {
            running: inner.running.is_some(),
            slot: inner.running.as_ref().map(|running| running.slot),
            engines: inner.slots.clone(),
            counters: self.counters.snapshot(),
            last_error: inner.last_error.clone(),
        }
    }

    /// Server teardown: cancel whatever runs and wait for the drain up to
    /// the configured grace period, then abort the task. `kill_on_drop`
    /// reaps an aborted subprocess.
    pub async fn shutdown_engines(&self) {
        let (shutdown, handle) = {
            let mut inner = self.lock();
            match inner.running.as_mut() {
                Some(running) => (running.shutdown.clone(), running.handle.take()),
                None => return,
            }
        };
        shutdown.cancel();
        if let Some(handle) = handle {
            let grace = self.configs.system.shutdown_grace();
            match tokio::time::timeout(grace, handle).await {
                Ok(_) => {}
                Err(_) => log::warn!("engine did not drain within {grace:?}, aborting"),
            }
        }
    }

    /// The common start path: exclusivity check, session reset, state
    /// transition, then the engine future on its own task.
    fn launch<F, Fut>(self: &Arc<Self>, slot: EngineSlot, engine: F) -> Result<(), EngineError>
    where
        F: FnOnce(Arc<Supervisor>, Shutdown) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let engine_shutdown = self.begin(slot)?;
        let supervisor = Arc::clone(self);
        let task_shutdown = engine_shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = engine(Arc::clone(&supervisor), task_shutdown).await;
            supervisor.finish(slot, result);
        });
        let mut inner = self.lock();
        if let Some(running) = inner.running.as_mut() {
            if running.slot == slot {
                running.handle = Some(handle);
            }
        }
        Ok(())
    }

    fn begin(&self, slot: EngineSlot) -> Result<Shutdown, EngineError> {
        let mut inner = self.lock();
        if inner.running.is_some() {
            return Err(EngineError::Busy);
        }
        // session reset: new visit set, zeroed counters, truncated documents
        self.visited.clear();
        self.counters.reset();
        self.publisher.reset()?;
        let shutdown = self.shutdown.child();
        if let Some(state) = inner.slots.get_mut(&slot) {
            state.status = SlotStatus::Running;
            state.started_at = Some(OffsetDateTime::now_utc());
            state.last_error = None;
        }
        inner.last_error = None;
        inner.running = Some(RunningEngine {
            slot,
            shutdown: shutdown.clone(),
            handle: None,
        });
        log::info!("engine {slot} started, session {}", new_session_id());
        Ok(shutdown)
    }

    fn finish(&self, slot: EngineSlot, result: Result<(), EngineError>) {
        let mut inner = self.lock();
        inner.running = None;
        let state = inner.slots.entry(slot).or_insert_with(SlotState::idle);
        match result {
            Ok(()) => {
                state.status = SlotStatus::Idle;
                log::info!("engine {slot} finished");
            }
            Err(error) => {
                let message = error.to_string();
                log::error!("engine {slot} failed: {message}");
                state.status = SlotStatus::Error;
                state.last_error = Some(message.clone());
                inner.last_error = Some(message);
            }
        }
    }

    async fn http_engine(
        &self,
        request: HttpCrawlRequest,
        shutdown: Shutdown,
    ) -> Result<(), EngineError> {
        let mut config = self.configs.crawl.clone();
        if let Some(max_depth) = request.max_depth {
            config.max_depth = max_depth;
        }
        if let Some(max_links_per_page) = request.max_links_per_page {
            config.max_links_per_page = max_links_per_page;
        }
        if let Some(progressive) = request.progressive {
            config.progressive = progressive;
        }
        let sink = Arc::clone(&self.publisher) as Arc<dyn SnapshotSink>;
        run_crawl(
            &request.url,
            config.clamped(),
            Arc::clone(&self.visited),
            sink,
            Arc::clone(&self.counters),
            shutdown,
        )
        .await?;
        Ok(())
    }

    async fn toc_engine(&self, request: TocRequest, shutdown: Shutdown) -> Result<(), EngineError> {
        let system = &self.configs.system;
        let socks_host = request
            .socks_host
            .unwrap_or_else(|| system.socks_host.clone());
        let socks_port = request.socks_port.unwrap_or(system.socks_port);
        self.require_socks(&socks_host, socks_port).await?;

        let spec = SubprocessSpec {
            config: system.toc.clone(),
            extra_args: vec![
                "--url".to_string(),
                request.url.clone(),
                "--socks-host".to_string(),
                socks_host,
                "--socks-port".to_string(),
                socks_port.to_string(),
                "--output".to_string(),
                system.toc.artifact.to_string(),
            ],
            timeout: system.engine_timeout(),
            scan_stdout: false,
        };
        if run_subprocess(&spec, &self.counters, &shutdown).await?
            == SubprocessOutcome::Cancelled
        {
            return Ok(());
        }
        let raw = read_artifact(&spec.config.artifact).await?;
        let tree = adapt_recursive_json(&raw)?;
        self.publisher.publish(&tree)?;
        discard_artifact(&spec.config.artifact).await;
        Ok(())
    }

    async fn onionsearch_engine(
        &self,
        request: OnionSearchRequest,
        shutdown: Shutdown,
    ) -> Result<(), EngineError> {
        let system = &self.configs.system;
        let mut extra_args = vec![
            "--search".to_string(),
            request.query.clone(),
            "--output".to_string(),
            system.onionsearch.artifact.to_string(),
        ];
        if let Some(engines) = &request.engines {
            extra_args.push("--engines".to_string());
            extra_args.push(engines.join(","));
        }
        if let Some(limit) = request.limit {
            extra_args.push("--limit".to_string());
            extra_args.push(limit.to_string());
        }
        let spec = SubprocessSpec {
            config: system.onionsearch.clone(),
            extra_args,
            timeout: system.engine_timeout(),
            scan_stdout: false,
        };
        if run_subprocess(&spec, &self.counters, &shutdown).await?
            == SubprocessOutcome::Cancelled
        {
            return Ok(());
        }
        let raw = read_artifact(&spec.config.artifact).await?;
        let tree = adapt_search_csv(raw.as_slice(), &request.query)?;
        self.publisher.publish(&tree)?;
        discard_artifact(&spec.config.artifact).await;
        Ok(())
    }

    async fn torbot_engine(
        &self,
        request: TorbotRequest,
        shutdown: Shutdown,
    ) -> Result<(), EngineError> {
        let system = &self.configs.system;
        let use_socks = !request.disable_socks5.unwrap_or(false);
        let mut extra_args = vec![
            "--url".to_string(),
            request.url.clone(),
            "--depth".to_string(),
            request.depth.unwrap_or(2).to_string(),
            "--save".to_string(),
            request.output_format.unwrap_or_else(|| "json".to_string()),
        ];
        if request.info_mode.unwrap_or(false) {
            extra_args.push("--info".to_string());
        }
        if use_socks {
            let socks_host = request
                .socks_host
                .unwrap_or_else(|| system.socks_host.clone());
            let socks_port = request.socks_port.unwrap_or(system.socks_port);
            self.require_socks(&socks_host, socks_port).await?;
            extra_args.push("--host".to_string());
            extra_args.push(socks_host);
            extra_args.push("--port".to_string());
            extra_args.push(socks_port.to_string());
        } else {
            extra_args.push("--disable-socks5".to_string());
        }
        let spec = SubprocessSpec {
            config: system.torbot.clone(),
            extra_args,
            timeout: system.engine_timeout(),
            scan_stdout: true,
        };
        if run_subprocess(&spec, &self.counters, &shutdown).await?
            == SubprocessOutcome::Cancelled
        {
            return Ok(());
        }
        let raw = read_artifact(&spec.config.artifact).await?;
        let tree = adapt_osint_json(&raw, &request.url)?;
        self.publisher.publish(&tree)?;
        discard_artifact(&spec.config.artifact).await;
        Ok(())
    }

    async fn require_socks(&self, host: &str, port: u16) -> Result<(), EngineError> {
        let timeout = self.configs.system.socks_probe_timeout();
        if probe_socks(host, port, timeout).await {
            Ok(())
        } else {
            Err(EngineError::SocksUnreachable(host.to_string(), port))
        }
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_url(raw: &str) -> Result<(), EngineError> {
    canonicalize_seed(raw)
        .map(|_| ())
        .map_err(|error| EngineError::Validation(format!("url: {error}")))
}

async fn read_artifact(path: &Utf8Path) -> Result<Vec<u8>, EngineError> {
    match tokio::fs::read(path.as_std_path()).await {
        Ok(raw) => Ok(raw),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Err(EngineError::Adapter(
            AdapterError::MissingArtifact(path.to_path_buf()),
        )),
        Err(error) => Err(EngineError::Adapter(AdapterError::Io(error))),
    }
}

/// Artifacts are consumed exactly once, leftovers would leak into the
/// next run of the same engine.
async fn discard_artifact(path: &Utf8Path) {
    if let Err(error) = tokio::fs::remove_file(path.as_std_path()).await {
        log::warn!("unable to remove the consumed artifact {path}: {error}");
    }
}

/// `canopy-<base32 unix nanos>-<random alnum>`, unique enough to grep a
/// session out of the logs.
fn new_session_id() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    let stamp = OffsetDateTime::now_utc().unix_timestamp_nanos();
    let mut id = String::from("canopy-");
    id.push_str(&data_encoding::BASE32_NOPAD.encode(&stamp.to_be_bytes()));
    id.push('-');
    id.extend(
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from),
    );
    id
}
