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

mod args;
mod logging;

pub use args::*;

use crate::config::Configs;
use crate::crawl::{run_crawl, SnapshotSink, VisitSet};
use crate::engines::ProgressCounters;
use crate::publish::Publisher;
use crate::runtime::Shutdown;
use crate::server;
use anyhow::Context;
use camino::Utf8PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Entry point behind the argument parser.
pub fn exec_args(args: CanopyArgs) -> ExitCode {
    let configs = match load_configs(&args) {
        Ok(configs) => configs,
        Err(error) => {
            eprintln!("unable to load the configuration: {error}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error) = logging::configure_logging(&configs) {
        eprintln!("unable to configure logging: {error}");
        return ExitCode::FAILURE;
    }

    let result = match args.mode.unwrap_or(RunMode::Serve { bind: None }) {
        RunMode::Serve { bind } => {
            let mut configs = configs;
            if let Some(bind) = bind {
                configs.system.bind = bind;
            }
            run_in_runtime(serve(configs))
        }
        RunMode::Crawl {
            url,
            max_depth,
            max_links_per_page,
            progressive,
        } => run_in_runtime(crawl_once(
            configs,
            url,
            max_depth,
            max_links_per_page,
            progressive,
        )),
        RunMode::Init { target } => write_default_config(&target),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("{error:#}");
            eprintln!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_configs(args: &CanopyArgs) -> Result<Configs, config::ConfigError> {
    match &args.config {
        Some(folder) => Configs::load_from(folder),
        None => Configs::discover_or_default(),
    }
}

fn run_in_runtime(
    future: impl std::future::Future<Output = anyhow::Result<()>>,
) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("unable to build the runtime")?
        .block_on(future)
}

async fn serve(configs: Configs) -> anyhow::Result<()> {
    let shutdown = Shutdown::new();
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("ctrl-c received, shutting down");
                shutdown.cancel();
            }
        })
    };

    let result = server::run_server(configs, shutdown.clone())
        .await
        .context("control plane failed");
    shutdown.cancel();
    signal_task.abort();
    result
}

async fn crawl_once(
    configs: Configs,
    url: String,
    max_depth: Option<usize>,
    max_links_per_page: Option<usize>,
    progressive: bool,
) -> anyhow::Result<()> {
    let mut config = configs.crawl.clone();
    if let Some(max_depth) = max_depth {
        config.max_depth = max_depth;
    }
    if let Some(max_links_per_page) = max_links_per_page {
        config.max_links_per_page = max_links_per_page;
    }
    config.progressive = progressive;

    let publisher = Arc::new(Publisher::new(&configs.paths));
    publisher.reset().context("unable to reset the documents")?;
    let tree = run_crawl(
        &url,
        config.clamped(),
        Arc::new(VisitSet::new()),
        Arc::clone(&publisher) as Arc<dyn SnapshotSink>,
        Arc::new(ProgressCounters::default()),
        Shutdown::new(),
    )
    .await
    .context("crawl failed")?;
    println!(
        "published {} nodes to {}",
        tree.count(),
        configs.paths.primary
    );
    Ok(())
}

fn write_default_config(target: &Utf8PathBuf) -> anyhow::Result<()> {
    if target.as_std_path().exists() {
        anyhow::bail!("{target} already exists, refusing to overwrite it");
    }
    let rendered = serde_json::to_string_pretty(&Configs::default())
        .context("unable to render the default configuration")?;
    std::fs::write(target.as_std_path(), rendered)
        .with_context(|| format!("unable to write {target}"))?;
    println!("wrote {target}");
    Ok(())
}
