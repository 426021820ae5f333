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

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;

/// The command line of the canopy aggregator.
#[derive(Debug, Parser)]
#[command(name = "canopy", version, about = "Hierarchical web-crawl aggregator")]
pub struct CanopyArgs {
    /// Folder containing a canopy.{toml,json,yaml} configuration
    #[arg(short, long)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub mode: Option<RunMode>,
}

#[derive(Debug, Subcommand)]
pub enum RunMode {
    /// Run the control plane and wait for engine commands (the default)
    Serve {
        /// Override the configured listen address
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// One-shot crawl that publishes the resulting tree and exits
    Crawl {
        /// The seed url
        url: String,
        #[arg(long)]
        max_depth: Option<usize>,
        #[arg(long)]
        max_links_per_page: Option<usize>,
        /// Publish a snapshot after every page
        #[arg(long)]
        progressive: bool,
    },
    /// Write a default configuration file and exit
    Init {
        /// Where to write the configuration
        #[arg(long, default_value = "./canopy.json")]
        target: Utf8PathBuf,
    },
}
