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
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Process-wide settings: control plane, logging, Tor endpoint and the
/// command lines of the external engines.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename(serialize = "System"))]
#[serde(default)]
pub struct SystemConfig {
    /// Address the control plane listens on.
    pub bind: SocketAddr,
    /// Log to a file under the root path instead of the console.
    pub log_to_file: bool,
    /// Log level of the canopy logger.
    pub log_level: LevelFilter,
    /// Wall-clock budget for one external engine run.
    pub engine_timeout_secs: u64,
    /// How long shutdown waits for a running engine to drain.
    pub shutdown_grace_secs: u64,
    /// The Tor SOCKS5 endpoint probed before onion-routed engines start.
    pub socks_host: String,
    pub socks_port: u16,
    pub socks_probe_timeout_secs: u64,
    /// Command line contracts of the subprocess engines.
    pub toc: ExternalEngineConfig,
    pub onionsearch: ExternalEngineConfig,
    pub torbot: ExternalEngineConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            log_to_file: false,
            log_level: LevelFilter::Info,
            engine_timeout_secs: 600,
            shutdown_grace_secs: 5,
            socks_host: "127.0.0.1".to_string(),
            socks_port: 9050,
            socks_probe_timeout_secs: 5,
            toc: ExternalEngineConfig {
                program: "python3".to_string(),
                args: vec!["toc/run_toc.py".to_string()],
                workdir: Utf8PathBuf::from("./engines/toc"),
                artifact: Utf8PathBuf::from("./engines/toc/output/tree.json"),
            },
            onionsearch: ExternalEngineConfig {
                program: "onionsearch".to_string(),
                args: Vec::new(),
                workdir: Utf8PathBuf::from("./engines/onionsearch"),
                artifact: Utf8PathBuf::from("./engines/onionsearch/results.csv"),
            },
            torbot: ExternalEngineConfig {
                program: "python3".to_string(),
                args: vec!["torbot/main.py".to_string()],
                workdir: Utf8PathBuf::from("./engines/torbot"),
                artifact: Utf8PathBuf::from("./engines/torbot/output.json"),
            },
        }
    }
}

impl SystemConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn socks_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.socks_probe_timeout_secs)
    }
}

/// How one external engine is invoked and where it leaves its artifact.
/// The contract the supervisor relies on: exit code 0 means the artifact
/// exists and is adaptable.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default)]
pub struct ExternalEngineConfig {
    pub program: String,
    /// Leading arguments, request-specific flags are appended by the engine.
    pub args: Vec<String>,
    pub workdir: Utf8PathBuf,
    pub artifact: Utf8PathBuf,
}

impl Default for ExternalEngineConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            workdir: Utf8PathBuf::from("."),
            artifact: Utf8PathBuf::from("./output.json"),
        }
    }
}
