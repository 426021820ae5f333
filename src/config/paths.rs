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
use serde::{Deserialize, Serialize};

/// Where the canonical document lives and where the visualizer reads it.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename(serialize = "Paths"))]
#[serde(default)]
pub struct PathsConfig {
    /// Working directory for logs and engine scratch space.
    pub root: Utf8PathBuf,
    /// The authoritative canonical document.
    pub primary: Utf8PathBuf,
    /// The copy the visualizer polls. Always byte-identical to the
    /// primary after a successful publish.
    pub mirror: Utf8PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("./canopy_data"),
            primary: Utf8PathBuf::from("./canopy_data/tree.json"),
            mirror: Utf8PathBuf::from("./canopy_data/visualizer/tree.json"),
        }
    }
}

impl PathsConfig {
    pub fn root_path(&self) -> &Utf8PathBuf {
        &self.root
    }
}
