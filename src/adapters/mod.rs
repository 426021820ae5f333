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

//! Converters from the three foreign crawler output schemas into the
//! canonical tree. All of them recompute the level tags from depth and
//! drop whatever fields they do not know.

mod osint;
mod recursive;
mod search;

pub use osint::*;
pub use recursive::*;
pub use search::*;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Why an engine artifact could not be adapted. Fatal for the engine slot.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("the artifact {0} is missing")]
    MissingArtifact(Utf8PathBuf),
    #[error("unable to read the artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse the result rows: {0}")]
    Csv(#[from] csv::Error),
    #[error("unable to parse the artifact json: {0}")]
    Json(#[from] serde_json::Error),
}
