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

use crate::config::crawl::CrawlConfig;
use crate::config::paths::PathsConfig;
use crate::config::system::SystemConfig;
use camino::Utf8Path;
use config::Config;
use serde::{Deserialize, Serialize};

/// A collection of all config used by the aggregator.
/// Can be shared across threads
#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename(serialize = "Config"))]
#[serde(default)]
pub struct Configs {
    pub system: SystemConfig,
    pub paths: PathsConfig,
    pub crawl: CrawlConfig,
}

impl Configs {
    pub fn load_from<P: AsRef<Utf8Path>>(folder: P) -> Result<Self, config::ConfigError> {
        Config::builder()
            .add_source(config::File::with_name(
                folder.as_ref().join("canopy").as_str(),
            ))
            .add_source(config::Environment::with_prefix("CANOPY").separator("."))
            .build()?
            .try_deserialize()
    }

    pub fn discover_or_default() -> Result<Self, config::ConfigError> {
        match Config::builder()
            .add_source(config::File::with_name("./canopy"))
            .add_source(config::File::with_name("./canopy_data/canopy"))
            .add_source(config::Environment::with_prefix("CANOPY").separator("."))
            .build()
        {
            Ok(value) => value.try_deserialize(),
            Err(_) => Ok(Default::default()),
        }
    }
}
