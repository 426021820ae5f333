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

use moka::future::Cache;
use std::sync::Arc;
use texting_robots::{get_robots_url, Robot};
use url::Url;

const ROBOTS_CACHE_CAPACITY: u64 = 256;

/// The cached verdict source for one host.
///
/// When the robots.txt itself cannot be fetched or parsed the host falls
/// back to allow-all, a missing policy never stalls a crawl.
#[derive(Debug)]
pub enum HostRobots {
    Rules(Robot),
    AllowAll,
}

impl HostRobots {
    fn allowed(&self, url: &Url) -> bool {
        match self {
            HostRobots::Rules(robot) => robot.allowed(url.as_str()),
            HostRobots::AllowAll => true,
        }
    }
}

/// Consults robots.txt once per host and session, caching the parsed rules.
#[derive(Debug)]
pub struct RobotsGate {
    client: reqwest::Client,
    user_agent: String,
    respect: bool,
    cache: Cache<String, Arc<HostRobots>>,
}

impl RobotsGate {
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>, respect: bool) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            respect,
            cache: Cache::new(ROBOTS_CACHE_CAPACITY),
        }
    }

    /// Whether the configured agent may fetch `url`.
    pub async fn allowed(&self, url: &Url) -> bool {
        if !self.respect {
            return true;
        }
        let key = match origin_key(url) {
            Some(key) => key,
            None => return true,
        };
        let robots = self
            .cache
            .get_with(key, async { Arc::new(self.retrieve(url).await) })
            .await;
        robots.allowed(url)
    }

    async fn retrieve(&self, url: &Url) -> HostRobots {
        let robots_url = match get_robots_url(url.as_str()) {
            Ok(robots_url) => robots_url,
            Err(error) => {
                log::debug!("no robots url for {url}: {error}");
                return HostRobots::AllowAll;
            }
        };
        let response = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                log::trace!("robots {robots_url} answered {}", response.status());
                return HostRobots::AllowAll;
            }
            Err(error) => {
                log::trace!("robots {robots_url} unreachable: {error}");
                return HostRobots::AllowAll;
            }
        };
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(_) => return HostRobots::AllowAll,
        };
        match Robot::new(&self.user_agent, body.as_ref()) {
            Ok(robot) => HostRobots::Rules(robot),
            Err(error) => {
                log::debug!("invalid robots.txt at {robots_url}: {error}");
                HostRobots::AllowAll
            }
        }
    }
}

fn origin_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}
