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

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard ceiling for [CrawlConfig::max_depth].
pub const MAX_DEPTH_LIMIT: usize = 10;
/// Hard ceiling for [CrawlConfig::max_links_per_page].
pub const MAX_LINKS_PER_PAGE_LIMIT: usize = 20;

/// The settings for a single breadth-limited crawl session.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename(serialize = "Crawl"))]
#[serde(default)]
pub struct CrawlConfig {
    /// The user agent used by the crawler
    pub user_agent: UserAgent,
    /// Respect robots.txt and skip disallowed paths. (default: true)
    pub respect_robots_txt: bool,
    /// Leave the seed host when a page links out. (default: false)
    pub follow_external_links: bool,
    /// How deep below the seed the crawl descends, 1 means seed only.
    pub max_depth: usize,
    /// How many outlinks of a page are accepted, in document order.
    pub max_links_per_page: usize,
    /// Minimum pause between two requests against the same host.
    pub request_delay_ms: u64,
    /// Budget for a single request, connect to last body byte.
    pub request_timeout_secs: u64,
    /// Size of the worker pool.
    pub max_concurrent_requests: usize,
    /// Publish a snapshot after every page instead of only at the end.
    pub progressive: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            user_agent: UserAgent::default(),
            respect_robots_txt: true,
            follow_external_links: false,
            max_depth: 3,
            max_links_per_page: 10,
            request_delay_ms: 500,
            request_timeout_secs: 10,
            max_concurrent_requests: 4,
            progressive: true,
        }
    }
}

impl CrawlConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The work queue holds four items per worker before enqueues push back.
    pub fn queue_capacity(&self) -> usize {
        4 * self.max_concurrent_requests.max(1)
    }

    /// Forces every field into its documented range.
    pub fn clamped(mut self) -> Self {
        self.max_depth = self.max_depth.clamp(1, MAX_DEPTH_LIMIT);
        self.max_links_per_page = self.max_links_per_page.clamp(1, MAX_LINKS_PER_PAGE_LIMIT);
        self.max_concurrent_requests = self.max_concurrent_requests.max(1);
        self
    }
}

/// The user agent the crawler identifies as, also used for robots.txt.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
#[repr(transparent)]
pub struct UserAgent(String);

impl UserAgent {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserAgent {
    fn default() -> Self {
        Self(concat!("canopy/", env!("CARGO_PKG_VERSION")).to_string())
    }
}

impl From<String> for UserAgent {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for UserAgent {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::{CrawlConfig, MAX_DEPTH_LIMIT, MAX_LINKS_PER_PAGE_LIMIT};

    #[test]
    fn clamping_enforces_the_documented_ranges() {
        let config = CrawlConfig {
            max_depth: 99,
            max_links_per_page: 0,
            max_concurrent_requests: 0,
            ..CrawlConfig::default()
        }
        .clamped();
        assert_eq!(config.max_depth, MAX_DEPTH_LIMIT);
        assert_eq!(config.max_links_per_page, 1);
        assert_eq!(config.max_concurrent_requests, 1);
        assert!(config.max_links_per_page <= MAX_LINKS_PER_PAGE_LIMIT);
    }

    #[test]
    fn defaults_stay_on_the_seed_host() {
        let config = CrawlConfig::default();
        assert!(!config.follow_external_links);
        assert!(config.respect_robots_txt);
        assert_eq!(config.queue_capacity(), 16);
    }
}
