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

use crate::url::CanonicalizeError;
use thiserror::Error;

/// Why a single page could not be turned into a tree node.
/// Never fatal for the crawl, the scheduler maps it to an error node.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("the request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("unexpected status code {0}")]
    HttpStatus(u16),
    #[error("the response is not an html document")]
    NonHtml,
    #[error("the response body could not be parsed")]
    Parse,
}

impl FetchError {
    /// The short tag used in error node names.
    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Transport(_) => "transport",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::NonHtml => "non_html",
            FetchError::Parse => "parse",
        }
    }

    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(error)
        }
    }
}

/// Errors that abort a crawl session before any worker starts.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("the seed url is not crawlable: {0}")]
    InvalidSeed(#[from] CanonicalizeError),
    #[error("unable to construct the http client: {0}")]
    Client(#[source] reqwest::Error),
}
