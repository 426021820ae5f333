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

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Session-scoped progress counters, written by whichever engine is
/// running and polled through the control plane.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    links: AtomicU64,
    emails: AtomicU64,
    phones: AtomicU64,
    pages: AtomicU64,
    errors: AtomicU64,
    depth: AtomicU64,
}

/// A readable copy of [ProgressCounters].
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub links: u64,
    pub emails: u64,
    pub phones: u64,
    pub pages: u64,
    pub errors: u64,
    pub depth: u64,
}

impl ProgressCounters {
    pub fn record_link(&self) {
        self.links.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_email(&self) {
        self.emails.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_phone(&self) {
        self.phones.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page(&self) {
        self.pages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Remembers the deepest level reached so far.
    pub fn record_depth(&self, depth: u64) {
        self.depth.fetch_max(depth, Ordering::Relaxed);
    }

    /// Part of the session reset.
    pub fn reset(&self) {
        self.links.store(0, Ordering::Relaxed);
        self.emails.store(0, Ordering::Relaxed);
        self.phones.store(0, Ordering::Relaxed);
        self.pages.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.depth.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            links: self.links.load(Ordering::Relaxed),
            emails: self.emails.load(Ordering::Relaxed),
            phones: self.phones.load(Ordering::Relaxed),
            pages: self.pages.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            depth: self.depth.load(Ordering::Relaxed),
        }
    }
}
