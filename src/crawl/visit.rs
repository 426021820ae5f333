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

use std::collections::HashSet;
use std::sync::Mutex;

/// All canonical urls enqueued or completed in the current session.
///
/// [VisitSet::claim] hands ownership of a url to exactly one caller, when
/// two workers discover the same url at once one of them wins and the other
/// drops the link silently.
#[derive(Debug, Default)]
pub struct VisitSet {
    inner: Mutex<HashSet<String>>,
}

impl VisitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` iff `url` was not known yet, the caller then owns
    /// crawling it.
    pub fn claim(&self, url: &str) -> bool {
        self.lock().insert(url.to_string())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().contains(url)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Part of the session reset, after this every url is claimable again.
    pub fn clear(&self) {
        self.lock().clear()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod test {
    use super::VisitSet;
    use std::sync::Arc;

    #[test]
    fn claims_exactly_once() {
        let set = VisitSet::new();
        assert!(set.claim("http://h.test/a"));
        assert!(!set.claim("http://h.test/a"));
        assert!(set.claim("http://h.test/b"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn clearing_reopens_urls() {
        let set = VisitSet::new();
        assert!(set.claim("http://h.test/a"));
        set.clear();
        assert!(set.is_empty());
        assert!(set.claim("http://h.test/a"));
    }

    #[test]
    fn concurrent_claims_have_a_single_winner() {
        let set = Arc::new(VisitSet::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let set = Arc::clone(&set);
            handles.push(std::thread::spawn(move || {
                (0..100)
                    .filter(|i| set.claim(&format!("http://h.test/{i}")))
                    .count()
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
    }
}
