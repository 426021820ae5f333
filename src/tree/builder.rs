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

use crate::tree::{Node, NodeKind};
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

/// Identifies a node inside a [TreeBuilder]. Ids are assigned monotonically
/// and never reused within a session.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct NodeSlot {
    name: String,
    url: String,
    description: String,
    children: Vec<usize>,
}

#[derive(Debug)]
struct TreeInner {
    slots: Vec<NodeSlot>,
    root_relabelled: bool,
}

/// The evolving canonical tree of one session.
///
/// All mutation happens under a single mutex, one writer at a time.
/// [TreeBuilder::snapshot] deep-copies under the same lock so readers always
/// observe a consistent document while workers keep attaching.
#[derive(Debug)]
pub struct TreeBuilder {
    inner: Mutex<TreeInner>,
}

impl TreeBuilder {
    /// Creates the tree with its root node at depth 0.
    pub fn new(seed_url: impl Into<String>, seed_name: impl Into<String>) -> Self {
        let url = seed_url.into();
        let root = NodeSlot {
            name: seed_name.into(),
            description: format!("URL: {url}"),
            url,
            children: Vec::new(),
        };
        Self {
            inner: Mutex::new(TreeInner {
                slots: vec![root],
                root_relabelled: false,
            }),
        }
    }

    /// Appends a child under `parent` and returns its id.
    pub fn attach(&self, parent: NodeId, url: &str, name: &str) -> NodeId {
        let mut inner = self.lock();
        let id = inner.slots.len();
        inner.slots.push(NodeSlot {
            name: name.to_string(),
            url: url.to_string(),
            description: format!("URL: {url}"),
            children: Vec::new(),
        });
        inner.slots[parent.0].children.push(id);
        NodeId(id)
    }

    /// Rewrites a node in place to represent a failed fetch, so the
    /// visualization still shows the attempted structure.
    pub fn mark_error(&self, node: NodeId, reason: &str, detail: &str) {
        let mut inner = self.lock();
        let slot = &mut inner.slots[node.0];
        slot.name = format!("Error: {reason}");
        slot.description = format!("Failed to fetch {}: {detail}", slot.url);
    }

    /// Replaces the root label with the fetched page title. Allowed once,
    /// later calls are ignored.
    pub fn relabel_root(&self, title: &str) -> bool {
        let mut inner = self.lock();
        if inner.root_relabelled {
            return false;
        }
        inner.root_relabelled = true;
        inner.slots[0].name = title.to_string();
        true
    }

    /// Number of nodes currently attached.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// A deep copy of the whole document, with every `type` derived from the
    /// node's depth below the root.
    pub fn snapshot(&self) -> Node {
        let inner = self.lock();
        build_node(&inner.slots, 0, 0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TreeInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn build_node(slots: &[NodeSlot], index: usize, depth: usize) -> Node {
    let slot = &slots[index];
    Node {
        name: slot.name.clone(),
        kind: NodeKind::for_depth(depth),
        description: slot.description.clone(),
        url: slot.url.clone(),
        children: slot
            .children
            .iter()
            .map(|child| build_node(slots, *child, depth + 1))
            .collect(),
    }
}
