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
use strum::{Display, EnumString};

/// The level tag of a node, a pure function of its depth below the root.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    Root,
    Category,
    Subcategory,
    Item,
}

impl NodeKind {
    /// 0 is the root, 1 a category, 2 a subcategory, everything deeper an item.
    pub fn for_depth(depth: usize) -> Self {
        match depth {
            0 => NodeKind::Root,
            1 => NodeKind::Category,
            2 => NodeKind::Subcategory,
            _ => NodeKind::Item,
        }
    }
}

/// One node of the canonical tree document.
///
/// The serialized field order is part of the published contract, a tree
/// that is published, read back and published again produces identical
/// bytes. `children` is always written but readers accept its absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: name.into(),
            kind,
            description: format!("URL: {url}"),
            url,
            children: Vec::new(),
        }
    }

    /// The document every session starts from, and the one a reset publishes.
    pub fn empty_root() -> Self {
        Self {
            name: String::new(),
            kind: NodeKind::Root,
            description: String::new(),
            url: String::new(),
            children: Vec::new(),
        }
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }

    /// Depth-first traversal yielding every node together with its depth.
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(&'a Node, usize)) {
        fn inner<'a>(node: &'a Node, depth: usize, visit: &mut impl FnMut(&'a Node, usize)) {
            visit(node, depth);
            for child in &node.children {
                inner(child, depth + 1, visit);
            }
        }
        inner(self, 0, &mut visit)
    }
}

#[cfg(test)]
mod test {
    use super::{Node, NodeKind};

    #[test]
    fn kind_follows_depth() {
        assert_eq!(NodeKind::for_depth(0), NodeKind::Root);
        assert_eq!(NodeKind::for_depth(1), NodeKind::Category);
        assert_eq!(NodeKind::for_depth(2), NodeKind::Subcategory);
        assert_eq!(NodeKind::for_depth(3), NodeKind::Item);
        assert_eq!(NodeKind::for_depth(9), NodeKind::Item);
    }

    #[test]
    fn serializes_with_stable_key_order() {
        let node = Node::new("seed", NodeKind::Root, "http://h.test/");
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(
            json,
            r#"{"name":"seed","type":"root","description":"URL: http://h.test/","url":"http://h.test/","children":[]}"#
        );
    }

    #[test]
    fn readers_accept_absent_children() {
        let node: Node =
            serde_json::from_str(r#"{"name":"a","type":"item","description":"","url":"u"}"#)
                .unwrap();
        assert!(node.children.is_empty());
    }

    #[test]
    fn counts_and_walks_the_subtree() {
        let mut root = Node::new("r", NodeKind::Root, "http://h.test/");
        let mut child = Node::new("c", NodeKind::Category, "http://h.test/a");
        child
            .children
            .push(Node::new("g", NodeKind::Subcategory, "http://h.test/b"));
        root.children.push(child);

        assert_eq!(root.count(), 3);
        let mut seen = Vec::new();
        root.walk(|node, depth| seen.push((node.name.clone(), depth)));
        assert_eq!(
            seen,
            vec![
                ("r".to_string(), 0),
                ("c".to_string(), 1),
                ("g".to_string(), 2)
            ]
        );
    }
}
