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

use crate::adapters::AdapterError;
use crate::tree::{Node, NodeKind};
use crate::url::canonicalize_seed;
use serde::Deserialize;

/// A node as some other crawler wrote it. Everything is optional, unknown
/// fields vanish during deserialization, and the level tag is never
/// trusted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForeignNode {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub children: Vec<ForeignNode>,
}

/// Parses a foreign tree document and rebuilds it as a canonical tree.
pub fn adapt_recursive_json(raw: &[u8]) -> Result<Node, AdapterError> {
    let foreign: ForeignNode = serde_json::from_slice(raw)?;
    Ok(adapt_foreign_tree(foreign))
}

/// Walks a foreign tree, recomputing every level tag from depth and
/// recanonicalizing every url. A url that does not canonicalize keeps its
/// original string, the node survives with a parse warning in its
/// description.
pub fn adapt_foreign_tree(root: ForeignNode) -> Node {
    convert(root, 0)
}

fn convert(foreign: ForeignNode, depth: usize) -> Node {
    let (url, description) = match canonicalize_seed(&foreign.url) {
        Ok(canonical) => (canonical.to_string(), foreign.description),
        Err(error) => {
            let warning = format!("url not canonical ({error})");
            let description = if foreign.description.is_empty() {
                warning
            } else {
                format!("{}; {warning}", foreign.description)
            };
            (foreign.url, description)
        }
    };
    let name = if foreign.name.trim().is_empty() {
        url.clone()
    } else {
        foreign.name
    };
    Node {
        name,
        kind: NodeKind::for_depth(depth),
        description,
        url,
        children: foreign
            .children
            .into_iter()
            .map(|child| convert(child, depth + 1))
            .collect(),
    }
}

#[cfg(test)]
mod test {
    use super::{adapt_foreign_tree, adapt_recursive_json};
    use crate::tree::{Node, NodeKind};

    #[test]
    fn recomputes_level_tags_and_drops_unknown_fields() {
        let raw = br#"{
            "name": "Seed",
            "type": "item",
            "description": "URL: http://h.test/",
            "url": "http://h.test/",
            "score": 0.93,
            "children": [
                {"name": "A", "type": "root", "url": "http://h.test/a", "description": "URL: http://h.test/a", "children": []}
            ]
        }"#;
        let tree = adapt_recursive_json(raw).unwrap();
        assert_eq!(tree.kind, NodeKind::Root);
        assert_eq!(tree.children[0].kind, NodeKind::Category);
        assert_eq!(tree.children[0].name, "A");
    }

    #[test]
    fn is_the_identity_on_an_already_canonical_tree() {
        let mut root = Node::new("Seed", NodeKind::Root, "http://h.test/");
        root.children
            .push(Node::new("A", NodeKind::Category, "http://h.test/a"));
        let bytes = serde_json::to_vec(&root).unwrap();
        let adapted = adapt_recursive_json(&bytes).unwrap();
        assert_eq!(adapted, root);
    }

    #[test]
    fn bad_urls_keep_the_node_with_a_warning() {
        let raw = br#"{"name": "odd", "url": "notaurl", "description": "d", "children": []}"#;
        let tree = adapt_recursive_json(raw).unwrap();
        assert_eq!(tree.url, "notaurl");
        assert!(tree.description.contains("url not canonical"));
        assert!(tree.description.starts_with("d; "));
    }

    #[test]
    fn blank_names_fall_back_to_the_url() {
        let tree = adapt_foreign_tree(super::ForeignNode {
            url: "http://h.test/page".to_string(),
            ..Default::default()
        });
        assert_eq!(tree.name, "http://h.test/page");
    }

    #[test]
    fn malformed_json_is_an_adapter_error() {
        assert!(adapt_recursive_json(b"[not json").is_err());
    }
}
