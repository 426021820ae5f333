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
use indexmap::IndexMap;
use serde::Deserialize;
use std::io::Read;

/// One result row of the search engine output.
#[derive(Debug, Deserialize)]
pub struct SearchRow {
    pub engine: String,
    pub name: String,
    pub url: String,
}

/// Converts `engine,name,url` rows into a three level tree: the query as
/// root, one category per engine in first-appearance order, one
/// subcategory per row. Rows without a url are dropped.
///
/// The engine children are search partitions, not pages, which is why this
/// tree may legitimately carry the same page url under two engines.
pub fn adapt_search_csv<R: Read>(reader: R, query: &str) -> Result<Node, AdapterError> {
    let mut rows = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut by_engine: IndexMap<String, Vec<(String, String)>> = IndexMap::new();
    for (index, row) in rows.deserialize::<SearchRow>().enumerate() {
        let row = row?;
        // tolerate an exported header line
        if index == 0 && row.engine.eq_ignore_ascii_case("engine") && row.url.eq_ignore_ascii_case("url") {
            continue;
        }
        if row.url.trim().is_empty() {
            continue;
        }
        by_engine
            .entry(row.engine)
            .or_default()
            .push((row.name, row.url));
    }

    let mut root = Node {
        name: format!("OnionSearch Results: {query}"),
        kind: NodeKind::Root,
        description: format!("Search results for '{query}'"),
        url: format!("search://{query}"),
        children: Vec::new(),
    };

    for (engine, results) in by_engine {
        let mut engine_node = Node {
            name: engine.clone(),
            kind: NodeKind::Category,
            description: format!("Results reported by {engine}"),
            url: format!("search://{query}/{engine}"),
            children: Vec::new(),
        };
        for (name, url) in results {
            let name = if name.trim().is_empty() {
                url.clone()
            } else {
                name
            };
            engine_node.children.push(Node {
                name,
                kind: NodeKind::Subcategory,
                description: format!("URL: {url}"),
                url,
                children: Vec::new(),
            });
        }
        root.children.push(engine_node);
    }
    Ok(root)
}

#[cfg(test)]
mod test {
    use super::adapt_search_csv;
    use crate::tree::NodeKind;

    const ROWS: &str = "\
ahmia,Privacy Wiki,http://pw.onion/pw
ahmia,Tor FAQ,http://faq.onion/faq
darksearch,Privacy Wiki,http://pw2.onion/pw2
";

    #[test]
    fn groups_rows_by_engine_in_first_appearance_order() {
        let tree = adapt_search_csv(ROWS.as_bytes(), "privacy").unwrap();
        assert_eq!(tree.name, "OnionSearch Results: privacy");
        assert_eq!(tree.url, "search://privacy");
        assert_eq!(tree.kind, NodeKind::Root);

        let engines: Vec<_> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(engines, vec!["ahmia", "darksearch"]);
        assert_eq!(tree.children[0].children.len(), 2);
        assert_eq!(tree.children[1].children.len(), 1);
        assert!(tree.children.iter().all(|c| c.kind == NodeKind::Category));
        assert!(tree.children[0]
            .children
            .iter()
            .all(|c| c.kind == NodeKind::Subcategory));
    }

    #[test]
    fn node_count_is_one_plus_engines_plus_rows() {
        let tree = adapt_search_csv(ROWS.as_bytes(), "privacy").unwrap();
        assert_eq!(tree.count(), 1 + 2 + 3);
    }

    #[test]
    fn rows_without_url_are_dropped() {
        let rows = "ahmia,Empty,\nahmia,Kept,http://k.onion/\n";
        let tree = adapt_search_csv(rows.as_bytes(), "q").unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].children.len(), 1);
        assert_eq!(tree.children[0].children[0].name, "Kept");
    }

    #[test]
    fn a_header_line_is_tolerated() {
        let rows = "engine,name,url\nahmia,Kept,http://k.onion/\n";
        let tree = adapt_search_csv(rows.as_bytes(), "q").unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].name, "ahmia");
    }

    #[test]
    fn empty_input_yields_a_bare_root() {
        let tree = adapt_search_csv("".as_bytes(), "nothing").unwrap();
        assert!(tree.children.is_empty());
        assert_eq!(tree.count(), 1);
    }
}
