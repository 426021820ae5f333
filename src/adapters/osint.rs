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

use crate::adapters::{adapt_foreign_tree, AdapterError, ForeignNode};
use crate::tree::{Node, NodeKind};
use crate::url::canonicalize_seed;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;

/// Host bucket for entries whose url does not parse.
const UNPARSED_HOST: &str = "_unparsed";

/// The two shapes the OSINT engine emits, discriminated structurally:
/// a map is a recursive tree, a list is flat scan output.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OsintInput {
    Recursive(ForeignNode),
    Flat(Vec<OsintEntry>),
}

/// One line of the flat scan output.
#[derive(Debug, Clone, Deserialize)]
pub struct OsintEntry {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    #[serde(default)]
    pub classification: Option<String>,
}

impl OsintEntry {
    /// `"status=200; email=a@b; phone=+1…; class=safe"`, or the url when
    /// the entry carries no metadata at all.
    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(status) = &self.status {
            let status = match status {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            parts.push(format!("status={status}"));
        }
        parts.extend(self.emails.iter().map(|email| format!("email={email}")));
        parts.extend(self.phones.iter().map(|phone| format!("phone={phone}")));
        if let Some(classification) = &self.classification {
            parts.push(format!("class={classification}"));
        }
        if parts.is_empty() {
            format!("URL: {}", self.url)
        } else {
            parts.iter().join("; ")
        }
    }
}

/// Parses an OSINT artifact and dispatches on its shape.
pub fn adapt_osint_json(raw: &[u8], starting_url: &str) -> Result<Node, AdapterError> {
    let input: OsintInput = serde_json::from_slice(raw)?;
    Ok(adapt_osint(input, starting_url))
}

pub fn adapt_osint(input: OsintInput, starting_url: &str) -> Node {
    match input {
        OsintInput::Recursive(tree) => adapt_foreign_tree(tree),
        OsintInput::Flat(entries) => adapt_flat(entries, starting_url),
    }
}

/// Builds `root → host categories → url subcategories` out of flat scan
/// entries, folding the per-url metadata into the descriptions.
fn adapt_flat(entries: Vec<OsintEntry>, starting_url: &str) -> Node {
    let root_url = canonicalize_seed(starting_url)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| starting_url.to_string());
    let mut root = Node::new(root_url.clone(), NodeKind::Root, root_url);

    let mut by_host: IndexMap<String, Vec<(String, OsintEntry)>> = IndexMap::new();
    for entry in entries {
        match canonicalize_seed(&entry.url) {
            Ok(canonical) => {
                let host = canonical
                    .host_str()
                    .unwrap_or(UNPARSED_HOST)
                    .to_string();
                by_host
                    .entry(host)
                    .or_default()
                    .push((canonical.to_string(), entry));
            }
            Err(_) => {
                let url = entry.url.clone();
                by_host
                    .entry(UNPARSED_HOST.to_string())
                    .or_default()
                    .push((url, entry));
            }
        }
    }

    for (host, urls) in by_host {
        let host_url = if host == UNPARSED_HOST {
            String::new()
        } else {
            // the origin of the first entry names the bucket
            canonicalize_seed(&urls[0].0)
                .map(|url| format!("{}://{host}/", url.scheme()))
                .unwrap_or_default()
        };
        let mut host_node = Node {
            name: host.clone(),
            kind: NodeKind::Category,
            description: format!("{} urls discovered on {host}", urls.len()),
            url: host_url,
            children: Vec::new(),
        };
        for (url, entry) in urls {
            host_node.children.push(Node {
                name: url.clone(),
                kind: NodeKind::Subcategory,
                description: entry.describe(),
                url,
                children: Vec::new(),
            });
        }
        root.children.push(host_node);
    }
    root
}
