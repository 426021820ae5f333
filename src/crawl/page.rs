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

use scraper::{Html, Selector};
use std::sync::OnceLock;

fn title_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("title").unwrap())
}

fn anchor_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("a[href]").unwrap())
}

/// What the crawler keeps of a fetched page.
#[derive(Debug, Clone, Default)]
pub struct DocumentInfo {
    /// The first `<title>` text, trimmed. None when absent or blank.
    pub title: Option<String>,
    /// Raw href values of all anchors, in document order, unresolved.
    pub links: Vec<String>,
}

/// Extracts title and outlinks from an html body. The parse tree never
/// leaves this function, only owned strings do.
pub fn parse_document(html: &str) -> DocumentInfo {
    let document = Html::parse_document(html);
    let title = document
        .select(title_selector())
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty());
    let links = document
        .select(anchor_selector())
        .filter_map(|element| element.value().attr("href"))
        .map(str::to_string)
        .collect();
    DocumentInfo { title, links }
}
