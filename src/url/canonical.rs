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

use thiserror::Error;
use url::Url;

/// Path suffixes that never lead to a document worth attaching.
/// Checked case-insensitively against the decoded path.
pub const DENIED_SUFFIXES: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".pdf", ".doc", ".docx", ".xls",
    ".xlsx", ".ppt", ".pptx", ".zip", ".rar", ".tar", ".gz", ".mp3", ".mp4", ".avi", ".mov",
    ".wmv", ".css", ".js", ".xml", ".rss",
];

/// The reasons a href never becomes a crawlable url.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonicalizeError {
    #[error("the url could not be parsed: {0}")]
    Parse(#[from] url::ParseError),
    #[error("the scheme {0:?} is not crawlable")]
    UnsupportedScheme(String),
    #[error("the url has no host")]
    MissingHost,
    #[error("the path points to a non-document resource")]
    DeniedSuffix,
    #[error("the href is fragment-only navigation")]
    FragmentOnly,
}

/// Resolves `href` against `base` and normalizes the result.
///
/// Accepted urls are absolute, http(s)-only, fragment-free, with scheme and
/// host lowercased. Query and port survive untouched. Anything pointing at a
/// media or asset suffix is rejected, as are `javascript:`/`mailto:` targets.
pub fn canonicalize(base: &Url, href: &str) -> Result<Url, CanonicalizeError> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return Err(CanonicalizeError::FragmentOnly);
    }
    if let Some((scheme, _)) = href.split_once(':') {
        let scheme = scheme.to_ascii_lowercase();
        if scheme == "javascript" || scheme == "mailto" {
            return Err(CanonicalizeError::UnsupportedScheme(scheme));
        }
    }
    let resolved = base.join(href)?;
    normalize(resolved)
}

/// Parses and normalizes a seed url entered by an operator.
pub fn canonicalize_seed(raw: &str) -> Result<Url, CanonicalizeError> {
    normalize(Url::parse(raw.trim())?)
}

/// `true` iff both urls point at exactly the same host.
/// No eTLD collapsing, `www.h.test` and `h.test` stay distinct.
pub fn same_host(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

fn normalize(mut url: Url) -> Result<Url, CanonicalizeError> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(CanonicalizeError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(CanonicalizeError::MissingHost);
    }
    url.set_fragment(None);
    let path = url.path().to_ascii_lowercase();
    if DENIED_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
        return Err(CanonicalizeError::DeniedSuffix);
    }
    Ok(url)
}

#[cfg(test)]
mod test {
    use super::{canonicalize, canonicalize_seed, same_host, CanonicalizeError};
    use url::Url;

    fn base() -> Url {
        Url::parse("http://h.test/dir/page.html").unwrap()
    }

    #[test]
    fn resolves_relative_hrefs() {
        assert_eq!(
            canonicalize(&base(), "../a").unwrap().as_str(),
            "http://h.test/a"
        );
        assert_eq!(
            canonicalize(&base(), "/b?x=1").unwrap().as_str(),
            "http://h.test/b?x=1"
        );
    }

    #[test]
    fn lowercases_scheme_and_host_only() {
        let url = canonicalize(&base(), "HTTP://H.TEST/UPPER/Path").unwrap();
        assert_eq!(url.as_str(), "http://h.test/UPPER/Path");
    }

    #[test]
    fn strips_fragments() {
        let url = canonicalize(&base(), "/a#section").unwrap();
        assert_eq!(url.as_str(), "http://h.test/a");
    }

    #[test]
    fn preserves_query_and_port() {
        let url = canonicalize(&base(), "http://h.test:8080/a?q=Hello+World&p=2").unwrap();
        assert_eq!(url.as_str(), "http://h.test:8080/a?q=Hello+World&p=2");
    }

    #[test]
    fn rejects_non_document_targets() {
        assert_eq!(
            canonicalize(&base(), "/photo.JPG").unwrap_err(),
            CanonicalizeError::DeniedSuffix
        );
        assert_eq!(
            canonicalize(&base(), "/style.css").unwrap_err(),
            CanonicalizeError::DeniedSuffix
        );
        assert_eq!(
            canonicalize(&base(), "mailto:x@h.test").unwrap_err(),
            CanonicalizeError::UnsupportedScheme("mailto".to_string())
        );
        assert_eq!(
            canonicalize(&base(), "javascript:void(0)").unwrap_err(),
            CanonicalizeError::UnsupportedScheme("javascript".to_string())
        );
        assert_eq!(
            canonicalize(&base(), "#top").unwrap_err(),
            CanonicalizeError::FragmentOnly
        );
        assert_eq!(
            canonicalize(&base(), "ftp://h.test/a").unwrap_err(),
            CanonicalizeError::UnsupportedScheme("ftp".to_string())
        );
    }

    #[test]
    fn rejects_bad_seeds() {
        assert!(matches!(
            canonicalize_seed("not a url"),
            Err(CanonicalizeError::Parse(_))
        ));
        assert!(matches!(
            canonicalize_seed("file:///etc/passwd"),
            Err(CanonicalizeError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn same_host_is_exact() {
        let a = Url::parse("http://h.test/a").unwrap();
        let b = Url::parse("https://H.TEST/b").unwrap();
        let c = Url::parse("http://www.h.test/").unwrap();
        assert!(same_host(&a, &b));
        assert!(!same_host(&a, &c));
    }
}
