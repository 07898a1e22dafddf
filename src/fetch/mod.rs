//! Source fetchers
//!
//! A fetcher turns queries into record stubs (`search`) and stubs into
//! records (`extract`). Fetchers never pace themselves: every network call
//! goes through [`FetchContext::permit`], which delegates to the ethics gate.

mod arxiv;
mod github;
mod local;

pub use arxiv::ArxivFetcher;
pub use github::GithubFetcher;
pub use local::LocalFetcher;

use crate::config::{Config, FetchConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::ethics::{EthicsGate, Verdict};
use crate::models::{canonical_text, content_hash, Priority, Record, RecordStub};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

/// How often a source is worth polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFrequency {
    EveryCycle,
    Hourly,
    Daily,
    Weekly,
}

impl UpdateFrequency {
    pub fn min_gap(&self) -> Duration {
        match self {
            UpdateFrequency::EveryCycle => Duration::ZERO,
            UpdateFrequency::Hourly => Duration::from_secs(3600),
            UpdateFrequency::Daily => Duration::from_secs(86_400),
            UpdateFrequency::Weekly => Duration::from_secs(7 * 86_400),
        }
    }
}

/// Per-call handle given to fetchers
#[derive(Clone)]
pub struct FetchContext {
    pub gate: Arc<EthicsGate>,
    pub source_tag: String,
    pub priority: Priority,
    /// Upper bound on stubs worth producing for this call
    pub max_results: usize,
}

impl FetchContext {
    /// Ask the ethics gate for permission to request `url`
    pub async fn permit(&self, url: &str) -> Result<()> {
        match self
            .gate
            .validate(Some(url), &self.source_tag, self.priority)
            .await
        {
            Verdict::Ok => Ok(()),
            _ => Err(Error::RobotsDisallowed(url.to_string())),
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Tag stamped on every stub
    fn source_tag(&self) -> &str;

    /// Record type reported in metrics
    fn record_type(&self) -> &str {
        "document"
    }

    /// Payload fields hashed into `content_hash`, in order
    fn text_fields(&self) -> &[&'static str] {
        &[]
    }

    /// Scheduling priority when the configuration declares none
    fn priority(&self) -> Priority {
        Priority::Default
    }

    fn update_frequency(&self) -> UpdateFrequency {
        UpdateFrequency::EveryCycle
    }

    /// Lazily yield stubs for the given queries
    fn search<'a>(
        &'a self,
        ctx: &'a FetchContext,
        queries: &'a [String],
    ) -> BoxStream<'a, Result<RecordStub>>;

    /// Fill in the full record for a stub. Must be idempotent.
    async fn extract(&self, _ctx: &FetchContext, stub: &RecordStub) -> Result<Record> {
        Ok(stub
            .clone()
            .into_record(self.record_type(), self.text_fields(), Utc::now()))
    }

    /// Dedup key for a stub
    fn hash_for(&self, stub: &RecordStub) -> String {
        content_hash(&canonical_text(&stub.payload, self.text_fields()))
    }
}

/// Shared HTTP client for the built-in adapters
pub fn http_client(config: &FetchConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .gzip(true)
        .brotli(true)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Construct the adapter named by a source entry
pub fn build_fetcher(
    source: &SourceConfig,
    config: &Config,
    client: &reqwest::Client,
) -> Result<Arc<dyn Fetcher>> {
    let fetcher: Arc<dyn Fetcher> = match source.adapter_name() {
        "arxiv" => Arc::new(ArxivFetcher::new(
            &source.tag,
            source.base_url.as_deref(),
            client.clone(),
        )),
        "github" => {
            let token = source
                .token_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|t| !t.is_empty());
            Arc::new(GithubFetcher::new(
                &source.tag,
                source.base_url.as_deref(),
                token,
                client.clone(),
            ))
        }
        "local" => {
            let dir = source.path.as_ref().ok_or_else(|| {
                Error::Config(format!("Source '{}' needs a path", source.tag))
            })?;
            let dir = if dir.is_relative() {
                config.paths.base_dir.join(dir)
            } else {
                dir.clone()
            };
            Arc::new(LocalFetcher::new(&source.tag, dir))
        }
        other => {
            return Err(Error::Config(format!(
                "Unknown adapter '{}' for source '{}'",
                other, source.tag
            )))
        }
    };
    Ok(fetcher)
}

/// Extract the text of the first `<tag ...>...</tag>` element
pub(crate) fn extract_tag(content: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let end_tag = format!("</{}>", tag);

    let mut offset = 0;
    while let Some(found) = content[offset..].find(&open) {
        let start = offset + found;
        let after_name = start + open.len();
        let next = content[after_name..].chars().next();
        if !matches!(next, Some('>') | Some(' ') | Some('\n') | Some('\t') | Some('\r')) {
            offset = after_name;
            continue;
        }
        let value_start = after_name + content[after_name..].find('>')? + 1;
        return content[value_start..].find(&end_tag).map(|end| {
            decode_entities(content[value_start..value_start + end].trim())
        });
    }
    None
}

/// Split a document into the bodies of every `<tag>...</tag>` element
pub(crate) fn extract_blocks<'a>(content: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find(&open) {
        let body_start = start + open.len();
        match rest[body_start..].find(&end_tag) {
            Some(end) => {
                blocks.push(&rest[body_start..body_start + end]);
                rest = &rest[body_start + end + end_tag.len()..];
            }
            None => break,
        }
    }
    blocks
}

/// Values of `attr` on every `<tag .../>` element
pub(crate) fn extract_attrs(content: &str, tag: &str, attr: &str) -> Vec<String> {
    let open = format!("<{} ", tag);
    let needle = format!("{}=\"", attr);
    content
        .match_indices(&open)
        .filter_map(|(start, _)| {
            let element = &content[start..];
            let element = &element[..element.find('>')?];
            let value_start = element.find(&needle)? + needle.len();
            let value_len = element[value_start..].find('"')?;
            Some(decode_entities(&element[value_start..value_start + value_len]))
        })
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Collapse runs of whitespace into single spaces
pub(crate) fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tag() {
        let xml = "<entry><title>A &amp; B</title><titled>no</titled></entry>";
        assert_eq!(extract_tag(xml, "title"), Some("A & B".to_string()));
        assert_eq!(
            extract_tag(r#"<id type="x">abc</id>"#, "id"),
            Some("abc".to_string())
        );
        assert_eq!(extract_tag("<a>b</a>", "missing"), None);
    }

    #[test]
    fn test_extract_tag_skips_prefix_matches() {
        let xml = "<titled>no</titled><title>yes</title>";
        assert_eq!(extract_tag(xml, "title"), Some("yes".to_string()));
    }

    #[test]
    fn test_extract_blocks_and_attrs() {
        let xml = r#"<feed><entry><category term="cs.AI"/></entry><entry><category term="cs.LG" scheme="x"/></entry></feed>"#;
        let blocks = extract_blocks(xml, "entry");
        assert_eq!(blocks.len(), 2);
        assert_eq!(extract_attrs(blocks[0], "category", "term"), vec!["cs.AI"]);
        assert_eq!(extract_attrs(xml, "category", "term"), vec!["cs.AI", "cs.LG"]);
    }

    #[test]
    fn test_update_frequency_gap() {
        assert_eq!(UpdateFrequency::EveryCycle.min_gap(), Duration::ZERO);
        assert_eq!(UpdateFrequency::Daily.min_gap(), Duration::from_secs(86_400));
    }
}
