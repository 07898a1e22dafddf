//! arXiv adapter (Atom API)

use super::{extract_attrs, extract_blocks, extract_tag, squash_whitespace, FetchContext, Fetcher, UpdateFrequency};
use crate::error::{Error, Result};
use crate::models::{Priority, RecordStub};
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://export.arxiv.org";
const MAX_PAGE: usize = 100;

pub struct ArxivFetcher {
    tag: String,
    base_url: String,
    client: reqwest::Client,
}

impl ArxivFetcher {
    pub fn new(tag: &str, base_url: Option<&str>, client: reqwest::Client) -> Self {
        Self {
            tag: tag.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client,
        }
    }

    fn query_url(&self, query: &str, max_results: usize) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/api/query", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("search_query", &format!("all:{}", query))
            .append_pair("start", "0")
            .append_pair("max_results", &max_results.clamp(1, MAX_PAGE).to_string())
            .append_pair("sortBy", "submittedDate");
        Ok(url)
    }

    async fn query(&self, ctx: &FetchContext, query: &str) -> Result<Vec<RecordStub>> {
        let url = self.query_url(query, ctx.max_results)?;
        ctx.permit(url.as_str()).await?;

        debug!("arXiv query: {}", url);
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(Error::Adapter(format!(
                "arXiv returned HTTP {} for {}",
                response.status(),
                url
            )));
        }
        let body = response.text().await?;
        let stubs = parse_feed(&self.tag, &body);
        info!("arXiv query '{}' returned {} entries", query, stubs.len());
        Ok(stubs)
    }
}

fn arxiv_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"abs/([^\s?#]+?)(v\d+)?$").ok())
        .as_ref()
}

/// Parse an Atom feed into stubs; malformed entries are skipped
pub fn parse_feed(tag: &str, body: &str) -> Vec<RecordStub> {
    extract_blocks(body, "entry")
        .into_iter()
        .filter_map(|entry| parse_entry(tag, entry))
        .collect()
}

fn parse_entry(tag: &str, entry: &str) -> Option<RecordStub> {
    let id_url = extract_tag(entry, "id")?;
    let arxiv_id = arxiv_id_pattern()?
        .captures(&id_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())?;

    let title = squash_whitespace(&extract_tag(entry, "title").unwrap_or_default());
    let summary = squash_whitespace(&extract_tag(entry, "summary").unwrap_or_default());
    if title.is_empty() && summary.is_empty() {
        return None;
    }

    let authors: Vec<String> = extract_blocks(entry, "author")
        .into_iter()
        .filter_map(|author| extract_tag(author, "name"))
        .collect();
    let categories = extract_attrs(entry, "category", "term");

    let mut stub = RecordStub::new(tag, arxiv_id.clone())
        .with_url(format!("https://arxiv.org/abs/{}", arxiv_id))
        .with_field("title", title)
        .with_field("abstract", summary)
        .with_metadata("authors", serde_json::json!(authors))
        .with_metadata("categories", serde_json::json!(categories))
        .with_metadata(
            "pdf_url",
            serde_json::json!(format!("https://arxiv.org/pdf/{}", arxiv_id)),
        );
    stub.license = "arXiv non-exclusive".to_string();

    if let Some(published) = extract_tag(entry, "published") {
        stub = stub.with_metadata("published_at", serde_json::json!(published));
    }
    for category in categories {
        stub = stub.with_tag(category);
    }
    Some(stub)
}

#[async_trait]
impl Fetcher for ArxivFetcher {
    fn source_tag(&self) -> &str {
        &self.tag
    }

    fn record_type(&self) -> &str {
        "academic_paper"
    }

    fn text_fields(&self) -> &[&'static str] {
        &["title", "abstract"]
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn update_frequency(&self) -> UpdateFrequency {
        UpdateFrequency::Daily
    }

    fn search<'a>(
        &'a self,
        ctx: &'a FetchContext,
        queries: &'a [String],
    ) -> BoxStream<'a, Result<RecordStub>> {
        stream::iter(queries)
            .then(move |query| self.query(ctx, query))
            .flat_map(|batch| match batch {
                Ok(stubs) => stream::iter(stubs.into_iter().map(Ok)).left_stream(),
                Err(e) => stream::once(future::ready(Err(e))).right_stream(),
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EthicsConfig;
    use crate::ethics::{EthicsGate, StaticRobotsProbe};
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/2401.01234v2</id>
    <published>2024-01-03T18:00:00Z</published>
    <title>Cognitive Architectures
      for Language Agents</title>
    <summary>We study reasoning &amp; planning in agents.</summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <category term="cs.AI" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>not-an-arxiv-id</id>
    <title>Broken</title>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let stubs = parse_feed("arxiv", FEED);
        assert_eq!(stubs.len(), 1);
        let stub = &stubs[0];
        assert_eq!(stub.source_id, "2401.01234");
        assert_eq!(stub.url.as_deref(), Some("https://arxiv.org/abs/2401.01234"));
        assert_eq!(stub.payload["title"], "Cognitive Architectures for Language Agents");
        assert_eq!(stub.payload["abstract"], "We study reasoning & planning in agents.");
        assert!(stub.tags.contains("cs.AI"));
        assert_eq!(stub.metadata["authors"], serde_json::json!(["Ada Lovelace", "Alan Turing"]));
        assert_eq!(stub.metadata["published_at"], serde_json::json!("2024-01-03T18:00:00Z"));
    }

    #[tokio::test]
    async fn test_search_goes_through_gate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("search_query", "all:agents"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let gate = Arc::new(EthicsGate::open(
            &EthicsConfig::default(),
            "accrete",
            &tmp.path().join("ethics_log.json"),
            Arc::new(ManualClock::default()),
            Arc::new(StaticRobotsProbe::allow_all()),
        ));
        let ctx = FetchContext {
            gate: gate.clone(),
            source_tag: "arxiv".to_string(),
            priority: Priority::High,
            max_results: 10,
        };

        let fetcher = ArxivFetcher::new("arxiv", Some(&server.uri()), reqwest::Client::new());
        let queries = vec!["agents".to_string()];
        let stubs: Vec<_> = fetcher.search(&ctx, &queries).collect().await;

        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].as_ref().unwrap().source_id, "2401.01234");
        assert_eq!(gate.counters().await.requests, 1);
    }

    #[tokio::test]
    async fn test_search_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let ctx = FetchContext {
            gate: Arc::new(EthicsGate::open(
                &EthicsConfig::default(),
                "accrete",
                &tmp.path().join("ethics_log.json"),
                Arc::new(ManualClock::default()),
                Arc::new(StaticRobotsProbe::allow_all()),
            )),
            source_tag: "arxiv".to_string(),
            priority: Priority::High,
            max_results: 10,
        };

        let fetcher = ArxivFetcher::new("arxiv", Some(&server.uri()), reqwest::Client::new());
        let queries = vec!["a".to_string(), "b".to_string()];
        let results: Vec<_> = fetcher.search(&ctx, &queries).collect().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Err(Error::Adapter(_)))));
    }
}
