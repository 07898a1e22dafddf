//! GitHub adapter (REST search API)

use super::{FetchContext, Fetcher, UpdateFrequency};
use crate::error::{Error, Result};
use crate::models::{Priority, Record, RecordStub};
use async_trait::async_trait;
use chrono::Utc;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const MAX_PAGE: usize = 100;
const MAX_README_CHARS: usize = 20_000;

pub struct GithubFetcher {
    tag: String,
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    html_url: String,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    license: Option<License>,
    #[serde(default)]
    pushed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct License {
    #[serde(default)]
    spdx_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl GithubFetcher {
    pub fn new(
        tag: &str,
        base_url: Option<&str>,
        token: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            tag: tag.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            token,
            client,
        }
    }

    fn request(&self, url: Url, accept: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn query(&self, ctx: &FetchContext, query: &str) -> Result<Vec<RecordStub>> {
        let mut url = Url::parse(&format!("{}/search/repositories", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("sort", "stars")
            .append_pair("order", "desc")
            .append_pair("per_page", &ctx.max_results.clamp(1, MAX_PAGE).to_string());
        ctx.permit(url.as_str()).await?;

        debug!("GitHub search: {}", url);
        let response = self
            .request(url.clone(), "application/vnd.github+json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Adapter(format!(
                "GitHub returned HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let body: SearchResponse = response.json().await?;
        let stubs: Vec<RecordStub> = body.items.into_iter().map(|r| self.stub(r)).collect();
        info!("GitHub query '{}' returned {} repositories", query, stubs.len());
        Ok(stubs)
    }

    fn stub(&self, repo: Repository) -> RecordStub {
        let mut stub = RecordStub::new(&self.tag, repo.full_name.clone())
            .with_url(repo.html_url)
            .with_field("name", repo.name)
            .with_field("description", repo.description.unwrap_or_default())
            .with_metadata("full_name", serde_json::json!(repo.full_name))
            .with_metadata("stars", serde_json::json!(repo.stargazers_count))
            .with_metadata("forks", serde_json::json!(repo.forks_count));

        if let Some(language) = repo.language {
            stub = stub.with_metadata("language", serde_json::json!(language));
        }
        if let Some(pushed_at) = repo.pushed_at {
            stub = stub.with_metadata("published_at", serde_json::json!(pushed_at));
        }
        if let Some(license) = repo.license {
            stub.license = license
                .spdx_id
                .filter(|id| id != "NOASSERTION")
                .or(license.name)
                .unwrap_or_default();
        }
        for topic in repo.topics {
            stub = stub.with_tag(topic);
        }
        stub
    }

    async fn readme(&self, ctx: &FetchContext, full_name: &str) -> Result<Option<String>> {
        let url = Url::parse(&format!("{}/repos/{}/readme", self.base_url, full_name))?;
        ctx.permit(url.as_str()).await?;

        let response = self.request(url, "application/vnd.github.raw").send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Adapter(format!(
                "GitHub README for {} returned HTTP {}",
                full_name,
                response.status()
            )));
        }
        let markdown = response.text().await?;
        Ok(Some(markdown_to_text(&markdown)))
    }
}

/// Plain text from markdown, capped in length
pub fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::new();
    let mut in_code_block = false;

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            Event::Text(t) | Event::Code(t) if !in_code_block => text.push_str(&t),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item) => text.push('\n'),
            _ => {}
        }
    }

    let trimmed = text.trim();
    if trimmed.chars().count() > MAX_README_CHARS {
        trimmed.chars().take(MAX_README_CHARS).collect()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl Fetcher for GithubFetcher {
    fn source_tag(&self) -> &str {
        &self.tag
    }

    fn record_type(&self) -> &str {
        "code_repository"
    }

    fn text_fields(&self) -> &[&'static str] {
        &["name", "description"]
    }

    fn priority(&self) -> Priority {
        Priority::Medium
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

    async fn extract(&self, ctx: &FetchContext, stub: &RecordStub) -> Result<Record> {
        let mut stub = stub.clone();
        if let Some(readme) = self.readme(ctx, &stub.source_id).await? {
            if !readme.is_empty() {
                stub.payload.insert("readme".to_string(), readme);
            }
        }
        Ok(stub.into_record(self.record_type(), self.text_fields(), Utc::now()))
    }
}
