//! robots.txt retrieval and matching

use async_trait::async_trait;
use robotstxt::DefaultMatcher;
use tracing::debug;
use url::Url;

/// Parsed robots.txt rules
#[derive(Debug, Clone)]
pub struct RobotsRules {
    content: String,
}

impl RobotsRules {
    /// Parse robots.txt content
    pub fn parse(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Check if a path is allowed for a user agent
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        let allowed = matcher.one_agent_allowed_by_robots(&self.content, user_agent, path);

        if !allowed {
            debug!("robots.txt disallows {} for {}", path, user_agent);
        }

        allowed
    }

    /// Crawl-delay that applies to `user_agent`, in seconds.
    ///
    /// Consecutive `User-agent` lines share one group. A group naming the
    /// agent's product token wins over `*`. Values that are not positive
    /// finite numbers are ignored and the result never exceeds
    /// [`MAX_CRAWL_DELAY_SECONDS`].
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let token = product_token(user_agent);
        let mut groups: Vec<AgentGroup> = Vec::new();
        let mut collecting_agents = false;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !collecting_agents {
                        groups.push(AgentGroup::default());
                        collecting_agents = true;
                    }
                    if !value.is_empty() {
                        if let Some(group) = groups.last_mut() {
                            group.agents.push(value.to_ascii_lowercase());
                        }
                    }
                }
                "crawl-delay" => {
                    collecting_agents = false;
                    let Some(group) = groups.last_mut() else {
                        continue;
                    };
                    if group.delay.is_none() {
                        group.delay = value
                            .parse::<f64>()
                            .ok()
                            .filter(|d| d.is_finite() && *d > 0.0);
                    }
                }
                _ => collecting_agents = false,
            }
        }

        let specific = groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && *a == token))
            .find_map(|g| g.delay);
        let fallback = || {
            groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .find_map(|g| g.delay)
        };

        specific
            .or_else(fallback)
            .map(|d| d.min(MAX_CRAWL_DELAY_SECONDS))
    }
}

/// Upper bound applied to any advertised Crawl-delay
pub const MAX_CRAWL_DELAY_SECONDS: f64 = 3600.0;

#[derive(Debug, Default)]
struct AgentGroup {
    agents: Vec<String>,
    delay: Option<f64>,
}

/// `accrete/0.1 (+https://x)` -> `accrete`
fn product_token(user_agent: &str) -> String {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Outcome of asking an origin for its robots.txt
#[derive(Debug, Clone, PartialEq)]
pub enum RobotsFetch {
    /// The origin served a robots.txt
    Found(String),
    /// No robots.txt (4xx); everything is allowed
    Missing,
    /// Network error or 5xx; the configured default applies
    Unreachable(String),
}

/// Source of robots.txt documents
#[async_trait]
pub trait RobotsProbe: Send + Sync {
    async fn fetch(&self, origin: &Url) -> RobotsFetch;
}

/// Fetches `<origin>/robots.txt` over HTTP
pub struct HttpRobotsProbe {
    client: reqwest::Client,
}

impl HttpRobotsProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RobotsProbe for HttpRobotsProbe {
    async fn fetch(&self, origin: &Url) -> RobotsFetch {
        let robots_url = match origin.join("/robots.txt") {
            Ok(url) => url,
            Err(e) => return RobotsFetch::Unreachable(e.to_string()),
        };
        debug!("Fetching robots.txt from {}", robots_url);

        match self.client.get(robots_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => RobotsFetch::Found(text),
                Err(e) => RobotsFetch::Unreachable(e.to_string()),
            },
            Ok(resp) if resp.status().is_client_error() => RobotsFetch::Missing,
            Ok(resp) => RobotsFetch::Unreachable(format!("HTTP {}", resp.status())),
            Err(e) => RobotsFetch::Unreachable(e.to_string()),
        }
    }
}

/// Answers every origin with the same result. Used offline and in tests.
#[derive(Debug, Clone)]
pub struct StaticRobotsProbe(pub RobotsFetch);

impl StaticRobotsProbe {
    pub fn allow_all() -> Self {
        Self(RobotsFetch::Missing)
    }
}

#[async_trait]
impl RobotsProbe for StaticRobotsProbe {
    async fn fetch(&self, _origin: &Url) -> RobotsFetch {
        self.0.clone()
    }
}
