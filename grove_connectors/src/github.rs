//! GitHub audit log connector — fetches audit events via the REST API.
//!
//! Authenticates with a Personal Access Token carried in the instance's
//! `key`. Supports organisation and enterprise scopes, self-hosted API
//! hosts via `fqdn`, and a configurable `delay` (minutes) which holds back
//! collection until records have had time to become consistent — GitHub
//! backfills audit entries without guarantees on lag.
//!
//! The pointer is the `@timestamp` of the newest collected record, in
//! milliseconds since the epoch; the first run collects the last week.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::Value;

use grove_core::connector::{Connector, InitialPointer};
use grove_core::constants::DATESTAMP_FORMAT;
use grove_core::model::ConnectorConfig;
use grove_core::pipeline::Run;

const SUPPORTED_SCOPES: [&str; 2] = ["orgs", "enterprises"];
const PAGE_SIZE: u32 = 100;

/// GitHub audit log connector.
///
/// Requires a token with `read:audit_log` scope (organisations) or
/// enterprise admin rights (enterprises).
#[derive(Debug)]
pub struct GitHubAuditLogConnector {
    client: reqwest::Client,
}

impl GitHubAuditLogConnector {
    /// Creates the connector with a default HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("grove/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Creates the connector with a custom HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The configured scope: `orgs` (default) or `enterprises`.
    fn scope(config: &ConnectorConfig) -> Result<String> {
        let candidate = config.extra_str("scope").unwrap_or("orgs").to_lowercase();
        if !SUPPORTED_SCOPES.contains(&candidate.as_str()) {
            bail!(
                "configured 'scope' is not valid, only {:?} are supported",
                SUPPORTED_SCOPES
            );
        }
        Ok(candidate)
    }

    /// The configured API host, or the GitHub SaaS default.
    fn fqdn(config: &ConnectorConfig) -> &str {
        config.extra_str("fqdn").unwrap_or("api.github.com")
    }

    /// Minutes to hold back collection for log consistency (default 0).
    fn delay(config: &ConnectorConfig) -> i64 {
        config.extra_u64("delay").unwrap_or(0) as i64
    }

    /// Fetches one page of audit events.
    async fn fetch_page(
        &self,
        url: &str,
        token: &str,
        phrase: &str,
        include: &str,
        cursor: Option<&str>,
    ) -> Result<(Vec<Value>, Option<String>)> {
        let mut query = vec![
            ("phrase", phrase.to_string()),
            ("include", include.to_string()),
            ("order", "asc".to_string()),
            ("per_page", PAGE_SIZE.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("after", cursor.to_string()));
        }

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .query(&query)
            .send()
            .await
            .context("failed to call the GitHub audit log API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub API error fetching audit log: {status} - {body}");
        }

        let next = response
            .headers()
            .get("link")
            .and_then(|value| value.to_str().ok())
            .and_then(next_cursor);

        let entries: Vec<Value> = response
            .json()
            .await
            .context("failed to parse GitHub audit log response")?;

        Ok((entries, next))
    }
}

impl Default for GitHubAuditLogConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the keyset cursor from a `Link` header's `rel="next"` entry.
fn next_cursor(link: &str) -> Option<String> {
    for part in link.split(',') {
        let (target, rel) = part.split_once(';')?;
        if !rel.contains("rel=\"next\"") {
            continue;
        }

        let url = target.trim().trim_start_matches('<').trim_end_matches('>');
        let (_, query) = url.split_once('?')?;
        for pair in query.split('&') {
            if let Some(cursor) = pair.strip_prefix("after=") {
                return Some(cursor.to_string());
            }
        }
    }
    None
}

#[async_trait]
impl Connector for GitHubAuditLogConnector {
    fn name(&self) -> &'static str {
        "github_audit_log"
    }

    // The leading special character requires a quoted path segment.
    fn pointer_path(&self) -> &'static str {
        "\"@timestamp\""
    }

    fn default_frequency(&self) -> u64 {
        600
    }

    fn initial_pointer(&self) -> InitialPointer {
        InitialPointer::EpochMillisDaysAgo(7)
    }

    async fn collect(&self, run: &mut Run) -> anyhow::Result<()> {
        let config = run.config().clone();
        if config.key.is_empty() {
            bail!("GitHub audit connector requires a Personal Access Token as its key");
        }

        let scope = Self::scope(&config)?;
        let url = format!(
            "https://{}/{}/{}/audit-log",
            Self::fqdn(&config),
            scope,
            config.identity
        );

        // The pointer is epoch milliseconds of the newest collected record.
        let millis: i64 = run
            .pointer()
            .parse()
            .context("stored pointer is not an epoch-millisecond timestamp")?;
        let Some(start) = Utc.timestamp_millis_opt(millis).single() else {
            bail!("stored pointer is outside the representable time range");
        };
        let end = Utc::now() - Duration::minutes(Self::delay(&config));

        if end <= start {
            tracing::debug!(
                "Collection end time is prior to start, skipping: {} to {}",
                start.format(DATESTAMP_FORMAT),
                end.format(DATESTAMP_FORMAT)
            );
            return Ok(());
        }

        let phrase = format!(
            "created:>={} created:<={}",
            start.format(DATESTAMP_FORMAT),
            end.format(DATESTAMP_FORMAT)
        );

        let mut cursor: Option<String> = None;
        loop {
            let (entries, next) = self
                .fetch_page(&url, &config.key, &phrase, &config.operation, cursor.as_deref())
                .await?;

            if !entries.is_empty() {
                run.emit(entries).await?;
            }

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(())
    }
}
