//! Rank-tracking API clients.
//!
//! Both providers share the [`QueryProvider`] contract: bind a request, fetch
//! the raw body synchronously, then parse it into normalized
//! [`QueryResult`]s on demand. Parsing is recomputed on every call; nothing is
//! cached between `parse()` calls, and a new `request()` replaces the stored
//! body.

pub mod semrush;
pub mod serpstat;
pub mod traffic;

pub use semrush::{FieldCode, Filter, FilterList, SemrushQuery, Sign};
pub use serpstat::{FilterKey, SerpstatQuery, SortOrder};
pub use traffic::estimated_traffic;

use crate::config::Config;
use crate::error::{EnrichError, Result};
use crate::transport::{HttpTransport, Transport};
use log::warn;
use serde::Serialize;

pub const DEFAULT_LIMIT: usize = 25;

/// Canonical column names of a [`QueryResult`], in serialization order.
pub const RESULT_HEADERS: [&str; 8] = [
    "Keyword",
    "Position",
    "Position Difference",
    "Traffic (%)",
    "Search Volume",
    "Estimated Monthly Traffic",
    "Url",
    "Trends",
];

/// One lookup against a provider. `method` and `region` fall back to the
/// provider's defaults when unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub key: String,
    pub limit: usize,
    pub method: Option<String>,
    pub region: Option<String>,
}

impl QueryRequest {
    pub fn new(key: impl Into<String>) -> Self {
        QueryRequest {
            key: key.into(),
            limit: DEFAULT_LIMIT,
            method: None,
            region: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// A ranking record normalized across providers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    #[serde(rename = "Keyword")]
    pub keyword: String,
    #[serde(rename = "Position")]
    pub position: u32,
    #[serde(rename = "Position Difference")]
    pub position_diff: Option<String>,
    #[serde(rename = "Traffic (%)")]
    pub traffic_pct: f64,
    #[serde(rename = "Search Volume")]
    pub search_volume: u64,
    #[serde(rename = "Estimated Monthly Traffic")]
    pub estimated_traffic: u64,
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(rename = "Trends")]
    pub trend: Option<String>,
}

pub trait QueryProvider {
    /// Replaces the API key used for subsequent requests.
    fn configure(&mut self, api_key: &str);

    /// Columns of a normalized result, in output order.
    fn headers(&self) -> &'static [&'static str] {
        &RESULT_HEADERS
    }

    /// Performs one blocking request and stores its raw body, replacing any
    /// previous response.
    fn request(&mut self, request: &QueryRequest) -> Result<&mut Self>;

    /// Parses the stored body. Provider-reported errors are `Ok(vec![])`;
    /// undecodable bodies and missing responses are errors.
    fn parse(&self) -> Result<Vec<QueryResult>>;

    /// Tolerant view of [`parse`](Self::parse): failures are logged and read
    /// as "no results".
    fn results(&self) -> Vec<QueryResult> {
        match self.parse() {
            Ok(results) => results,
            Err(e) => {
                warn!("Discarding unreadable rank response: {}", e);
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKind {
    Semrush,
    Serpstat,
}

/// The provider picked for a run.
pub enum RankProvider<T: Transport = HttpTransport> {
    Semrush(SemrushQuery<T>),
    Serpstat(SerpstatQuery<T>),
}

impl RankProvider<HttpTransport> {
    /// Builds the provider named by `kind`. An explicit `api_key` wins over
    /// the token found in `config`.
    pub fn from_config(kind: ProviderKind, config: &Config, api_key: Option<&str>) -> Result<Self> {
        let transport = HttpTransport::new(config.rank_timeout)?;

        let provider = match kind {
            ProviderKind::Semrush => {
                let key = api_key
                    .map(str::to_string)
                    .or_else(|| config.semrush_token.clone())
                    .ok_or_else(|| EnrichError::Config("no SEMrush API key (SEMRUSH_TOKEN)".to_string()))?;
                RankProvider::Semrush(
                    SemrushQuery::new(transport, key).with_endpoint(&config.semrush_endpoint),
                )
            }
            ProviderKind::Serpstat => {
                let key = api_key
                    .map(str::to_string)
                    .or_else(|| config.serpstat_token.clone())
                    .ok_or_else(|| EnrichError::Config("no SERPstat API key (SERPSTAT_TOKEN)".to_string()))?;
                RankProvider::Serpstat(
                    SerpstatQuery::new(transport, key)
                        .with_endpoint(&config.serpstat_endpoint)
                        .with_rate_limit(config.serpstat_rps),
                )
            }
        };

        Ok(provider)
    }
}

impl<T: Transport> RankProvider<T> {
    pub fn kind(&self) -> ProviderKind {
        match self {
            RankProvider::Semrush(_) => ProviderKind::Semrush,
            RankProvider::Serpstat(_) => ProviderKind::Serpstat,
        }
    }
}

impl<T: Transport> QueryProvider for RankProvider<T> {
    fn configure(&mut self, api_key: &str) {
        match self {
            RankProvider::Semrush(q) => q.configure(api_key),
            RankProvider::Serpstat(q) => q.configure(api_key),
        }
    }

    fn headers(&self) -> &'static [&'static str] {
        match self {
            RankProvider::Semrush(q) => q.headers(),
            RankProvider::Serpstat(q) => q.headers(),
        }
    }

    fn request(&mut self, request: &QueryRequest) -> Result<&mut Self> {
        match self {
            RankProvider::Semrush(q) => {
                q.request(request)?;
            }
            RankProvider::Serpstat(q) => {
                q.request(request)?;
            }
        }
        Ok(self)
    }

    fn parse(&self) -> Result<Vec<QueryResult>> {
        match self {
            RankProvider::Semrush(q) => q.parse(),
            RankProvider::Serpstat(q) => q.parse(),
        }
    }
}
