//! SERPstat-style rank/keyword API: JSON responses, client-side throttling.

use super::traffic::estimated_traffic;
use super::{QueryProvider, QueryRequest, QueryResult};
use crate::config::DEFAULT_SERPSTAT_ENDPOINT;
use crate::error::{EnrichError, Result};
use crate::rate_limiter::RateLimiter;
use crate::transport::{HttpTransport, Transport};
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

pub const MAX_PAGE_SIZE: usize = 1000;
pub const DEFAULT_METHOD: &str = "url_keywords";
pub const DEFAULT_SEARCH_ENGINE: &str = "g_us";

/// Filters the API accepts. Anything else is refused before it reaches the
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterKey {
    /// min position, 1-100
    PositionFrom,
    /// max position, 1-100
    PositionTo,
    /// min monthly searches
    QueriesFrom,
    /// max monthly searches
    QueriesTo,
    /// `not_contains` keeps misspelled keywords out, `contains` lets them in
    RightSpelling,
}

impl FilterKey {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterKey::PositionFrom => "position_from",
            FilterKey::PositionTo => "position_to",
            FilterKey::QueriesFrom => "queries_from",
            FilterKey::QueriesTo => "queries_to",
            FilterKey::RightSpelling => "right_spelling",
        }
    }
}

impl FromStr for FilterKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "position_from" => Ok(FilterKey::PositionFrom),
            "position_to" => Ok(FilterKey::PositionTo),
            "queries_from" => Ok(FilterKey::QueriesFrom),
            "queries_to" => Ok(FilterKey::QueriesTo),
            "right_spelling" => Ok(FilterKey::RightSpelling),
            other => Err(format!("unsupported filter '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

fn default_filters() -> BTreeMap<FilterKey, String> {
    BTreeMap::from([
        (FilterKey::PositionFrom, "1".to_string()),
        (FilterKey::PositionTo, "20".to_string()),
        (FilterKey::QueriesFrom, "500".to_string()),
        (FilterKey::RightSpelling, "not_contains".to_string()),
    ])
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn as_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0).round() as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub struct SerpstatQuery<T: Transport = HttpTransport> {
    transport: T,
    endpoint: String,
    key: String,
    query: Option<String>,
    method: String,
    search_engine: String,
    filters: BTreeMap<FilterKey, String>,
    sort_metric: String,
    sort_order: SortOrder,
    page: u32,
    page_size: usize,
    limiter: RateLimiter,
    request_uri: Option<String>,
    response: Option<String>,
}

impl<T: Transport> SerpstatQuery<T> {
    pub fn new(transport: T, api_key: impl Into<String>) -> Self {
        SerpstatQuery {
            transport,
            endpoint: DEFAULT_SERPSTAT_ENDPOINT.to_string(),
            key: api_key.into(),
            query: None,
            method: DEFAULT_METHOD.to_string(),
            search_engine: DEFAULT_SEARCH_ENGINE.to_string(),
            filters: default_filters(),
            sort_metric: "traff".to_string(),
            sort_order: SortOrder::Desc,
            page: 1,
            page_size: super::DEFAULT_LIMIT,
            limiter: RateLimiter::new(1.0),
            request_uri: None,
            response: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: f64) -> Self {
        self.limiter = RateLimiter::new(requests_per_second);
        self
    }

    pub fn without_rate_limit(mut self) -> Self {
        self.limiter = RateLimiter::disabled();
        self
    }

    pub fn set_filter(&mut self, key: FilterKey, value: impl ToString) {
        self.filters.insert(key, value.to_string());
    }

    /// Sets a filter by its API name. Unknown names are refused with a
    /// warning and leave the filters untouched.
    pub fn set_filter_by_name(&mut self, name: &str, value: impl ToString) -> bool {
        match name.parse::<FilterKey>() {
            Ok(key) => {
                self.set_filter(key, value);
                true
            }
            Err(e) => {
                warn!("Filter not set: {}", e);
                false
            }
        }
    }

    pub fn filters(&self) -> &BTreeMap<FilterKey, String> {
        &self.filters
    }

    /// Sort by any response metric, e.g. `traff`, `region_queries_count`.
    pub fn set_sort(&mut self, metric: &str, order: SortOrder) {
        self.sort_metric = metric.to_string();
        self.sort_order = order;
    }

    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn request_uri(&self) -> Option<&str> {
        self.request_uri.as_deref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn args(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("query", self.query.clone().unwrap_or_default()),
            ("se", self.search_engine.clone()),
            ("token", self.key.clone()),
        ];

        params.extend(self.filters.iter().map(|(k, v)| (k.as_str(), v.clone())));

        params.push(("sort", self.sort_metric.clone()));
        params.push(("order", self.sort_order.as_str().to_string()));
        params.push(("page", self.page.to_string()));
        params.push(("page_size", self.page_size.to_string()));

        params
    }

    /// Raw `result.hits` of the stored envelope; empty when the envelope has
    /// no result.
    pub fn hits(&self) -> Result<Vec<Value>> {
        let body = self.response.as_deref().ok_or(EnrichError::NoResponse)?;
        let envelope: Value = serde_json::from_str(body)?;

        let result = envelope.get("result");
        if !is_present(result) {
            if let Some(status) = envelope.get("status_msg") {
                debug!("SERPstat returned no result: {}", status);
            }
            return Ok(Vec::new());
        }

        Ok(result
            .and_then(|r| r.get("hits"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn normalize(&self, hits: &[Value]) -> Vec<QueryResult> {
        let total_traffic: f64 = hits.iter().filter_map(|h| as_f64(h.get("traff"))).sum();

        hits.iter()
            .filter_map(|hit| {
                let Some(keyword) = as_text(hit.get("keyword")) else {
                    debug!("Skipping hit without keyword: {}", hit);
                    return None;
                };

                let position = as_u64(hit.get("position")).map(|p| p.min(u32::MAX as u64) as u32);
                let search_volume = as_u64(hit.get("region_queries_count"));
                let traffic_pct = match as_f64(hit.get("traff")) {
                    Some(traff) if total_traffic > 0.0 => {
                        (traff / total_traffic * 10_000.0).round() / 100.0
                    }
                    _ => 0.0,
                };

                Some(QueryResult {
                    keyword,
                    position: position.unwrap_or(0),
                    position_diff: as_text(hit.get("dynamic")),
                    traffic_pct,
                    search_volume: search_volume.unwrap_or(0),
                    estimated_traffic: estimated_traffic(position, search_volume),
                    url: as_text(hit.get("url"))
                        .or_else(|| self.query.clone())
                        .unwrap_or_default(),
                    trend: None,
                })
            })
            .collect()
    }
}

impl<T: Transport> QueryProvider for SerpstatQuery<T> {
    fn configure(&mut self, api_key: &str) {
        self.key = api_key.to_string();
    }

    fn request(&mut self, request: &QueryRequest) -> Result<&mut Self> {
        self.query = Some(request.key.clone());
        self.method = request
            .method
            .clone()
            .unwrap_or_else(|| DEFAULT_METHOD.to_string());
        self.search_engine = request
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_SEARCH_ENGINE.to_string());
        self.page_size = request.limit.min(MAX_PAGE_SIZE);

        let uri = format!("{}/{}?{}", self.endpoint, self.method, encode_query(&self.args()));
        self.response = None;

        self.limiter.wait();
        debug!("SERPstat {} request for {}", self.method, request.key);
        let outcome = self.transport.get(&uri);
        self.limiter.mark();

        self.request_uri = Some(uri);
        self.response = Some(outcome?);
        Ok(self)
    }

    fn parse(&self) -> Result<Vec<QueryResult>> {
        let hits = self.hits()?;
        Ok(self.normalize(&hits))
    }
}
