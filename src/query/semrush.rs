//! SEMrush-style rank/traffic API.
//!
//! Responses come back as `;`-separated lines of quote-wrapped, percent-escaped
//! values under a header line naming the returned columns.

use super::traffic::estimated_traffic;
use super::{QueryProvider, QueryRequest, QueryResult};
use crate::config::DEFAULT_SEMRUSH_ENDPOINT;
use crate::error::{EnrichError, Result};
use crate::transport::{HttpTransport, Transport};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;

pub const MAX_FILTERS: usize = 25;
pub const MAX_ROW_LIMIT: usize = 10_000;
pub const DEFAULT_COLUMNS: [&str; 7] = ["Ph", "Po", "Pd", "Tr", "Nq", "Ur", "Vu"];
pub const VOLUME_COLUMNS: [&str; 3] = ["Ph", "Nq", "Td"];
pub const DEFAULT_QUERY_TYPE: &str = "url_organic";
pub const DEFAULT_DATABASE: &str = "us";
pub const DEFAULT_SORT: &str = "tr_desc";

const ERROR_MARKER: &str = "ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Include,
    Exclude,
}

impl Sign {
    pub fn as_str(self) -> &'static str {
        match self {
            Sign::Include => "+",
            Sign::Exclude => "-",
        }
    }
}

/// A `sign|field|operator|value` constraint, e.g. `+|Po|Lt|21`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub sign: Sign,
    pub field: String,
    pub operator: String,
    pub value: String,
}

impl Filter {
    pub fn new(sign: Sign, field: &str, operator: &str, value: impl ToString) -> Self {
        Filter {
            sign,
            field: field.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.sign.as_str(),
            self.field,
            self.operator,
            self.value
        )
    }
}

/// Ordered filters, never more than [`MAX_FILTERS`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterList(Vec<Filter>);

impl FilterList {
    /// Appends `filter` unless the list is full. Returns whether it was kept.
    pub fn push(&mut self, filter: Filter) -> bool {
        if self.0.len() >= MAX_FILTERS {
            warn!("Filter not added: too many filters ({} max): {}", MAX_FILTERS, filter);
            return false;
        }
        self.0.push(filter);
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `display_filter` value, or `None` when nothing is set.
    pub fn to_param(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(Filter::to_string)
                .collect::<Vec<_>>()
                .join("|"),
        )
    }
}

/// Fixed mapping between the API's short field codes and the long column
/// names it reports in response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldCode {
    Keyword,
    Position,
    PositionDifference,
    TrafficPct,
    SearchVolume,
    EstimatedTraffic,
    Url,
    Trends,
}

impl FieldCode {
    pub const ALL: [FieldCode; 8] = [
        FieldCode::Keyword,
        FieldCode::Position,
        FieldCode::PositionDifference,
        FieldCode::TrafficPct,
        FieldCode::SearchVolume,
        FieldCode::EstimatedTraffic,
        FieldCode::Url,
        FieldCode::Trends,
    ];

    pub fn short(self) -> &'static str {
        match self {
            FieldCode::Keyword => "ph",
            FieldCode::Position => "po",
            FieldCode::PositionDifference => "pd",
            FieldCode::TrafficPct => "tr",
            FieldCode::SearchVolume => "nq",
            FieldCode::EstimatedTraffic => "et",
            FieldCode::Url => "ur",
            FieldCode::Trends => "td",
        }
    }

    pub fn long(self) -> &'static str {
        match self {
            FieldCode::Keyword => "Keyword",
            FieldCode::Position => "Position",
            FieldCode::PositionDifference => "Position Difference",
            FieldCode::TrafficPct => "Traffic (%)",
            FieldCode::SearchVolume => "Search Volume",
            FieldCode::EstimatedTraffic => "Estimated Monthly Traffic",
            FieldCode::Url => "Url",
            FieldCode::Trends => "Trends",
        }
    }

    /// Accepts a short code in any case (`Ph`, `ph`) or a long name.
    pub fn lookup(header: &str) -> Option<FieldCode> {
        let header = header.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.short().eq_ignore_ascii_case(header) || c.long() == header)
    }

    /// Long name for a known header; anything else passes through unchanged.
    pub fn canonical(header: &str) -> String {
        Self::lookup(header)
            .map(|c| c.long().to_string())
            .unwrap_or_else(|| header.trim().to_string())
    }
}

/// Percent-decodes one response value (invalid UTF-8 becomes U+FFFD) and
/// drops the quote wrapper: exactly one character from each end.
pub fn decode_field(raw: &str) -> String {
    let bytes = urlencoding::decode_binary(raw.as_bytes());
    let decoded = String::from_utf8_lossy(&bytes);

    let mut chars = decoded.chars();
    chars.next();
    chars.next_back();
    chars.as_str().to_string()
}

/// Query-string encoding used by the API: `%20` for spaces, commas literal.
fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v).replace("%2C", ",")))
        .collect::<Vec<_>>()
        .join("&")
}

/// Which parameter carries the lookup key for a report type.
fn target_param(query_type: &str) -> &'static str {
    if query_type.starts_with("domain_") {
        "domain"
    } else if query_type.starts_with("phrase_") {
        "phrase"
    } else {
        "url"
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

pub struct SemrushQuery<T: Transport = HttpTransport> {
    transport: T,
    endpoint: String,
    key: String,
    target: Option<String>,
    query_type: String,
    database: String,
    columns: Vec<String>,
    sort: String,
    filters: FilterList,
    row_limit: usize,
    request_uri: Option<String>,
    response: Option<String>,
}

impl<T: Transport> SemrushQuery<T> {
    pub fn new(transport: T, api_key: impl Into<String>) -> Self {
        SemrushQuery {
            transport,
            endpoint: DEFAULT_SEMRUSH_ENDPOINT.to_string(),
            key: api_key.into(),
            target: None,
            query_type: DEFAULT_QUERY_TYPE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            columns: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            sort: DEFAULT_SORT.to_string(),
            filters: FilterList::default(),
            row_limit: super::DEFAULT_LIMIT,
            request_uri: None,
            response: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Adds a `sign|field|operator|value` filter. A full list leaves the
    /// filters untouched and returns `false`.
    pub fn add_filter(&mut self, sign: Sign, field: &str, operator: &str, value: impl ToString) -> bool {
        self.filters.push(Filter::new(sign, field, operator, value))
    }

    pub fn filters(&self) -> &FilterList {
        &self.filters
    }

    pub fn set_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
    }

    /// e.g. `tr_desc`, `nq_asc`.
    pub fn set_sort(&mut self, sort: impl Into<String>) {
        self.sort = sort.into();
    }

    pub fn request_uri(&self) -> Option<&str> {
        self.request_uri.as_deref()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn args(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("type", self.query_type.clone()),
            ("key", self.key.clone()),
            ("display_limit", self.row_limit.to_string()),
            ("export_columns", self.columns.join(",")),
        ];

        if let Some(filter) = self.filters.to_param() {
            params.push(("display_filter", filter));
        }

        params.push(("display_sort", self.sort.clone()));
        params.push(("database", self.database.clone()));
        params.push(("export_escape", "1".to_string()));

        if let Some(target) = &self.target {
            params.push((target_param(&self.query_type), target.clone()));
        }

        params
    }

    fn fetch(&mut self, uri: String) -> Result<()> {
        self.response = None;
        debug!(
            "SEMrush {} request for {}",
            self.query_type,
            self.target.as_deref().unwrap_or_default()
        );

        let outcome = self.transport.get(&uri);
        self.request_uri = Some(uri);
        self.response = Some(outcome?);
        Ok(())
    }

    /// Looks up the search volume and trend of a single phrase. Read the
    /// answer with [`keyword_results`](Self::keyword_results).
    pub fn request_volume(&mut self, phrase: &str, database: &str) -> Result<&mut Self> {
        self.target = Some(phrase.to_string());
        self.query_type = "phrase_this".to_string();
        self.database = database.to_string();

        let params = vec![
            ("type", self.query_type.clone()),
            ("phrase", phrase.to_string()),
            ("key", self.key.clone()),
            ("database", self.database.clone()),
            ("export_escape", "1".to_string()),
            ("export_columns", VOLUME_COLUMNS.join(",")),
        ];
        let uri = format!("{}/?{}", self.endpoint, encode_query(&params));

        self.fetch(uri)?;
        Ok(self)
    }

    /// First data row of the stored response, keyed by long column name.
    /// `None` for error responses or when no data row came back.
    pub fn keyword_results(&self) -> Option<HashMap<String, String>> {
        let body = self.response.as_deref()?;
        if body.starts_with(ERROR_MARKER) {
            return None;
        }

        let mut lines = body.lines().filter(|l| !l.trim().is_empty());
        let headers: Vec<String> = lines.next()?.split(';').map(FieldCode::canonical).collect();
        let values: Vec<String> = lines.next()?.split(';').map(decode_field).collect();

        Some(headers.into_iter().zip(values).collect())
    }

    fn normalize(&self, fields: &HashMap<FieldCode, String>) -> std::result::Result<QueryResult, String> {
        let get = |code: FieldCode| non_empty(fields.get(&code));

        let position = get(FieldCode::Position)
            .map(|v| v.parse::<u32>().map_err(|_| format!("position '{v}'")))
            .transpose()?;
        let search_volume = get(FieldCode::SearchVolume)
            .map(|v| v.parse::<u64>().map_err(|_| format!("search volume '{v}'")))
            .transpose()?;
        let traffic_pct = get(FieldCode::TrafficPct)
            .map(|v| v.parse::<f64>().map_err(|_| format!("traffic '{v}'")))
            .transpose()?;

        let url = get(FieldCode::Url)
            .map(str::to_string)
            .or_else(|| self.target.clone())
            .unwrap_or_default();

        Ok(QueryResult {
            keyword: fields.get(&FieldCode::Keyword).cloned().unwrap_or_default(),
            position: position.unwrap_or(0),
            position_diff: get(FieldCode::PositionDifference).map(str::to_string),
            traffic_pct: traffic_pct.unwrap_or(0.0),
            search_volume: search_volume.unwrap_or(0),
            estimated_traffic: estimated_traffic(position, search_volume),
            url,
            trend: get(FieldCode::Trends).map(str::to_string),
        })
    }
}

impl<T: Transport> QueryProvider for SemrushQuery<T> {
    fn configure(&mut self, api_key: &str) {
        self.key = api_key.to_string();
    }

    fn headers(&self) -> &'static [&'static str] {
        &super::RESULT_HEADERS
    }

    fn request(&mut self, request: &QueryRequest) -> Result<&mut Self> {
        self.target = Some(request.key.clone());
        self.query_type = request
            .method
            .clone()
            .unwrap_or_else(|| DEFAULT_QUERY_TYPE.to_string());
        self.database = request
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        self.row_limit = request.limit.min(MAX_ROW_LIMIT);

        let uri = format!("{}/?{}", self.endpoint, encode_query(&self.args()));
        self.fetch(uri)?;
        Ok(self)
    }

    fn parse(&self) -> Result<Vec<QueryResult>> {
        let body = self.response.as_deref().ok_or(EnrichError::NoResponse)?;
        if body.starts_with(ERROR_MARKER) {
            info!("SEMrush reported: {}", body.lines().next().unwrap_or_default());
            return Ok(Vec::new());
        }

        let mut lines = body.lines().filter(|l| !l.trim().is_empty());
        let Some(header_line) = lines.next() else {
            return Ok(Vec::new());
        };
        let headers: Vec<Option<FieldCode>> = header_line.split(';').map(FieldCode::lookup).collect();

        let mut results = Vec::new();
        for (i, line) in lines.enumerate() {
            let values: Vec<&str> = line.split(';').collect();
            if values.len() != headers.len() {
                debug!(
                    "Skipping line {}: {} fields, header has {}",
                    i + 2,
                    values.len(),
                    headers.len()
                );
                continue;
            }

            let fields: HashMap<FieldCode, String> = headers
                .iter()
                .zip(values)
                .filter_map(|(code, raw)| code.map(|c| (c, decode_field(raw))))
                .collect();

            match self.normalize(&fields) {
                Ok(result) => results.push(result),
                Err(e) => warn!("Skipping line {}: unreadable {}", i + 2, e),
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::CannedTransport;

    const BODY: &str = "Keyword;Position;Previous Position;Traffic (%);Search Volume;Url;Trends\r\n\
\"seo%20tools\";\"1\";\"2\";\"12.5\";\"1000\";\"https%3A%2F%2Fexample.com%2F\";\"0.8,1.0\"\r\n\
\"rank tracker\";\"21\";\"\";\"0.2\";\"5000\";\"https://example.com/rank\";\"\"\r\n";

    fn query(bodies: &[&str]) -> SemrushQuery<CannedTransport> {
        SemrushQuery::new(CannedTransport::with_bodies(bodies.iter().copied()), "secret")
    }

    #[test]
    fn filter_list_caps_at_twenty_five() {
        let mut q = query(&[]);
        for i in 0..MAX_FILTERS {
            assert!(q.add_filter(Sign::Include, "Po", "Lt", i));
        }
        assert!(!q.add_filter(Sign::Exclude, "Nq", "Gt", 10));
        assert_eq!(q.filters().len(), MAX_FILTERS);
    }

    #[test]
    fn filters_serialize_pipe_joined() {
        let mut filters = FilterList::default();
        assert_eq!(filters.to_param(), None);

        filters.push(Filter::new(Sign::Include, "Po", "Lt", 21));
        filters.push(Filter::new(Sign::Exclude, "Ph", "Co", "free"));
        assert_eq!(filters.to_param().as_deref(), Some("+|Po|Lt|21|-|Ph|Co|free"));
    }

    #[test]
    fn request_builds_query_string() {
        let mut q = query(&[""]);
        q.add_filter(Sign::Include, "Po", "Lt", 21);
        q.request(&QueryRequest::new("https://example.com/a b").limit(50_000))
            .unwrap();

        let urls = q.transport().urls();
        assert_eq!(urls.len(), 1);
        assert_eq!(
            urls[0],
            "https://api.semrush.com/?type=url_organic&key=secret&display_limit=10000\
&export_columns=Ph,Po,Pd,Tr,Nq,Ur,Vu&display_filter=%2B%7CPo%7CLt%7C21&display_sort=tr_desc\
&database=us&export_escape=1&url=https%3A%2F%2Fexample.com%2Fa%20b"
        );
    }

    #[test]
    fn filter_param_absent_without_filters() {
        let mut q = query(&[""]);
        q.request(&QueryRequest::new("example.com").method("domain_organic").region("uk"))
            .unwrap();

        let url = &q.transport().urls()[0];
        assert!(!url.contains("display_filter"));
        assert!(url.contains("type=domain_organic"));
        assert!(url.contains("database=uk"));
        assert!(url.ends_with("&domain=example.com"));
    }

    #[test]
    fn parses_and_normalizes_records() {
        let mut q = query(&[BODY]);
        let results = q.request(&QueryRequest::new("https://example.com/")).unwrap().results();

        assert_eq!(results.len(), 2);
        let first = &results[0];
        assert_eq!(first.keyword, "seo tools");
        assert_eq!(first.position, 1);
        assert_eq!(first.traffic_pct, 12.5);
        assert_eq!(first.search_volume, 1000);
        assert_eq!(first.estimated_traffic, 384);
        assert_eq!(first.url, "https://example.com/");
        assert_eq!(first.trend.as_deref(), Some("0.8,1.0"));

        let second = &results[1];
        assert_eq!(second.position, 21);
        assert_eq!(second.estimated_traffic, 0);
        assert_eq!(second.trend, None);
    }

    #[test]
    fn mismatched_lines_are_dropped_individually() {
        let body = "Ph;Po;Nq\r\n\"a\";\"1\";\"10\"\r\n\"b\";\"2\"\r\n\"c\";\"3\";\"30\"\r\n";
        let mut q = query(&[body]);
        q.request(&QueryRequest::new("https://example.com/")).unwrap();

        let keywords: Vec<String> = q.results().into_iter().map(|r| r.keyword).collect();
        assert_eq!(keywords, vec!["a", "c"]);
    }

    #[test]
    fn missing_volume_estimates_zero() {
        let body = "Keyword;Position;Search Volume\n\"a\";\"1\";\"\"\n";
        let mut q = query(&[body]);
        q.request(&QueryRequest::new("https://example.com/")).unwrap();

        let results = q.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].search_volume, 0);
        assert_eq!(results[0].estimated_traffic, 0);
        // url falls back to the requested key
        assert_eq!(results[0].url, "https://example.com/");
    }

    #[test]
    fn error_marker_yields_no_results() {
        let mut q = query(&["ERROR 50 :: NOTHING FOUND"]);
        q.request(&QueryRequest::new("https://example.com/")).unwrap();

        assert!(q.parse().unwrap().is_empty());
        assert!(q.results().is_empty());
    }

    #[test]
    fn transport_failure_propagates_and_clears_response() {
        let mut q = SemrushQuery::new(CannedTransport::failing("connection refused"), "k");
        let err = q.request(&QueryRequest::new("https://example.com/")).err();

        assert!(matches!(err, Some(EnrichError::Transport(_))));
        assert!(q.response().is_none());
        assert!(q.request_uri().unwrap().contains("url=https%3A%2F%2Fexample.com%2F"));
    }

    #[test]
    fn second_request_replaces_first_response() {
        let mut q = query(&[BODY, "ERROR 50 :: NOTHING FOUND"]);
        q.request(&QueryRequest::new("https://example.com/")).unwrap();
        assert_eq!(q.results().len(), 2);

        q.request(&QueryRequest::new("https://example.com/other")).unwrap();
        assert!(q.results().is_empty());
    }

    #[test]
    fn decode_field_is_lossy_and_strips_wrapper() {
        assert_eq!(decode_field("\"caf%C3%A9\""), "café");
        assert_eq!(decode_field("\"bad%FFbyte\""), "bad\u{FFFD}byte");
        assert_eq!(decode_field("\"\""), "");
        assert_eq!(decode_field("x"), "");
    }

    #[test]
    fn field_codes_map_both_ways() {
        assert_eq!(FieldCode::lookup("Ph"), Some(FieldCode::Keyword));
        assert_eq!(FieldCode::lookup("Search Volume"), Some(FieldCode::SearchVolume));
        assert_eq!(FieldCode::lookup("Cpc"), None);
        assert_eq!(FieldCode::canonical("td"), "Trends");
        assert_eq!(FieldCode::canonical("Competition"), "Competition");
        for code in FieldCode::ALL {
            assert_eq!(FieldCode::lookup(code.long()), Some(code));
            assert_eq!(FieldCode::lookup(code.short()), Some(code));
        }
    }

    #[test]
    fn volume_lookup_returns_plain_map() {
        let body = "Keyword;Search Volume;Trends\r\n\"seo\";\"90500\";\"0.81,1.00\"\r\n";
        let mut q = query(&[body]);
        let volume = q.request_volume("seo", "uk").unwrap().keyword_results().unwrap();

        assert_eq!(volume["Keyword"], "seo");
        assert_eq!(volume["Search Volume"], "90500");
        assert_eq!(volume["Trends"], "0.81,1.00");

        let url = &q.transport().urls()[0];
        assert!(url.contains("type=phrase_this"));
        assert!(url.contains("database=uk"));
        assert!(url.contains("export_columns=Ph,Nq,Td"));
    }

    #[test]
    fn columns_and_sort_reach_the_request() {
        let mut q = query(&[""]);
        q.set_columns(["Ph", "Nq"]);
        q.set_sort("nq_asc");
        assert_eq!(q.request_uri(), None);

        q.request(&QueryRequest::new("https://example.com/")).unwrap();

        let uri = q.request_uri().unwrap();
        assert_eq!(uri, q.transport().urls()[0]);
        assert!(uri.contains("&export_columns=Ph,Nq&"));
        assert!(uri.contains("&display_sort=nq_asc&"));
    }

    #[test]
    fn configure_replaces_key_for_next_request() {
        let mut q = query(&["", ""]);
        q.request(&QueryRequest::new("https://example.com/")).unwrap();
        q.configure("rotated");
        q.request(&QueryRequest::new("https://example.com/")).unwrap();

        let urls = q.transport().urls();
        assert!(urls[0].contains("&key=secret&"));
        assert!(urls[1].contains("&key=rotated&"));
        assert!(!urls[1].contains("secret"));
    }

    #[test]
    fn volume_headers_come_back_as_long_names() {
        let body = "Ph;Nq;Td\r\n\"seo\";\"90500\";\"0.81,1.00\"\r\n";
        let mut q = query(&[body]);
        let volume = q.request_volume("seo", "us").unwrap().keyword_results().unwrap();

        let mut columns: Vec<&str> = volume.keys().map(String::as_str).collect();
        columns.sort();
        assert_eq!(columns, vec!["Keyword", "Search Volume", "Trends"]);
        assert_eq!(volume["Search Volume"], "90500");
    }

    #[test]
    fn volume_lookup_error_is_none() {
        let mut q = query(&["ERROR 50 :: NOTHING FOUND"]);
        assert!(q.request_volume("zzzz", "us").unwrap().keyword_results().is_none());
    }
}
