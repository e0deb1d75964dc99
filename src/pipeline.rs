//! Row-by-row enrichment: every input row runs through the page sources and
//! the rank provider, and the merged row is appended to the output. A failure
//! in one source is recorded on that row and processing moves on.

use crate::csv_builder::CsvBuilder;
use crate::error::{EnrichError, Result};
use crate::html_reader::{MetaReader, META_HEADERS};
use crate::query::{QueryProvider, QueryRequest, DEFAULT_LIMIT};
use crate::result_writer::ResultWriter;
use log::{info, warn};
use std::io::Write;

pub const SEO_TRAFFIC_COLUMN: &str = "Est. Monthly SEO Traffic";
pub const SEO_KEYWORDS_COLUMN: &str = "Top SEO Keywords";
pub const SEO_STATUS_COLUMN: &str = "SEO Extract";

/// Keywords whose share of the page's traffic exceeds this make the
/// "top keywords" list.
pub const TOP_KEYWORD_TRAFFIC_PCT: f64 = 4.9;

/// Something that turns a row key into extra columns.
pub trait EnrichmentSource {
    /// Also the name of the column holding this source's per-row status.
    fn name(&self) -> &str;
    fn headers(&self) -> Vec<String>;
    fn enrich(&self, key: &str) -> Result<Vec<(String, String)>>;
}

impl EnrichmentSource for MetaReader {
    fn name(&self) -> &str {
        "Meta Extract"
    }

    fn headers(&self) -> Vec<String> {
        META_HEADERS.iter().map(|h| h.to_string()).collect()
    }

    fn enrich(&self, key: &str) -> Result<Vec<(String, String)>> {
        Ok(self.fetch(key)?.csv_report())
    }
}

/// How the key column is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Keys must be absolute `http(s)` URLs; anything else is skipped.
    Url,
    /// Any non-empty key is looked up.
    Keyword,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub key_column: String,
    pub mode: KeyMode,
    pub limit: usize,
    pub method: Option<String>,
    pub region: Option<String>,
}

impl PipelineOptions {
    pub fn new(key_column: impl Into<String>) -> Self {
        PipelineOptions {
            key_column: key_column.into(),
            mode: KeyMode::Url,
            limit: DEFAULT_LIMIT,
            method: None,
            region: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failures: usize,
    pub keywords: usize,
}

pub struct Pipeline<P: QueryProvider> {
    provider: P,
    sources: Vec<Box<dyn EnrichmentSource>>,
    options: PipelineOptions,
}

impl<P: QueryProvider> Pipeline<P> {
    pub fn new(provider: P, options: PipelineOptions) -> Self {
        Pipeline {
            provider,
            sources: Vec::new(),
            options,
        }
    }

    pub fn with_source(mut self, source: impl EnrichmentSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Every column this pipeline may write, in output order.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = Vec::new();
        for source in &self.sources {
            headers.extend(source.headers());
            headers.push(source.name().to_string());
        }
        headers.extend(
            [SEO_TRAFFIC_COLUMN, SEO_KEYWORDS_COLUMN, SEO_STATUS_COLUMN]
                .iter()
                .map(|h| h.to_string()),
        );
        headers
    }

    fn accepts(&self, key: &str) -> bool {
        match self.options.mode {
            KeyMode::Url => key.starts_with("http"),
            KeyMode::Keyword => true,
        }
    }

    fn request_for(&self, key: &str) -> QueryRequest {
        let mut request = QueryRequest::new(key).limit(self.options.limit);
        request.method = self.options.method.clone();
        request.region = self.options.region.clone();
        request
    }

    /// Enriches every input row and appends it to `builder`'s output; each
    /// rank result also goes to `keywords`. One progress line per row is
    /// written to `progress`.
    pub fn run(
        &mut self,
        builder: &mut CsvBuilder,
        keywords: &mut ResultWriter,
        progress: &mut impl Write,
    ) -> Result<RunSummary> {
        let column = self.options.key_column.clone();
        if !builder.headers().contains(&column) {
            return Err(EnrichError::MissingColumn(column));
        }
        builder.declare_headers(self.headers())?;

        let mut summary = RunSummary::default();

        for (i, row) in builder.rows()?.enumerate() {
            let row = row?;
            let key = row.get(&column).unwrap_or_default().trim().to_string();
            if key.is_empty() || !self.accepts(&key) {
                summary.skipped += 1;
                continue;
            }

            writeln!(progress, "{} {}", i + 1, key)?;
            let mut new_fields: Vec<(String, String)> = Vec::new();

            for source in &self.sources {
                let status = match source.enrich(&key) {
                    Ok(fields) => {
                        new_fields.extend(fields);
                        "Success".to_string()
                    }
                    Err(e) => {
                        summary.failures += 1;
                        format!("Failed: {e}")
                    }
                };
                writeln!(progress, "    {}: {}", source.name(), status)?;
                new_fields.push((source.name().to_string(), status));
            }

            let request = self.request_for(&key);
            let (traffic, top_keywords, status) = match self.provider.request(&request) {
                Ok(provider) => {
                    let results = provider.results();
                    let mut traffic = 0u64;
                    let mut top = Vec::new();
                    for result in &results {
                        keywords.write(result)?;
                        traffic += result.estimated_traffic;
                        if result.traffic_pct > TOP_KEYWORD_TRAFFIC_PCT {
                            top.push(result.keyword.clone());
                        }
                    }
                    summary.keywords += results.len();
                    writeln!(
                        progress,
                        "    SEO Results: Keywords: {}, Est. Traffic: {}",
                        results.len(),
                        traffic
                    )?;
                    (traffic, top.join(", "), "Success".to_string())
                }
                Err(e) => {
                    warn!("Rank lookup failed for {}: {}", key, e);
                    summary.failures += 1;
                    writeln!(progress, "    SEO Results: Failed: {e}")?;
                    (0, String::new(), format!("Failed: {e}"))
                }
            };

            new_fields.push((SEO_TRAFFIC_COLUMN.to_string(), traffic.to_string()));
            new_fields.push((SEO_KEYWORDS_COLUMN.to_string(), top_keywords));
            new_fields.push((SEO_STATUS_COLUMN.to_string(), status));

            builder.append(row, new_fields)?;
            summary.processed += 1;
        }

        info!(
            "Processed {} rows ({} skipped, {} failures, {} keywords)",
            summary.processed, summary.skipped, summary.failures, summary.keywords
        );
        Ok(summary)
    }
}
