use crate::error::{EnrichError, Result};
use log::info;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;

pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 12_1_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/16D57";

/// Columns contributed by [`MetaReport::csv_report`].
pub const META_HEADERS: [&str; 5] = ["url", "domain", "title", "meta_description", "h1"];

fn clean(text: &str) -> String {
    text.trim().replace(['\n', '\r'], "")
}

fn first_of(values: &[String]) -> String {
    values.first().cloned().unwrap_or_default()
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| EnrichError::InvalidPage(format!("bad selector '{css}': {e}")))
}

fn domain_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// Title, description and heading tags of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaReport {
    pub url: String,
    pub domain: String,
    pub titles: Vec<String>,
    pub meta_descriptions: Vec<String>,
    pub h1s: Vec<String>,
}

impl MetaReport {
    pub fn from_html(page_url: &Url, html: &str) -> Result<Self> {
        let document = Html::parse_document(html);

        let titles = document
            .select(&selector("head title")?)
            .map(|t| clean(&t.text().collect::<String>()))
            .collect();

        let meta_descriptions = document
            .select(&selector("meta[name=\"description\"]")?)
            .filter_map(|m| m.value().attr("content"))
            .map(clean)
            .collect();

        let h1s = document
            .select(&selector("h1")?)
            .map(|h| clean(&h.text().collect::<String>()))
            .collect();

        Ok(MetaReport {
            url: page_url.to_string(),
            domain: domain_of(page_url),
            titles,
            meta_descriptions,
            h1s,
        })
    }

    /// First value of each tag, keyed by [`META_HEADERS`].
    pub fn csv_report(&self) -> Vec<(String, String)> {
        vec![
            ("url".to_string(), self.url.clone()),
            ("domain".to_string(), self.domain.clone()),
            ("title".to_string(), first_of(&self.titles)),
            ("meta_description".to_string(), first_of(&self.meta_descriptions)),
            ("h1".to_string(), first_of(&self.h1s)),
        ]
    }
}

pub struct MetaReader {
    client: Client,
}

impl MetaReader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(MOBILE_USER_AGENT));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(MetaReader { client })
    }

    pub fn fetch(&self, url: &str) -> Result<MetaReport> {
        let parsed = Url::parse(url).map_err(|_| EnrichError::InvalidPage(format!("{url} is not a valid URL")))?;

        let resp = self.client.get(parsed).send().map_err(|e| {
            if e.is_timeout() {
                EnrichError::Transport(format!("{url} did not respond in time"))
            } else {
                EnrichError::from(e)
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EnrichError::InvalidPage(format!(
                "{url} returned a status code of {status}"
            )));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("html") {
            return Err(EnrichError::InvalidPage(format!(
                "{url} did not produce valid HTML; content returned as {content_type}"
            )));
        }

        let final_url = resp.url().clone();
        let html = resp.text()?;
        info!("Fetched {} ({} bytes)", final_url, html.len());

        MetaReport::from_html(&final_url, &html)
    }
}
