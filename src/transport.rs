use crate::error::Result;
use log::warn;
use reqwest::blocking::Client;
use std::time::Duration;

/// Blocking GET returning the raw response body.
pub trait Transport {
    fn get(&self, url: &str) -> Result<String>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        // None overrides the blocking client's 30s default: wait as long as the API does
        let client = Client::builder().timeout(timeout).build()?;

        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send()?;

        let status = resp.status();
        if !status.is_success() {
            // error payloads are still bodies the providers know how to read
            warn!("Rank API returned status {}", status);
        }

        Ok(resp.text()?)
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str) -> Result<String> {
        (**self).get(url)
    }
}
