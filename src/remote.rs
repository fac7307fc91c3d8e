use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::IngestError;

pub trait InputFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), IngestError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ingest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IngestError::Download(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| IngestError::Download(err.to_string()))?;
        Ok(Self { client })
    }
}

impl InputFetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), IngestError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| IngestError::Download(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download failed".to_string());
            return Err(IngestError::DownloadStatus { status, message });
        }
        let mut file =
            File::create(destination).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn is_remote(location: &str) -> bool {
    let lower = location.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn file_name_from_url(url: &str) -> String {
    let without_suffix = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/');
    let name = without_suffix
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .unwrap_or("download");
    name.to_string()
}
