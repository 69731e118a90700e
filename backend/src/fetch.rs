use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;

use crate::error::{AppError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Thin HTTP layer for the chain feeds: timeout-bounded GET, redirects
/// followed, gunzip when the payload carries the gzip magic. No retries —
/// the importer decides whether a failed file is fatal or skippable.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self { client }
    }

    /// Fetch an index page as text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Fetch a file, transparently gunzipping gzip payloads.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;

        if body.starts_with(&GZIP_MAGIC) {
            let mut decoded = Vec::new();
            GzDecoder::new(&body[..])
                .read_to_end(&mut decoded)
                .map_err(AppError::Gzip)?;
            Ok(decoded)
        } else {
            Ok(body.to_vec())
        }
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Gzip helper for tests that fabricate chain feed files.
#[cfg(test)]
pub(crate) fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
