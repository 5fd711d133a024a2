//! Object storage over plain HTTP: `PUT`/`GET {base_url}/{path}`.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::info;

use super::{ArtifactError, ArtifactStore};
use crate::config::ArtifactConfig;
use crate::types::ArtifactBlob;

#[derive(Clone)]
pub struct HttpArtifactStore {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpArtifactStore {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ArtifactError> {
        if base_url.trim().is_empty() {
            return Err(ArtifactError::MissingBaseUrl);
        }
        let http = Client::builder()
            .timeout(None::<std::time::Duration>)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Token is read from the configured environment variable, if set.
    pub fn from_config(config: &ArtifactConfig) -> Result<Self, ArtifactError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty());
        Self::new(&config.base_url, token)
    }

    fn authorize(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

impl ArtifactStore for HttpArtifactStore {
    fn location(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<ArtifactBlob, ArtifactError> {
        let url = self.location(path);
        let resp = self
            .authorize(self.http.put(&url))
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()?;
        if !resp.status().is_success() {
            return Err(ArtifactError::ServerError(resp.status()));
        }
        let blob = ArtifactBlob::describe(url, bytes);
        info!(location = %blob.location, bytes = blob.size_bytes, md5 = %blob.md5, "Artifact uploaded");
        Ok(blob)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        let url = self.location(path);
        let resp = self.authorize(self.http.get(&url)).send()?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(ArtifactError::NotFound(url)),
            status if status.is_success() => Ok(resp.bytes()?.to_vec()),
            status => Err(ArtifactError::ServerError(status)),
        }
    }
}
