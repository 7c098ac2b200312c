//! HTTP provider transport
//!
//! Provider API routes:
//! - `GET  /ping` - liveness
//! - `POST /pdp/piece` - upload piece bytes
//! - `HEAD /piece/{cid}` - parking check
//! - `GET  /piece/{cid}` - piece bytes
//! - `GET  /pdp/data-sets/{id}` - data set state
//! - `GET  /pdp/data-sets/{id}/pieces?offset=&limit=` - piece listing
//! - `GET  /pdp/data-sets/{id}/additions/{tx}` - relayed addition status

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use crate::error::{Result, SdkError};
use crate::piece::PieceCid;
use crate::types::{
    PieceAdditionStatus, PiecePage, ProviderDataSetState, TxHash, UploadPieceResponse,
};

use super::{ProviderTransport, ProviderTransportFactory};

/// Configuration shared by every HTTP transport a factory hands out
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Optional bearer token sent with every request
    pub api_key: Option<String>,
    /// Request timeout in seconds (default: 60)
    pub timeout_secs: u64,
    /// Attempts per piece download before giving up
    pub fetch_retries: u32,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            timeout_secs: 60,
            fetch_retries: 3,
        }
    }
}

/// HTTP client for one provider endpoint
#[derive(Debug)]
pub struct HttpProviderTransport {
    endpoint: String,
    client: Client,
    config: HttpTransportConfig,
}

impl HttpProviderTransport {
    /// Create a transport for `endpoint`
    pub fn new(endpoint: &str, config: HttpTransportConfig) -> Result<Self> {
        let parsed = url::Url::parse(endpoint)?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(SdkError::Config(format!(
                "unsupported provider URL scheme: {}",
                endpoint
            )));
        }

        let mut headers = header::HeaderMap::new();
        if let Some(ref api_key) = config.api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| SdkError::Config(format!("invalid API key: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            config,
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SdkError::Provider {
                status,
                endpoint: self.endpoint.clone(),
                message: body,
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl ProviderTransport for HttpProviderTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ping(&self) -> Result<()> {
        let url = format!("{}/ping", self.endpoint);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SdkError::Provider {
                status: response.status().as_u16(),
                endpoint: self.endpoint.clone(),
                message: "ping failed".to_string(),
            });
        }
        Ok(())
    }

    async fn upload_piece(&self, data: Bytes) -> Result<UploadPieceResponse> {
        let url = format!("{}/pdp/piece", self.endpoint);
        let size = data.len();

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;

        let parsed: UploadPieceResponse = self.handle_response(response).await?;
        debug!(
            piece_cid = %parsed.piece_cid,
            size = size,
            endpoint = %self.endpoint,
            "Uploaded piece"
        );
        Ok(parsed)
    }

    async fn find_piece(&self, piece_cid: &PieceCid) -> Result<bool> {
        let url = self.piece_url(piece_cid);
        let response = self.client.head(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(SdkError::Provider {
                status: status.as_u16(),
                endpoint: self.endpoint.clone(),
                message: format!("find_piece {}", piece_cid),
            }),
        }
    }

    async fn piece_addition_status(
        &self,
        data_set_id: u64,
        tx_hash: &TxHash,
    ) -> Result<Option<PieceAdditionStatus>> {
        let url = format!(
            "{}/pdp/data-sets/{}/additions/{}",
            self.endpoint,
            data_set_id,
            urlencoding::encode(tx_hash.as_str())
        );

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = self.handle_response(response).await?;
        Ok(Some(status))
    }

    async fn data_set_state(&self, data_set_id: u64) -> Result<ProviderDataSetState> {
        let url = format!("{}/pdp/data-sets/{}", self.endpoint, data_set_id);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SdkError::DataSetNotFound(data_set_id));
        }
        self.handle_response(response).await
    }

    async fn list_pieces(&self, data_set_id: u64, offset: u64, limit: u64) -> Result<PiecePage> {
        let url = format!(
            "{}/pdp/data-sets/{}/pieces?offset={}&limit={}",
            self.endpoint, data_set_id, offset, limit
        );
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SdkError::DataSetNotFound(data_set_id));
        }
        self.handle_response(response).await
    }

    async fn download_piece(&self, piece_cid: &PieceCid) -> Result<Bytes> {
        let url = self.piece_url(piece_cid);
        let mut attempts = 0u32;
        loop {
            attempts += 1;

            match self.client.get(&url).send().await {
                Ok(response) => {
                    if response.status() == StatusCode::NOT_FOUND {
                        return Err(SdkError::RetrievalFailed {
                            piece_cid: piece_cid.to_string(),
                            endpoint: self.endpoint.clone(),
                            reason: "piece not found".to_string(),
                        });
                    }

                    if response.status().is_success() {
                        let bytes = response.bytes().await?;
                        if !piece_cid.matches(&bytes) {
                            return Err(SdkError::RetrievalFailed {
                                piece_cid: piece_cid.to_string(),
                                endpoint: self.endpoint.clone(),
                                reason: format!("digest mismatch in {} byte body", bytes.len()),
                            });
                        }
                        debug!(
                            piece_cid = %piece_cid,
                            size = bytes.len(),
                            endpoint = %self.endpoint,
                            "Fetched piece"
                        );
                        return Ok(bytes);
                    }

                    if attempts >= self.config.fetch_retries {
                        return Err(SdkError::RetrievalFailed {
                            piece_cid: piece_cid.to_string(),
                            endpoint: self.endpoint.clone(),
                            reason: format!("HTTP {}", response.status()),
                        });
                    }
                }
                Err(e) => {
                    if attempts >= self.config.fetch_retries {
                        return Err(SdkError::RetrievalFailed {
                            piece_cid: piece_cid.to_string(),
                            endpoint: self.endpoint.clone(),
                            reason: e.to_string(),
                        });
                    }
                    warn!(
                        piece_cid = %piece_cid,
                        endpoint = %self.endpoint,
                        error = %e,
                        "Piece fetch attempt failed, retrying"
                    );
                }
            }

            // Exponential backoff
            let delay = Duration::from_millis(100 * 2u64.pow(attempts - 1));
            tokio::time::sleep(delay).await;
        }
    }
}

/// Factory caching one HTTP transport per provider endpoint
pub struct HttpTransportFactory {
    config: HttpTransportConfig,
    clients: DashMap<String, Arc<HttpProviderTransport>>,
}

impl HttpTransportFactory {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }
}

impl Default for HttpTransportFactory {
    fn default() -> Self {
        Self::new(HttpTransportConfig::default())
    }
}

impl ProviderTransportFactory for HttpTransportFactory {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn ProviderTransport>> {
        let key = endpoint.trim_end_matches('/').to_string();
        if let Some(existing) = self.clients.get(&key) {
            return Ok(existing.clone() as Arc<dyn ProviderTransport>);
        }
        let transport = Arc::new(HttpProviderTransport::new(&key, self.config.clone())?);
        self.clients.insert(key, transport.clone());
        Ok(transport as Arc<dyn ProviderTransport>)
    }
}
