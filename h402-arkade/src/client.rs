//! REST client for the Ark server (arkd).
//!
//! Two endpoints are used:
//!
//! - `POST /v1/tx/submit` submits a signed Ark transaction with its checkpoints
//! - `GET /v1/indexer/virtualTx/{txid}` fetches a submitted transaction as a PSBT

use std::future::Future;
use std::time::Duration;

use h402::proto::Base64Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnNull, serde_as};
use url::Url;

use crate::error::ArkadeError;

/// The outcome of a successful submission.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedTx {
    /// Id of the accepted Ark transaction.
    pub ark_txid: String,
    /// The Ark transaction co-signed by the server.
    #[serde(default)]
    pub final_ark_tx: Option<Base64Bytes>,
    /// Checkpoint transactions co-signed by the server.
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub signed_checkpoint_txs: Vec<Base64Bytes>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitTxRequest<'a> {
    signed_ark_tx: &'a Base64Bytes,
    checkpoint_txs: &'a [Base64Bytes],
}

#[serde_as]
#[derive(Deserialize)]
struct VirtualTxsResponse {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    txs: Vec<Base64Bytes>,
}

/// Operations Arkade verification and settlement need from an Ark server.
pub trait ArkProvider: Send + Sync {
    /// Submits a signed Ark transaction.
    fn submit_tx(
        &self,
        signed_ark_tx: &Base64Bytes,
        checkpoint_txs: &[Base64Bytes],
    ) -> impl Future<Output = Result<SubmittedTx, ArkadeError>> + Send;

    /// Fetches a submitted Ark transaction as PSBT bytes, or `None` if unknown.
    fn get_virtual_tx(
        &self,
        txid: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, ArkadeError>> + Send;
}

/// HTTP client for one Ark server.
#[derive(Clone, Debug)]
pub struct ArkServerClient {
    base_url: Url,
    submit_url: Url,
    client: Client,
    timeout: Option<Duration>,
}

impl ArkServerClient {
    /// Creates a client for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ArkadeError::UrlParse`] if the endpoint URLs cannot be built.
    pub fn try_new(base_url: &str) -> Result<Self, ArkadeError> {
        let mut normalized = base_url.trim_end_matches('/').to_owned();
        normalized.push('/');
        let base_url = Url::parse(&normalized).map_err(|e| ArkadeError::UrlParse {
            context: "Failed to parse Ark server url",
            source: e,
        })?;
        let submit_url = base_url
            .join("v1/tx/submit")
            .map_err(|e| ArkadeError::UrlParse {
                context: "Failed to construct submit URL",
                source: e,
            })?;
        Ok(Self {
            base_url,
            submit_url,
            client: Client::new(),
            timeout: None,
        })
    }

    /// Sets a timeout for every request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The server base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }
}

async fn error_status(context: &'static str, response: reqwest::Response) -> ArkadeError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ArkadeError::HttpStatus {
        context,
        status,
        body,
    }
}

impl ArkProvider for ArkServerClient {
    async fn submit_tx(
        &self,
        signed_ark_tx: &Base64Bytes,
        checkpoint_txs: &[Base64Bytes],
    ) -> Result<SubmittedTx, ArkadeError> {
        const CONTEXT: &str = "POST /v1/tx/submit";
        let body = SubmitTxRequest {
            signed_ark_tx,
            checkpoint_txs,
        };
        let response = self
            .request(self.client.post(self.submit_url.clone()).json(&body))
            .send()
            .await
            .map_err(|e| ArkadeError::Http {
                context: CONTEXT,
                source: e,
            })?;
        if response.status() != StatusCode::OK {
            return Err(error_status(CONTEXT, response).await);
        }
        response
            .json::<SubmittedTx>()
            .await
            .map_err(|e| ArkadeError::InvalidResponse {
                context: CONTEXT,
                message: e.to_string(),
            })
    }

    async fn get_virtual_tx(&self, txid: &str) -> Result<Option<Vec<u8>>, ArkadeError> {
        const CONTEXT: &str = "GET /v1/indexer/virtualTx";
        let url = self
            .base_url
            .join(&format!("v1/indexer/virtualTx/{txid}"))
            .map_err(|e| ArkadeError::UrlParse {
                context: "Failed to construct virtualTx URL",
                source: e,
            })?;
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|e| ArkadeError::Http {
                context: CONTEXT,
                source: e,
            })?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            _ => return Err(error_status(CONTEXT, response).await),
        }
        let virtual_txs = response
            .json::<VirtualTxsResponse>()
            .await
            .map_err(|e| ArkadeError::InvalidResponse {
                context: CONTEXT,
                message: e.to_string(),
            })?;
        Ok(virtual_txs.txs.into_iter().next().map(|tx| tx.0))
    }
}
