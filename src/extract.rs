//! Feature Extraction Boundary
//!
//! The embedding model is an opaque collaborator: bytes in, `vector[dim]` out.
//! `RemoteFeatureExtractor` talks to it over HTTP with JSON bodies.

use crate::executor::registry::BoxFuture;

use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENDPOINT_EXTRACT: &str = "/extract";
pub const ENDPOINT_EXTRACT_BATCH: &str = "/extract_batch";

pub trait FeatureExtractor: Send + Sync {
    fn extract<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, Result<Vec<f32>>>;

    /// Extracts every image in order. The default runs them one by one.
    fn extract_batch<'a>(&'a self, images: &'a [Vec<u8>]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let mut vectors = Vec::with_capacity(images.len());
            for image in images {
                vectors.push(self.extract(image).await?);
            }
            Ok::<_, anyhow::Error>(vectors)
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractRequest {
    /// Base64-encoded image bytes.
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractBatchRequest {
    pub images: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractBatchResponse {
    pub vectors: Vec<Vec<f32>>,
}

pub struct RemoteFeatureExtractor {
    base_url: String,
    http_client: reqwest::Client,
    expected_dim: usize,
    timeout: Duration,
    attempts: usize,
}

impl RemoteFeatureExtractor {
    pub fn new(base_url: &str, expected_dim: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            expected_dim,
            timeout: Duration::from_secs(30),
            attempts: 3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.expected_dim {
            return Err(anyhow::anyhow!(
                "extractor returned {} dimensions, expected {}",
                vector.len(),
                self.expected_dim
            ));
        }
        Ok(())
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    tracing::debug!("Extractor request to {} failed, retrying: {}", url, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

impl FeatureExtractor for RemoteFeatureExtractor {
    fn extract<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(async move {
            let request = ExtractRequest {
                image: STANDARD.encode(image),
            };
            let response = self
                .post_with_retry(format!("{}{}", self.base_url, ENDPOINT_EXTRACT), &request)
                .await?;

            if !response.status().is_success() {
                return Err(anyhow::anyhow!("Extraction failed: {}", response.status()));
            }

            let body: ExtractResponse = response.json().await?;
            self.check_dim(&body.vector)?;
            Ok(body.vector)
        })
    }

    fn extract_batch<'a>(&'a self, images: &'a [Vec<u8>]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let request = ExtractBatchRequest {
                images: images.iter().map(|img| STANDARD.encode(img)).collect(),
            };
            let response = self
                .post_with_retry(
                    format!("{}{}", self.base_url, ENDPOINT_EXTRACT_BATCH),
                    &request,
                )
                .await?;

            if !response.status().is_success() {
                return Err(anyhow::anyhow!(
                    "Batch extraction failed: {}",
                    response.status()
                ));
            }

            let body: ExtractBatchResponse = response.json().await?;
            if body.vectors.len() != images.len() {
                return Err(anyhow::anyhow!(
                    "extractor returned {} vectors for {} images",
                    body.vectors.len(),
                    images.len()
                ));
            }
            for vector in &body.vectors {
                self.check_dim(vector)?;
            }
            Ok(body.vectors)
        })
    }
}
