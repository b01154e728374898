use crate::config;
use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::http::header::{CONNECTION, TRANSFER_ENCODING};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::{Certificate, Client, Identity};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// The admission webhook requests are forwarded to once their images are pinned.
pub struct Upstream {
    client: Client,
    uri: String,
}

/// Marks a response copied from the upstream webhook, as opposed to one
/// synthesised locally.
#[derive(Clone, Copy, Debug)]
pub struct Forwarded;

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Upstream {
    pub fn new(config: &config::Upstream) -> Result<Self> {
        Ok(Self::from_client(create_client(config)?, &config.uri))
    }

    pub fn from_client(client: Client, uri: &str) -> Self {
        Upstream {
            client,
            uri: uri.trim_end_matches('/').to_string(),
        }
    }

    pub async fn forward(&self, path: &str, payload: &Value) -> reqwest::Result<UpstreamResponse> {
        let url = format!("{}{}", self.uri, path);
        debug!("Forwarding admission request to {}", url);
        let response = self.client.post(&url).json(payload).send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        debug!("Upstream {} answered with status {}", url, status);

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if name != CONNECTION && name != TRANSFER_ENCODING {
                headers.append(name, value.clone());
            }
        }
        response.extensions_mut().insert(Forwarded);
        response
    }
}

fn create_client(config: &config::Upstream) -> Result<Client> {
    info!("Initializing upstream HTTP client for {}", config.uri);
    // System certificates are loaded automatically with rustls-tls-native-roots
    let mut client_builder = Client::builder();

    if let Some(tls) = &config.tls {
        for file_path in &tls.ca_certificate_paths {
            let file_content = read(file_path)?;
            let cert =
                Certificate::from_pem(&file_content).context("Failed to parse certificate")?;
            client_builder = client_builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) =
            (&tls.client_certificate_path, &tls.client_key_path)
        {
            info!("Using client certificate {}", cert_path.display());
            let mut pem = read(cert_path)?;
            pem.push(b'\n');
            pem.extend(read(key_path)?);
            let identity =
                Identity::from_pem(&pem).context("Failed to parse client certificate and key")?;
            client_builder = client_builder.identity(identity);
        }
    }

    client_builder
        .build()
        .context("Failed to build HTTP client")
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read file {}", path.display()))
}
