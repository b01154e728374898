use crate::config;
use crate::error::ResolveError;
use crate::image_reference::ImageReference;
use crate::registry::{RegistryResolver, default_headers};
use crate::secret_string::SecretString;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::info;

pub const DOMAIN: &str = "quay.io";

/// Quay: looks the tag up in the repository's tag listing.
pub struct QuayResolver {
    api_url: String,
    bearer: Option<HeaderValue>,
}

impl QuayResolver {
    pub fn new(config: &config::Quay) -> Result<Self> {
        let token = match &config.credential_file {
            Some(path) => SecretString::from_file(path)?,
            None => None,
        };
        let bearer = token
            .map(|token| {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                    .context("Quay token is not a valid header value")?;
                value.set_sensitive(true);
                Ok::<_, anyhow::Error>(value)
            })
            .transpose()?;
        info!(
            "Quay resolver uses {}",
            if bearer.is_some() {
                "a bearer token"
            } else {
                "anonymous access"
            }
        );

        Ok(QuayResolver {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bearer,
        })
    }

    fn repository_url(&self, image: &ImageReference) -> String {
        format!(
            "{}/api/v1/repository/{}/{}",
            self.api_url, image.organization, image.software
        )
    }
}

#[async_trait]
impl RegistryResolver for QuayResolver {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = default_headers();
        if let Some(bearer) = &self.bearer {
            headers.insert(AUTHORIZATION, bearer.clone());
        }
        headers
    }

    async fn resolve_single_image(
        &self,
        http: &Client,
        image: &ImageReference,
        tag: &str,
    ) -> Result<String, ResolveError> {
        let url = self.repository_url(image);
        info!("Fetching Quay tag listing from URL {}", url);
        let repository: Value = http
            .get(&url)
            .send()
            .await?
            .json()
            .await
            .map_err(|_| malformed_response())?;

        let tag_metadata = repository
            .get("tags")
            .and_then(|tags| tags.get(tag))
            .filter(|metadata| !metadata.is_null())
            .ok_or_else(|| ResolveError::UnknownImage(image.raw_url.clone()))?;

        let digest = tag_metadata
            .get("manifest_digest")
            .and_then(Value::as_str)
            .filter(|digest| !digest.is_empty())
            .ok_or_else(malformed_response)?;

        Ok(image.with_digest(digest))
    }
}

fn malformed_response() -> ResolveError {
    ResolveError::MalformedResponse("Unknown Quay response format".to_string())
}
