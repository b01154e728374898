use crate::config;
use crate::error::ResolveError;
use crate::image_reference::ImageReference;
use crate::registry::{RegistryResolver, default_headers};
use crate::secret_string::SecretString;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info};

pub const DOMAIN: &str = "docker.io";
const SERVICE: &str = "registry.docker.io";
const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Docker Hub: exchanges credentials for a pull-scoped bearer token, then reads
/// the digest from the manifest response headers.
pub struct DockerHubResolver {
    auth_url: String,
    api_url: String,
    basic_auth: Option<HeaderValue>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

impl DockerHubResolver {
    pub fn new(config: &config::DockerHub) -> Result<Self> {
        let credential = match &config.credential_file {
            Some(path) => SecretString::from_file(path)?,
            None => None,
        };
        info!(
            "Docker Hub resolver uses {}",
            if credential.is_some() {
                "basic authentication"
            } else {
                "anonymous access"
            }
        );

        Ok(DockerHubResolver {
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            basic_auth: credential.as_ref().map(basic_auth_header).transpose()?,
        })
    }

    async fn fetch_pull_token(
        &self,
        http: &Client,
        image: &ImageReference,
    ) -> Result<String, ResolveError> {
        let scope = format!(
            "repository:{}/{}:pull",
            image.organization, image.software
        );
        debug!("Requesting Docker Hub token with scope {}", scope);
        let response = http
            .get(format!("{}/token", self.auth_url))
            .query(&[("scope", scope.as_str()), ("service", SERVICE)])
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        response
            .json::<TokenResponse>()
            .await
            .ok()
            .and_then(|body| body.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ResolveError::Authentication("Can not authenticate with Docker.io".to_string())
            })
    }
}

#[async_trait]
impl RegistryResolver for DockerHubResolver {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = default_headers();
        if let Some(basic_auth) = &self.basic_auth {
            headers.insert(AUTHORIZATION, basic_auth.clone());
        }
        headers
    }

    async fn resolve_single_image(
        &self,
        http: &Client,
        image: &ImageReference,
        tag: &str,
    ) -> Result<String, ResolveError> {
        let token = self.fetch_pull_token(http, image).await?;

        let url = format!(
            "{}/v2/{}/{}/manifests/{}",
            self.api_url, image.organization, image.software, tag
        );
        info!("Fetching docker manifest from URL {}", url);
        let response = http
            .get(&url)
            .header(ACCEPT, MANIFEST_V2)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await?;

        let digest = get_digest_from_response(&response)?;
        Ok(image.with_digest(&digest))
    }
}

fn basic_auth_header(credential: &SecretString) -> Result<HeaderValue> {
    // credential file contents are `<username>:<password>`
    let encoded = STANDARD.encode(credential.expose_secret());
    let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))
        .context("Docker Hub credential is not a valid header value")?;
    value.set_sensitive(true);
    Ok(value)
}

fn get_digest_from_response(response: &Response) -> Result<String, ResolveError> {
    response
        .headers()
        .get(DIGEST_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|digest| !digest.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| {
            ResolveError::DigestNotFound("Can not retrieve docker image digest".to_string())
        })
}
