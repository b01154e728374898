pub mod docker_hub;
pub mod quay;

use crate::config;
use crate::containers::{container_image, containers_mut};
use crate::error::ResolveError;
use crate::image_reference::{ImageReference, Pin};
use async_trait::async_trait;
use docker_hub::DockerHubResolver;
use quay::QuayResolver;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{OnceCell, watch};
use tracing::{debug, info, warn};

pub const USER_AGENT_VALUE: &str = "tag-resolver-proxy";

/// A registry backend that can turn a tagged image into a digest-qualified one.
#[async_trait]
pub trait RegistryResolver: Send + Sync {
    /// Registry domain images are routed by, e.g. `docker.io`
    fn domain(&self) -> &'static str;

    /// Headers baked into the registry's HTTP client on first use.
    fn auth_headers(&self) -> HeaderMap {
        default_headers()
    }

    /// One network round trip resolving `image` at `tag` to `{domain}/{org}/{software}@{digest}`.
    async fn resolve_single_image(
        &self,
        http: &Client,
        image: &ImageReference,
        tag: &str,
    ) -> Result<String, ResolveError>;
}

pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    headers
}

type Outcome = Option<Result<String, ResolveError>>;

#[derive(Default)]
struct CacheState {
    /// raw image URL -> digest-qualified URL, written once per key
    digests: HashMap<String, String>,
    /// raw image URL -> outcome of the lookup currently in progress
    inflight: HashMap<String, watch::Receiver<Outcome>>,
}

enum Lookup {
    Cached(String),
    Follow(watch::Receiver<Outcome>),
    Lead(watch::Sender<Outcome>),
}

/// Long-lived client for one registry: lazily built HTTP client, digest cache,
/// and at most one in-flight lookup per image URL.
pub struct RegistryClient {
    resolver: Box<dyn RegistryResolver>,
    http: OnceCell<Client>,
    state: Mutex<CacheState>,
}

impl RegistryClient {
    pub fn new(resolver: Box<dyn RegistryResolver>) -> Self {
        RegistryClient {
            resolver,
            http: OnceCell::new(),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn domain(&self) -> &'static str {
        self.resolver.domain()
    }

    pub async fn resolve(&self, image: &ImageReference) -> Result<String, ResolveError> {
        let tag = match &image.pin {
            Pin::Digest(digest) => {
                warn!("Tag already resolved for {} ({})", image, digest);
                return Ok(image.raw_url.clone());
            }
            Pin::Tag(tag) => tag,
        };

        loop {
            match self.lookup(&image.raw_url) {
                Lookup::Cached(resolved) => {
                    debug!("Using cached digest {} for {}", resolved, image);
                    return Ok(resolved);
                }
                Lookup::Follow(mut rx) => {
                    debug!("Waiting for in-flight resolution of {}", image);
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => None,
                    };
                    match outcome {
                        Some(result) => return result,
                        None => debug!("Resolution of {} was abandoned, retrying", image),
                    }
                }
                Lookup::Lead(tx) => {
                    let guard = InflightGuard {
                        state: &self.state,
                        key: &image.raw_url,
                        tx: Some(tx),
                    };
                    let outcome = self.fetch(image, tag).await;
                    guard.complete(&outcome);
                    return outcome;
                }
            }
        }
    }

    fn lookup(&self, key: &str) -> Lookup {
        let mut state = lock(&self.state);
        if let Some(resolved) = state.digests.get(key) {
            return Lookup::Cached(resolved.clone());
        }
        if let Some(rx) = state.inflight.get(key) {
            return Lookup::Follow(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        state.inflight.insert(key.to_string(), rx);
        Lookup::Lead(tx)
    }

    async fn fetch(&self, image: &ImageReference, tag: &str) -> Result<String, ResolveError> {
        let http = self.http_client().await?;
        let resolved = self.resolver.resolve_single_image(http, image, tag).await?;
        info!("{} resolved to {}", image, resolved);
        Ok(resolved)
    }

    async fn http_client(&self) -> Result<&Client, ResolveError> {
        let client = self
            .http
            .get_or_try_init(|| async {
                info!("Initializing HTTP client for registry {}", self.domain());
                Client::builder()
                    .default_headers(self.resolver.auth_headers())
                    .build()
            })
            .await?;
        Ok(client)
    }
}

/// Held by the leader of a lookup. Completing publishes the outcome to every
/// follower; dropping without completing only clears the in-flight entry.
struct InflightGuard<'a> {
    state: &'a Mutex<CacheState>,
    key: &'a str,
    tx: Option<watch::Sender<Outcome>>,
}

impl InflightGuard<'_> {
    fn complete(mut self, outcome: &Result<String, ResolveError>) {
        {
            let mut state = lock(self.state);
            if let Ok(resolved) = outcome {
                state
                    .digests
                    .entry(self.key.to_string())
                    .or_insert_with(|| resolved.clone());
            }
            state.inflight.remove(self.key);
        }
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome.clone()));
        }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            lock(self.state).inflight.remove(self.key);
        }
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The closed set of supported registries, keyed by domain.
pub struct Registries {
    clients: HashMap<&'static str, RegistryClient>,
}

impl Registries {
    pub fn init(config: &config::Registries) -> anyhow::Result<Self> {
        let docker_hub = DockerHubResolver::new(&config.docker_hub)?;
        let quay = QuayResolver::new(&config.quay)?;
        let resolvers: Vec<Box<dyn RegistryResolver>> = vec![Box::new(docker_hub), Box::new(quay)];
        Ok(Self::from_resolvers(resolvers))
    }

    pub fn from_resolvers(resolvers: Vec<Box<dyn RegistryResolver>>) -> Self {
        let clients = resolvers
            .into_iter()
            .map(|resolver| {
                info!("Registered registry {}", resolver.domain());
                (resolver.domain(), RegistryClient::new(resolver))
            })
            .collect();
        Registries { clients }
    }

    pub fn client_for(&self, image: &ImageReference) -> Result<&RegistryClient, ResolveError> {
        self.clients
            .get(image.domain.as_str())
            .ok_or_else(|| ResolveError::UnknownRegistry(image.domain.clone()))
    }

    pub async fn resolve_image(&self, raw_url: &str) -> Result<String, ResolveError> {
        let image = ImageReference::parse(raw_url)?;
        self.client_for(&image)?.resolve(&image).await
    }

    /// Rewrites every container image of the admission request in place,
    /// one container at a time.
    pub async fn resolve_containers(&self, payload: &mut Value) -> Result<(), ResolveError> {
        for container in containers_mut(payload) {
            let image = container_image(container)?.to_string();
            let resolved = self.resolve_image(&image).await?;
            container["image"] = Value::String(resolved);
        }
        Ok(())
    }
}
