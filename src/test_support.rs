use crate::error::ResolveError;
use crate::image_reference::ImageReference;
use crate::registry::RegistryResolver;
use async_trait::async_trait;
use axum::Router;
use reqwest::Client;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Listener has no local address");
    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server failed");
    });
    format!("http://{}", addr)
}

pub fn test_http_client(headers: HeaderMap) -> Client {
    Client::builder()
        .default_headers(headers)
        .no_proxy()
        .build()
        .expect("Failed to build test HTTP client")
}

/// Resolver answering every image with a fixed digest and counting lookups.
pub struct CountingResolver {
    domain: &'static str,
    digest: String,
    delay: Duration,
    failure: Option<ResolveError>,
    pub calls: Arc<AtomicUsize>,
}

impl CountingResolver {
    pub fn new(domain: &'static str, digest: &str) -> Self {
        CountingResolver {
            domain,
            digest: digest.to_string(),
            delay: Duration::ZERO,
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, failure: ResolveError) -> Self {
        self.failure = Some(failure);
        self
    }
}

#[async_trait]
impl RegistryResolver for CountingResolver {
    fn domain(&self) -> &'static str {
        self.domain
    }

    async fn resolve_single_image(
        &self,
        _http: &Client,
        image: &ImageReference,
        _tag: &str,
    ) -> Result<String, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(image.with_digest(&self.digest)),
        }
    }
}
