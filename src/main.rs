use crate::registry::Registries;
use crate::state::AppState;
use crate::upstream::Upstream;
use crate::whitelist::Whitelist;
use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use std::env;
use std::net::SocketAddr;
use tracing::info;

mod admission;
mod config;
mod containers;
mod error;
mod image_reference;
mod registry;
mod secret_string;
mod state;
mod upstream;
mod webserver;
mod whitelist;

#[cfg(test)]
mod test_support;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting tag-resolver-proxy {}", env!("CARGO_PKG_VERSION"));

    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let config_path =
        env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = config::load_config(&config_path)?;

    let registries = Registries::init(&config.registries)?;
    let upstream = Upstream::new(&config.upstream)?;
    info!("Whitelisted image prefixes: {:?}", config.whitelist);
    let whitelist = Whitelist::new(config.whitelist.clone());

    let app = webserver::create_app(AppState::new(registries, upstream, whitelist));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.webserver.port));

    match &config.webserver.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.certificate_path, &tls.key_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to load TLS certificate {} and key {}",
                        tls.certificate_path.display(),
                        tls.key_path.display()
                    )
                })?;
            info!("Starting webserver with TLS on {}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("Starting webserver without TLS on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
