use crate::registry::Registries;
use crate::upstream::Upstream;
use crate::whitelist::Whitelist;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub(crate) registries: Arc<Registries>,
    pub(crate) upstream: Arc<Upstream>,
    pub(crate) whitelist: Arc<Whitelist>,
}

impl AppState {
    pub fn new(registries: Registries, upstream: Upstream, whitelist: Whitelist) -> Self {
        AppState {
            registries: Arc::new(registries),
            upstream: Arc::new(upstream),
            whitelist: Arc::new(whitelist),
        }
    }
}
