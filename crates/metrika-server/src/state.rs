use crate::config::ServerConfig;
use crate::subnet::TrustedSubnet;
use metrika_common::signature::Signer;
use metrika_storage::Storage;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// `None` when the backend failed to initialize; storage routes then
    /// answer 500 while the rest of the API keeps serving.
    pub storage: Option<Arc<dyn Storage>>,
    pub signer: Option<Arc<Signer>>,
    pub trusted_subnet: Option<TrustedSubnet>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, storage: Option<Arc<dyn Storage>>) -> anyhow::Result<Self> {
        let signer = match config.key.as_deref() {
            Some(key) => Some(Arc::new(Signer::new(key)?)),
            None => None,
        };
        Ok(Self {
            storage,
            signer,
            trusted_subnet: config.trusted_subnet,
            config: Arc::new(config),
        })
    }
}
