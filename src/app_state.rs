use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    api::ApiClient,
    backend::BackendError,
    batch::BatchAnalyzer,
    prepare::{HeifTranscoder, ImagePreparer},
};

/// Explicitly constructed client context: credentials, tuning and the batch
/// analyzer built on top of them.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub analyzer: BatchAnalyzer<Arc<ApiClient>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, BackendError> {
        Self::with_transcoder(config, None)
    }

    pub fn with_transcoder(
        config: AppConfig,
        heif: Option<Arc<dyn HeifTranscoder>>,
    ) -> Result<Self, BackendError> {
        let api = ApiClient::new(
            &config.api_base_url,
            config.telegram_init_data.clone(),
            config.request_timeout(),
        )?
        .with_debug_identity(config.debug_telegram_id);

        let mut preparer = ImagePreparer::new(config.prepare_config());
        if let Some(heif) = heif {
            preparer = preparer.with_heif_transcoder(heif);
        }

        let analyzer = BatchAnalyzer::new(
            Arc::new(api),
            preparer,
            config.poll_config(),
            config.fallback_config(),
        );

        Ok(Self {
            config: Arc::new(config),
            analyzer,
        })
    }
}
