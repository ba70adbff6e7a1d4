mod request_id;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::segment::{build_segmenter, Segmenter};
use crate::transport::{HttpTransport, PreparedUpstream};
use crate::upstream::UpstreamClient;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: UpstreamClient,
    segmenter: Arc<dyn Segmenter>,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, upstream: UpstreamClient, segmenter: Arc<dyn Segmenter>) -> Self {
        Self {
            config,
            upstream,
            segmenter,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// Build the transport, upstream client and segmenter from validated config.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] or [`RelayError::Transport`] when the
    /// HTTP client or the configured URLs cannot be set up.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let transport = HttpTransport::new(&config.server)?;
        let prepared = PreparedUpstream::new(&config.upstream)?;
        let segmenter = build_segmenter(&config.segmentation, &transport)?;
        let upstream = UpstreamClient::new(transport, prepared);
        Ok(Self::new(config, upstream, segmenter))
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_ids.next_seq()
    }

    #[must_use]
    pub fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        self.request_ids.request_uuid(request_seq)
    }

    #[must_use]
    pub fn segmenter(&self) -> &dyn Segmenter {
        self.segmenter.as_ref()
    }
}
