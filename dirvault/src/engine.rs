//! Run context shared by every operation of one engine.

use crate::archive::{ArchiveCodec, ZipAesCodec};
use crate::config::{Config, EngineConfig};
use crate::tree::IdGenerator;
use crate::utils::{EngineError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Engine {
    settings: EngineConfig,
    ids: IdGenerator,
    cancel_token: CancellationToken,
    pool: rayon::ThreadPool,
    codec: Box<dyn ArchiveCodec>,
}

impl Engine {
    /// Create an engine with the zip codec described by `config`
    pub fn new(config: &Config) -> Result<Self> {
        let codec = ZipAesCodec::from_config(&config.archive);
        Self::with_codec(config, Box::new(codec))
    }

    pub fn with_codec(config: &Config, codec: Box<dyn ArchiveCodec>) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("dirvault-worker-{i}"));
        if config.engine.worker_threads > 0 {
            builder = builder.num_threads(config.engine.worker_threads);
        }

        Ok(Self {
            settings: config.engine.clone(),
            ids: IdGenerator::new(),
            cancel_token: CancellationToken::new(),
            pool: builder.build()?,
            codec,
        })
    }

    /// Replace the cancellation token, e.g. with one raised on SIGINT
    pub fn with_cancel(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub fn codec(&self) -> &dyn ArchiveCodec {
        self.codec.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Fail with [`EngineError::Cancelled`] once cancellation was requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    pub fn timestamp_tolerance(&self) -> Duration {
        self.settings.timestamp_tolerance()
    }

    pub fn password_sample_size(&self) -> usize {
        self.settings.password_sample_size
    }

    /// Run `op` on the engine's worker pool
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_threads_setting() -> Result<()> {
        let mut config = Config::default();
        config.engine.worker_threads = 2;
        let engine = Engine::new(&config)?;
        assert_eq!(engine.install(rayon::current_num_threads), 2);
        Ok(())
    }

    #[test]
    fn test_cancel_token_is_shared() -> Result<()> {
        let token = CancellationToken::new();
        let engine = Engine::new(&Config::default())?.with_cancel(token.clone());
        assert!(engine.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(engine.check_cancelled(), Err(EngineError::Cancelled)));
        Ok(())
    }
}
