use log::{info, warn};
use std::time::Duration;
use tokio::time::sleep;

use crate::core::error::PipelineError;
use crate::services::events::EventSink;
use crate::services::llm::{GenerateRequest, TextBackend, TokenStream};

/// Bounded exponential backoff around opening a backend stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    /// Wait after the failed 0-indexed `attempt`: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Opens a stream, retrying transport failures. Returns as soon as one
    /// attempt yields a stream; the stream is not consumed here.
    pub async fn invoke(
        &self,
        backend: &dyn TextBackend,
        request: &GenerateRequest,
        events: &EventSink,
    ) -> Result<TokenStream, PipelineError> {
        let max = self.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..max {
            match backend.generate(request).await {
                Ok(stream) => {
                    info!("LLM connection attempt {}/{} succeeded", attempt + 1, max);
                    return Ok(stream);
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                    let line = format!(
                        "LLM connection attempt {}/{} failed: {}",
                        attempt + 1,
                        max,
                        last_error
                    );
                    warn!("{}", line);
                    events.log(line);

                    if attempt + 1 < max {
                        sleep(self.delay_for(attempt)).await;
                    }
                }
            }
        }

        let failure = PipelineError::RetryExhausted {
            attempts: max,
            last_error,
        };
        events.error(failure.to_string());
        Err(failure)
    }
}
