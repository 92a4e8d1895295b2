use std::future::Future;
use anyhow::{anyhow, Result};
use tokio::time::{sleep, Duration};

use crate::logging::{log, log_swallowed, obj, v_num, v_str, Domain, Level};
use crate::ports::{is_message_not_found, Messaging};

/// Retry configuration
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_ms: 5000,
        }
    }
}

impl RetryConfig {
    fn delay(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Retry a fallible async operation with a fixed pause between attempts
pub async fn retry_async<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < config.max_retries {
                    log(
                        Level::Warn,
                        Domain::Gateway,
                        "retry",
                        obj(&[
                            ("operation", v_str(operation_name)),
                            ("attempt", v_num((attempt + 1) as f64)),
                            ("of", v_num((config.max_retries + 1) as f64)),
                            ("error", v_str(&e.to_string())),
                            ("delay_ms", v_num(config.backoff_ms as f64)),
                        ]),
                    );
                    sleep(config.delay()).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("retry_async exhausted without error")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
    GaveUp,
}

/// Best-effort delete. Never fails; a message that is already gone counts as done.
pub async fn delete_with_retry(
    messaging: &dyn Messaging,
    config: &RetryConfig,
    channel: &str,
    message_id: &str,
    author_id: &str,
) -> DeleteOutcome {
    let result = retry_async(config, "delete_message", || async move {
        match messaging.delete_message(channel, message_id, author_id).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if is_message_not_found(&e) => Ok(DeleteOutcome::AlreadyGone),
            Err(e) => Err(e),
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            log_swallowed(Domain::Gateway, "delete_message", &e);
            DeleteOutcome::GaveUp
        }
    }
}
