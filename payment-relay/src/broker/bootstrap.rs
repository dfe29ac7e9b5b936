//! Broker bootstrap with a fixed retry budget

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use super::{BrokerConnector, BrokerHandles};
use crate::core::{BootstrapError, BrokerConfig, RetryPolicy};

/// Every attempt of [`retry_fixed`] failed
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` up to `max_attempts` times with `cooldown` between attempts
///
/// `op` receives the 1-based attempt number. A budget of 0 still makes one
/// attempt.
pub async fn retry_fixed<T, E, F, Fut>(
    max_attempts: u32,
    cooldown: Duration,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Attempt failed, retrying: {}",
                    e
                );
                tokio::time::sleep(cooldown).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
        }
    }
}

/// Connect to the broker, retrying per `policy`
///
/// Each attempt builds a fresh producer/consumer pair.
pub async fn connect(
    connector: &dyn BrokerConnector,
    config: &BrokerConfig,
    policy: &RetryPolicy,
) -> Result<BrokerHandles, BootstrapError> {
    let result = retry_fixed(policy.max_attempts, policy.cooldown, |attempt| async move {
        tracing::info!(
            servers = %config.servers_list(),
            group = %config.consumer_group_id,
            "Connecting to broker... attempt {}/{}",
            attempt,
            policy.max_attempts
        );
        connector.connect(config).await.inspect_err(|e| {
            tracing::error!(attempt = attempt, "Broker connection failed: {}", e);
        })
    })
    .await;

    match result {
        Ok(handles) => {
            tracing::info!("Connected to broker");
            Ok(handles)
        }
        Err(exhausted) => Err(BootstrapError {
            attempts: exhausted.attempts,
            last_error: exhausted.last_error,
        }),
    }
}
