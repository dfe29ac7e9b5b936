//! Relay lifecycle
//!
//! bootstrap → serve → release. Handles are released on every exit path of
//! [`PaymentRelay::serve`], including a fatal broker error.
//!
//! Offsets are stored once a gate is scheduled, so gates still waiting when
//! the loop stops are allowed to publish before the producer is released.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::broker::{self, BrokerConnector, BrokerHandles};
use crate::core::{PendingTasks, RelayConfig, RelayResult};
use crate::message::{ConsumerLoop, Dispatcher, LoopExit, Publisher, RelayStats};

/// How a relay run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    pub exit: LoopExit,
    pub stats: RelayStats,
}

pub struct PaymentRelay {
    config: RelayConfig,
    shutdown: CancellationToken,
}

impl PaymentRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel this token to stop the relay gracefully
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connect to the broker within the configured retry budget
    pub async fn bootstrap(&self, connector: &dyn BrokerConnector) -> RelayResult<BrokerHandles> {
        let handles = broker::connect(connector, &self.config.broker, &self.config.retry).await?;
        Ok(handles)
    }

    /// Bootstrap, then consume until shutdown or a fatal broker error
    ///
    /// Only a bootstrap failure is returned as `Err`.
    pub async fn run(&self, connector: &dyn BrokerConnector) -> RelayResult<RelaySummary> {
        let handles = self.bootstrap(connector).await?;
        Ok(self.serve(handles).await)
    }

    /// Consume on already-connected handles, then release them
    pub async fn serve(&self, mut handles: BrokerHandles) -> RelaySummary {
        // Own token: stopping the loop must not cancel gates already scheduled
        let tasks = Arc::new(PendingTasks::new(CancellationToken::new()));
        let publisher = Publisher::new(self.config.agent.clone(), handles.producer());
        let dispatcher =
            Dispatcher::with_default_processors(publisher, tasks.clone(), self.config.payment_wait);

        let mut consumer_loop =
            ConsumerLoop::new(self.config.agent.clone(), dispatcher, self.shutdown.clone())
                .with_poll_timeout(self.config.poll_timeout);

        tracing::info!(agent = %self.config.agent, "Relay started");
        let exit = consumer_loop.run(handles.consumer_mut()).await;

        if !tasks.is_empty() {
            tracing::info!(pending = tasks.len(), "Waiting for pending payment gates");
        }
        tasks
            .drain(self.config.payment_wait + self.config.broker.delivery_timeout)
            .await;
        handles.release(self.config.broker.delivery_timeout).await;

        let summary = RelaySummary {
            exit,
            stats: consumer_loop.stats(),
        };
        tracing::info!(exit = ?summary.exit, stats = ?summary.stats, "Relay stopped");
        summary
    }
}
