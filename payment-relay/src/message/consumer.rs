//! Consumer loop
//!
//! ```text
//! Init ──subscribe──► Subscribed ──► Polling ──fatal error / shutdown──► Closed
//!                                     ▲    │
//!                                     └────┘ record | idle | benign condition
//! ```
//!
//! Each poll waits at most `poll_timeout`, and the shutdown token is checked
//! between polls. Records sent by this process are dropped before dispatch.

use shared::message::decode;
use shared::{AgentId, Topic};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerConsumer, BrokerError, InboundRecord};
use crate::message::Dispatcher;

/// 消费循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Subscribed,
    Polling,
    Closed,
}

/// Why [`ConsumerLoop::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Shutdown token cancelled
    Shutdown,
    /// Broker reported a non-benign error
    Fatal(BrokerError),
}

/// Counters kept by the consumer loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub dispatched: u64,
    pub self_suppressed: u64,
    pub decode_failures: u64,
    pub benign_conditions: u64,
    pub idle_polls: u64,
}

pub struct ConsumerLoop {
    agent: AgentId,
    topics: Vec<Topic>,
    poll_timeout: Duration,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    state: LoopState,
    stats: RelayStats,
}

impl ConsumerLoop {
    /// Subscribes to the topics that `dispatcher` has processors for
    pub fn new(agent: AgentId, dispatcher: Dispatcher, shutdown: CancellationToken) -> Self {
        Self {
            agent,
            topics: dispatcher.topics(),
            poll_timeout: Duration::from_secs(1),
            dispatcher,
            shutdown,
            state: LoopState::Init,
            stats: RelayStats::default(),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Subscribe and poll until shutdown or a fatal broker error
    ///
    /// The loop never closes `consumer`; the caller owns its release.
    pub async fn run(&mut self, consumer: &mut dyn BrokerConsumer) -> LoopExit {
        if let Err(e) = consumer.subscribe(&self.topics) {
            tracing::error!("Failed to subscribe: {}", e);
            self.state = LoopState::Closed;
            return LoopExit::Fatal(e);
        }
        self.state = LoopState::Subscribed;
        tracing::info!(
            topics = ?self.topics.iter().map(Topic::as_str).collect::<Vec<_>>(),
            "Subscribed, waiting for messages"
        );

        self.state = LoopState::Polling;
        let exit = loop {
            let polled = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break LoopExit::Shutdown,
                polled = consumer.poll(self.poll_timeout) => polled,
            };

            match polled {
                None => self.stats.idle_polls += 1,
                Some(Err(e)) if e.is_benign() => {
                    self.stats.benign_conditions += 1;
                    tracing::debug!("{}", e);
                }
                Some(Err(e)) => {
                    tracing::error!("Broker error, stopping consumer: {}", e);
                    break LoopExit::Fatal(e);
                }
                Some(Ok(record)) => {
                    self.handle_record(&record).await;
                    if let Err(e) = consumer.mark_processed(&record) {
                        tracing::warn!(
                            topic = %record.topic,
                            offset = record.offset,
                            "Failed to store offset: {}",
                            e
                        );
                    }
                }
            }
        };

        self.state = LoopState::Closed;
        tracing::info!(?exit, stats = ?self.stats, "Consumer loop stopped");
        exit
    }

    async fn handle_record(&mut self, record: &InboundRecord) {
        self.stats.received += 1;

        let envelope = match decode(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.decode_failures += 1;
                tracing::warn!(
                    topic = %record.topic,
                    offset = record.offset,
                    "Skipping undecodable message: {}",
                    e
                );
                return;
            }
        };

        if envelope.is_from(&self.agent) {
            self.stats.self_suppressed += 1;
            tracing::trace!(topic = %record.topic, offset = record.offset, "Ignoring own message");
            return;
        }

        tracing::info!(
            sender = %envelope.sender,
            message = %envelope.message,
            "Received message from topic {}",
            record.topic
        );
        self.dispatcher.dispatch(&record.topic, &envelope).await;
        self.stats.dispatched += 1;
    }
}
