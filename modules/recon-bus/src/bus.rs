//! The event bus: the single path every discovered [`Event`] travels from
//! producer to consumers, by way of the filter chain and the pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use recon_core::EngineResult;
use recon_core::Event;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::filter::FilterChain;
use crate::pipeline::{Pipeline, PipelineOutcome};

/// A downstream consumer the bus drives directly, outside the
/// per-module subscription channels. The event store and the
/// correlation engine attach this way rather than subscribing.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// What happens to a publish when a subscriber's channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Block the producer until the slowest matching subscriber has room.
    Block,
    /// Drop the event for this subscriber and record it, rather than stall.
    DropAtPipeline,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        BackpressurePolicy::Block
    }
}

struct Subscription {
    module: String,
    event_types: Vec<String>,
    sender: mpsc::Sender<Event>,
}

fn watches(event_types: &[String], event_type: &str) -> bool {
    event_types.iter().any(|t| t == "*" || t == event_type)
}

#[derive(Debug, Clone, Default)]
pub struct BusStats {
    pub published: u64,
    pub filtered: u64,
    pub dropped_by_pipeline: u64,
    pub dropped_backpressure: u64,
    pub delivered: u64,
}

/// Routes published events to every subscribed module, plus the store and
/// correlation sinks, after passing the filter chain and the pipeline.
pub struct EventBus {
    filter_chain: Option<Arc<FilterChain>>,
    pipeline: Arc<Pipeline>,
    subscriptions: Mutex<Vec<Subscription>>,
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
    backpressure: BackpressurePolicy,
    queue_capacity: usize,
    published: AtomicU64,
    filtered: AtomicU64,
    dropped_by_pipeline: AtomicU64,
    dropped_backpressure: AtomicU64,
    delivered: AtomicU64,
}

impl EventBus {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            filter_chain: None,
            pipeline,
            subscriptions: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            backpressure: BackpressurePolicy::Block,
            queue_capacity: 1024,
            published: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            dropped_by_pipeline: AtomicU64::new(0),
            dropped_backpressure: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn with_filter_chain(mut self, chain: Arc<FilterChain>) -> Self {
        self.filter_chain = Some(chain);
        self
    }

    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Register at startup. Returns the module's inbound channel; events it
    /// consumes arrive here in producer order. There is no dynamic
    /// resubscription mid-scan.
    pub fn subscribe(
        &self,
        module: impl Into<String>,
        event_types: impl IntoIterator<Item = impl Into<String>>,
    ) -> mpsc::Receiver<Event> {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.subscriptions.lock().unwrap().push(Subscription {
            module: module.into(),
            event_types: event_types.into_iter().map(Into::into).collect(),
            sender,
        });
        receiver
    }

    /// Attach a sink (the store, the correlation engine), driven on every
    /// event regardless of module subscriptions.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.lock().unwrap().push(sink);
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped_by_pipeline: self.dropped_by_pipeline.load(Ordering::Relaxed),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }

    /// Publish one event. Gates through the filter chain, then the
    /// pipeline, then fans out to sinks and matching subscribers.
    pub async fn publish(&self, event: Event) -> EngineResult<()> {
        self.published.fetch_add(1, Ordering::Relaxed);

        if let Some(chain) = &self.filter_chain {
            if !chain.evaluate(&event) {
                self.filtered.fetch_add(1, Ordering::Relaxed);
                debug!(event_type = %event.event_type, "event blocked by filter chain");
                return Ok(());
            }
        }

        let event = match self.pipeline.execute(event) {
            PipelineOutcome::Passed(pe) => pe.event,
            PipelineOutcome::Dropped { stage, reason } => {
                self.dropped_by_pipeline.fetch_add(1, Ordering::Relaxed);
                debug!(stage = %stage, reason = %reason, "event dropped by pipeline");
                return Ok(());
            }
        };

        let sinks = self.sinks.lock().unwrap().clone();
        for sink in sinks {
            if let Err(err) = sink.handle(&event).await {
                warn!(error = %err, "event sink failed; other sinks and subscribers unaffected");
            }
        }

        let subscriptions = self.subscriptions.lock().unwrap();
        let matching: Vec<&Subscription> = subscriptions
            .iter()
            .filter(|s| watches(&s.event_types, &event.event_type))
            .collect();

        for sub in matching {
            match self.backpressure {
                BackpressurePolicy::Block => {
                    if sub.sender.send(event.clone()).await.is_ok() {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    } else {
                        warn!(module = %sub.module, "subscriber channel closed");
                    }
                }
                BackpressurePolicy::DropAtPipeline => match sub.sender.try_send(event.clone()) {
                    Ok(()) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped_backpressure.fetch_add(1, Ordering::Relaxed);
                        debug!(module = %sub.module, "event dropped: subscriber queue full");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        warn!(module = %sub.module, "subscriber channel closed");
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ChainMode, RiskFilter};
    use std::sync::atomic::AtomicU64 as TestCounter;

    fn event(event_type: &str) -> Event {
        let root = Event::root("example.com");
        Event::child("dns", event_type, "1.1.1.1", &root).build().unwrap()
    }

    #[tokio::test]
    async fn delivers_to_subscribers_watching_the_type() {
        let bus = EventBus::new(Arc::new(Pipeline::new()));
        let mut rx = bus.subscribe("consumer", ["IP_ADDRESS"]);

        bus.publish(event("IP_ADDRESS")).await.unwrap();
        bus.publish(event("DOMAIN_NAME")).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, "IP_ADDRESS");
        assert!(rx.try_recv().is_err(), "DOMAIN_NAME must not be delivered");
    }

    #[tokio::test]
    async fn wildcard_subscriber_receives_every_type() {
        let bus = EventBus::new(Arc::new(Pipeline::new()));
        let mut rx = bus.subscribe("watcher", ["*"]);

        bus.publish(event("IP_ADDRESS")).await.unwrap();
        bus.publish(event("DOMAIN_NAME")).await.unwrap();

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn filter_chain_blocks_before_pipeline_and_sinks() {
        let bus = EventBus::new(Arc::new(Pipeline::new()))
            .with_filter_chain(Arc::new({
                let chain = FilterChain::new(ChainMode::AllPass);
                chain.add_filter(Arc::new(RiskFilter::new("risk", 50, 100)));
                chain
            }));
        let mut rx = bus.subscribe("consumer", ["IP_ADDRESS"]);

        bus.publish(event("IP_ADDRESS")).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.stats().filtered, 1);
    }

    struct CountingSink(Arc<TestCounter>);

    #[async_trait]
    impl EventSink for CountingSink {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sinks_run_regardless_of_subscriptions() {
        let bus = EventBus::new(Arc::new(Pipeline::new()));
        let counter = Arc::new(TestCounter::new(0));
        bus.add_sink(Arc::new(CountingSink(counter.clone())));

        bus.publish(event("IP_ADDRESS")).await.unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn drop_at_pipeline_policy_drops_on_full_queue_instead_of_blocking() {
        let bus = EventBus::new(Arc::new(Pipeline::new()))
            .with_backpressure(BackpressurePolicy::DropAtPipeline)
            .with_queue_capacity(1);
        let _rx = bus.subscribe("slow", ["IP_ADDRESS"]);

        bus.publish(event("IP_ADDRESS")).await.unwrap();
        bus.publish(event("IP_ADDRESS")).await.unwrap();

        assert_eq!(bus.stats().dropped_backpressure, 1);
    }
}
