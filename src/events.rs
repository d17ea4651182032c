//! Execute-event delivery with late-attach buffering.
//!
//! The task runner emits an [`ExecuteEvent`] the moment work starts, but
//! the consumer that runs the task body may not exist yet (a cold start
//! after a wake-up, or a restart). [`EventQueue`] parks events until a
//! consumer attaches and flushes them in emission order.
//!
//! The consumer slot and the pending deque live under a single mutex, so an
//! emit racing an attach is either flushed by the attach or delivered
//! directly afterwards. Delivery runs under that mutex: a consumer must not
//! call back into the queue from `deliver`. Hand work off (see
//! [`ChannelConsumer`]) instead.

use crate::options::ExecuteEvent;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Receives execute events.
pub trait ExecuteConsumer: Send + Sync {
    fn deliver(&self, event: &ExecuteEvent) -> anyhow::Result<()>;

    /// An attached consumer that is not ready is treated as absent.
    fn is_ready(&self) -> bool {
        true
    }

    /// Deliver if something can take the event right now. `None` means
    /// nothing could, and the queue keeps the event.
    fn offer(&self, event: &ExecuteEvent) -> Option<anyhow::Result<()>> {
        Some(self.deliver(event))
    }
}

/// What happened to an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Delivered,
    /// The consumer rejected or panicked on the event; it was dropped.
    DeliveryFailed,
    /// No consumer; parked until the next attach.
    Queued,
}

#[derive(Default)]
struct QueueState {
    consumer: Option<Weak<dyn ExecuteConsumer>>,
    pending: VecDeque<ExecuteEvent>,
}

impl QueueState {
    fn live_consumer(&self) -> Option<Arc<dyn ExecuteConsumer>> {
        self.consumer
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|c| c.is_ready())
    }
}

/// Buffers execute events until a consumer is attached.
#[derive(Default)]
pub struct EventQueue {
    state: Mutex<QueueState>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `consumer`, replacing any previous one, and flush pending
    /// events to it in FIFO order. Returns the number of flushed events.
    ///
    /// The queue keeps only a weak reference; dropping the last `Arc`
    /// detaches the consumer.
    pub fn attach<C: ExecuteConsumer + 'static>(&self, consumer: &Arc<C>) -> usize {
        let weak: Weak<dyn ExecuteConsumer> = Arc::downgrade(consumer) as Weak<dyn ExecuteConsumer>;
        let mut state = self.lock_state();
        state.consumer = Some(weak);

        let Some(live) = state.live_consumer() else {
            debug!("consumer attached but not ready, {} event(s) stay queued", state.pending.len());
            return 0;
        };

        let mut flushed = 0;
        while let Some(event) = state.pending.pop_front() {
            if deliver_isolated(live.as_ref(), &event) == Delivery::Unclaimed {
                state.pending.push_front(event);
                debug!("consumer went away mid-flush, {} event(s) stay queued", state.pending.len());
                break;
            }
            flushed += 1;
        }
        if flushed > 0 {
            info!("flushed {flushed} pending execute event(s) to attached consumer");
        }
        flushed
    }

    /// Drop the consumer. Pending events stay queued.
    pub fn detach(&self) {
        self.lock_state().consumer = None;
        debug!("consumer detached");
    }

    /// Deliver `event` now, or queue it if no consumer is ready.
    pub fn emit(&self, event: ExecuteEvent) -> EmitOutcome {
        let mut state = self.lock_state();
        let delivery = match state.live_consumer() {
            Some(consumer) => deliver_isolated(consumer.as_ref(), &event),
            None => Delivery::Unclaimed,
        };
        match delivery {
            Delivery::Done => EmitOutcome::Delivered,
            Delivery::Failed => EmitOutcome::DeliveryFailed,
            Delivery::Unclaimed => {
                state.pending.push_back(event);
                debug!("execute event queued ({} pending)", state.pending.len());
                EmitOutcome::Queued
            }
        }
    }

    /// Discard queued events. Returns how many were dropped.
    pub fn clear_pending(&self) -> usize {
        let mut state = self.lock_state();
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Returns `true` if a live, ready consumer is attached.
    pub fn has_consumer(&self) -> bool {
        self.lock_state().live_consumer().is_some()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Done,
    Failed,
    /// No target took the event; it is still ours to queue.
    Unclaimed,
}

/// Offer one event, containing errors and panics.
fn deliver_isolated(consumer: &dyn ExecuteConsumer, event: &ExecuteEvent) -> Delivery {
    match catch_unwind(AssertUnwindSafe(|| consumer.offer(event))) {
        Ok(Some(Ok(()))) => Delivery::Done,
        Ok(Some(Err(e))) => {
            warn!("execute event delivery failed: {e:#}");
            Delivery::Failed
        }
        Ok(None) => Delivery::Unclaimed,
        Err(_) => {
            error!("execute consumer panicked during delivery");
            Delivery::Failed
        }
    }
}

/// Forwards events to an mpsc channel so the task body runs elsewhere.
pub struct ChannelConsumer {
    tx: mpsc::UnboundedSender<ExecuteEvent>,
}

impl ChannelConsumer {
    pub fn new(tx: mpsc::UnboundedSender<ExecuteEvent>) -> Self {
        Self { tx }
    }
}

impl ExecuteConsumer for ChannelConsumer {
    fn deliver(&self, event: &ExecuteEvent) -> anyhow::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("execute channel closed"))
    }

    fn is_ready(&self) -> bool {
        !self.tx.is_closed()
    }
}

type ConsumerSlot = Mutex<Option<Weak<dyn ExecuteConsumer>>>;

/// Routes events to the active consumer, falling back to a default one.
///
/// Attach this to the [`EventQueue`] once; it reports itself not ready
/// while neither consumer is alive, so events queue instead of failing.
#[derive(Default)]
pub struct DispatchConsumer {
    active: ConsumerSlot,
    default: ConsumerSlot,
}

impl DispatchConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active<C: ExecuteConsumer + 'static>(&self, consumer: &Arc<C>) {
        *lock_slot(&self.active) = Some(Arc::downgrade(consumer) as Weak<dyn ExecuteConsumer>);
    }

    pub fn clear_active(&self) {
        *lock_slot(&self.active) = None;
    }

    pub fn set_default<C: ExecuteConsumer + 'static>(&self, consumer: &Arc<C>) {
        *lock_slot(&self.default) = Some(Arc::downgrade(consumer) as Weak<dyn ExecuteConsumer>);
    }

    pub fn clear_default(&self) {
        *lock_slot(&self.default) = None;
    }

    fn target(&self) -> Option<Arc<dyn ExecuteConsumer>> {
        let live = |slot: &ConsumerSlot| {
            lock_slot(slot)
                .as_ref()
                .and_then(Weak::upgrade)
                .filter(|c| c.is_ready())
        };
        live(&self.active).or_else(|| live(&self.default))
    }
}

impl ExecuteConsumer for DispatchConsumer {
    fn deliver(&self, event: &ExecuteEvent) -> anyhow::Result<()> {
        self.offer(event)
            .unwrap_or_else(|| Err(anyhow::anyhow!("no active or default consumer")))
    }

    fn is_ready(&self) -> bool {
        self.target().is_some()
    }

    /// The target is resolved once, so a consumer dropped after the queue's
    /// readiness check leaves the event unclaimed rather than failed.
    fn offer(&self, event: &ExecuteEvent) -> Option<anyhow::Result<()>> {
        self.target().and_then(|consumer| consumer.offer(event))
    }
}

fn lock_slot(slot: &ConsumerSlot) -> std::sync::MutexGuard<'_, Option<Weak<dyn ExecuteConsumer>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drain `rx`, running `handler` for each event with a per-event `timeout`.
///
/// Returns the number of events that completed successfully once the
/// channel closes.
pub async fn run_consumer<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<ExecuteEvent>,
    timeout: Duration,
    mut handler: F,
) -> usize
where
    F: FnMut(ExecuteEvent) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut completed = 0;
    while let Some(event) = rx.recv().await {
        match tokio::time::timeout(timeout, handler(event)).await {
            Ok(Ok(())) => completed += 1,
            Ok(Err(e)) => warn!("task body failed: {e:#}"),
            Err(_) => warn!("task body exceeded {} ms, abandoned", timeout.as_millis()),
        }
    }
    completed
}
