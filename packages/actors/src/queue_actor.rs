//! Queue actor: the durable work channel.
//!
//! Every item is written to the [`QueueStore`] before the enqueue is
//! acknowledged, and only removed once a worker acknowledged it. Items are
//! handed out in FIFO order, each to exactly one waiting worker.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use db::QueueStore;
use db::repositories::StoredItem;
use queue_core::{Delivery, JobError, JobEvent, JobId, QueueDepth, QueueItem};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::broadcast;

use crate::messages::QueueMessage;

/// An item waiting for a worker.
#[derive(Debug)]
struct Pending {
    job_id: JobId,
    item: QueueItem,
    /// Deliveries so far.
    deliveries: u32,
}

/// An item held by a worker.
#[derive(Debug)]
struct InFlight {
    item: QueueItem,
    worker_id: String,
    deliveries: u32,
}

/// A parked claim.
struct Waiter {
    worker_id: String,
    reply: RpcReplyPort<Option<Delivery>>,
}

/// State for the queue actor.
pub struct QueueActorState {
    channel: String,
    store: Arc<dyn QueueStore>,
    pending: VecDeque<Pending>,
    in_flight: HashMap<JobId, InFlight>,
    waiters: VecDeque<Waiter>,
    event_tx: broadcast::Sender<JobEvent>,
    closed: bool,
}

impl QueueActorState {
    fn new(args: QueueArgs) -> Self {
        let pending = args
            .recovered
            .into_iter()
            .map(|stored| Pending {
                job_id: stored.job_id,
                item: stored.item,
                deliveries: stored.deliveries,
            })
            .collect();

        Self {
            channel: args.channel,
            store: args.store,
            pending,
            in_flight: HashMap::new(),
            waiters: VecDeque::new(),
            event_tx: args.event_tx,
            closed: false,
        }
    }

    pub fn depth(&self) -> QueueDepth {
        QueueDepth {
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
        }
    }

    fn contains(&self, job_id: JobId) -> bool {
        self.in_flight.contains_key(&job_id) || self.pending.iter().any(|p| p.job_id == job_id)
    }

    async fn enqueue(&mut self, item: QueueItem) -> Result<(), JobError> {
        if self.closed {
            return Err(JobError::QueueUnavailable("queue is shutting down".into()));
        }
        let job_id = item
            .job_id()
            .ok_or_else(|| JobError::MalformedItem("item has no jobId".into()))?;
        if self.contains(job_id) {
            return Err(JobError::DuplicateJobId(job_id));
        }

        self.store
            .insert(&self.channel, job_id, &item)
            .await
            .map_err(|e| {
                tracing::warn!("Failed to persist item {} on {}: {}", job_id, self.channel, e);
                JobError::QueueUnavailable(e.to_string())
            })?;

        tracing::debug!("Enqueued {} ({}) on {}", job_id, item.name, self.channel);
        self.dispatch(Pending {
            job_id,
            item,
            deliveries: 0,
        })
        .await;
        Ok(())
    }

    async fn claim(&mut self, waiter: Waiter) {
        if self.closed {
            let _ = waiter.reply.send(None);
            return;
        }
        match self.pending.pop_front() {
            Some(next) => {
                if let Err(next) = self.deliver(next, waiter).await {
                    self.pending.push_front(next);
                }
            }
            None => self.waiters.push_back(waiter),
        }
    }

    /// Hand `next` to the first live waiter, or park it.
    async fn dispatch(&mut self, mut next: Pending) {
        while let Some(waiter) = self.waiters.pop_front() {
            match self.deliver(next, waiter).await {
                Ok(()) => return,
                Err(back) => next = back,
            }
        }
        self.pending.push_back(next);
    }

    /// Fails, returning the item, when the waiting worker is gone.
    async fn deliver(&mut self, next: Pending, waiter: Waiter) -> Result<(), Pending> {
        if waiter.reply.is_closed() {
            return Err(next);
        }

        let attempt = next.deliveries + 1;
        let delivery = Delivery {
            job_id: next.job_id,
            item: next.item.clone(),
            attempt,
        };
        if waiter.reply.send(Some(delivery)).is_err() {
            return Err(next);
        }

        if let Err(e) = self
            .store
            .mark_claimed(next.job_id, &waiter.worker_id, attempt)
            .await
        {
            tracing::warn!("Failed to record claim of {}: {}", next.job_id, e);
        }

        tracing::debug!(
            "Delivered {} to {} (attempt {})",
            next.job_id,
            waiter.worker_id,
            attempt
        );
        self.in_flight.insert(
            next.job_id,
            InFlight {
                item: next.item,
                worker_id: waiter.worker_id,
                deliveries: attempt,
            },
        );
        Ok(())
    }

    async fn ack(&mut self, job_id: JobId) {
        if self.in_flight.remove(&job_id).is_none() {
            tracing::debug!("Ack for {} which is not in flight", job_id);
            return;
        }
        if let Err(e) = self.store.remove(job_id).await {
            tracing::warn!("Failed to remove acknowledged item {}: {}", job_id, e);
        }
    }

    async fn requeue(&mut self, job_id: JobId) {
        let Some(held) = self.in_flight.remove(&job_id) else {
            tracing::debug!("Nack for {} which is not in flight", job_id);
            return;
        };
        if let Err(e) = self.store.release(job_id).await {
            tracing::warn!("Failed to release item {}: {}", job_id, e);
        }

        tracing::info!(
            "Redelivering {} held by {} (attempt {})",
            job_id,
            held.worker_id,
            held.deliveries + 1
        );
        let _ = self.event_tx.send(JobEvent::JobRedelivered {
            job_id,
            attempt: held.deliveries + 1,
            timestamp: Utc::now(),
        });

        self.dispatch(Pending {
            job_id,
            item: held.item,
            deliveries: held.deliveries,
        })
        .await;
    }

    async fn release_worker(&mut self, worker_id: &str) {
        self.waiters.retain(|w| w.worker_id != worker_id);

        let held: Vec<JobId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.worker_id == worker_id)
            .map(|(id, _)| *id)
            .collect();
        for job_id in held {
            self.requeue(job_id).await;
        }
    }

    fn close(&mut self) {
        self.closed = true;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.reply.send(None);
        }
    }
}

/// Queue actor arguments.
pub struct QueueArgs {
    pub channel: String,
    pub store: Arc<dyn QueueStore>,
    /// Items left in the store by a previous run, oldest first.
    pub recovered: Vec<StoredItem>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// Queue actor that owns one work channel.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let state = QueueActorState::new(args);
        tracing::info!(
            "Starting queue actor: {} ({} recovered items)",
            state.channel,
            state.pending.len()
        );
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { item, reply } => {
                let result = state.enqueue(item).await;
                let _ = reply.send(result);
            }

            QueueMessage::Claim { worker_id, reply } => {
                state.claim(Waiter { worker_id, reply }).await;
            }

            QueueMessage::Ack { job_id } => {
                state.ack(job_id).await;
            }

            QueueMessage::Nack { job_id } => {
                state.requeue(job_id).await;
            }

            QueueMessage::ReleaseWorker { worker_id } => {
                state.release_worker(&worker_id).await;
            }

            QueueMessage::GetDepth { reply } => {
                let _ = reply.send(state.depth());
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue: {}", state.channel);
                state.close();
                myself.stop(None);
            }
        }

        Ok(())
    }
}
