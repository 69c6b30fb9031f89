//! Worker actor for converting claimed items.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use queue_core::{Delivery, JobError, JobEvent, JobId};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::broadcast;

use crate::converter::{ConversionRequest, Converter};
use crate::messages::{QueueMessage, WorkerMessage};
use crate::registry::JobRegistry;

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    /// Job currently being converted.
    pub current_job: Option<JobId>,
    /// Items handled since start.
    pub processed: u64,
    queue: ActorRef<QueueMessage>,
    registry: Arc<JobRegistry>,
    converter: Arc<dyn Converter>,
    results_dir: PathBuf,
    retry_limit: u32,
    event_tx: broadcast::Sender<JobEvent>,
}

impl WorkerActorState {
    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current_job.is_none()
    }

    fn ack(&self, job_id: JobId) {
        if let Err(e) = self.queue.send_message(QueueMessage::Ack { job_id }) {
            tracing::warn!("{}: failed to ack {}: {}", self.worker_id, job_id, e);
        }
    }

    fn nack(&self, job_id: JobId) {
        if let Err(e) = self.queue.send_message(QueueMessage::Nack { job_id }) {
            tracing::warn!("{}: failed to nack {}: {}", self.worker_id, job_id, e);
        }
    }

    /// Record an item that cannot be converted as failed.
    fn reject(&self, job_id: JobId, err: &JobError) {
        tracing::error!("{}: rejecting {}: {}", self.worker_id, job_id, err);
        let recorded = self
            .registry
            .mark_processing(job_id)
            .and_then(|_| self.registry.mark_failed(job_id, err.to_string()));
        if let Err(e) = recorded {
            tracing::warn!("{}: could not record failure of {}: {}", self.worker_id, job_id, e);
        }
    }

    async fn process(&mut self, delivery: Delivery) {
        let Delivery {
            job_id,
            item,
            attempt,
        } = delivery;

        let request = match item.decode() {
            Ok(request) => request,
            Err(err) => {
                self.reject(item.job_id().unwrap_or(job_id), &err);
                self.ack(job_id);
                return;
            }
        };

        match self.registry.mark_processing(job_id) {
            Ok(_) => {}
            Err(JobError::InvalidTransition { from, .. }) => {
                // Redelivery of a job that already finished.
                tracing::info!(
                    "{}: skipping duplicate delivery of {} ({})",
                    self.worker_id,
                    job_id,
                    from
                );
                self.ack(job_id);
                return;
            }
            Err(e) => {
                tracing::warn!("{}: cannot start {}: {}", self.worker_id, job_id, e);
                self.ack(job_id);
                return;
            }
        }

        let kind = request.kind();
        let conversion = ConversionRequest {
            job_id,
            kind,
            inputs: request.inputs().to_vec(),
            output: kind.output_path(&self.results_dir, job_id),
        };

        tracing::info!(
            "{}: converting {} ({}, {} inputs, attempt {})",
            self.worker_id,
            job_id,
            kind,
            conversion.inputs.len(),
            attempt
        );

        self.current_job = Some(job_id);
        let result = self.converter.convert(conversion).await;
        self.current_job = None;
        self.processed += 1;

        match result {
            Ok(output) => {
                tracing::info!(
                    "{}: completed {} in {}ms",
                    self.worker_id,
                    job_id,
                    output.elapsed.as_millis()
                );
                if let Err(e) = self
                    .registry
                    .mark_completed(job_id, output.output, output.count)
                {
                    tracing::warn!("{}: could not record completion of {}: {}", self.worker_id, job_id, e);
                }
            }
            Err(err) if attempt <= self.retry_limit => {
                tracing::warn!(
                    "{}: attempt {} of {} failed, retrying: {}",
                    self.worker_id,
                    attempt,
                    job_id,
                    err
                );
                self.nack(job_id);
                return;
            }
            Err(err) => {
                let err = JobError::from(err);
                tracing::error!("{}: failed {}: {}", self.worker_id, job_id, err);
                if let Err(e) = self.registry.mark_failed(job_id, err.to_string()) {
                    tracing::warn!("{}: could not record failure of {}: {}", self.worker_id, job_id, e);
                }
            }
        }

        self.ack(job_id);
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue: ActorRef<QueueMessage>,
    pub registry: Arc<JobRegistry>,
    pub converter: Arc<dyn Converter>,
    pub results_dir: PathBuf,
    pub retry_limit: u32,
}

/// Worker actor that claims and converts one item at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        let event_tx = args.registry.events();
        let _ = event_tx.send(JobEvent::WorkerStarted {
            worker_id: args.worker_id.clone(),
            timestamp: Utc::now(),
        });

        myself.send_message(WorkerMessage::Poll)?;

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            current_job: None,
            processed: 0,
            queue: args.queue,
            registry: args.registry,
            converter: args.converter,
            results_dir: args.results_dir,
            retry_limit: args.retry_limit,
            event_tx,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            "Worker {} stopped after {} items",
            state.worker_id,
            state.processed
        );
        let _ = state.event_tx.send(JobEvent::WorkerStopped {
            worker_id: state.worker_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                // The claim is awaited off the mailbox so the worker keeps
                // answering messages while the queue is empty.
                let (tx, rx) = ractor::concurrency::oneshot();
                state.queue.send_message(QueueMessage::Claim {
                    worker_id: state.worker_id.clone(),
                    reply: RpcReplyPort::from(tx),
                })?;

                let me = myself.clone();
                let queue = state.queue.clone();
                tokio::spawn(async move {
                    match rx.await {
                        Ok(Some(delivery)) => {
                            let job_id = delivery.job_id;
                            let process = WorkerMessage::Process {
                                delivery: Box::new(delivery),
                            };
                            if me.send_message(process).is_err() {
                                // Stopped while parked; hand the item back.
                                let _ = queue.send_message(QueueMessage::Nack { job_id });
                            }
                        }
                        _ => me.stop(Some("queue closed".to_string())),
                    }
                });
            }

            WorkerMessage::Process { delivery } => {
                state.process(*delivery).await;
                myself.send_message(WorkerMessage::Poll)?;
            }

            WorkerMessage::IsIdle { reply } => {
                let _ = reply.send(state.is_idle());
            }
        }

        Ok(())
    }
}
