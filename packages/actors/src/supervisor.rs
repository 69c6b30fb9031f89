//! Supervisor actor owning one queue and its workers, and the pool handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use db::QueueStore;
use queue_core::{JobError, JobEvent, PoolConfig, QueueDepth, QueueItem};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::converter::Converter;
use crate::messages::{QueueMessage, SupervisorMessage, WorkerInfo, WorkerMessage};
use crate::queue_actor::{QueueActor, QueueArgs};
use crate::registry::JobRegistry;
use crate::worker_actor::{WorkerActor, WorkerArgs};

const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(30);
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to spawn actor: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error("pool did not start: {0}")]
    Startup(String),
}

/// Supervisor actor arguments.
pub struct SupervisorArgs {
    pub config: PoolConfig,
    pub registry: Arc<JobRegistry>,
    pub converter: Arc<dyn Converter>,
    pub store: Arc<dyn QueueStore>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    config: PoolConfig,
    registry: Arc<JobRegistry>,
    converter: Arc<dyn Converter>,
    queue: ActorRef<QueueMessage>,
    queue_alive: bool,
    /// Live workers by actor ID.
    workers: HashMap<ActorId, (String, ActorRef<WorkerMessage>)>,
    /// Worker counter for unique IDs.
    worker_counter: u64,
    shutting_down: bool,
    queue_stopping: bool,
}

impl SupervisorState {
    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("{}-worker-{}", self.config.channel, self.worker_counter)
    }
}

async fn spawn_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<(), ActorProcessingErr> {
    let worker_id = state.next_worker_id();
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        queue: state.queue.clone(),
        registry: state.registry.clone(),
        converter: state.converter.clone(),
        results_dir: state.config.results_dir.clone(),
        retry_limit: state.config.retry_limit,
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.insert(worker.get_id(), (worker_id, worker));
    Ok(())
}

/// Once shutting down: stop the queue after the last worker, then stop.
fn finish_shutdown(myself: &ActorRef<SupervisorMessage>, state: &mut SupervisorState) {
    if !state.shutting_down || !state.workers.is_empty() {
        return;
    }
    if state.queue_alive {
        if !state.queue_stopping {
            state.queue_stopping = true;
            let _ = state.queue.send_message(QueueMessage::Shutdown);
        }
        return;
    }
    myself.stop(None);
}

/// Supervisor actor that manages the pool.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let channel = args.config.channel.clone();
        tracing::info!("Starting worker pool supervisor for {}", channel);

        // Anything still stored was accepted but never acknowledged.
        let recovered = args.store.load(&channel).await.map_err(|e| {
            ActorProcessingErr::from(format!("Failed to load channel {}: {}", channel, e))
        })?;
        let mut restored = 0;
        for stored in &recovered {
            match stored.item.decode() {
                Ok(request) => {
                    if args.registry.restore(
                        request.job_id(),
                        request.kind(),
                        request.inputs().to_vec(),
                    ) {
                        restored += 1;
                    }
                }
                Err(e) => tracing::warn!("Recovered item {} is not decodable: {}", stored.job_id, e),
            }
        }
        if !recovered.is_empty() {
            tracing::info!(
                "Recovered {} items on {} ({} jobs restored)",
                recovered.len(),
                channel,
                restored
            );
        }

        let queue_args = QueueArgs {
            channel: channel.clone(),
            store: args.store,
            recovered,
            event_tx: args.registry.events(),
        };
        let (queue, _handle) = Actor::spawn_linked(None, QueueActor, queue_args, myself.get_cell())
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn queue: {}", e)))?;

        let mut state = SupervisorState {
            config: args.config,
            registry: args.registry,
            converter: args.converter,
            queue,
            queue_alive: true,
            workers: HashMap::new(),
            worker_counter: 0,
            shutting_down: false,
            queue_stopping: false,
        };

        for _ in 0..state.config.workers.max(1) {
            spawn_worker(&myself, &mut state).await?;
        }

        if state.config.job_ttl_secs.is_some() {
            let myself_clone = myself.clone();
            let period = Duration::from_secs(state.config.tick_secs.max(1));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                        break;
                    }
                }
            });
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::GetQueue { reply } => {
                let _ = reply.send(state.queue.clone());
            }

            SupervisorMessage::GetWorkers { reply } => {
                let mut workers = Vec::with_capacity(state.workers.len());
                for (worker_id, worker) in state.workers.values() {
                    // A worker in the middle of a conversion answers late.
                    let idle = matches!(
                        ractor::rpc::call(
                            worker,
                            |reply| WorkerMessage::IsIdle { reply },
                            Some(IDLE_PROBE_TIMEOUT),
                        )
                        .await,
                        Ok(CallResult::Success(true))
                    );
                    workers.push(WorkerInfo {
                        worker_id: worker_id.clone(),
                        idle,
                    });
                }
                workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
                let _ = reply.send(workers);
            }

            SupervisorMessage::Tick => {
                if let Some(ttl) = state.config.job_ttl_secs {
                    let ttl = chrono::Duration::seconds(i64::try_from(ttl).unwrap_or(i64::MAX));
                    let pruned = state.registry.prune_terminal(ttl);
                    if pruned > 0 {
                        tracing::info!("Pruned {} finished jobs", pruned);
                    }
                }
            }

            SupervisorMessage::Shutdown => {
                if state.shutting_down {
                    return Ok(());
                }
                tracing::info!("Shutting down worker pool: {}", state.config.channel);
                state.shutting_down = true;
                for (_, worker) in state.workers.values() {
                    worker.stop(Some("shutdown".to_string()));
                }
                finish_shutdown(&myself, state);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, failure) = match message {
            SupervisionEvent::ActorFailed(cell, err) => (cell, Some(err.to_string())),
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::debug!("Child actor {:?} terminated: {:?}", cell.get_id(), reason);
                (cell, None)
            }
            _ => return Ok(()),
        };

        let id = cell.get_id();
        if id == state.queue.get_id() {
            state.queue_alive = false;
            if !state.shutting_down {
                tracing::error!("Queue {} stopped unexpectedly: {:?}", state.config.channel, failure);
                state.shutting_down = true;
                for (_, worker) in state.workers.values() {
                    worker.stop(Some("queue stopped".to_string()));
                }
            }
        } else if let Some((worker_id, _)) = state.workers.remove(&id) {
            if let Some(err) = &failure {
                tracing::warn!("Worker {} failed: {}", worker_id, err);
            }
            // Whatever the worker held goes back to the channel.
            let _ = state
                .queue
                .send_message(QueueMessage::ReleaseWorker { worker_id });
            if !state.shutting_down {
                spawn_worker(&myself, state).await?;
            }
        }

        finish_shutdown(&myself, state);
        Ok(())
    }
}

/// Handle to a running worker pool.
pub struct WorkerPool {
    supervisor: ActorRef<SupervisorMessage>,
    queue: ActorRef<QueueMessage>,
    registry: Arc<JobRegistry>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Recover the channel from `store`, then start the queue and workers.
    pub async fn start(
        config: PoolConfig,
        registry: Arc<JobRegistry>,
        converter: Arc<dyn Converter>,
        store: Arc<dyn QueueStore>,
    ) -> Result<Self, PoolError> {
        let args = SupervisorArgs {
            config,
            registry: registry.clone(),
            converter,
            store,
        };
        let (supervisor, handle) = Actor::spawn(None, Supervisor, args).await?;

        let queue = match ractor::rpc::call(
            &supervisor,
            |reply| SupervisorMessage::GetQueue { reply },
            Some(QUERY_TIMEOUT),
        )
        .await
        {
            Ok(CallResult::Success(queue)) => queue,
            _ => {
                supervisor.stop(None);
                return Err(PoolError::Startup(
                    "supervisor did not report its queue".to_string(),
                ));
            }
        };

        Ok(Self {
            supervisor,
            queue,
            registry,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Subscribe to job and worker events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.registry.subscribe()
    }

    /// Durably enqueue an item. Returns once it is persisted.
    pub async fn enqueue(&self, item: QueueItem) -> Result<(), JobError> {
        match ractor::rpc::call(
            &self.queue,
            |reply| QueueMessage::Enqueue { item, reply },
            Some(ENQUEUE_TIMEOUT),
        )
        .await
        {
            Ok(CallResult::Success(result)) => result,
            Ok(CallResult::Timeout) => Err(JobError::QueueUnavailable(
                "timed out waiting for the queue".to_string(),
            )),
            Ok(CallResult::SenderError) => Err(JobError::QueueUnavailable(
                "queue dropped the request".to_string(),
            )),
            Err(e) => Err(JobError::QueueUnavailable(e.to_string())),
        }
    }

    pub async fn depth(&self) -> Result<QueueDepth, JobError> {
        match ractor::rpc::call(
            &self.queue,
            |reply| QueueMessage::GetDepth { reply },
            Some(QUERY_TIMEOUT),
        )
        .await
        {
            Ok(CallResult::Success(depth)) => Ok(depth),
            _ => Err(JobError::QueueUnavailable(
                "queue did not report its depth".to_string(),
            )),
        }
    }

    /// Live workers, sorted by ID.
    pub async fn workers(&self) -> Vec<WorkerInfo> {
        match ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::GetWorkers { reply },
            Some(QUERY_TIMEOUT),
        )
        .await
        {
            Ok(CallResult::Success(workers)) => workers,
            _ => Vec::new(),
        }
    }

    /// Let in-flight conversions finish, then stop the pool.
    ///
    /// Items that were never acknowledged stay stored and are redelivered
    /// by the next pool started on the same store.
    pub async fn shutdown(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        if self
            .supervisor
            .send_message(SupervisorMessage::Shutdown)
            .is_err()
        {
            tracing::debug!("Supervisor already stopped");
        }
        if let Err(e) = handle.await {
            tracing::warn!("Supervisor task ended abnormally: {}", e);
        }
    }
}
