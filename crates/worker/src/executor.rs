//! The single worker thread that owns the accelerator.
//!
//! Jobs are queued on an unbounded channel and run strictly one at a time in
//! submission order. Each job reports progress through the caller's
//! [`ProgressSink`] and answers through a oneshot channel. After every job
//! the worker publishes a fresh [`PipelineSnapshot`] on a `watch` channel
//! and, if the pipeline changed, a [`PipelineEvent`] on the event bus.
//!
//! There are no timeouts: a backend call that never returns stalls the
//! queue.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use arttic_core::status::PipelineSnapshot;
use arttic_events::{EventBus, PipelineEvent, ProgressSink};
use arttic_pipeline::{InferenceBackend, PipelineError, PipelineManager};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::JobError;
use crate::job::{Job, JobOutput};
use crate::store::ImageStore;

type Reply = oneshot::Sender<Result<JobOutput, JobError>>;

enum Command {
    Run {
        job: Job,
        progress: ProgressSink,
        reply: Reply,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front door to the executor.
#[derive(Clone)]
pub struct ExecutorHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<PipelineSnapshot>,
}

impl ExecutorHandle {
    /// Queue `job` and wait for its result.
    ///
    /// Dropping the returned future does not cancel the job.
    pub async fn submit(&self, job: Job, progress: ProgressSink) -> Result<JobOutput, JobError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Run {
                job,
                progress,
                reply,
            })
            .map_err(|_| JobError::ExecutorGone)?;
        rx.await.map_err(|_| JobError::ExecutorGone)?
    }

    /// The state published after the most recent job.
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Ask the worker to stop after the jobs already queued.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct JobExecutor<B: InferenceBackend> {
    manager: PipelineManager<B>,
    store: Arc<dyn ImageStore>,
    bus: Arc<EventBus>,
    snapshot: watch::Sender<PipelineSnapshot>,
}

impl<B: InferenceBackend> JobExecutor<B> {
    /// Move `manager` into a new worker thread and start draining jobs.
    pub fn spawn(
        manager: PipelineManager<B>,
        store: Arc<dyn ImageStore>,
        bus: Arc<EventBus>,
    ) -> std::io::Result<(ExecutorHandle, JoinHandle<()>)> {
        let (commands, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(manager.snapshot());

        let executor = Self {
            manager,
            store,
            bus,
            snapshot: snapshot_tx,
        };
        let thread = std::thread::Builder::new()
            .name("arttic-worker".to_string())
            .spawn(move || executor.run(rx))?;

        Ok((
            ExecutorHandle {
                commands,
                snapshot: snapshot_rx,
            },
            thread,
        ))
    }

    fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!(backend = self.manager.backend().name(), "Job executor started");

        while let Some(command) = commands.blocking_recv() {
            let Command::Run {
                job,
                progress,
                reply,
            } = command
            else {
                break;
            };
            let result = self.run_job(job, &progress);
            if reply.send(result).is_err() {
                tracing::debug!("Job requester went away before the reply");
            }
        }

        let before = self.manager.snapshot();
        if self.manager.unload() {
            self.publish(before);
        }
        tracing::info!("Job executor stopped");
    }

    fn run_job(&mut self, job: Job, progress: &ProgressSink) -> Result<JobOutput, JobError> {
        let name = job.name();
        let before = self.manager.snapshot();
        let started = Instant::now();
        tracing::debug!(job = name, "Job started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            execute(&mut self.manager, self.store.as_ref(), job, progress)
        }));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(job = name, error = %message, "Job panicked, unloading pipeline");
                self.manager.unload();
                Err(JobError::Panicked(message))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(job = name, elapsed_ms, "Job finished"),
            Err(e) => tracing::warn!(job = name, elapsed_ms, error = %e, "Job failed"),
        }

        self.publish(before);
        result
    }

    /// Publish the current snapshot, plus an event if it changed.
    fn publish(&self, before: PipelineSnapshot) {
        let after = self.manager.snapshot();
        if let Some(event) = transition_event(&before, &after) {
            self.bus.publish(event);
        }
        self.snapshot.send_replace(after);
    }
}

fn execute<B: InferenceBackend>(
    manager: &mut PipelineManager<B>,
    store: &dyn ImageStore,
    job: Job,
    progress: &ProgressSink,
) -> Result<JobOutput, JobError> {
    match job {
        Job::LoadModel {
            descriptor,
            options,
        } => {
            let snapshot = manager.load(descriptor, options, progress)?;
            Ok(JobOutput::Loaded { snapshot })
        }
        Job::UnloadModel => {
            let released = manager.unload();
            Ok(JobOutput::Unloaded {
                released,
                snapshot: manager.snapshot(),
            })
        }
        Job::Optimize => {
            let outcome = manager.optimize(progress)?;
            Ok(JobOutput::Optimized {
                outcome,
                snapshot: manager.snapshot(),
            })
        }
        Job::Generate(request) => {
            request.check()?;
            if !manager.is_loaded() {
                return Err(PipelineError::NotLoaded.into());
            }
            let request = request.with_resolved_seed();
            let init_image = request
                .init_image
                .as_deref()
                .map(|name| store.open(name))
                .transpose()?;

            let generated = manager.generate(&request, init_image.as_ref(), progress)?;
            let filename = store.save(&generated.image, &generated.metadata)?;
            Ok(JobOutput::Generated {
                filename,
                metadata: generated.metadata,
                gallery: store.list()?,
            })
        }
        Job::DeleteImage { filename } => {
            let deleted = store.delete(&filename)?;
            Ok(JobOutput::Deleted {
                filename,
                deleted,
                gallery: store.list()?,
            })
        }
    }
}

fn transition_event(before: &PipelineSnapshot, after: &PipelineSnapshot) -> Option<PipelineEvent> {
    if before == after {
        return None;
    }
    let snapshot = after.clone();
    let event = if after.is_loaded() && (!before.is_loaded() || before.model != after.model) {
        PipelineEvent::ModelLoaded { snapshot }
    } else if !after.is_loaded() {
        PipelineEvent::ModelUnloaded { snapshot }
    } else {
        PipelineEvent::StateChanged { snapshot }
    };
    Some(event)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arttic_core::status::PipelineStatus;

    fn loaded(model: &str) -> PipelineSnapshot {
        PipelineSnapshot {
            status: PipelineStatus::Loaded,
            model: Some(model.into()),
            ..Default::default()
        }
    }

    #[test]
    fn unchanged_snapshot_emits_nothing() {
        assert_eq!(transition_event(&loaded("a"), &loaded("a")), None);
    }

    #[test]
    fn classifies_transitions() {
        let empty = PipelineSnapshot::default();
        assert_eq!(transition_event(&empty, &loaded("a")).unwrap().name(), "model_loaded");
        assert_eq!(transition_event(&loaded("a"), &loaded("b")).unwrap().name(), "model_loaded");
        assert_eq!(transition_event(&loaded("a"), &empty).unwrap().name(), "model_unloaded");

        let offloaded = PipelineSnapshot {
            offloaded: true,
            ..loaded("a")
        };
        assert_eq!(transition_event(&loaded("a"), &offloaded).unwrap().name(), "state_changed");
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
    }
}
