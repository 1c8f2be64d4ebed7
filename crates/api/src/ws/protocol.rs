//! Per-connection session: decodes client actions into jobs, relays job
//! progress back to the requester, and replies with the outcome.
//!
//! A session handles its own actions one at a time; sessions of different
//! connections run concurrently and meet only at the job executor queue.

use std::sync::Arc;

use arttic_core::catalog::validate_image_filename;
use arttic_core::error::CoreError;
use arttic_core::generation::{validate_sampler, GenerationRequest};
use arttic_core::messages::{
    ACTION_DELETE_IMAGE, ACTION_GENERATE_IMAGE, ACTION_LOAD_MODEL, ACTION_OPTIMIZE_MODEL,
    ACTION_UNLOAD_MODEL,
};
use arttic_core::model::resolve_lora;
use arttic_core::types::ConnId;
use arttic_events::progress_channel;
use arttic_pipeline::LoadOptions;
use arttic_worker::{GalleryEntry, Job, JobError, JobOutput};
use tokio::sync::mpsc;

use crate::error::{core_error_code, job_error_code};
use crate::routes::images::load_gallery;
use crate::state::AppState;
use crate::ws::messages::{
    image_url, ClientEnvelope, DeleteImagePayload, GalleryImage, LoadModelPayload, ServerMessage,
    StatusData,
};

/// Why an inbound message could not be turned into a job.
#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("Malformed message: {0}")]
    Malformed(serde_json::Error),

    #[error("Invalid payload for '{action}': {source}")]
    Payload {
        action: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl RequestError {
    fn code(&self) -> &'static str {
        match self {
            RequestError::Malformed(_) | RequestError::Payload { .. } => "BAD_REQUEST",
            RequestError::Core(e) => core_error_code(e),
        }
    }
}

pub struct Session {
    state: AppState,
    conn_id: ConnId,
}

impl Session {
    pub fn new(state: AppState, conn_id: ConnId) -> Self {
        Self { state, conn_id }
    }

    /// Greet the client, then handle inbound text frames until the
    /// connection's receive loop hangs up.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<String>) {
        self.greet().await;
        while let Some(text) = inbound.recv().await {
            self.handle_text(&text).await;
        }
        tracing::debug!(conn_id = %self.conn_id, "Session ended");
    }

    /// Send the current pipeline state and gallery to a new client.
    async fn greet(&self) {
        let snapshot = self.state.executor.snapshot();
        self.reply(ServerMessage::ModelStatus(StatusData::from(&snapshot)))
            .await;
        match load_gallery(&self.state.store).await {
            Ok(images) => self.reply(ServerMessage::GalleryUpdated { images }).await,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, error = %e, "Failed to list gallery for greeting");
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        let envelope: ClientEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, error = %e, "Malformed client message");
                let err = RequestError::Malformed(e);
                self.reply(ServerMessage::error(err.to_string(), err.code()))
                    .await;
                return;
            }
        };
        let action = envelope.action.clone();

        let job = match self.build_job(envelope) {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(conn_id = %self.conn_id, action = %action, "Unknown action ignored");
                return;
            }
            Err(e) => {
                tracing::info!(conn_id = %self.conn_id, action = %action, error = %e, "Rejected request");
                self.reply(ServerMessage::error(e.to_string(), e.code()))
                    .await;
                return;
            }
        };

        tracing::info!(conn_id = %self.conn_id, action = %action, "Submitting job");
        match self.run_job(job).await {
            Ok(output) => self.deliver(output).await,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, action = %action, error = %e, "Job failed");
                self.reply(ServerMessage::error(e.to_string(), job_error_code(&e)))
                    .await;
            }
        }
    }

    /// Map an action to a job, validating everything that can be checked
    /// without the accelerator. `Ok(None)` means the action is unknown.
    fn build_job(&self, envelope: ClientEnvelope) -> Result<Option<Job>, RequestError> {
        let action = envelope.action.clone();
        let payload_error = |source| RequestError::Payload {
            action: action.clone(),
            source,
        };

        let job = match action.as_str() {
            ACTION_LOAD_MODEL => {
                let payload: LoadModelPayload = envelope.decode().map_err(payload_error)?;
                validate_sampler(&payload.sampler)?;
                let descriptor = self.state.resolver.resolve(&payload.model)?;
                let lora = resolve_lora(&self.state.config.loras_dir, payload.lora.as_deref())?;
                Job::LoadModel {
                    descriptor,
                    options: LoadOptions {
                        sampler: payload.sampler,
                        vae_tiling: payload.vae_tiling,
                        cpu_offload: payload.cpu_offload,
                        lora,
                    },
                }
            }
            ACTION_GENERATE_IMAGE => {
                let request: GenerationRequest = envelope.decode().map_err(payload_error)?;
                request.check()?;
                Job::Generate(request)
            }
            ACTION_UNLOAD_MODEL => Job::UnloadModel,
            ACTION_OPTIMIZE_MODEL => Job::Optimize,
            ACTION_DELETE_IMAGE => {
                let payload: DeleteImagePayload = envelope.decode().map_err(payload_error)?;
                validate_image_filename(&payload.filename)?;
                Job::DeleteImage {
                    filename: payload.filename,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(job))
    }

    /// Submit `job` and forward its progress to this connection.
    ///
    /// Returns once the job has finished and every progress event it
    /// reported has been forwarded.
    async fn run_job(&self, job: Job) -> Result<JobOutput, JobError> {
        let (sink, mut progress) = progress_channel();
        let registry = Arc::clone(&self.state.registry);
        let conn_id = self.conn_id.clone();
        let relay = tokio::spawn(async move {
            while let Some(event) = progress.recv().await {
                let message = ServerMessage::ProgressUpdate(event).to_message();
                if !registry.send_to(&conn_id, message).await {
                    break;
                }
            }
        });

        let result = self.state.executor.submit(job, sink).await;
        if let Err(e) = relay.await {
            tracing::warn!(conn_id = %self.conn_id, error = %e, "Progress relay task failed");
        }
        result
    }

    async fn deliver(&self, output: JobOutput) {
        match output {
            JobOutput::Loaded { snapshot } => {
                self.reply(ServerMessage::ModelLoaded(StatusData::from(&snapshot)))
                    .await;
            }
            JobOutput::Unloaded { snapshot, .. } => {
                self.reply(ServerMessage::ModelUnloaded(StatusData::from(&snapshot)))
                    .await;
            }
            JobOutput::Optimized { outcome, snapshot } => {
                self.reply(ServerMessage::ModelOptimized {
                    outcome,
                    status: StatusData::from(&snapshot),
                })
                .await;
            }
            JobOutput::Generated {
                filename,
                metadata,
                gallery,
            } => {
                self.reply(ServerMessage::GenerationComplete {
                    image: image_url(&filename),
                    info: metadata.summary(),
                    filename,
                    metadata,
                })
                .await;
                self.broadcast_gallery(gallery).await;
            }
            JobOutput::Deleted {
                filename,
                deleted,
                gallery,
            } => {
                self.reply(ServerMessage::ImageDeleted { filename, deleted })
                    .await;
                self.broadcast_gallery(gallery).await;
            }
        }
    }

    async fn broadcast_gallery(&self, gallery: Vec<GalleryEntry>) {
        let images = gallery.into_iter().map(GalleryImage::from).collect();
        let delivered = self
            .state
            .registry
            .broadcast(ServerMessage::GalleryUpdated { images }.to_message())
            .await;
        tracing::debug!(delivered, "Broadcast gallery update");
    }

    async fn reply(&self, message: ServerMessage) {
        let msg_type = message.type_name();
        if !self
            .state
            .registry
            .send_to(&self.conn_id, message.to_message())
            .await
        {
            tracing::debug!(conn_id = %self.conn_id, msg_type, "Requester gone, reply dropped");
        }
    }
}
