//! Integration tests for the job executor over the simulated backend.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use arttic_core::capability::Mode;
use arttic_core::error::CoreError;
use arttic_core::generation::GenerationRequest;
use arttic_core::model::ModelDescriptor;
use arttic_core::status::PipelineStatus;
use arttic_events::{progress_channel, EventBus, ProgressSink};
use arttic_pipeline::{
    LoadOptions, PipelineError, PipelineManager, SimulatedBackend, SimulatorConfig, SimulatorProbe,
};
use arttic_worker::{ExecutorHandle, ImageStore, Job, JobError, JobExecutor, JobOutput, LocalImageStore, StoreError};
use assert_matches::assert_matches;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    dir: TempDir,
    handle: ExecutorHandle,
    thread: JoinHandle<()>,
    probe: Arc<SimulatorProbe>,
    bus: Arc<EventBus>,
    store: Arc<LocalImageStore>,
}

impl Harness {
    fn new(step_delay: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimulatedBackend::new(SimulatorConfig {
            accelerator: true,
            step_delay,
        });
        let probe = backend.probe();
        let bus = Arc::new(EventBus::default());
        let store = Arc::new(LocalImageStore::new(dir.path().join("outputs")).unwrap());
        let (handle, thread) = JobExecutor::spawn(
            PipelineManager::new(backend, None),
            store.clone(),
            bus.clone(),
        )
        .unwrap();
        Self {
            dir,
            handle,
            thread,
            probe,
            bus,
            store,
        }
    }

    fn descriptor(&self, id: &str) -> ModelDescriptor {
        let path = self.dir.path().join(format!("{id}.safetensors"));
        std::fs::write(&path, id.as_bytes()).unwrap();
        ModelDescriptor::new(id, path)
    }

    async fn load(&self, id: &str) -> Result<JobOutput, JobError> {
        self.handle
            .submit(
                Job::LoadModel {
                    descriptor: self.descriptor(id),
                    options: LoadOptions::default(),
                },
                ProgressSink::discard(),
            )
            .await
    }

    async fn generate(&self, request: GenerationRequest) -> Result<JobOutput, JobError> {
        self.handle
            .submit(Job::Generate(request), ProgressSink::discard())
            .await
    }
}

fn small(prompt: &str) -> GenerationRequest {
    GenerationRequest {
        steps: 6,
        width: 256,
        height: 256,
        seed: Some(7),
        ..GenerationRequest::new(prompt)
    }
}

fn image_exists(dir: &Path, filename: &str) -> bool {
    dir.join(filename).is_file()
}

// ---------------------------------------------------------------------------
// Test: load, generate, unload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_publishes_snapshot_and_event() {
    let h = Harness::new(Duration::ZERO);
    let mut events = h.bus.subscribe();

    let output = h.load("sd15-A").await.unwrap();
    let snapshot = assert_matches!(output, JobOutput::Loaded { snapshot } => snapshot);
    assert_eq!(snapshot.status, PipelineStatus::Loaded);
    assert_eq!(snapshot.default_resolution(), Some((512, 512)));

    assert_eq!(h.handle.snapshot(), snapshot);
    let event = events.recv().await.unwrap();
    assert_eq!(event.name(), "model_loaded");
    assert_eq!(event.snapshot().model.as_deref(), Some("sd15-A"));
}

#[tokio::test]
async fn generate_saves_image_and_returns_gallery() {
    let h = Harness::new(Duration::ZERO);
    h.load("sd15-A").await.unwrap();

    let request = GenerationRequest {
        seed: Some(12345),
        ..GenerationRequest::new("a lighthouse")
    };
    let output = h.generate(request).await.unwrap();
    let (filename, metadata, gallery) = assert_matches!(
        output,
        JobOutput::Generated { filename, metadata, gallery } => (filename, metadata, gallery)
    );

    assert_eq!(metadata.seed, 12345);
    assert_eq!(metadata.steps, 28);
    assert_eq!((metadata.width, metadata.height), (512, 512));
    assert!(image_exists(h.store.root(), &filename));
    assert_eq!(gallery.first().map(|e| e.filename.as_str()), Some(filename.as_str()));
}

#[tokio::test]
async fn random_seed_is_resolved_before_generation() {
    let h = Harness::new(Duration::ZERO);
    h.load("sd15-A").await.unwrap();

    let request = GenerationRequest {
        seed: Some(-1),
        ..small("anything")
    };
    let metadata = assert_matches!(
        h.generate(request).await,
        Ok(JobOutput::Generated { metadata, .. }) => metadata
    );
    assert!(metadata.seed <= u64::from(u32::MAX));
}

#[tokio::test]
async fn init_image_from_gallery_runs_image_to_image() {
    let h = Harness::new(Duration::ZERO);
    h.load("sd15-A").await.unwrap();

    let source = assert_matches!(
        h.generate(small("first")).await,
        Ok(JobOutput::Generated { filename, .. }) => filename
    );
    let request = GenerationRequest {
        init_image: Some(source.clone()),
        ..small("second")
    };
    let metadata = assert_matches!(
        h.generate(request).await,
        Ok(JobOutput::Generated { metadata, .. }) => metadata
    );
    assert_eq!(metadata.mode, Mode::ImageToImage);
    assert_eq!(metadata.init_image, Some(source));
    assert_eq!(h.handle.snapshot().mode, Some(Mode::ImageToImage));
}

#[tokio::test]
async fn unload_publishes_unloaded_event() {
    let h = Harness::new(Duration::ZERO);
    h.load("sd15-A").await.unwrap();
    let mut events = h.bus.subscribe();

    let output = h.handle.submit(Job::UnloadModel, ProgressSink::discard()).await.unwrap();
    assert_matches!(output, JobOutput::Unloaded { released: true, .. });
    assert_eq!(events.recv().await.unwrap().name(), "model_unloaded");
    assert!(!h.handle.snapshot().is_loaded());

    // Unloading again is harmless and publishes nothing.
    let output = h.handle.submit(Job::UnloadModel, ProgressSink::discard()).await.unwrap();
    assert_matches!(output, JobOutput::Unloaded { released: false, .. });
    assert!(events.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: errors never stop the queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_while_unloaded_is_rejected_without_backend_call() {
    let h = Harness::new(Duration::ZERO);

    assert_matches!(
        h.generate(small("x")).await,
        Err(JobError::Pipeline(PipelineError::NotLoaded))
    );
    assert_eq!(h.probe.runs(), 0);

    // The queue keeps going.
    h.load("sd15-A").await.unwrap();
    h.generate(small("x")).await.unwrap();
}

#[tokio::test]
async fn invalid_request_is_a_validation_error() {
    let h = Harness::new(Duration::ZERO);
    h.load("sd15-A").await.unwrap();

    let request = GenerationRequest {
        width: 500,
        ..small("x")
    };
    assert_matches!(
        h.generate(request).await,
        Err(JobError::Core(CoreError::Validation(_)))
    );
    assert_eq!(h.probe.runs(), 0);
}

#[tokio::test]
async fn panic_in_backend_unloads_and_queue_survives() {
    let h = Harness::new(Duration::ZERO);
    h.load("sd15-A").await.unwrap();
    h.probe.panic_next_run();

    assert_matches!(h.generate(small("x")).await, Err(JobError::Panicked(_)));
    assert!(!h.handle.snapshot().is_loaded());
    assert_eq!(h.probe.components_released(), 1);

    h.load("sd15-A").await.unwrap();
    h.generate(small("y")).await.unwrap();
}

#[tokio::test]
async fn gated_model_load_fails_and_reports_unloaded() {
    let h = Harness::new(Duration::ZERO);

    assert_matches!(
        h.load("flux1-dev").await,
        Err(JobError::Pipeline(PipelineError::AuthRequired { .. }))
    );
    assert_eq!(h.handle.snapshot().status, PipelineStatus::Unloaded);
}

// ---------------------------------------------------------------------------
// Test: serialization of concurrent submissions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_generations_never_overlap() {
    let h = Harness::new(Duration::from_millis(5));
    h.load("sd15-A").await.unwrap();

    let (a, b) = tokio::join!(h.generate(small("first")), h.generate(small("second")));
    let a = assert_matches!(a, Ok(JobOutput::Generated { filename, .. }) => filename);
    let b = assert_matches!(b, Ok(JobOutput::Generated { filename, .. }) => filename);

    assert_ne!(a, b);
    assert_eq!(h.probe.runs(), 2);
    assert_eq!(h.probe.max_concurrent_runs(), 1);
}

#[tokio::test]
async fn dropped_progress_receiver_does_not_abort_job() {
    let h = Harness::new(Duration::from_millis(1));
    h.load("sd15-A").await.unwrap();

    let (sink, rx) = progress_channel();
    drop(rx);
    let output = h.handle.submit(Job::Generate(small("x")), sink).await;
    assert_matches!(output, Ok(JobOutput::Generated { .. }));
}

#[tokio::test]
async fn progress_reaches_the_requester_in_order() {
    let h = Harness::new(Duration::ZERO);
    h.load("sd15-A").await.unwrap();

    let (sink, mut rx) = progress_channel();
    h.handle.submit(Job::Generate(small("x")), sink).await.unwrap();

    let mut descriptions = Vec::new();
    while let Ok(event) = rx.try_recv() {
        descriptions.push(event.description);
    }
    assert_eq!(descriptions.first().map(String::as_str), Some("Starting generation..."));
    assert_eq!(descriptions.last().map(String::as_str), Some("Step 6/6"));
}

// ---------------------------------------------------------------------------
// Test: gallery deletion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_missing_image_is_idempotent() {
    let h = Harness::new(Duration::ZERO);

    let output = h
        .handle
        .submit(
            Job::DeleteImage {
                filename: "missing.png".into(),
            },
            ProgressSink::discard(),
        )
        .await
        .unwrap();
    assert_matches!(output, JobOutput::Deleted { deleted: false, ref filename, .. } if filename == "missing.png");
}

#[tokio::test]
async fn delete_existing_image_updates_gallery() {
    let h = Harness::new(Duration::ZERO);
    h.load("sd15-A").await.unwrap();
    let filename = assert_matches!(
        h.generate(small("x")).await,
        Ok(JobOutput::Generated { filename, .. }) => filename
    );

    let output = h
        .handle
        .submit(Job::DeleteImage { filename: filename.clone() }, ProgressSink::discard())
        .await
        .unwrap();
    let gallery = assert_matches!(output, JobOutput::Deleted { deleted: true, gallery, .. } => gallery);
    assert!(gallery.is_empty());
    assert!(h.store.list().unwrap().is_empty());
}

#[tokio::test]
async fn delete_rejects_path_traversal() {
    let h = Harness::new(Duration::ZERO);

    assert_matches!(
        h.handle
            .submit(
                Job::DeleteImage {
                    filename: "../models/sd15-A.safetensors".into(),
                },
                ProgressSink::discard(),
            )
            .await,
        Err(JobError::Store(StoreError::Invalid(_)))
    );
}

// ---------------------------------------------------------------------------
// Test: shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_unloads_and_stops_worker() {
    let h = Harness::new(Duration::ZERO);
    h.load("sd15-A").await.unwrap();
    let mut events = h.bus.subscribe();

    h.handle.shutdown();
    let thread = h.thread;
    tokio::task::spawn_blocking(move || thread.join().unwrap())
        .await
        .unwrap();

    assert_eq!(h.probe.components_released(), 1);
    assert_eq!(events.recv().await.unwrap().name(), "model_unloaded");
    assert_matches!(
        h.handle.submit(Job::UnloadModel, ProgressSink::discard()).await,
        Err(JobError::ExecutorGone)
    );
}
