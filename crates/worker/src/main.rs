//! `easel-worker` -- image-generation worker node.
//!
//! Registers with the easel coordination server, polls it for
//! generation jobs, runs them on local compute slots through the
//! configured external generator, and reports results (or failures)
//! back. See [`easel_worker::config`] for the environment table.

use std::sync::Arc;
use std::sync::Mutex;

use easel_api::{ApiClient, ClientMetadata};
use easel_core::slots::SlotPool;
use easel_core::task::TaskRecord;
use easel_worker::board::ProgressBoard;
use easel_worker::config::Config;
use easel_worker::generate::{CommandGenerator, GenerateRequest, Generator, StubGenerator};
use easel_worker::scratch::ScratchSet;
use easel_worker::{gpu, heartbeat, scheduler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load();
    if config.uid_was_generated {
        tracing::warn!(
            client_uid = %config.client_uid,
            "No client UID configured, generated a fresh one; set EASEL_CLIENT_UID to pin it",
        );
    }

    tracing::info!(
        api_url = %config.api_url,
        client_uid = %config.client_uid,
        client_name = %config.client_name,
        test_mode = config.test_mode,
        cpu_mode = config.cpu_mode,
        "Starting easel-worker",
    );

    let metadata = ClientMetadata {
        client_uid: config.client_uid.clone(),
        client_name: config.client_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        vram: config.vram_gb,
        test_mode: config.test_mode,
        cpu_mode: config.cpu_mode,
    };
    let api = Arc::new(ApiClient::new(&config.api_url, metadata));

    if let Err(e) = api.register().await {
        tracing::error!(error = %e, "Registration failed, cannot start");
        std::process::exit(1);
    }
    tracing::info!("Registered with the coordination server");

    let slots = if config.cpu_mode {
        tracing::info!("CPU mode, using a single compute slot");
        SlotPool::cpu()
    } else {
        let gpu_count = gpu::detect_gpu_count();
        if gpu_count == 0 {
            tracing::warn!("No GPUs detected, falling back to a single slot");
        }
        SlotPool::new(gpu_count.max(1) as usize)
    };

    let generator: Arc<dyn Generator> = if config.test_mode {
        tracing::info!("Test mode, using the dry-run generator");
        Arc::new(StubGenerator)
    } else {
        Arc::new(CommandGenerator::new(config.generator_program.clone()))
    };

    if !config.test_mode {
        warm_up(generator.as_ref()).await;
    }

    let board = Arc::new(Mutex::new(ProgressBoard::new()));
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    tokio::spawn(heartbeat::poll_loop(
        Arc::clone(&api),
        Arc::clone(&board),
        cancel.clone(),
    ));
    tokio::spawn(heartbeat::progress_loop(
        Arc::clone(&api),
        Arc::clone(&board),
        cancel.clone(),
    ));

    scheduler::Scheduler::new(api, generator, slots, board, config.max_queue)
        .run(cancel)
        .await;

    tracing::info!("Worker stopped");
}

/// Run one tiny throwaway generation before accepting work, so the
/// generator loads its model while the worker is still idle instead of
/// on the first real task.
async fn warm_up(generator: &dyn Generator) {
    let scratch = match ScratchSet::new() {
        Ok(scratch) => scratch,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping warm-up, could not allocate scratch files");
            return;
        }
    };
    let request = GenerateRequest {
        record: TaskRecord {
            prompt: "Test machines under heavy load".to_string(),
            strength: 7.0,
            steps: 1,
            seed: 123_456,
            width: 64,
            height: 64,
            ..TaskRecord::default()
        },
        out_path: scratch.image_path().to_path_buf(),
        init_image: None,
        mask_image: None,
        print_path: None,
    };

    tracing::info!("Warming up the generator");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
    match generator.generate(&request, tx).await {
        Ok(()) => tracing::info!("Warm-up complete"),
        Err(e) => tracing::warn!(error = %e, "Warm-up failed, continuing anyway"),
    }
    let _ = drain.await;
}
