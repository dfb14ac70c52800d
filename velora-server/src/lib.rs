//! # Velora Server
//!
//! Speed-enforcement ingestion server: decodes UDP radar telemetry,
//! correlates violations with camera images, computes fines, and keeps
//! an audit trail.
//!
//! ## Architecture
//!
//! The server is built on top of [`velora_core`] for pure protocol and
//! correlation logic, with [`tokio`] providing the async runtime and
//! `tokio-graceful-shutdown` the subsystem lifecycle.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     velora-server                          │
//! │                                                            │
//! │  UDP socket ──► UdpListener ──┐                            │
//! │                               ▼                            │
//! │  drop folder ─► DropFolder ─► IngestTask ──► Recorder      │
//! │  (optional)     + ImageIntake │  (engine,      │           │
//! │                               │   dedup)       ▼           │
//! │  notify channel ──────────────┘            Storage +       │
//! │  (external producers)                      FineCreated     │
//! │                                                            │
//! │  health: watch channel    events: broadcast channel        │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Startup order is deterministic: the telemetry socket is bound before
//! any image-feed subsystem starts, so no violation can be processed
//! before the correlation engine is ready. On shutdown the feeds stop
//! first, the ingest task drains and flushes pending violations as
//! unmatched, and the recorder finishes billing before the process exits.
//!
//! ## Example: Starting the Server
//!
//! ```rust,no_run
//! use clap::Parser;
//! use velora_server::{Cli, Server};
//! use tokio_graceful_shutdown::Toplevel;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let args = Cli::parse_from(["velora-server", "-p", "3344"]);
//!
//!     Toplevel::new(|s| async move {
//!         match Server::start(&s, args).await {
//!             Ok(_server) => {}
//!             Err(e) => {
//!                 log::error!("startup failed: {}", e);
//!                 s.request_shutdown();
//!             }
//!         }
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .map_err(Into::into)
//! }
//! ```

use std::fs::File;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use velora_core::{CorrelationConfig, CorrelationEngine, DedupStore, FineSchedule, FineScheduleSpec};

pub mod error;
pub mod events;
pub mod ingest;
pub mod intake;
pub mod persist;
pub mod recognition;
pub mod recorder;
pub mod storage;
pub mod udp;

use error::ServerError;
use events::EventBus;
use ingest::{FeedLiveness, Health, IngestMsg, IngestTask};
use intake::{DropFolderWatcher, ImageIntake, ImageNotification};
use persist::ReadingPersister;
use recognition::{NullRecognizer, PlateRecognizer};
use recorder::ViolationRecorder;
use storage::{JsonStorage, Storage};
use udp::UdpListener;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capacity of the feeds → ingest channel
const INGEST_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the ingest → recorder channel
const RECORDER_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser, Clone, Debug)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// UDP port for radar telemetry
    #[arg(short, long, default_value_t = 3344)]
    pub port: u16,

    /// Address to bind the telemetry socket to
    #[arg(short, long, default_value = "0.0.0.0")]
    pub address: IpAddr,

    /// Correlation window in seconds (max |violation - image capture|)
    #[arg(short, long, default_value_t = 30)]
    pub window_secs: u64,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 10)]
    pub sweep_secs: u64,

    /// Pending entries expire after window * multiplier
    #[arg(long, default_value_t = 2)]
    pub expiry_multiplier: i32,

    /// Ceiling on total pending correlation entries
    #[arg(long, default_value_t = 1024)]
    pub max_pending: usize,

    /// Maximum evidence images attached to one violation
    #[arg(long, default_value_t = 3)]
    pub max_images: usize,

    /// Posted limit in km/h assumed when a reading carries none
    #[arg(long, default_value_t = 60)]
    pub default_limit: u16,

    /// Directory for the local audit trail
    #[arg(short, long, default_value = "./velora-data")]
    pub data_dir: PathBuf,

    /// Local drop folder to poll for arriving images
    #[arg(long)]
    pub watch_dir: Option<PathBuf>,

    /// Drop-folder poll interval in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub watch_poll_ms: u64,

    /// Upper bound on one plate-recognition attempt, in milliseconds
    #[arg(long, default_value_t = 1500)]
    pub recognition_timeout_ms: u64,

    /// JSON file overriding the built-in fine schedule
    #[arg(long)]
    pub schedule_file: Option<PathBuf>,
}

impl Cli {
    fn correlation_config(&self) -> CorrelationConfig {
        CorrelationConfig {
            window: chrono::Duration::seconds(self.window_secs as i64),
            expiry_multiplier: self.expiry_multiplier,
            max_pending: self.max_pending,
            max_images: self.max_images,
        }
    }

    fn fine_schedule(&self) -> Result<FineSchedule, ServerError> {
        match &self.schedule_file {
            None => Ok(FineSchedule::default()),
            Some(path) => {
                let file = File::open(path)
                    .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
                let spec: FineScheduleSpec = serde_json::from_reader(file)
                    .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
                Ok(spec.build()?)
            }
        }
    }
}

/// Handles into the running server, for embedders and observers
pub struct Server {
    /// External image-feed producers send arrival notifications here
    pub notify_tx: mpsc::Sender<ImageNotification>,
    /// Domain event bus; subscribe for the outward event stream
    pub events: EventBus,
    /// Live health snapshots, refreshed on every sweep
    pub health: watch::Receiver<Health>,
}

impl Server {
    /// Wire up and start all subsystems.
    ///
    /// The telemetry socket is bound here, synchronously, before any
    /// subsystem runs; a bind failure aborts startup.
    pub async fn start(subsys: &SubsystemHandle, args: Cli) -> Result<Server, ServerError> {
        let schedule = args.fine_schedule()?;
        let storage: Arc<dyn Storage> = Arc::new(JsonStorage::open(&args.data_dir)?);
        let recognizer: Arc<dyn PlateRecognizer> = Arc::new(NullRecognizer);
        Self::start_with(subsys, args, schedule, storage, recognizer)
    }

    /// Like [`Server::start`] with the collaborators supplied by the
    /// embedder (a real recognition service, a database-backed store)
    pub fn start_with(
        subsys: &SubsystemHandle,
        args: Cli,
        schedule: FineSchedule,
        storage: Arc<dyn Storage>,
        recognizer: Arc<dyn PlateRecognizer>,
    ) -> Result<Server, ServerError> {
        let addr = SocketAddr::new(args.address, args.port);
        // Bound before the image-intake side exists
        let socket = udp::bind(addr)?;

        let events = events::event_bus();
        let (ingest_tx, ingest_rx) = mpsc::channel::<IngestMsg>(INGEST_CHANNEL_CAPACITY);
        let (recorder_tx, recorder_rx) = mpsc::channel(RECORDER_CHANNEL_CAPACITY);
        let (notify_tx, notify_rx) = mpsc::channel::<ImageNotification>(INGEST_CHANNEL_CAPACITY);
        let (health_tx, health_rx) = watch::channel(Health::default());
        let liveness = FeedLiveness::new();

        let ingest = IngestTask::new(
            CorrelationEngine::new(args.correlation_config()),
            DedupStore::new(),
            ReadingPersister::new(Arc::clone(&storage), events.clone()),
            recorder_tx,
            events.clone(),
            health_tx,
            FeedLiveness {
                udp: Arc::clone(&liveness.udp),
                intake: Arc::clone(&liveness.intake),
            },
            ingest_rx,
            Duration::from_secs(args.sweep_secs),
        );
        subsys.start(SubsystemBuilder::new("Ingest", |s| ingest.run(s)));

        let recorder = ViolationRecorder::new(
            storage,
            recognizer,
            schedule,
            events.clone(),
            Duration::from_millis(args.recognition_timeout_ms),
            recorder_rx,
        );
        subsys.start(SubsystemBuilder::new("Recorder", |s| recorder.run(s)));

        let listener = UdpListener::new(
            addr,
            socket,
            ingest_tx.clone(),
            args.default_limit,
            Arc::clone(&liveness.udp),
        );
        subsys.start(SubsystemBuilder::new("UdpListener", |s| listener.run(s)));

        let intake = ImageIntake::new(notify_rx, ingest_tx, Arc::clone(&liveness.intake));
        subsys.start(SubsystemBuilder::new("ImageIntake", |s| intake.run(s)));

        if let Some(dir) = &args.watch_dir {
            let watcher = DropFolderWatcher::new(
                dir.clone(),
                Duration::from_millis(args.watch_poll_ms),
                notify_tx.clone(),
            );
            subsys.start(SubsystemBuilder::new("DropFolder", |s| watcher.run(s)));
        }

        log::info!(
            "velora-server {} listening on {}, window ±{}s, sweep every {}s",
            VERSION,
            addr,
            args.window_secs,
            args.sweep_secs
        );

        Ok(Server {
            notify_tx,
            events,
            health: health_rx,
        })
    }
}
