use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use mailward_analyzers::{
    DynamicAnalyzer, HttpIntentClassifier, IntentAnalyzer, IntentClassifierConfig, SandboxAnalyzer,
    SandboxConfig, SimulatedSandbox, ThrottledAnalyzer, UrlAnalyzerConfig, UrlReputationAnalyzer,
};
use mailward_broker::{MessageBroker, RedisBroker, RedisBrokerConfig};
use mailward_core::{
    ACTION_GROUP, AGGREGATOR_GROUP, ANALYSIS_DONE_STREAM, ANALYSIS_GROUP, ANALYSIS_STREAM,
    FINAL_REPORT_STREAM, INTENT_DONE_STREAM, INTENT_GROUP, INTENT_STREAM, JOB_CONTROL_STREAM,
};
use mailward_pipeline::{
    ActionWorker, Aggregator, AnalysisWorker, BrokerIdempotencyGuard, ConsumerConfig,
    IngestProducer, IntentWorker, Reaper, StreamHandler, run_consumer,
};
use mailward_provider::{GmailConfig, GmailMailbox, MailboxProvider};
use mailward_server::{AnalyzerProvider, ServerConfig, health_router, ingest_router};
use mailward_store::{EventStore, PostgresConfig, PostgresEventStore};

/// Mailward worker process.
#[derive(Parser, Debug)]
#[command(name = "mailward", about = "Mailward threat-analysis pipeline workers")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Serve the ingest endpoint (dedup, risk gate, fan-out).
    Ingest,
    /// Run the intent classification worker.
    Intent,
    /// Run the dynamic analysis worker.
    Analysis,
    /// Run the aggregator and its state reaper.
    Aggregator,
    /// Run the action worker (label application).
    Action,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber from RUST_LOG or default to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_env();

    match cli.role {
        Role::Ingest => run_ingest(&config).await,
        Role::Intent => run_intent(&config).await,
        Role::Analysis => run_analysis(&config).await,
        Role::Aggregator => run_aggregator(&config).await,
        Role::Action => run_action(&config).await,
    }
}

fn build_broker(config: &ServerConfig) -> Result<Arc<dyn MessageBroker>, Box<dyn std::error::Error>> {
    let broker = RedisBroker::new(&RedisBrokerConfig::new(&config.redis_url))?;
    Ok(Arc::new(broker))
}

async fn build_store(config: &ServerConfig) -> Result<Arc<dyn EventStore>, Box<dyn std::error::Error>> {
    let url = config.require_database()?;
    let store = PostgresEventStore::new(&PostgresConfig::new(url)).await?;
    Ok(Arc::new(store))
}

fn build_intent_analyzer(
    config: &ServerConfig,
) -> Result<Arc<dyn IntentAnalyzer>, Box<dyn std::error::Error>> {
    let api = config
        .intent_api
        .as_ref()
        .ok_or("INTENT_API_ENDPOINT, INTENT_API_MODEL and INTENT_API_API_KEY must be set")?;
    let classifier = HttpIntentClassifier::new(IntentClassifierConfig::new(
        &api.endpoint,
        &api.model,
        &api.api_key,
    ))?;
    Ok(Arc::new(classifier))
}

fn build_dynamic_analyzer(
    config: &ServerConfig,
) -> Result<Arc<dyn DynamicAnalyzer>, Box<dyn std::error::Error>> {
    let inner: Arc<dyn DynamicAnalyzer> = if !config.use_real_sandbox {
        info!("USE_REAL_SANDBOX is off, running the simulated sandbox");
        Arc::new(SimulatedSandbox)
    } else {
        match config.analyzer_provider {
            AnalyzerProvider::Sandbox => {
                let url = config
                    .sandbox_api_url
                    .as_deref()
                    .ok_or("SANDBOX_API_URL must be set")?;
                let key = config
                    .sandbox_api_key
                    .as_deref()
                    .ok_or("SANDBOX_API_KEY must be set")?;
                Arc::new(SandboxAnalyzer::new(SandboxConfig::new(url, key))?)
            }
            AnalyzerProvider::UrlReputation => {
                let api = config.url_api.as_ref().ok_or(
                    "URL_ANALYZER_ENDPOINT, URL_ANALYZER_MODEL and URL_ANALYZER_API_KEY must be set",
                )?;
                Arc::new(UrlReputationAnalyzer::new(UrlAnalyzerConfig::new(
                    &api.endpoint,
                    &api.model,
                    &api.api_key,
                ))?)
            }
        }
    };

    Ok(Arc::new(ThrottledAnalyzer::new(
        inner,
        config.pipeline.analyzer_semaphore,
    )))
}

fn build_mailbox(config: &ServerConfig) -> Result<Arc<dyn MailboxProvider>, Box<dyn std::error::Error>> {
    let token = config
        .gmail_access_token
        .as_deref()
        .ok_or("GMAIL_ACCESS_TOKEN must be set")?;
    Ok(Arc::new(GmailMailbox::new(GmailConfig::new(token))?))
}

fn spawn_worker(
    broker: Arc<dyn MessageBroker>,
    config: &ServerConfig,
    streams: &[&str],
    group: &str,
    role: &str,
    handler: Arc<dyn StreamHandler>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let consumer_config = ConsumerConfig::new(
        streams.iter().map(|s| (*s).to_owned()).collect(),
        group,
        role,
    )
    .with_read(config.pipeline.read_count, config.pipeline.read_block);
    tokio::spawn(run_consumer(broker, consumer_config, handler, shutdown_rx))
}

/// Serve `app`, run until SIGINT/SIGTERM, then drain the worker tasks.
async fn serve_and_drain(
    app: axum::Router,
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    service: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, service, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the consumer loops and the reaper; both drain cleanly.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(10), task).await.is_err() {
            tracing::warn!(service, "worker task did not drain within 10s");
        }
    }

    info!(service, "shut down");
    Ok(())
}

async fn run_ingest(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = build_broker(config)?;
    let store = build_store(config).await?;
    let producer = Arc::new(IngestProducer::new(store, broker));

    let (shutdown_tx, _shutdown_rx) = watch::channel(false);
    let app = ingest_router(producer, "ingest-worker");
    serve_and_drain(app, config.port, shutdown_tx, Vec::new(), "ingest-worker").await
}

async fn run_intent(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = build_broker(config)?;
    let store = build_store(config).await?;
    let analyzer = build_intent_analyzer(config)?;

    let worker = Arc::new(IntentWorker::new(store, Arc::clone(&broker), analyzer));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = spawn_worker(
        broker,
        config,
        &[INTENT_STREAM],
        INTENT_GROUP,
        "intent",
        worker,
        shutdown_rx,
    );

    let app = health_router("intent-worker");
    serve_and_drain(app, config.port, shutdown_tx, vec![task], "intent-worker").await
}

async fn run_analysis(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = build_broker(config)?;
    let store = build_store(config).await?;
    let analyzer = build_dynamic_analyzer(config)?;
    let mailbox = build_mailbox(config)?;

    let worker = Arc::new(AnalysisWorker::new(
        store,
        Arc::clone(&broker),
        analyzer,
        mailbox,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = spawn_worker(
        broker,
        config,
        &[ANALYSIS_STREAM],
        ANALYSIS_GROUP,
        "analysis",
        worker,
        shutdown_rx,
    );

    let app = health_router("analysis-worker");
    serve_and_drain(app, config.port, shutdown_tx, vec![task], "analysis-worker").await
}

async fn run_aggregator(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = build_broker(config)?;
    let store = build_store(config).await?;

    let aggregator = Arc::new(Aggregator::new(
        store,
        Arc::clone(&broker),
        config.pipeline.state_ttl,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = spawn_worker(
        Arc::clone(&broker),
        config,
        &[JOB_CONTROL_STREAM, INTENT_DONE_STREAM, ANALYSIS_DONE_STREAM],
        AGGREGATOR_GROUP,
        "aggregator",
        aggregator,
        shutdown_rx.clone(),
    );

    let reaper = Reaper::new(
        broker,
        config.pipeline.state_ttl,
        config.pipeline.reaper_interval,
    );
    let reaper_task = tokio::spawn(async move { reaper.run(shutdown_rx).await });

    let app = health_router("aggregator-worker");
    serve_and_drain(
        app,
        config.port,
        shutdown_tx,
        vec![consumer_task, reaper_task],
        "aggregator-worker",
    )
    .await
}

async fn run_action(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = build_broker(config)?;
    let mailbox = build_mailbox(config)?;

    // The processed-set lives in the broker so replicas share it.
    let guard = Arc::new(BrokerIdempotencyGuard::new(
        Arc::clone(&broker),
        Duration::from_secs(24 * 60 * 60),
    ));
    let worker = Arc::new(ActionWorker::new(
        mailbox,
        guard,
        config.pipeline.label_semaphore,
        config.pipeline.move_malicious_to_quarantine,
    ));

    // Pre-create the brand labels; races during the first applications are
    // handled either way.
    worker.ensure_brand_labels().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = spawn_worker(
        broker,
        config,
        &[FINAL_REPORT_STREAM],
        ACTION_GROUP,
        "action",
        worker,
        shutdown_rx,
    );

    let app = health_router("action-worker");
    serve_and_drain(app, config.port, shutdown_tx, vec![task], "action-worker").await
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful
/// shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
