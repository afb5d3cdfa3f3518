//! Stratus Kubernetes Operator
//!
//! Reconciles Stratus managed resources against AWS: one controller per
//! enabled kind, each feeding a work queue drained by a pool of workers.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stratus_aws::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

const CONTROLLER_NAME: &str = "stratus-operator";

/// Managed-resource kinds the operator can reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Queue,
    Cluster,
    Secret,
    PrivateDnsNamespace,
    PublicDnsNamespace,
    HttpNamespace,
    Environment,
    IdentityPool,
}

impl Kind {
    const ALL: [Kind; 8] = [
        Kind::Queue,
        Kind::Cluster,
        Kind::Secret,
        Kind::PrivateDnsNamespace,
        Kind::PublicDnsNamespace,
        Kind::HttpNamespace,
        Kind::Environment,
        Kind::IdentityPool,
    ];
}

/// Stratus Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "stratus-operator")]
#[command(about = "Kubernetes operator that reconciles AWS managed resources")]
#[command(version)]
struct Args {
    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Health probe address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Concurrent reconciles per kind
    #[arg(long, env = "WORKERS", default_value = "5")]
    workers: usize,

    /// Seconds between observations of an in-sync resource
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "60")]
    poll_interval_secs: u64,

    /// Seconds to wait before observing the effect of a change
    #[arg(long, env = "SHORT_WAIT_SECS", default_value = "5")]
    short_wait_secs: u64,

    /// First retry delay after a failed reconcile, in seconds
    #[arg(long, env = "BACKOFF_BASE_SECS", default_value = "1")]
    backoff_base_secs: u64,

    /// Upper bound for the retry delay, in seconds
    #[arg(long, env = "BACKOFF_MAX_SECS", default_value = "300")]
    backoff_max_secs: u64,

    /// Retry delay after AWS rejected the credentials, in seconds
    #[arg(long, env = "AUTH_BACKOFF_SECS", default_value = "300")]
    auth_backoff_secs: u64,

    /// Upper bound for one reconcile, in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value = "120")]
    reconcile_timeout_secs: u64,

    /// Upper bound for one AWS operation, retries included, in seconds
    #[arg(long, env = "AWS_CALL_TIMEOUT_SECS", default_value = "30")]
    aws_call_timeout_secs: u64,

    /// Namespace for connection secrets whose reference names none
    #[arg(long, env = "CONNECTION_SECRET_NAMESPACE", default_value = "stratus-system")]
    connection_secret_namespace: String,

    /// Kinds to reconcile, comma separated (default: all)
    #[arg(long, env = "ENABLED_KINDS", value_enum, value_delimiter = ',')]
    kinds: Vec<Kind>,

    /// Print CRD YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn enabled_kinds(&self) -> Vec<Kind> {
        if self.kinds.is_empty() {
            Kind::ALL.to_vec()
        } else {
            self.kinds.clone()
        }
    }

    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            short_wait: Duration::from_secs(self.short_wait_secs),
            auth_backoff: Duration::from_secs(self.auth_backoff_secs),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            ..Default::default()
        }
    }

    fn queue_config(&self) -> WorkQueueConfig {
        WorkQueueConfig {
            base_delay: Duration::from_secs(self.backoff_base_secs),
            max_delay: Duration::from_secs(self.backoff_max_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print_crd()?;
        return Ok(());
    }

    init_logging(&args)?;

    let kinds = args.enabled_kinds();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = args.workers,
        kinds = ?kinds,
        "Starting Stratus operator"
    );

    let metrics_addr = args.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr).await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });

    let health_addr = args.health_addr;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_addr).await {
            tracing::error!(error = %e, "Health server failed");
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let shutdown = CancellationToken::new();
    let wiring = Wiring::new(client, &args);
    let mut manager = Manager::new(shutdown.clone());
    for kind in kinds {
        wiring.add(&mut manager, kind);
    }

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown.cancel();
    });

    manager.run().await;
    info!("Goodbye!");
    Ok(())
}

/// Shared inputs for building one controller per kind
struct Wiring {
    client: Client,
    stores: StoreSet,
    factory: Arc<ClientFactory>,
    reconcile: ReconcilerConfig,
    queue: WorkQueueConfig,
    workers: usize,
    secret_namespace: String,
}

impl Wiring {
    fn new(client: Client, args: &Args) -> Self {
        let stores = StoreSet::Kube(client.clone());
        let factory = Arc::new(ClientFactory::new(
            stores.clone(),
            ClientFactoryConfig {
                operation_timeout: Duration::from_secs(args.aws_call_timeout_secs),
            },
        ));
        Self {
            client,
            stores,
            factory,
            reconcile: args.reconciler_config(),
            queue: args.queue_config(),
            workers: args.workers,
            secret_namespace: args.connection_secret_namespace.clone(),
        }
    }

    fn add(&self, manager: &mut Manager, kind: Kind) {
        use servicediscovery::{http_client, private_dns_client, public_dns_client};

        match kind {
            Kind::Queue => manager.add(self.controller::<Queue>(sqs::client, sqs::references())),
            Kind::Cluster => manager.add(self.controller::<Cluster>(redshift::client, vec![])),
            Kind::Secret => manager.add(self.controller::<Secret>(secretsmanager::client, vec![])),
            Kind::PrivateDnsNamespace => {
                manager.add(self.controller::<PrivateDNSNamespace>(private_dns_client, vec![]))
            }
            Kind::PublicDnsNamespace => {
                manager.add(self.controller::<PublicDNSNamespace>(public_dns_client, vec![]))
            }
            Kind::HttpNamespace => {
                manager.add(self.controller::<HTTPNamespace>(http_client, vec![]))
            }
            Kind::Environment => manager.add(self.controller::<Environment>(mwaa::client, vec![])),
            Kind::IdentityPool => {
                manager.add(self.controller::<IdentityPool>(cognitoidentity::client, vec![]))
            }
        }
    }

    fn controller<K: AwsResource>(
        &self,
        build: ClientBuilder<K>,
        references: Vec<Box<dyn FieldResolver<K>>>,
    ) -> Controller<K> {
        let connector = Arc::new(AwsConnector::new(self.factory.clone(), build));
        let publisher = SecretPublisher::new(self.stores.secrets())
            .with_default_namespace(self.secret_namespace.clone());
        let reconciler = Reconciler::new(self.stores.clone(), connector)
            .with_references(references)
            .with_publisher(Arc::new(publisher))
            .with_recorder(Arc::new(KubeEventRecorder::new(
                self.client.clone(),
                CONTROLLER_NAME,
            )))
            .with_config(self.reconcile.clone());
        Controller::new(reconciler, self.stores.store::<K>())
            .with_queue_config(self.queue.clone())
            .with_workers(self.workers)
    }
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Start the Prometheus metrics server
async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(address = %addr, "Starting metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    std::future::pending::<()>().await;

    Ok(())
}

/// Start the health probe server
async fn start_health_server(addr: SocketAddr) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    info!(address = %addr, "Starting health server");

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health server")?;

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            if socket.read(&mut buf).await.is_ok() {
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Print every CRD as one multi-document YAML stream
fn print_crd() -> Result<()> {
    for crd in crds() {
        let yaml = serde_yaml::to_string(&crd).context("Failed to serialize CRD")?;
        println!("---\n{}", yaml.trim_end());
    }
    Ok(())
}
