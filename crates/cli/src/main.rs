use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::ResourceExt;
use kustd_controller::ControllerConfig;
use kustd_core::{parse_interval, status, Kustomization, ObjectKey};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kustd", version, about = "Kustomization reconciler")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Log filter directives, e.g. "info,kustd_controller=debug"
    #[arg(long = "log", env = "KUSTD_LOG", global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the reconcile loop until interrupted
    Run(RunArgs),
    /// List Kustomizations with their Ready condition
    Get {
        /// Namespace to list (default: all)
        #[arg(short = 'n', long = "namespace")]
        namespace: Option<String>,
    },
    /// Request an immediate sync by stamping the syncAt annotation
    Reconcile {
        /// Kustomization key, e.g. "flux-system/podinfo"
        key: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Watch only this namespace (default: all)
    #[arg(long = "namespace", env = "KUSTD_NAMESPACE")]
    namespace: Option<String>,
    /// Number of reconcile workers
    #[arg(long = "concurrency", env = "KUSTD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,
    /// Deadline for one sync attempt
    #[arg(long = "sync-timeout", env = "KUSTD_SYNC_TIMEOUT", default_value = "15s", value_parser = duration_arg)]
    sync_timeout: Duration,
    /// Requeue delay after a loop error
    #[arg(long = "retry-interval", env = "KUSTD_RETRY_INTERVAL", default_value = "10s", value_parser = duration_arg)]
    retry_interval: Duration,
    /// Interval used when spec.interval is invalid
    #[arg(long = "default-interval", env = "KUSTD_DEFAULT_INTERVAL", default_value = "5m", value_parser = duration_arg)]
    default_interval: Duration,
    /// Parent directory for per-attempt workspaces (default: system temp dir)
    #[arg(long = "workspace-root", env = "KUSTD_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,
    #[arg(long = "kustomize-bin", env = "KUSTD_KUSTOMIZE_BIN", default_value = "kustomize")]
    kustomize_bin: PathBuf,
    #[arg(long = "kubectl-bin", env = "KUSTD_KUBECTL_BIN", default_value = "kubectl")]
    kubectl_bin: PathBuf,
    /// Serve Prometheus metrics on this host:port
    #[arg(long = "metrics-addr", env = "KUSTD_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl RunArgs {
    fn into_config(self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        ControllerConfig {
            namespace: self.namespace.filter(|ns| !ns.trim().is_empty()),
            concurrency: self.concurrency.max(1),
            sync_timeout: self.sync_timeout,
            retry_interval: self.retry_interval,
            default_interval: self.default_interval,
            workspace_root: self.workspace_root.unwrap_or(defaults.workspace_root),
            kustomize_bin: self.kustomize_bin,
            kubectl_bin: self.kubectl_bin,
        }
    }
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_interval(s).map_err(|e| e.to_string())
}

/// Install the fmt subscriber. Unparseable directives fall back to `info`.
fn init_tracing(directives: &str) {
    let (filter, rejected) = match tracing_subscriber::EnvFilter::try_new(directives) {
        Ok(f) => (f, None),
        Err(e) => (tracing_subscriber::EnvFilter::new("info"), Some(e)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    if let Some(e) = rejected {
        warn!(directives, error = %e, "invalid log filter; using info");
    }
}

fn init_metrics(addr: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("starting metrics listener on {}", addr))?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    match cli.command {
        Commands::Run(args) => {
            if let Some(addr) = args.metrics_addr {
                init_metrics(addr)?;
            }
            let config = args.into_config();
            let shutdown = CancellationToken::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    match signal::ctrl_c().await {
                        Ok(()) => {
                            info!("interrupt received; draining in-flight syncs");
                            shutdown.cancel();
                        }
                        Err(e) => warn!(error = %e, "unable to listen for interrupt"),
                    }
                }
            });
            kustd_controller::run(config, shutdown).await?;
        }
        Commands::Get { namespace } => {
            let client = kustd_kubehub::get_kube_client().await?;
            let items = kustd_kubehub::list_kustomizations(client, namespace.as_deref()).await?;
            match cli.output {
                Output::Human => {
                    println!("{:<16} {:<24} {:<6} {:<8} {:<20} {}", "NAMESPACE", "NAME", "READY", "AGE", "REVISION", "STATUS");
                    for ks in &items {
                        println!("{}", render_row(ks));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&items)?),
            }
        }
        Commands::Reconcile { key } => {
            let key: ObjectKey = key.parse().with_context(|| format!("invalid key {:?}", key))?;
            let client = kustd_kubehub::get_kube_client().await?;
            let token = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            if let Err(e) = kustd_kubehub::request_sync(client, &key, &token).await {
                error!(kustomization = %key, error = ?e, "reconcile request failed");
                return Err(e);
            }
            match cli.output {
                Output::Human => println!("► annotated {} ({})", key, token),
                Output::Json => println!("{}", serde_json::json!({ "kustomization": key.to_string(), "syncAt": token })),
            }
        }
    }
    Ok(())
}

fn render_row(ks: &Kustomization) -> String {
    let st = ks.status.as_ref();
    let ready = match st.and_then(|s| s.ready_condition()) {
        Some(c) => c.status.clone(),
        None => "Unknown".to_string(),
    };
    let age = ks.creation_timestamp().map(|t| render_age(t.0, Utc::now())).unwrap_or_else(|| "-".to_string());
    let revision = st.and_then(|s| s.last_applied_revision.clone()).unwrap_or_else(|| "-".to_string());
    format!(
        "{:<16} {:<24} {:<6} {:<8} {:<20} {}",
        ks.namespace().unwrap_or_else(|| "-".to_string()),
        ks.name_any(),
        ready,
        age,
        revision,
        status::ready_message(st)
    )
}

fn render_age(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(created).max(chrono::Duration::zero());
    match (age.num_days(), age.num_hours() % 24, age.num_minutes() % 60) {
        (d, h, _) if d > 0 => format!("{}d{}h", d, h),
        (_, h, m) if h > 0 => format!("{}h{}m", h, m),
        (_, _, m) if m > 0 => format!("{}m", m),
        _ => format!("{}s", age.num_seconds()),
    }
}
