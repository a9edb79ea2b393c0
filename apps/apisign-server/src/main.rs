//! apisign server - an API endpoint guarded by request signatures.
//!
//! Every request except `GET /health` goes through the signature gate. Signed
//! (or exempt) requests reach a demo handler that echoes their parameters.
//!
//! # Usage
//!
//! ```text
//! APISIGN_SIGN_KEY=secret GATEWAY_LISTEN=127.0.0.1:8080 apisign-server
//! apisign-server sign <key> <query-string>
//! apisign-server --health-check
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_LISTEN` | `0.0.0.0:8080` | Bind address |
//! | `APISIGN_APP_DB_PATH` | *(unset)* | SQLite file holding the app registry |
//! | `APISIGN_*` | | Signing settings, see `SignConfig::from_env` |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use apisign_auth::{ParameterSet, encode_values, make_sign_string};
use apisign_core::{
    AppRepository, InMemoryAppRepository, SignConfig, SignGate, SqliteAppRepository,
};
use apisign_http::{EchoHandler, SignHttpService};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

type ApiService = SignHttpService<EchoHandler>;

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to `LOG_LEVEL`.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Open the app registry when per-application keys are enabled.
fn build_repository(
    config: &SignConfig,
    db_path: Option<&str>,
) -> Result<Option<Arc<dyn AppRepository>>> {
    if !config.app.enabled {
        return Ok(None);
    }

    let repository: Arc<dyn AppRepository> = match db_path {
        Some(path) => {
            info!(path, table = %config.app.table, "opening SQLite app registry");
            Arc::new(
                SqliteAppRepository::open(path)
                    .with_context(|| format!("failed to open app registry at {path}"))?,
            )
        }
        None => {
            warn!("APISIGN_APP_DB_PATH not set, using an empty in-memory app registry");
            Arc::new(InMemoryAppRepository::default())
        }
    };

    Ok(Some(repository))
}

/// Build the HTTP service from configuration.
fn build_service(config: SignConfig, db_path: Option<&str>) -> Result<ApiService> {
    let repository = build_repository(&config, db_path)?;
    let gate = SignGate::new(config, repository).context("invalid signing configuration")?;
    Ok(SignHttpService::new(Arc::new(EchoHandler), Arc::new(gate)))
}

/// Run the accept loop, serving connections until `shutdown` resolves.
async fn serve(
    listener: TcpListener,
    service: ApiService,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.clone();
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

/// Resolve on Ctrl-C.
async fn ctrl_c() {
    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal, draining connections");
}

/// Request `/health` from a running server.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;

    let (mut reader, mut writer) = stream.into_split();

    let request = format!("GET /health HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    if response.contains("200 OK") && response.contains("\"running\"") {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

/// Sign a query string, returning the canonical string and the signature.
fn sign_query(key: &str, query: &str) -> (String, String) {
    let params = ParameterSet::from_query(query.trim_start_matches('?'));
    (encode_values(&params), make_sign_string(&params, key))
}

/// Handle `apisign-server sign <key> <query-string>`.
fn run_sign_command(args: &[String]) -> Result<()> {
    let [key, query] = args else {
        anyhow::bail!("usage: apisign-server sign <key> <query-string>");
    };

    let (canonical, sign) = sign_query(key, query);
    println!("canonical: {canonical}");
    println!("api_sign:  {sign}");

    Ok(())
}

fn gateway_listen_addr() -> String {
    std::env::var("GATEWAY_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

fn log_level() -> String {
    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("sign") {
        return run_sign_command(&args[1..]);
    }

    let listen_addr = gateway_listen_addr();

    // Handle --health-check flag for container health checks.
    if args.iter().any(|a| a == "--health-check") {
        let addr = listen_addr.replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    init_tracing(&log_level())?;

    let config = SignConfig::from_env();
    info!(
        sign_disabled = config.disabled,
        app_keys = config.app.enabled,
        expire_time = config.expire_time,
        allow_time_offset = config.allow_time_offset,
        "loaded signing configuration",
    );

    let db_path = std::env::var("APISIGN_APP_DB_PATH").ok();
    let service = build_service(config, db_path.as_deref())?;

    let addr: SocketAddr = listen_addr
        .parse()
        .with_context(|| format!("invalid bind address: {listen_addr}"))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, version = VERSION, "starting apisign server");

    serve(listener, service, ctrl_c()).await
}
