mod console;
mod error;
mod products;
mod push;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use console::{JobSpec, TaskRunner};
use fgsim_core::actions::{CONSOLE_ENDPOINT, PRODUCTS_ENDPOINT, PUSH_ENDPOINT};
use products::ManifestStore;
use push::{PushConfig, PushHub};
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:21021";

#[derive(Clone)]
pub struct AppState {
    pub push: Arc<PushHub>,
    pub runner: Arc<TaskRunner>,
    pub products: Arc<ManifestStore>,
}

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    job: Option<JobSpec>,
    converter: Option<String>,
    debug: bool,
    push: PushConfig,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "fgsim-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    /// Simulation command, one argv element per flag: `--job fg21sim --job sim.conf`.
    #[arg(long = "job")]
    job: Vec<String>,
    #[arg(long, default_value = "")]
    converter: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 60)]
    stale_seconds: u64,
    #[arg(long, default_value_t = 10)]
    ping_interval: u64,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let started = Utc::now();
    let hub_log = init_logging(&config, started);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    let push = Arc::new(PushHub::new(config.push.clone()));
    push.clone().start_stale_reaper();
    let state = AppState {
        runner: Arc::new(TaskRunner::new(config.job.clone(), push.clone())),
        products: Arc::new(ManifestStore::new(config.converter.clone())),
        push,
    };

    let app = Router::new()
        .route(PUSH_ENDPOINT, get(ws_handler))
        .route(CONSOLE_ENDPOINT, get(console::status).post(console::action))
        .route(PRODUCTS_ENDPOINT, get(products::query).post(products::action))
        .route("/products/download/*path", get(products::download))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        job = config.job.as_ref().map(|job| job.program.as_str()).unwrap_or("-"),
        converter = config.converter.as_deref().unwrap_or("-"),
        log_file = %hub_log
            .as_ref()
            .and_then(|log| log.path.as_ref())
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string()),
        started_at = %started.to_rfc3339()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_shutdown");
    };

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        error!(event = "hub_error", error = %err);
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let hub = state.push.clone();
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr).await;
    })
}

fn load_config() -> Config {
    let args = Args::parse();
    let debug = args.debug || env_true("FGSIM_HUB_DEBUG");
    Config {
        addr: resolve_addr(&args.addr),
        job: resolve_job(&args.job),
        converter: resolve_converter(&args.converter),
        debug,
        push: PushConfig {
            ping_interval: Duration::from_secs(args.ping_interval),
            write_timeout: Duration::from_secs(args.write_timeout),
            stale_seconds: args.stale_seconds,
            ..PushConfig::default()
        },
        log_dir: resolve_log_dir(&args.log_dir),
    }
}

fn init_logging(config: &Config, started: DateTime<Utc>) -> Option<HubLog> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("FGSIM_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let log = match open_log_file(&config.log_dir, &config.addr, started) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            HubLog::stdout_only()
        }
    };
    let file = log.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(log)
}

/// The hub session's log file, if `--log-dir` asked for one.
struct HubLog {
    path: Option<PathBuf>,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl HubLog {
    fn stdout_only() -> Self {
        Self {
            path: None,
            file: None,
        }
    }
}

/// Tees log output to stdout and the optional log file.
struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = file.flush();
        }
        Ok(())
    }
}

/// One file per hub session: `fgsim-hub-<port>-<start time>.log`, so restarts on the
/// same port never interleave.
fn log_file_name(addr: &str, started: DateTime<Utc>) -> String {
    let port = addr
        .rsplit_once(':')
        .map(|(_, port)| port)
        .filter(|port| !port.is_empty())
        .unwrap_or("noport");
    format!("fgsim-hub-{port}-{}.log", started.format("%Y%m%dT%H%M%SZ"))
}

fn open_log_file(log_dir: &str, addr: &str, started: DateTime<Utc>) -> io::Result<HubLog> {
    if log_dir.trim().is_empty() {
        return Ok(HubLog::stdout_only());
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(log_file_name(addr, started));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(HubLog {
        path: Some(path),
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn resolve_addr(addr_flag: &str) -> String {
    if !addr_flag.trim().is_empty() {
        return addr_flag.to_string();
    }
    env_nonempty("FGSIM_HUB_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string())
}

fn resolve_job(job_flag: &[String]) -> Option<JobSpec> {
    if !job_flag.is_empty() {
        return JobSpec::from_argv(job_flag);
    }
    let raw = env_nonempty("FGSIM_JOB")?;
    let argv: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    JobSpec::from_argv(&argv)
}

fn resolve_converter(converter_flag: &str) -> Option<String> {
    if !converter_flag.trim().is_empty() {
        return Some(converter_flag.trim().to_string());
    }
    env_nonempty("FGSIM_CONVERTER")
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    if !log_dir_flag.trim().is_empty() {
        return log_dir_flag.to_string();
    }
    env_nonempty("FGSIM_LOG_DIR").unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn explicit_flags_win_over_defaults() {
        assert_eq!(resolve_addr("0.0.0.0:9000"), "0.0.0.0:9000");
        assert_eq!(resolve_converter("  hpx-convert "), Some("hpx-convert".to_string()));
        assert_eq!(resolve_log_dir("/tmp/fgsim"), "/tmp/fgsim");
    }

    #[test]
    fn job_flag_is_taken_verbatim() {
        let job = resolve_job(&["fg21sim".to_string(), "sim.conf".to_string()]).expect("job");
        assert_eq!(job.program, "fg21sim");
        assert_eq!(job.args, vec!["sim.conf".to_string()]);
    }

    #[test]
    fn args_accept_repeated_job_flags() {
        let args = Args::try_parse_from(["fgsim-hub", "--job", "fg21sim", "--job", "sim.conf"])
            .expect("parse");
        assert_eq!(args.job, vec!["fg21sim".to_string(), "sim.conf".to_string()]);
        assert_eq!(args.stale_seconds, 60);
    }

    #[test]
    fn log_files_are_named_per_port_and_session() {
        let started = Utc
            .with_ymd_and_hms(2026, 3, 14, 9, 26, 53)
            .single()
            .expect("timestamp");
        assert_eq!(
            log_file_name("127.0.0.1:21021", started),
            "fgsim-hub-21021-20260314T092653Z.log"
        );
        assert_eq!(log_file_name("localhost", started), "fgsim-hub-noport-20260314T092653Z.log");
    }

    #[test]
    fn log_dir_gets_created_on_demand() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("logs/hub");
        let log = open_log_file(&nested.to_string_lossy(), "127.0.0.1:9000", Utc::now())
            .expect("open");
        let path = log.path.expect("path");
        assert!(path.starts_with(&nested));
        assert!(path.exists());
        assert!(open_log_file("  ", "127.0.0.1:9000", Utc::now())
            .expect("stdout only")
            .path
            .is_none());
    }
}
