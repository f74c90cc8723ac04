mod actuator;
mod collectors;
mod config;
mod http;
mod metrics;
mod render;
mod sampler;
mod state;

use axum::serve;
use clap::Parser;
use collectors::system::SysinfoProbe;
use config::{ActuatorBackend, Config};
use metrics::Metrics;
use render::{PanelSink, Sink, TerminalSink};
use sampler::Sampler;
use state::StateStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pimonitord")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
    /// Log actuator transitions instead of touching GPIO.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    no_terminal: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    apply_cli_overrides(&mut cfg, &cli);
    if let Err(err) = cfg.validate() {
        error!(error = %err, "некорректные параметры командной строки");
        std::process::exit(1);
    }

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        threshold_celsius = cfg.actuator.threshold_celsius,
        pin = cfg.actuator.gpio_pin,
        "запуск pimonitord"
    );

    // Hardware handles first: failing here aborts before any loop starts.
    let output = match actuator::open_output(&cfg.actuator) {
        Ok(output) => output,
        Err(err) => {
            error!(error = %err, pin = cfg.actuator.gpio_pin, "не удалось захватить GPIO");
            std::process::exit(1);
        }
    };
    let store = Arc::new(StateStore::new(output));

    let sinks = match open_sinks(&cfg) {
        Ok(sinks) => sinks,
        Err(err) => {
            error!(error = %err, "не удалось открыть дисплей");
            store.shutdown().await;
            std::process::exit(1);
        }
    };

    let metrics = match Metrics::new(cfg.actuator.threshold_celsius) {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            store.shutdown().await;
            std::process::exit(1);
        }
    };

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "некорректный адрес listen");
            store.shutdown().await;
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, "не удалось запустить HTTP-сервер");
            store.shutdown().await;
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let app = http::build_router(
            metrics.clone(),
            store.clone(),
            http::DashboardInfo {
                label: cfg.actuator.label.clone(),
                threshold_celsius: cfg.actuator.threshold_celsius,
                poll_interval_ms: cfg.dashboard.poll_interval_ms,
            },
        );
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let sampler_task = {
        let probe = SysinfoProbe::new(cfg.thermal.path.clone(), cfg.disk.mount.clone());
        let sampler = Sampler::new(
            Box::new(probe),
            store.clone(),
            metrics.clone(),
            cfg.actuator.threshold_celsius,
        );
        tokio::spawn(sampler.run(
            Duration::from_secs(cfg.interval_secs),
            shutdown_rx.clone(),
        ))
    };

    let render_task = tokio::spawn(render::run_renderer(
        sinks,
        store.clone(),
        metrics.clone(),
        Duration::from_secs(cfg.render_interval_secs),
        shutdown_rx.clone(),
    ));

    wait_for_shutdown_signal().await;
    info!("получен сигнал остановки, выполняется остановка");

    let _ = shutdown_tx.send(true);

    let _ = sampler_task.await;
    let _ = http_task.await;
    // Actuator first, then the display.
    store.shutdown().await;
    match render_task.await {
        Ok(mut sinks) => render::clear_all(&mut sinks),
        Err(err) => error!(error = %err, "задача отрисовки завершилась с ошибкой"),
    }
    info!("pimonitord остановлен");
}

// Logs go to stderr: the terminal sink repaints stdout every frame.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    log_subscriber(filter, std::io::stderr).init();
}

fn log_subscriber<W>(
    filter: EnvFilter,
    writer: W,
) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish()
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if let Some(listen) = &cli.listen {
        cfg.listen = listen.clone();
    }
    if cli.dry_run {
        cfg.actuator.backend = ActuatorBackend::Dry;
    }
    if cli.no_terminal {
        cfg.display.terminal = false;
    }
}

fn open_sinks(cfg: &Config) -> Result<Vec<Box<dyn Sink>>, render::SinkError> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
    if cfg.display.terminal {
        sinks.push(Box::new(TerminalSink::new(
            std::io::stdout(),
            cfg.actuator.label.clone(),
            cfg.display.clear_screen,
        )));
    }
    if let Some(path) = &cfg.display.panel_path {
        sinks.push(Box::new(PanelSink::open(path, cfg.actuator.label.clone())?));
    }
    Ok(sinks)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "не удалось подписаться на SIGTERM");
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "не удалось дождаться Ctrl+C");
            }
            return;
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                error!(error = %err, "не удалось дождаться Ctrl+C");
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
}
