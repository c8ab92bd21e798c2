use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{stdin, stdout, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::{signal, task};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use press_server::config::{self, Config};
use press_server::console::{self, ConsoleExit};
use press_server::routes::{self, AppState};
use press_server::store::PageStore;
use press_server::templates::TemplateStore;

#[derive(Parser, Debug)]
#[command(name = "press", version, about = "Minimal wiki page editor")]
struct Cli {
	/// Bind address for the HTTP server
	#[arg(long, env = "HTTP_BIND", default_value = config::DEFAULT_BIND)]
	bind: String,

	/// Directory holding the page store and mirrored page files
	#[arg(long, env = "DATA_DIR", default_value = "./data")]
	data_dir: String,

	/// Directory with edit.html, view.html and parts.html
	#[arg(long, env = "VIEWS_DIR", default_value = "./views")]
	views_dir: String,

	/// Serve on a free local port, write the address to --port-file, no console
	#[arg(long)]
	addr: bool,

	/// File the --addr mode writes the bound address to
	#[arg(long, env = "PORT_FILE", default_value = "final-port.txt")]
	port_file: String,
}

fn main() -> Result<()> {
	let rt = tokio::runtime::Runtime::new()?;
	let res = rt.block_on(run());
	// A pending stdin read sits on a blocking thread and never returns on its own.
	rt.shutdown_timeout(Duration::from_millis(500));
	res
}

async fn run() -> Result<()> {
	let _ = dotenvy::dotenv();
	init_tracing();
	let cli = Cli::parse();
	let cfg = Config::load(&cli.bind, &cli.data_dir, &cli.views_dir, &cli.port_file)?;

	let store = PageStore::open(&cfg.data_dir).with_context(|| format!("opening page store in {}", cfg.data_dir.display()))?;
	let templates = Arc::new(TemplateStore::load(&cfg.views_dir).context("loading templates")?);
	let state = Arc::new(AppState { store, templates });
	let app = routes::build_router(state.clone());

	if cli.addr {
		let listener = TcpListener::bind("127.0.0.1:0").await.context("binding a free local port")?;
		let local = listener.local_addr()?;
		std::fs::write(&cfg.port_file, local.to_string()).with_context(|| format!("writing {}", cfg.port_file.display()))?;
		info!(%local, port_file = %cfg.port_file.display(), "Starting HTTP server");
		axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
		return Ok(());
	}

	let listener = TcpListener::bind(cfg.bind).await.with_context(|| format!("binding {}", cfg.bind))?;
	let local = listener.local_addr()?;
	info!(%local, "Starting HTTP server");

	let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
	let http_task = task::spawn(async move {
		axum::serve(listener, app)
			.with_graceful_shutdown(async move {
				let _ = shutdown_rx.changed().await;
			})
			.await
	});

	let listening = local.to_string();
	tokio::select! {
		res = console::run_console(state, &listening, BufReader::new(stdin()), stdout()) => match res {
			Ok(ConsoleExit::Quit) => {}
			Ok(ConsoleExit::InputClosed) => {
				info!("console detached, serving until Ctrl+C");
				shutdown_signal().await;
			}
			Err(err) => {
				warn!(%err, "console failed, serving until Ctrl+C");
				shutdown_signal().await;
			}
		},
		_ = shutdown_signal() => info!("Shutdown signal received"),
	}

	let _ = shutdown_tx.send(true);
	http_task.await??;
	info!("HTTP server stopped");
	Ok(())
}

fn init_tracing() {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	// stderr only; stdout belongs to the admin console
	let fmt_layer = fmt::layer().with_target(false).with_ansi(false).with_writer(std::io::stderr);
	tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}

async fn shutdown_signal() {
	let _ = signal::ctrl_c().await;
}
