use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Effective runtime settings, resolved from flags, env and `.env`.
#[derive(Debug, Clone)]
pub struct Config {
	pub bind: SocketAddr,
	pub data_dir: PathBuf,
	pub views_dir: PathBuf,
	pub port_file: PathBuf,
}

impl Config {
	/// `PORT`, when set to a valid port, overrides `bind` with `127.0.0.1:<PORT>`.
	pub fn load(bind: &str, data_dir: &str, views_dir: &str, port_file: &str) -> anyhow::Result<Self> {
		let port = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok());
		let bind = if let Some(p) = port { format!("127.0.0.1:{}", p) } else { bind.to_string() };
		let bind: SocketAddr = bind.parse().with_context(|| format!("invalid bind address {bind:?}"))?;
		Ok(Self {
			bind,
			data_dir: PathBuf::from(data_dir),
			views_dir: PathBuf::from(views_dir),
			port_file: PathBuf::from(port_file),
		})
	}
}
