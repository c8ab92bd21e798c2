use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::routes::AppState;

const PROMPT: &str = "$ ";
const HELP: &str = "commands: reload, list, help, quit | exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Quit,
	Reload,
	List,
	Help,
	Blank,
	Echo(String),
}

impl Command {
	pub fn parse(line: &str) -> Self {
		match line.trim() {
			"quit" | "exit" => Command::Quit,
			"reload" => Command::Reload,
			"list" => Command::List,
			"help" => Command::Help,
			"" => Command::Blank,
			_ => Command::Echo(line.to_string()),
		}
	}
}

/// Why the console loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
	/// Operator typed `quit` or `exit`; the caller should stop serving.
	Quit,
	/// Input reached EOF; the server keeps running.
	InputClosed,
}

/// Runs the admin loop until `quit`/`exit` or end of input.
pub async fn run_console<R, W>(state: Arc<AppState>, listening: &str, input: R, mut output: W) -> Result<ConsoleExit>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut lines = input.lines();
	output.write_all(format!("Listening @ {}\n", listening).as_bytes()).await?;
	loop {
		output.write_all(PROMPT.as_bytes()).await?;
		output.flush().await?;
		let Some(line) = lines.next_line().await? else {
			info!("console input closed");
			return Ok(ConsoleExit::InputClosed);
		};
		let reply = match Command::parse(&line) {
			Command::Quit => {
				info!("console quit requested");
				return Ok(ConsoleExit::Quit);
			}
			Command::Reload => match state.templates.reload() {
				Ok(()) => {
					info!(dir = %state.templates.dir().display(), "templates reloaded");
					"reloading templates...\n".to_string()
				}
				Err(err) => {
					warn!(%err, "template reload failed, keeping previous set");
					format!("reload failed: {}\n", err)
				}
			},
			Command::List => match state.store.titles() {
				Ok(titles) => titles.into_iter().map(|t| t + "\n").collect(),
				Err(err) => format!("list failed: {}\n", err),
			},
			Command::Help => format!("{}\n", HELP),
			Command::Blank => continue,
			Command::Echo(text) => text + "\n",
		};
		output.write_all(reply.as_bytes()).await?;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::page::Page;
	use crate::store::PageStore;
	use crate::templates::{TemplateStore, VIEW};

	fn make_state(dir: &std::path::Path) -> Arc<AppState> {
		let views = dir.join("views");
		std::fs::create_dir_all(&views).unwrap();
		std::fs::write(views.join("edit.html"), "edit {{body}}").unwrap();
		std::fs::write(views.join("view.html"), "old {{html}}").unwrap();
		std::fs::write(views.join("parts.html"), "").unwrap();
		Arc::new(AppState {
			store: PageStore::open(&dir.join("data")).unwrap(),
			templates: Arc::new(TemplateStore::load(views).unwrap()),
		})
	}

	async fn drive(state: Arc<AppState>, script: &str) -> (ConsoleExit, String) {
		let mut out = Vec::new();
		let exit = run_console(state, "127.0.0.1:8080", script.as_bytes(), &mut out).await.unwrap();
		(exit, String::from_utf8(out).unwrap())
	}

	#[test]
	fn parses_commands() {
		assert_eq!(Command::parse("quit"), Command::Quit);
		assert_eq!(Command::parse(" exit "), Command::Quit);
		assert_eq!(Command::parse("reload"), Command::Reload);
		assert_eq!(Command::parse("list"), Command::List);
		assert_eq!(Command::parse("   "), Command::Blank);
		assert_eq!(Command::parse("Quit"), Command::Echo("Quit".to_string()));
	}

	#[tokio::test]
	async fn test_echo_then_quit() {
		let dir = tempfile::tempdir().unwrap();
		let (exit, out) = drive(make_state(dir.path()), "hello there\n\nexit\nnever read\n").await;
		assert_eq!(exit, ConsoleExit::Quit);
		assert_eq!(out, "Listening @ 127.0.0.1:8080\n$ hello there\n$ $ ");
	}

	#[tokio::test]
	async fn test_eof_is_input_closed() {
		let dir = tempfile::tempdir().unwrap();
		let (exit, out) = drive(make_state(dir.path()), "help\n").await;
		assert_eq!(exit, ConsoleExit::InputClosed);
		assert!(out.contains(HELP));
	}

	#[tokio::test]
	async fn test_reload_changes_presentation_not_content() {
		let dir = tempfile::tempdir().unwrap();
		let state = make_state(dir.path());
		let page = Page::new("demo", "Hello");
		state.store.save(&page).unwrap();
		let before = state.templates.snapshot().render(VIEW, &state.store.load("demo").unwrap()).unwrap();
		assert_eq!(before, "old Hello");

		std::fs::write(dir.path().join("views").join("view.html"), "new {{html}}").unwrap();
		let (exit, out) = drive(state.clone(), "reload\nquit\n").await;
		assert_eq!(exit, ConsoleExit::Quit);
		assert!(out.contains("reloading templates...\n"));
		let after = state.templates.snapshot().render(VIEW, &state.store.load("demo").unwrap()).unwrap();
		assert_eq!(after, "new Hello");
	}

	#[tokio::test]
	async fn test_failed_reload_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		let state = make_state(dir.path());
		std::fs::remove_file(dir.path().join("views").join("parts.html")).unwrap();
		let (_, out) = drive(state.clone(), "reload\n").await;
		assert!(out.contains("reload failed: reading template"));
		assert!(state.templates.snapshot().render(VIEW, &Page::blank("x")).is_ok());
	}

	#[tokio::test]
	async fn test_list_prints_titles() {
		let dir = tempfile::tempdir().unwrap();
		let state = make_state(dir.path());
		state.store.save(&Page::new("beta", "b")).unwrap();
		state.store.save(&Page::new("alpha", "a")).unwrap();
		let (_, out) = drive(state, "list\n").await;
		assert!(out.contains("$ alpha\nbeta\n$ "));
	}
}
