//! `skein`: preloads the configured worker scripts, then drives them from stdin.

mod command;
mod config;
mod engine;

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::PathBuf;

use clap::Parser;
use skein_threads::{EventSubscription, ThreadManager, WorkerEvent, WorkerEventKind, WorkerId, WorkerSnapshot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::command::{HostCommand, USAGE};
use crate::config::CliConfig;
use crate::engine::CommandEngineFactory;

#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(about = "Preload and drive script worker threads")]
struct Args {
	/// Path to the TOML config file.
	#[arg(short, long, value_name = "PATH")]
	config: PathBuf,

	/// Enable debug logging.
	#[arg(short, long)]
	verbose: bool,
}

/// Event relays for every worker the host has seen, keyed by id.
struct Host {
	manager: ThreadManager,
	events: mpsc::UnboundedSender<WorkerEvent>,
	subscriptions: HashMap<WorkerId, EventSubscription>,
}

impl Host {
	fn watch(&mut self, id: WorkerId) {
		let events = self.events.clone();
		match self.manager.subscribe(id, move |event| {
			let _ = events.send(event);
		}) {
			Ok(subscription) => {
				self.subscriptions.insert(id, subscription);
			}
			Err(err) => tracing::warn!(worker_id = %id, error = %err, "cli.watch_failed"),
		}
	}

	fn execute(&mut self, command: HostCommand) -> ControlFlow<()> {
		self.subscriptions.retain(|_, sub| !sub.is_finished());
		match command {
			HostCommand::List => {
				for id in self.manager.list().iter() {
					if let Ok(snapshot) = self.manager.get(id) {
						println!("{}", describe(&snapshot));
					}
				}
			}
			HostCommand::Start(path) => match self.manager.create_from_path(&path) {
				Ok(id) => {
					self.watch(id);
					println!("started {id}");
				}
				Err(err) => println!("error: {err}"),
			},
			HostCommand::Send(id, message) => {
				if let Err(err) = self.manager.send(id, message) {
					println!("error: {err}");
				}
			}
			HostCommand::Stop(id) => match self.manager.destroy(id) {
				Ok(()) => println!("stopped {id}"),
				Err(err) => println!("error: {err}"),
			},
			HostCommand::Status(id) => match self.manager.get(id) {
				Ok(snapshot) => println!("{}", describe(&snapshot)),
				Err(err) => println!("error: {err}"),
			},
			HostCommand::Compact => println!("next id {}", self.manager.compact_ids()),
			HostCommand::Help => println!("{USAGE}"),
			HostCommand::Quit => return ControlFlow::Break(()),
		}
		ControlFlow::Continue(())
	}
}

fn describe(snapshot: &WorkerSnapshot) -> String {
	match &snapshot.failure {
		Some(reason) => format!("{} {} {} ({reason})", snapshot.id, snapshot.entry, snapshot.state),
		None => format!("{} {} {}", snapshot.id, snapshot.entry, snapshot.state),
	}
}

fn print_event(event: &WorkerEvent) {
	match &event.kind {
		WorkerEventKind::Running => println!("[{}] running", event.id),
		WorkerEventKind::Message(message) => println!("[{}] {message}", event.id),
		WorkerEventKind::Failed(reason) => println!("[{}] failed: {reason}", event.id),
		WorkerEventKind::Exited => println!("[{}] exited", event.id),
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
	let subscriber = tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let config = CliConfig::load(&args.config)?;
	let root = config.script_root(&args.config);
	let factory = CommandEngineFactory::new(config.engine.clone(), root, config.threads.script_extension.clone());
	let manager = ThreadManager::new(config.threads, factory);

	let report = manager.preload_configured().await?;
	info!(workers = report.len(), failed = report.failed().count(), "cli.preloaded");

	let (events_tx, mut events_rx) = mpsc::unbounded_channel();
	let mut host = Host {
		manager,
		events: events_tx,
		subscriptions: HashMap::new(),
	};
	for snapshot in report.workers() {
		println!("{}", describe(snapshot));
		host.watch(snapshot.id);
	}

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	loop {
		tokio::select! {
			line = lines.next_line() => {
				let Some(line) = line? else { break };
				if line.trim().is_empty() {
					continue;
				}
				match line.parse::<HostCommand>() {
					Ok(command) => {
						if host.execute(command).is_break() {
							break;
						}
					}
					Err(err) => println!("error: {err}"),
				}
			}
			Some(event) = events_rx.recv() => print_event(&event),
		}
	}

	let report = host.manager.shutdown().await;
	info!(terminated = report.terminated, exited = report.exited, timed_out = report.timed_out, "cli.shutdown");
	Ok(())
}
