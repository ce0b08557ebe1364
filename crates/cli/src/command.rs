//! Line-oriented host commands read from stdin.

use std::fmt;
use std::str::FromStr;

use skein_threads::{Message, WorkerId};

#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
	/// `list`: print every live worker.
	List,
	/// `start <path>`: start an on-demand worker from a script path.
	Start(String),
	/// `send <id> <json>`: post a message. Bare words are sent as JSON strings.
	Send(WorkerId, Message),
	/// `stop <id>`: terminate a worker.
	Stop(WorkerId),
	/// `status <id>`: print one worker's state.
	Status(WorkerId),
	/// `compact`: make freed ids above the highest live one reusable.
	Compact,
	Help,
	Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::error::Error for ParseError {}

pub const USAGE: &str = "commands: list | start <path> | send <id> <json> | stop <id> | status <id> | compact | help | quit";

impl FromStr for HostCommand {
	type Err = ParseError;

	fn from_str(line: &str) -> Result<Self, Self::Err> {
		let line = line.trim();
		let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
		let rest = rest.trim();
		match verb {
			"list" | "ls" => no_args(verb, rest, Self::List),
			"compact" => no_args(verb, rest, Self::Compact),
			"help" | "?" => no_args(verb, rest, Self::Help),
			"quit" | "exit" => no_args(verb, rest, Self::Quit),
			"start" if rest.is_empty() => Err(ParseError("usage: start <path>".to_string())),
			"start" => Ok(Self::Start(rest.to_string())),
			"stop" => parse_id(rest).map(Self::Stop),
			"status" => parse_id(rest).map(Self::Status),
			"send" => {
				let (id, body) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
				let body = body.trim();
				if body.is_empty() {
					return Err(ParseError("usage: send <id> <json>".to_string()));
				}
				let message = serde_json::from_str(body).unwrap_or_else(|_| Message::String(body.to_string()));
				Ok(Self::Send(parse_id(id)?, message))
			}
			"" => Err(ParseError("empty command".to_string())),
			other => Err(ParseError(format!("unknown command `{other}`"))),
		}
	}
}

fn no_args(verb: &str, rest: &str, command: HostCommand) -> Result<HostCommand, ParseError> {
	if rest.is_empty() {
		Ok(command)
	} else {
		Err(ParseError(format!("`{verb}` takes no arguments")))
	}
}

fn parse_id(raw: &str) -> Result<WorkerId, ParseError> {
	raw.trim()
		.parse::<u64>()
		.map(WorkerId::new)
		.map_err(|_| ParseError(format!("invalid worker id `{}`", raw.trim())))
}
