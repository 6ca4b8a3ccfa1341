use std::process::exit;

use owo_colors::OwoColorize;
use subwatch::{Options, Subprocess, SubprocessGroup};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().init();

	let args: Vec<String> = std::env::args().skip(1).collect();
	if args.is_empty() {
		print_usage();
		return;
	}

	match args[0].as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("subwatch {}", env!("CARGO_PKG_VERSION")),
		"run" => cmd_run(&args[1..]).await,
		"group" => cmd_group(&args[1..]).await,
		other => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'subwatch help' for usage");
			exit(2);
		}
	}
}

fn print_usage() {
	eprintln!(
		"{} {} — supervise child processes",
		"subwatch".bold(),
		env!("CARGO_PKG_VERSION")
	);
	eprintln!();
	eprintln!("usage: {} <command> [options]", "subwatch".bold());
	eprintln!();
	eprintln!("{}", "commands".cyan().bold());
	eprintln!("  {} [options] -- <command line>    Run one supervised command", "run".bold());
	eprintln!("  {} [options] -e <cmd> [-e <cmd>]  Run several commands together", "group".bold());
	eprintln!();
	eprintln!("{}", "options".cyan().bold());
	eprintln!("  -n, --name <name>       Label for diagnostics");
	eprintln!("  -c, --check <secs>      Read timeout (run) or pass interval (group)");
	eprintln!("  -t, --timeout <secs>    Execution timeout, -1 disables");
	eprintln!("  -p, --profiling        Measure execution time");
	eprintln!("      --debug            Narrate lifecycle into the report");
	eprintln!("  -q, --quiet            Suppress group narration");
	eprintln!("      --json             Print a JSON summary instead of text");
}

struct Flags {
	options: Options,
	json: bool,
	commands: Vec<String>,
}

fn parse_flags(args: &[String]) -> Result<Flags, String> {
	let mut options = Options::new();
	let mut json = false;
	let mut commands = Vec::new();
	let mut rest: Vec<String> = Vec::new();

	let mut i = 0;
	while i < args.len() {
		match args[i].as_str() {
			"-n" | "--name" => options.name = Some(take_value(args, &mut i)?),
			"-c" | "--check" => options.check = Some(take_number(args, &mut i)?),
			"-t" | "--timeout" => options.timeout = Some(take_number(args, &mut i)?),
			"-p" | "--profiling" => options.profiling = Some(true),
			"--debug" => options.debug = Some(true),
			"-q" | "--quiet" => options.quiet = Some(true),
			"--json" => json = true,
			"-e" | "--exec" => commands.push(take_value(args, &mut i)?),
			"--" => {
				rest.extend(args[i + 1..].iter().cloned());
				break;
			}
			other => rest.push(other.to_string()),
		}
		i += 1;
	}

	if !rest.is_empty() {
		commands.push(rest.join(" "));
	}
	Ok(Flags {
		options,
		json,
		commands,
	})
}

fn take_value(args: &[String], i: &mut usize) -> Result<String, String> {
	let flag = &args[*i];
	*i += 1;
	args.get(*i)
		.cloned()
		.ok_or_else(|| format!("{} needs a value", flag))
}

fn take_number(args: &[String], i: &mut usize) -> Result<i64, String> {
	let flag = args[*i].clone();
	let value = take_value(args, i)?;
	value
		.parse()
		.map_err(|_| format!("{} needs a number, got '{}'", flag, value))
}

async fn cmd_run(args: &[String]) {
	let flags = match parse_flags(args) {
		Ok(flags) => flags,
		Err(e) => {
			eprintln!("{}", e);
			exit(2);
		}
	};
	let Some(command_line) = flags.commands.first() else {
		eprintln!("usage: subwatch run [options] -- <command line>");
		exit(2);
	};

	let mut command = match Subprocess::with_options(command_line, &flags.options) {
		Ok(command) => command,
		Err(e) => {
			eprintln!("{}", e);
			exit(2);
		}
	};

	if command.launch() {
		if let Err(e) = command.wait().await {
			eprintln!("{}", e);
		}
	}
	command.free_resources();

	if flags.json {
		println!("{}", command_summary(&command));
	} else {
		render_command(&command);
	}

	let code = command.exit_code();
	exit(if code < 0 { 1 } else { code.min(255) });
}

async fn cmd_group(args: &[String]) {
	let flags = match parse_flags(args) {
		Ok(flags) => flags,
		Err(e) => {
			eprintln!("{}", e);
			exit(2);
		}
	};
	if flags.commands.is_empty() {
		eprintln!("usage: subwatch group [options] -e <cmd> [-e <cmd> ...]");
		exit(2);
	}

	let mut group = match SubprocessGroup::with_options(&flags.options) {
		Ok(group) => group,
		Err(e) => {
			eprintln!("{}", e);
			exit(2);
		}
	};
	for command_line in &flags.commands {
		group.add(Subprocess::new(command_line));
	}

	match group.run().await {
		Ok(true) => {}
		Ok(false) => eprintln!("{}", "group did not finish cleanly".yellow()),
		Err(e) => eprintln!("{}", e),
	}
	group.free_resources();

	if flags.json {
		let members: Vec<serde_json::Value> =
			group.iter().map(command_summary_value).collect();
		let summary = serde_json::json!({
			"code": group.code(),
			"members": members,
		});
		println!("{}", summary);
	} else {
		for (idx, member) in group.iter().enumerate() {
			eprintln!("{}", format!("--- command {} {}", idx, member.label()).bold());
			render_command(member);
		}
	}

	exit(group.code() as i32);
}

fn render_command(command: &Subprocess) {
	if !command.report().is_empty() {
		print!("{}", command.report());
	}
	if !command.error().is_empty() {
		eprint!("{}", command.error());
	}
	let status = command
		.status()
		.map(|s| s.to_string())
		.unwrap_or_else(|| "?".to_string());
	if command.code() == 0 {
		eprintln!("{} status {}", "ok".green().bold(), status);
	} else {
		eprintln!(
			"{} status {} code {}",
			"failed".red().bold(),
			status,
			command.code()
		);
	}
	if let Some(time) = command.execution_time() {
		eprintln!("ran for {:.2}s", time.as_secs_f64());
	}
}

fn command_summary(command: &Subprocess) -> String {
	command_summary_value(command).to_string()
}

fn command_summary_value(command: &Subprocess) -> serde_json::Value {
	serde_json::json!({
		"name": command.name(),
		"command": command.command_line(),
		"status": command.status(),
		"code": command.code(),
		"report": command.report(),
		"error": command.error(),
		"execution_time_ms": command.execution_time().map(|t| t.as_millis() as u64),
	})
}
