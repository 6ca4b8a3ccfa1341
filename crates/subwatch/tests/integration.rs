use std::time::{Duration, Instant};

use subwatch::{
	run_command, run_command_with_options, Error, Options, Subprocess, SubprocessGroup,
	CODE_LAUNCH_FAILED, CODE_TIMEOUT, STATUS_KILLED,
};

fn sh(script: &str) -> String {
	format!("sh -c '{}'", script)
}

fn quick(command_line: &str) -> Subprocess {
	Subprocess::with_options(
		command_line,
		&Options {
			check: Some(1),
			..Default::default()
		},
	)
	.unwrap()
}

async fn reap(command: &mut Subprocess) {
	for _ in 0..100 {
		if !command.check().await.unwrap() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
}

// --- Options ---

#[test]
fn options_read_aliases() {
	assert_eq!(Options::from_toml("check = 2").unwrap().check, Some(2));
	assert_eq!(Options::from_toml("read = 2").unwrap().check, Some(2));
	assert_eq!(Options::from_toml("readtimeout = 3").unwrap().check, Some(3));
}

#[test]
fn options_unknown_key_rejected() {
	let err = Options::from_toml("interval = 2").unwrap_err();
	assert!(matches!(err, Error::Options(_)));
	assert!(err.to_string().contains("unknown"), "error was: {}", err);
}

#[test]
fn options_negative_values_disable() {
	let cmd = Subprocess::with_options(
		"echo hi",
		&Options {
			check: Some(-1),
			timeout: Some(-1),
			..Default::default()
		},
	)
	.unwrap();
	assert_eq!(cmd.read_timeout(), Duration::ZERO);
	assert_eq!(cmd.execution_timeout(), None);
}

#[test]
fn options_full_set_from_toml() {
	let opts = Options::from_toml(
		"name = \"job\"\ncheck = 1\ntimeout = 5\ndebug = true\nprofiling = true\n",
	)
	.unwrap();
	let cmd = Subprocess::with_options("echo hi", &opts).unwrap();
	assert_eq!(cmd.name(), "job");
	assert_eq!(cmd.read_timeout(), Duration::from_secs(1));
	assert_eq!(cmd.execution_timeout(), Some(Duration::from_secs(5)));
	assert!(cmd.is_debug());
	assert!(cmd.is_profiling());
}

// --- Exit status mapping ---

#[tokio::test]
async fn exit_status_recorded() {
	let mut cmd = quick(&sh("exit 7"));
	assert!(cmd.launch());
	assert!(cmd.wait().await.unwrap());
	assert_eq!(cmd.status(), Some(7));
	assert_eq!(cmd.code(), 0);
	assert_eq!(cmd.exit_code(), 7);
}

#[tokio::test]
async fn signal_death_maps_to_negative() {
	let mut cmd = quick(&sh("kill -TERM $$"));
	assert!(cmd.launch());
	assert!(cmd.wait().await.unwrap());
	assert_eq!(cmd.status(), Some(-15));
}

// --- Subprocess lifecycle ---

#[tokio::test]
async fn captures_stdout_and_stderr() {
	let mut cmd = quick(&sh("echo out-marker; echo err-marker >&2"));
	assert!(cmd.launch());
	assert!(cmd.wait().await.unwrap());
	assert!(cmd.report().contains("out-marker"), "report: {}", cmd.report());
	assert!(cmd.error().contains("err-marker"), "error: {}", cmd.error());
	assert_eq!(cmd.status(), Some(0));
	assert_eq!(cmd.code(), 0);
}

#[tokio::test]
async fn sleeping_command_finishes_cleanly() {
	let mut cmd = quick("sleep 2");
	assert!(cmd.launch());
	assert!(cmd.is_running());
	assert!(cmd.wait().await.unwrap());
	assert!(!cmd.is_running());
	assert_eq!(cmd.status(), Some(0));
	assert_eq!(cmd.code(), 0);
}

#[tokio::test]
async fn launch_nonexistent_records_failure() {
	let mut cmd = quick("/no/such/subwatch-test-binary");
	assert!(!cmd.launch());
	assert!(!cmd.is_running());
	assert_eq!(cmd.code(), CODE_LAUNCH_FAILED);
	assert!(cmd.error().contains("launch failed"), "error: {}", cmd.error());
	assert!(
		cmd.error().to_lowercase().contains("no such file"),
		"error: {}",
		cmd.error()
	);
	// the platform error number stands in for the never-seen exit status
	assert_eq!(cmd.status(), Some(2));
	assert_eq!(cmd.exit_code(), 2);
}

#[tokio::test]
async fn empty_command_line_rejected() {
	let mut cmd = Subprocess::new("");
	assert!(!cmd.launch());
	assert_eq!(cmd.code(), CODE_LAUNCH_FAILED);
	assert!(cmd.error().contains("no command line"), "error: {}", cmd.error());
}

#[tokio::test]
async fn check_is_bounded_by_read_timeout() {
	let mut cmd = quick("sleep 3");
	assert!(cmd.launch());

	let start = Instant::now();
	assert!(cmd.check().await.unwrap());
	let elapsed = start.elapsed();
	assert!(elapsed < Duration::from_millis(1800), "check took {:?}", elapsed);

	cmd.free_resources();
}

#[tokio::test]
async fn check_after_completion_is_a_noop() {
	let mut cmd = quick(&sh("echo once"));
	assert!(cmd.launch());
	assert!(cmd.wait().await.unwrap());

	let report = cmd.report().to_string();
	let status = cmd.status();
	assert!(!cmd.check().await.unwrap());
	assert!(!cmd.check().await.unwrap());
	assert_eq!(cmd.report(), report);
	assert_eq!(cmd.status(), status);
}

#[tokio::test]
async fn execution_timeout_escalates() {
	let mut cmd = Subprocess::with_options(
		"sleep 30",
		&Options {
			check: Some(1),
			timeout: Some(2),
			..Default::default()
		},
	)
	.unwrap();
	assert!(cmd.launch());

	let start = Instant::now();
	assert!(!cmd.wait().await.unwrap());
	let elapsed = start.elapsed();

	assert!(elapsed < Duration::from_secs(10), "wait took {:?}", elapsed);
	assert_eq!(cmd.code(), CODE_TIMEOUT);
	assert!(cmd.error().contains("timed out"), "error: {}", cmd.error());
	let status = cmd.status();
	assert!(
		status == Some(-15) || status == Some(STATUS_KILLED),
		"status was {:?}",
		status
	);
	assert!(!cmd.is_running());
}

#[tokio::test]
async fn kill_pins_status_before_natural_exit_is_seen() {
	let mut cmd = quick(&sh("exit 0"));
	assert!(cmd.launch());

	// no check() in between: the clean exit is never observed
	cmd.kill();
	assert_eq!(cmd.status(), Some(STATUS_KILLED));
	assert_eq!(cmd.code(), CODE_TIMEOUT);
	assert!(!cmd.is_running());

	cmd.kill();
	assert_eq!(cmd.status(), Some(STATUS_KILLED));
}

#[tokio::test]
async fn free_resources_is_idempotent() {
	let mut cmd = quick("sleep 30");
	assert!(cmd.launch());

	cmd.free_resources();
	assert!(!cmd.is_running());
	assert_eq!(cmd.status(), Some(STATUS_KILLED));
	assert_eq!(cmd.code(), CODE_TIMEOUT);

	cmd.free_resources();
	assert!(!cmd.is_running());
	assert_eq!(cmd.status(), Some(STATUS_KILLED));
}

#[tokio::test]
async fn signals_without_process_only_log() {
	let mut cmd = Subprocess::new("echo hi");
	cmd.terminate().await.unwrap();
	cmd.kill();
	assert!(cmd.error().contains("not running"), "error: {}", cmd.error());
	assert_eq!(cmd.code(), 0);
}

#[tokio::test]
async fn terminate_stops_a_running_command() {
	let mut cmd = quick("sleep 30");
	assert!(cmd.launch());

	cmd.terminate().await.unwrap();
	reap(&mut cmd).await;

	assert!(!cmd.is_running());
	assert_eq!(cmd.status(), Some(-15));
	assert!(cmd.error().contains("terminating"), "error: {}", cmd.error());
}

#[tokio::test]
async fn profiling_measures_execution_time() {
	let mut cmd = Subprocess::with_options(
		"sleep 1",
		&Options {
			check: Some(1),
			profiling: Some(true),
			..Default::default()
		},
	)
	.unwrap();
	assert!(cmd.launch());
	assert!(cmd.wait().await.unwrap());

	let time = cmd.execution_time().expect("profiling captured no time");
	assert!(time >= Duration::from_millis(900), "measured {:?}", time);
	assert!(time < Duration::from_secs(5), "measured {:?}", time);
}

#[tokio::test]
async fn execution_time_absent_without_profiling() {
	let mut cmd = quick(&sh("echo hi"));
	assert!(cmd.launch());
	assert!(cmd.wait().await.unwrap());
	assert_eq!(cmd.execution_time(), None);
}

#[tokio::test]
async fn immutable_settings_rejected_after_launch() {
	let mut cmd = quick(&sh("echo hi"));
	assert!(cmd.launch());

	assert!(matches!(
		cmd.set_command_line("echo other"),
		Err(Error::AlreadyLaunched(_))
	));
	assert!(matches!(
		cmd.set_profiling(true),
		Err(Error::AlreadyLaunched(_))
	));

	// timeouts stay adjustable
	cmd.set_read_timeout(Duration::from_secs(2));
	cmd.set_execution_timeout(Some(Duration::from_secs(9)));
	assert!(cmd.wait().await.unwrap());
}

#[tokio::test]
async fn debug_narrates_into_report() {
	let mut cmd = Subprocess::with_options(
		&sh("echo hi"),
		&Options {
			check: Some(1),
			debug: Some(true),
			..Default::default()
		},
	)
	.unwrap();
	assert!(cmd.launch());
	assert!(cmd.wait().await.unwrap());
	assert!(cmd.report().contains("cmd: '"), "report: {}", cmd.report());
}

// --- run façade ---

#[tokio::test]
async fn run_command_returns_triple() {
	let (report, error, code) = run_command(&sh("echo out; echo err >&2; exit 3"))
		.await
		.unwrap();
	assert!(report.contains("out"), "report: {}", report);
	assert!(error.contains("err"), "error: {}", error);
	assert_eq!(code, 3);
}

#[tokio::test]
async fn run_command_with_timeout_reports_failure() {
	let opts = Options {
		check: Some(1),
		timeout: Some(2),
		..Default::default()
	};
	let (_, error, code) = run_command_with_options("sleep 30", &opts).await.unwrap();
	assert!(error.contains("timed out"), "error: {}", error);
	assert_ne!(code, 0);
}

// --- Group: read budget ---

#[tokio::test]
async fn group_divides_check_interval_across_members() {
	let mut group = SubprocessGroup::with_options(&Options {
		check: Some(2),
		..Default::default()
	})
	.unwrap();
	group.add(Subprocess::new("sleep 1"));
	group.add(Subprocess::new("sleep 1"));
	group.add(Subprocess::new("sleep 1"));

	let share = Duration::from_secs(2) / 3;
	for idx in 0..group.len() {
		assert_eq!(group.get(idx).unwrap().read_timeout(), share);
	}
	assert!(share * 3 <= Duration::from_secs(2));
}

#[tokio::test]
async fn group_rederives_budget_when_interval_changes() {
	let mut group = SubprocessGroup::new();
	group.add(Subprocess::new("sleep 1"));
	group.add(Subprocess::new("sleep 1"));
	assert_eq!(group.get(0).unwrap().read_timeout(), Duration::ZERO);

	group.set_check_interval(Some(Duration::from_secs(4)));
	assert_eq!(group.get(0).unwrap().read_timeout(), Duration::from_secs(2));
	assert_eq!(group.get(1).unwrap().read_timeout(), Duration::from_secs(2));

	// adding another member shrinks everyone's share
	group.add(Subprocess::new("sleep 1"));
	let share = Duration::from_secs(4) / 3;
	assert_eq!(group.get(0).unwrap().read_timeout(), share);
	assert_eq!(group.get(2).unwrap().read_timeout(), share);
}

// --- Group: scheduling ---

#[tokio::test]
async fn group_run_is_bounded_by_slowest_member() {
	let mut group = SubprocessGroup::with_options(&Options {
		check: Some(2),
		..Default::default()
	})
	.unwrap();
	for pause in [1, 2, 3] {
		let script = format!("echo started; sleep {}; echo finished >&2", pause);
		group
			.add_command_line(&sh(&script), &Options::new())
			.unwrap();
	}

	let start = Instant::now();
	assert!(group.run().await.unwrap());
	let elapsed = start.elapsed();

	// slowest member takes 3s; the members together would take 6s serially
	assert!(elapsed >= Duration::from_millis(2900), "took {:?}", elapsed);
	assert!(elapsed < Duration::from_millis(5900), "took {:?}", elapsed);

	for idx in 0..group.len() {
		let member = group.get(idx).unwrap();
		assert_eq!(member.status(), Some(0), "member {}", idx);
		assert!(member.report().contains("started"), "member {}", idx);
		assert!(member.error().contains("finished"), "member {}", idx);
	}
	assert_eq!(group.code(), 0);
}

#[tokio::test]
async fn group_launch_failure_keeps_siblings_supervised() {
	let mut group = SubprocessGroup::with_options(&Options {
		check: Some(1),
		..Default::default()
	})
	.unwrap();
	group.add(Subprocess::new("/no/such/subwatch-test-binary"));
	group.add(Subprocess::new(&sh("echo sibling-ok")));

	assert!(!group.run().await.unwrap());
	assert_eq!(group.code(), CODE_LAUNCH_FAILED);
	assert!(group.error().contains("launch failed"), "error: {}", group.error());

	let sibling = group.get(1).unwrap();
	assert_eq!(sibling.status(), Some(0));
	assert!(sibling.report().contains("sibling-ok"), "report: {}", sibling.report());
}

#[tokio::test]
async fn group_timeout_terminates_running_members() {
	let mut group = SubprocessGroup::with_options(&Options {
		check: Some(1),
		timeout: Some(2),
		..Default::default()
	})
	.unwrap();
	group.add(Subprocess::new("sleep 30"));
	group.add(Subprocess::new("sleep 30"));

	let start = Instant::now();
	assert!(!group.run().await.unwrap());
	let elapsed = start.elapsed();

	assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
	assert!(group.code() >= CODE_TIMEOUT);
	assert!(group.error().contains("timed out"), "error: {}", group.error());

	// the terminations need a moment to be reaped
	for _ in 0..40 {
		if !group.any_running() {
			break;
		}
		let _ = group.check().await.unwrap();
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
	assert!(!group.any_running());
}

#[tokio::test]
async fn group_aggregates_member_text() {
	let mut group = SubprocessGroup::with_options(&Options {
		check: Some(1),
		..Default::default()
	})
	.unwrap();
	group.add(Subprocess::new(&sh("echo agg-one")));
	group.add(Subprocess::new(&sh("echo agg-two")));

	assert!(group.run().await.unwrap());
	let report = group.report();
	let one = report.find("agg-one").expect("first member output missing");
	let two = report.find("agg-two").expect("second member output missing");
	assert!(one < two, "members out of order: {}", report);
}

#[tokio::test]
async fn group_clear_errors_resets_aggregation() {
	let mut group = SubprocessGroup::new();
	group.add(Subprocess::new("/no/such/subwatch-test-binary"));
	group.launch();
	assert_eq!(group.code(), CODE_LAUNCH_FAILED);

	group.clear_errors();
	assert_eq!(group.code(), 0);
	assert!(group.report().is_empty());
	assert!(group.error().is_empty());
}

#[tokio::test]
async fn group_kill_and_free_are_safe_to_repeat() {
	let mut group = SubprocessGroup::with_options(&Options {
		check: Some(1),
		..Default::default()
	})
	.unwrap();
	group.add(Subprocess::new("sleep 30"));
	group.add(Subprocess::new("sleep 30"));
	assert_eq!(group.launch(), 2);

	group.kill();
	assert!(!group.any_running());
	assert_eq!(group.get(0).unwrap().status(), Some(STATUS_KILLED));

	group.free_resources();
	group.free_resources();
	assert!(!group.any_running());
}

#[tokio::test]
async fn empty_group_finishes_immediately() {
	let mut group = SubprocessGroup::new();
	assert!(group.run().await.unwrap());
	assert_eq!(group.code(), 0);
}

#[tokio::test]
async fn group_profiling_measures_time() {
	let mut group = SubprocessGroup::with_options(&Options {
		check: Some(1),
		profiling: Some(true),
		..Default::default()
	})
	.unwrap();
	group.add(Subprocess::new("sleep 1"));

	assert!(group.run().await.unwrap());
	let time = group.execution_time().expect("profiling captured no time");
	assert!(time >= Duration::from_millis(900), "measured {:?}", time);
	assert!(time < Duration::from_secs(6), "measured {:?}", time);
}
