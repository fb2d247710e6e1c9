// End-to-end checks against real interpreters on the host.

use std::time::Duration;

use tickr_executor::{ExecOptions, ProcessExecutor, ScriptExecutor, ScriptType};

fn bash_executor() -> ProcessExecutor {
    ProcessExecutor::new(ExecOptions {
        bash: "sh".into(),
        ..ExecOptions::default()
    })
}

#[tokio::test]
async fn zero_exit_is_success_with_captured_streams() {
    let out = bash_executor()
        .run(ScriptType::Bash, "echo out; echo err 1>&2")
        .await;

    assert!(out.succeeded());
    assert_eq!(out.exit_code, Some(0));
    assert_eq!(out.stdout, "out\n");
    assert_eq!(out.stderr, "err\n");
    assert!(out.ended_at >= out.started_at);
}

#[tokio::test]
async fn non_zero_exit_is_failure_and_keeps_stderr_verbatim() {
    let out = bash_executor()
        .run(ScriptType::Bash, "echo boom 1>&2; exit 3")
        .await;

    assert!(!out.succeeded());
    assert_eq!(out.exit_code, Some(3));
    assert_eq!(out.stderr, "boom\n");
}

#[tokio::test]
async fn launch_failure_is_recorded_not_raised() {
    let executor = ProcessExecutor::new(ExecOptions {
        bash: "/definitely/not/a/shell".into(),
        ..ExecOptions::default()
    });
    let out = executor.run(ScriptType::Bash, "echo hi").await;

    assert!(!out.succeeded());
    assert_eq!(out.exit_code, None);
    assert!(out.stdout.is_empty());
    assert!(out.stderr.contains("[tickr] failed to launch `/definitely/not/a/shell`"));
}

#[tokio::test]
async fn signal_death_appends_diagnostic() {
    let out = bash_executor()
        .run(ScriptType::Bash, "echo partial 1>&2; kill -9 $$")
        .await;

    assert!(!out.succeeded());
    assert_eq!(out.exit_code, None);
    assert!(out.stderr.starts_with("partial\n"));
    assert!(out.stderr.contains("[tickr] script terminated by signal 9"));
}

#[tokio::test]
async fn watchdog_kills_long_running_script() {
    let executor = ProcessExecutor::new(ExecOptions {
        bash: "sh".into(),
        timeout: Some(Duration::from_millis(200)),
        ..ExecOptions::default()
    });
    let out = executor.run(ScriptType::Bash, "sleep 5").await;

    assert!(!out.succeeded());
    assert!(out.stderr.contains("timed out after 200ms"));
    assert!(out.duration_ms() < 5_000);
}

#[tokio::test]
async fn watchdog_keeps_output_written_before_the_kill() {
    let executor = ProcessExecutor::new(ExecOptions {
        bash: "sh".into(),
        timeout: Some(Duration::from_millis(300)),
        ..ExecOptions::default()
    });
    let out = executor
        .run(ScriptType::Bash, "echo started; echo warming up 1>&2; exec sleep 5")
        .await;

    assert_eq!(out.exit_code, None);
    assert_eq!(out.stdout, "started\n");
    assert!(out.stderr.starts_with("warming up\n"));
    assert!(out.stderr.ends_with("[tickr] script timed out after 300ms and was killed\n"));
}

#[tokio::test]
async fn ansi_sequences_are_stripped_by_default() {
    let out = bash_executor()
        .run(ScriptType::Bash, r"printf '\033[31mred\033[0m\n'")
        .await;
    assert_eq!(out.stdout, "red\n");
}

#[tokio::test]
async fn output_cap_applies_per_stream() {
    let executor = ProcessExecutor::new(ExecOptions {
        bash: "sh".into(),
        max_output_chars: Some(10),
        ..ExecOptions::default()
    });
    let out = executor
        .run(ScriptType::Bash, "i=0; while [ $i -lt 100 ]; do printf x; i=$((i+1)); done")
        .await;

    assert!(out.succeeded());
    assert!(out.stdout.contains("90 chars omitted"));
}

#[tokio::test]
async fn python_script_runs_under_python_interpreter() {
    if which::which("python3").is_err() {
        eprintln!("python3 not installed; skipping");
        return;
    }
    let out = ProcessExecutor::default()
        .run(ScriptType::Python, "import sys\nprint('hi')\nsys.exit(0)")
        .await;

    assert!(out.succeeded());
    assert_eq!(out.stdout, "hi\n");
}
