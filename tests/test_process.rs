use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mutation_driver::process::{CommandSpec, ProcessRunner, SystemRunner, parse_command};
use tempfile::TempDir;

const LONG: Duration = Duration::from_secs(30);

#[test]
fn captures_stdout_and_exit_code() {
    let dir = TempDir::new().unwrap();
    let out = SystemRunner::new()
        .run(&CommandSpec::new("echo", ["hello"]), dir.path(), LONG)
        .unwrap();
    assert!(out.success());
    assert_eq!(out.stdout, "hello\n");
    assert!(!out.timed_out);
}

#[test]
fn nonzero_exit_is_not_success() {
    let dir = TempDir::new().unwrap();
    let out = SystemRunner::new()
        .run(&CommandSpec::new("false", Vec::<String>::new()), dir.path(), LONG)
        .unwrap();
    assert!(!out.success());
    assert_eq!(out.exit_code, Some(1));
}

#[test]
fn runs_in_the_given_workdir() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "").unwrap();
    let out = SystemRunner::new()
        .run(&CommandSpec::new("ls", Vec::<String>::new()), dir.path(), LONG)
        .unwrap();
    assert!(out.stdout.contains("marker.txt"));
}

#[test]
fn missing_program_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = SystemRunner::new()
        .run(
            &CommandSpec::new("nonexistent_command_xyz", Vec::<String>::new()),
            dir.path(),
            LONG,
        )
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

#[test]
fn slow_process_times_out() {
    let dir = TempDir::new().unwrap();
    let start = Instant::now();
    let out = SystemRunner::new()
        .run(&CommandSpec::new("sleep", ["5"]), dir.path(), Duration::from_millis(200))
        .unwrap();
    assert!(out.timed_out);
    assert!(!out.success());
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn timeout_kills_grandchildren_holding_the_pipes() {
    let dir = TempDir::new().unwrap();
    let start = Instant::now();
    let out = SystemRunner::new()
        .run(
            &CommandSpec::new("sh", ["-c", "sleep 8; true"]),
            dir.path(),
            Duration::from_millis(500),
        )
        .unwrap();
    assert!(out.timed_out);
    assert!(!out.success());
    assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
}

#[test]
fn interrupt_kills_grandchildren_holding_the_pipes() {
    let dir = TempDir::new().unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let runner = SystemRunner::new().with_interrupt(Arc::clone(&flag));

    let raiser = {
        let flag = Arc::clone(&flag);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
        })
    };
    let start = Instant::now();
    let err = runner
        .run(
            &CommandSpec::new("sh", ["-c", "sleep 8; true"]).interruptible(),
            dir.path(),
            LONG,
        )
        .unwrap_err();
    raiser.join().unwrap();

    assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
}

#[test]
fn large_output_does_not_deadlock() {
    let dir = TempDir::new().unwrap();
    let out = SystemRunner::new()
        .run(&CommandSpec::new("seq", ["1", "200000"]), dir.path(), LONG)
        .unwrap();
    assert!(out.success());
    assert!(out.stdout.ends_with("200000\n"));
}

#[test]
fn interrupt_kills_interruptible_commands() {
    let dir = TempDir::new().unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let runner = SystemRunner::new().with_interrupt(Arc::clone(&flag));

    let raiser = {
        let flag = Arc::clone(&flag);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
        })
    };
    let start = Instant::now();
    let err = runner
        .run(&CommandSpec::new("sleep", ["5"]).interruptible(), dir.path(), LONG)
        .unwrap_err();
    raiser.join().unwrap();

    assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn interrupt_leaves_plain_commands_running() {
    let dir = TempDir::new().unwrap();
    let flag = Arc::new(AtomicBool::new(true));
    let runner = SystemRunner::new().with_interrupt(flag);

    let out = runner
        .run(&CommandSpec::new("sleep", ["0.2"]), dir.path(), LONG)
        .unwrap();
    assert!(out.success());
}

#[test]
fn parsed_commands_run() {
    let dir = TempDir::new().unwrap();
    let cmd = parse_command("echo one two", None).unwrap();
    let out = SystemRunner::new().run(&cmd, dir.path(), LONG).unwrap();
    assert_eq!(out.stdout, "one two\n");
}
