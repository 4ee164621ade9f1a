#![allow(dead_code)]

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use mutation_driver::DriverConfig;
use mutation_driver::process::{CommandSpec, ProcessOutput, ProcessRunner};
use tempfile::TempDir;

type Handler = Box<dyn Fn(&CommandSpec) -> io::Result<ProcessOutput>>;

/// Records every invocation and answers from a closure instead of spawning.
pub struct FakeRunner {
    calls: RefCell<Vec<(CommandSpec, PathBuf)>>,
    handler: Handler,
}

impl FakeRunner {
    pub fn new(handler: impl Fn(&CommandSpec) -> io::Result<ProcessOutput> + 'static) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// `git apply`, the test command and `git checkout` exit with the given codes.
    pub fn scripted(apply: i32, tests: i32, checkout: i32) -> Self {
        Self::new(move |cmd| {
            let code = match kind(cmd) {
                Kind::Apply => apply,
                Kind::Checkout => checkout,
                Kind::Tests => tests,
                Kind::Coverage | Kind::Summary => 0,
            };
            Ok(exit_with(code, &format!("{} output", cmd.program)))
        })
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn workdirs(&self) -> Vec<PathBuf> {
        self.calls.borrow().iter().map(|(_, w)| w.clone()).collect()
    }

    pub fn count(&self, which: Kind) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|(c, _)| kind(c) == which)
            .count()
    }

    pub fn checkouts(&self) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(c, _)| kind(c) == Kind::Checkout)
            .map(|(c, _)| c.args[3..].to_vec())
            .collect()
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, command: &CommandSpec, workdir: &Path, _timeout: Duration) -> io::Result<ProcessOutput> {
        self.calls
            .borrow_mut()
            .push((command.clone(), workdir.to_path_buf()));
        (self.handler)(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Apply,
    Checkout,
    Tests,
    Coverage,
    Summary,
}

pub fn kind(cmd: &CommandSpec) -> Kind {
    let first = cmd.args.first().map(String::as_str);
    match (cmd.program.as_str(), first) {
        ("git", Some("apply")) => Kind::Apply,
        ("git", Some("checkout")) => Kind::Checkout,
        (_, Some("tool")) => Kind::Summary,
        _ if cmd.args.iter().any(|a| a.starts_with("-coverprofile")) => Kind::Coverage,
        _ => Kind::Tests,
    }
}

pub fn exit_with(code: i32, stdout: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(code),
        stdout: stdout.to_string(),
        stderr: String::new(),
        timed_out: false,
    }
}

pub fn timed_out() -> ProcessOutput {
    ProcessOutput {
        exit_code: None,
        timed_out: true,
        ..Default::default()
    }
}

pub const DATA_DIFF: &str = "\
diff --git a/data.txt b/data.txt
--- a/data.txt
+++ b/data.txt
@@ -1,2 +1,2 @@
-ORIGINAL
+MUTATED
 second line
";

pub const OTHER_DIFF: &str = "\
diff --git a/other.txt b/other.txt
--- a/other.txt
+++ b/other.txt
@@ -1,2 +1,2 @@
 alpha
-beta
+gamma
";

pub const CONFLICTING_DIFF: &str = "\
diff --git a/data.txt b/data.txt
--- a/data.txt
+++ b/data.txt
@@ -1,2 +1,2 @@
-NOT THERE
+MUTATED
 second line
";

/// A repo root with a `go.mod` marker and a `mutations/` directory holding the
/// given diff files and corpus lines. Nothing is committed.
pub fn fixture(diffs: &[(&str, &str)], corpus_lines: &[&str]) -> (TempDir, DriverConfig) {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    std::fs::write(root.join("go.mod"), "module example.com/fair\n").unwrap();
    std::fs::write(root.join("data.txt"), "ORIGINAL\nsecond line\n").unwrap();
    std::fs::write(root.join("other.txt"), "alpha\nbeta\n").unwrap();
    let mutations = root.join("mutations");
    std::fs::create_dir(&mutations).unwrap();
    for (name, body) in diffs {
        std::fs::write(mutations.join(name), body).unwrap();
    }
    if !corpus_lines.is_empty() {
        let mut corpus = corpus_lines.join("\n");
        corpus.push('\n');
        std::fs::write(mutations.join("mutations.jsonl"), corpus).unwrap();
    }
    let mut cfg = DriverConfig::for_mutations_dir(mutations);
    cfg.skip_coverage = true;
    (dir, cfg)
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=driver", "-c", "user.email=driver@example.com"])
        .args(args)
        .current_dir(root)
        .output()
        .unwrap();
    assert!(
        status.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&status.stderr)
    );
}

/// Turn a fixture into a git repo with everything except `mutations/` committed.
pub fn commit_baseline(root: &Path) {
    git(root, &["init", "-q"]);
    git(root, &["add", "go.mod", "data.txt", "other.txt"]);
    git(root, &["commit", "-q", "-m", "baseline"]);
}

/// Every file under `root` except `.git` and the given relative paths.
pub fn snapshot(root: &Path, skip: &[&str]) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    collect(root, root, skip, &mut files);
    files.sort();
    files
}

fn collect(root: &Path, dir: &Path, skip: &[&str], out: &mut Vec<(PathBuf, Vec<u8>)>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap().to_path_buf();
        if rel == Path::new(".git") || skip.iter().any(|s| rel == Path::new(s)) {
            continue;
        }
        if entry.file_type().unwrap().is_dir() {
            collect(root, &path, skip, out);
        } else {
            out.push((rel, std::fs::read(&path).unwrap()));
        }
    }
}
