//! End-to-end tests for the `forest` binary.
//!
//! Every test runs the compiled binary with its data root, config dir and
//! home pointed into a private temp dir.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde_json::Value;
use tempfile::TempDir;

use forest_test_utils::temp_artifacts;

struct Sandbox {
    tmp: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            tmp: TempDir::new().expect("failed to create sandbox"),
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.tmp.path().join("data")
    }

    fn config_file(&self) -> PathBuf {
        self.tmp.path().join("config").join("forest").join("config.toml")
    }

    fn tree_file(&self, project_id: &str) -> PathBuf {
        self.data_dir()
            .join(project_id)
            .join("paths")
            .join("main")
            .join("hta.json")
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.tmp.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_forest"));
        cmd.args(args)
            .env("FOREST_DATA_DIR", self.data_dir())
            .env("XDG_CONFIG_HOME", self.tmp.path().join("config"))
            .env("HOME", self.tmp.path())
            .env("RUST_LOG", "warn")
            .env_remove("FOREST_LOCK_TIMEOUT_MS")
            .env_remove("FOREST_PROVIDER_COMMAND")
            .env_remove("FOREST_PROVIDER_TIMEOUT_SECS")
            .stdin(Stdio::null());
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("failed to run forest")
    }

    fn run_with_stdin(&self, args: &[&str], stdin: &str) -> Output {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn forest");
        // The command may exit before reading; its output tells the story.
        let _ = child.stdin.take().unwrap().write_all(stdin.as_bytes());
        child.wait_with_output().unwrap()
    }
}

fn stdout_ok(output: Output) -> String {
    assert!(
        output.status.success(),
        "forest failed ({}):\nstdout: {}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

fn stderr_failed(output: Output) -> String {
    assert!(!output.status.success(), "expected forest to fail");
    String::from_utf8(output.stderr).unwrap()
}

fn report(output: Output) -> Value {
    let stdout = stdout_ok(output);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("report is not JSON ({e}): {stdout}"))
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

// -----------------------------------------------------------------------
// Projects
// -----------------------------------------------------------------------

#[test]
fn project_lifecycle() {
    let sb = Sandbox::new();

    let create = ["project", "create", "p1", "--goal", "Learn X", "--context", "ctx"];
    let out = stdout_ok(sb.run(&create));
    assert!(out.contains("Created project p1"));

    let out = stdout_ok(sb.run(&["project", "list"]));
    assert!(out.contains("p1\tLearn X"), "unexpected list output: {out}");

    let out = stdout_ok(sb.run(&["project", "show", "p1"]));
    assert!(out.contains("Goal: Learn X"));
    assert!(out.contains("Context: ctx"));
    assert!(out.contains("Tree: none yet"));

    let err = stderr_failed(sb.run(&["project", "create", "p1", "--goal", "again"]));
    assert!(err.contains("already exists"), "unexpected error: {err}");
}

#[test]
fn empty_project_list() {
    let sb = Sandbox::new();
    assert!(stdout_ok(sb.run(&["project", "list"])).contains("No projects."));
}

#[test]
fn traversal_project_id_is_rejected() {
    let sb = Sandbox::new();
    let err = stderr_failed(sb.run(&["project", "create", "../evil", "--goal", "g"]));
    assert!(err.contains("invalid"), "unexpected error: {err}");
    assert!(!sb.tmp.path().join("evil").exists());
}

// -----------------------------------------------------------------------
// Ingestion
// -----------------------------------------------------------------------

#[test]
fn malformed_file_response_falls_back() {
    let sb = Sandbox::new();
    stdout_ok(sb.run(&["project", "create", "p1", "--goal", "Learn X", "--context", "ctx"]));
    let file = sb.write("response.txt", "I'm sorry, I can't produce a plan right now.");

    let report = report(sb.run(&["ingest", "p1", "--file", file.to_str().unwrap()]));
    assert_eq!(report["source"], "fallback");
    assert!(report["branchCount"].as_u64().unwrap() >= 1);
    assert!(report["taskCount"].as_u64().unwrap() >= 1);

    let tree = read_json(&sb.tree_file("p1"));
    assert_eq!(tree["goal"], "Learn X");
    assert!(!tree["strategicBranches"].as_array().unwrap().is_empty());
    assert!(!tree["frontierNodes"].as_array().unwrap().is_empty());
    assert!(temp_artifacts(&sb.data_dir()).is_empty());

    let out = stdout_ok(sb.run(&["project", "show", "p1"]));
    assert!(out.contains("branches"), "unexpected show output: {out}");
}

#[test]
fn stdin_response_is_parsed() {
    let sb = Sandbox::new();
    let response = r#"{"branch_tasks": [{"title": "Basics", "tasks": ["Read the guide"]}]}"#;

    let report = report(sb.run_with_stdin(&["ingest", "p2", "--goal", "Learn Y"], response));
    assert_eq!(report["source"], "parsed");
    assert_eq!(report["strategy"], "direct_field");
    assert_eq!(report["taskCount"], 1);

    let out = stdout_ok(sb.run(&["tree", "show", "p2"]));
    assert!(out.contains("Goal: Learn Y"));
    assert!(out.contains("Basics"));
    assert!(out.contains("Read the guide"));

    let json: Value = serde_json::from_str(&stdout_ok(sb.run(&["tree", "show", "p2", "--json"])))
        .expect("tree show --json prints JSON");
    assert_eq!(json["frontierNodes"][0]["title"], "Read the guide");
}

#[test]
fn ingest_without_goal_fails() {
    let sb = Sandbox::new();
    let err = stderr_failed(sb.run_with_stdin(&["ingest", "nobody"], "[]"));
    assert!(err.contains("no goal"), "unexpected error: {err}");
    assert!(!sb.tree_file("nobody").exists());
}

#[test]
fn missing_provider_falls_back() {
    let sb = Sandbox::new();
    let report = report(sb.run(&[
        "generate",
        "p1",
        "--goal",
        "Learn X",
        "--provider",
        "forest-test-no-such-provider-9c1d",
    ]));
    assert_eq!(report["source"], "fallback");
    assert!(
        report["fallbackReason"].as_str().unwrap().contains("unavailable"),
        "unexpected report: {report}"
    );
    assert!(sb.tree_file("p1").exists());
}

#[cfg(unix)]
#[test]
fn script_provider_answer_is_parsed() {
    let sb = Sandbox::new();
    let script = sb.write(
        "provider.sh",
        "cat > /dev/null\n\
         printf '%s\\n' 'Here you go:' '```json' \
         '[{\"title\": \"Basics\", \"tasks\": [\"Read the guide\"]}]' '```'\n",
    );
    let provider = format!("sh {}", script.display());

    let report = report(sb.run(&[
        "generate",
        "p1",
        "--goal",
        "Learn X",
        "--provider",
        &provider,
        "--timeout-secs",
        "30",
    ]));
    assert_eq!(report["source"], "parsed");
    assert_eq!(report["strategy"], "fenced_block");
    assert_eq!(report["taskCount"], 1);
}

// -----------------------------------------------------------------------
// Tree check
// -----------------------------------------------------------------------

#[test]
fn tree_check_reports_then_fixes() {
    let sb = Sandbox::new();
    let tree_file = sb.tree_file("p1");
    std::fs::create_dir_all(tree_file.parent().unwrap()).unwrap();
    std::fs::write(
        &tree_file,
        r#"{"strategicBranches": null,
            "frontierNodes": [{"id": "t1", "title": "Lost", "branch": "ghost"}]}"#,
    )
    .unwrap();
    let leftover = tree_file.with_file_name(".hta.json.crash.tmp");
    std::fs::write(&leftover, "partial").unwrap();

    let out = stdout_ok(sb.run(&["tree", "check", "p1"]));
    assert!(out.contains("repaired: strategicBranches: null, set to []"), "got: {out}");
    assert!(out.contains("repaired: completedNodes: missing, set to []"), "got: {out}");
    assert!(out.contains("orphaned: task \"t1\""), "got: {out}");
    assert!(out.contains("--fix"));
    assert_eq!(read_json(&tree_file)["strategicBranches"], Value::Null);
    assert!(leftover.exists());

    let out = stdout_ok(sb.run(&["tree", "check", "p1", "--fix"]));
    assert!(out.contains("Wrote repaired tree."));
    assert!(out.contains("Removed 1 leftover temp file(s)."), "got: {out}");
    let healed = read_json(&tree_file);
    assert_eq!(healed["strategicBranches"], serde_json::json!([]));
    assert_eq!(healed["frontierNodes"][0]["title"], "Lost");
    assert!(!leftover.exists());

    let out = stdout_ok(sb.run(&["tree", "check", "p1"]));
    assert!(out.contains("structure: ok"));
}

#[test]
fn non_object_nodes_do_not_break_tree_commands() {
    let sb = Sandbox::new();
    stdout_ok(sb.run(&["project", "create", "p1", "--goal", "Learn X"]));
    let tree_file = sb.tree_file("p1");
    std::fs::create_dir_all(tree_file.parent().unwrap()).unwrap();
    std::fs::write(
        &tree_file,
        r#"{"strategicBranches": [{"id": "b1", "title": "Basics"}, "stray"],
            "frontierNodes": [null, {"id": "t1", "title": "Scales", "branch": "b1"}],
            "completedNodes": [], "collaborativeSessions": []}"#,
    )
    .unwrap();

    let out = stdout_ok(sb.run(&["tree", "check", "p1", "--fix"]));
    assert!(out.contains("structure: ok"), "got: {out}");
    assert!(out.contains("orphans: none"), "got: {out}");

    let out = stdout_ok(sb.run(&["tree", "show", "p1"]));
    assert!(out.contains("Scales"), "got: {out}");

    let out = stdout_ok(sb.run(&["project", "show", "p1"]));
    assert!(out.contains("Tree: 1 branches, 1 open tasks"), "got: {out}");
}

#[test]
fn unreadable_tree_is_moved_aside_by_fix() {
    let sb = Sandbox::new();
    stdout_ok(sb.run(&["project", "create", "p1", "--goal", "Learn X"]));
    let tree_file = sb.tree_file("p1");
    std::fs::create_dir_all(tree_file.parent().unwrap()).unwrap();
    std::fs::write(&tree_file, "{ this is not json").unwrap();

    let err = stderr_failed(sb.run(&["tree", "check", "p1"]));
    assert!(err.contains("--fix moves it aside"), "unexpected error: {err}");
    assert!(tree_file.exists());

    let out = stdout_ok(sb.run(&["tree", "check", "p1", "--fix"]));
    assert!(out.contains("Moved unreadable tree to"), "got: {out}");
    assert!(!tree_file.exists());
    let kept: Vec<String> = std::fs::read_dir(tree_file.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("hta.json.corrupt-"))
        .collect();
    assert_eq!(kept.len(), 1, "got: {kept:?}");

    let file = sb.write("response.txt", "no plan");
    let report = report(sb.run(&["ingest", "p1", "--file", file.to_str().unwrap()]));
    assert_eq!(report["source"], "fallback");
    assert!(report["taskCount"].as_u64().unwrap() >= 1);
}

#[test]
fn tree_show_missing_tree_fails() {
    let sb = Sandbox::new();
    let err = stderr_failed(sb.run(&["tree", "show", "ghost"]));
    assert!(err.contains("no tree at ghost/main"), "unexpected error: {err}");
}

// -----------------------------------------------------------------------
// Config
// -----------------------------------------------------------------------

#[test]
fn init_writes_config_and_refuses_overwrite() {
    let sb = Sandbox::new();
    let custom = sb.tmp.path().join("custom-data");

    let out = stdout_ok(sb.run(&[
        "init",
        "--data-dir",
        custom.to_str().unwrap(),
        "--provider",
        "llm -q",
    ]));
    assert!(out.contains("Config written to"));

    let contents = std::fs::read_to_string(sb.config_file()).unwrap();
    assert!(contents.contains("custom-data"), "config: {contents}");
    assert!(contents.contains("llm -q"), "config: {contents}");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(sb.config_file()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let err = stderr_failed(sb.run(&["init"]));
    assert!(err.contains("already exists"), "unexpected error: {err}");
    stdout_ok(sb.run(&["init", "--force"]));
}

#[test]
fn config_file_data_dir_applies_without_env() {
    let sb = Sandbox::new();
    let custom = sb.tmp.path().join("from-config");
    stdout_ok(sb.run(&["init", "--data-dir", custom.to_str().unwrap()]));

    let output = sb
        .command(&["project", "create", "p1", "--goal", "g"])
        .env_remove("FOREST_DATA_DIR")
        .output()
        .unwrap();
    stdout_ok(output);

    assert!(custom.join("p1").join("config.json").exists());
    assert!(!sb.data_dir().join("p1").exists());
}
