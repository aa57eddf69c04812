//! Integration tests for the `cconartist` CLI binary.

use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

struct TestContext {
    _dir: TempDir,
    home: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let home = dir.path().join(".cconartist");
        std::fs::create_dir_all(&home).expect("Failed to create home");
        Self { _dir: dir, home }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cconartist"));
        cmd.env("HOME", self.home.parent().expect("home has a parent"));
        cmd.env("CCONARTIST_HOME", &self.home);
        cmd.env_remove("CCONARTIST_CONFIG");
        cmd.current_dir(&self.home);
        cmd
    }

    fn write_config(&self, json: &str) -> PathBuf {
        let path = self.home.join("config.json");
        std::fs::write(&path, json).expect("Failed to write config");
        path
    }
}

const CONFIG: &str = r#"{
    "servers": [
        { "name": "discovery", "type": "udp", "port": 31370, "decoders": ["discovery"] },
        { "name": "sensors", "type": "udp", "port": 31371, "decoders": ["sensor"] },
        { "name": "plugs", "type": "tcp", "port": 31373, "decoders": ["geekopen"] }
    ],
    "storage": { "streams_dir": "streams", "mappings": "mappings.txt" }
}"#;

#[test]
fn test_help() {
    let ctx = TestContext::new();
    let output = ctx.cmd().arg("--help").output().expect("Failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("streams"));
}

#[test]
fn test_version() {
    let ctx = TestContext::new();
    let output = ctx.cmd().arg("--version").output().expect("Failed to run");
    assert!(output.status.success());
}

#[test]
fn test_config_check() {
    let ctx = TestContext::new();
    ctx.write_config(CONFIG);
    let output = ctx.cmd().args(["config", "check"]).output().expect("Failed to run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("31373"));
    assert!(stdout.contains("is valid"));
}

#[test]
fn test_config_check_rejects_unknown_decoder() {
    let ctx = TestContext::new();
    let path = ctx.write_config(&CONFIG.replace("\"geekopen\"", "\"plugin\""));
    let output = ctx
        .cmd()
        .args(["--config", path.to_str().unwrap(), "config", "check"])
        .output()
        .expect("Failed to run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown decoder 'plugin'"));
}

#[test]
fn test_config_check_missing_file() {
    let ctx = TestContext::new();
    let output = ctx.cmd().args(["config", "check"]).output().expect("Failed to run");
    assert!(!output.status.success());
}

#[test]
fn test_graph_builtin_manifest() {
    let ctx = TestContext::new();
    let output = ctx.cmd().arg("graph").output().expect("Failed to run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cconartist_app"));
    assert!(stdout.contains("capp"));

    let output = ctx
        .cmd()
        .args(["graph", "--target", "cconartist_app"])
        .output()
        .expect("Failed to run");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("cjson:main-lib"));
}

#[test]
fn test_graph_rejects_test_lib_in_app() {
    let ctx = TestContext::new();
    let manifest = ctx.home.join("bad.toml");
    std::fs::write(
        &manifest,
        r#"
        [package]
        name = "app"
        path = "x"

        [[dependency]]
        name = "ccore"

        [[target]]
        name = "app"
        kind = "desktop-app"
        depends = ["ccore:test-lib"]
        "#,
    )
    .unwrap();
    let output = ctx
        .cmd()
        .args(["graph", "--manifest", manifest.to_str().unwrap()])
        .output()
        .expect("Failed to run");
    assert!(!output.status.success());
}

#[test]
fn test_mappings_and_streams_commands() {
    let ctx = TestContext::new();
    ctx.write_config(CONFIG);
    std::fs::write(ctx.home.join("mappings.txt"), "00:11:22:33:44:55=office\n").unwrap();
    std::fs::create_dir_all(ctx.home.join("streams")).unwrap();

    let output = ctx.cmd().args(["mappings", "check"]).output().expect("Failed to run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("office"));

    let output = ctx.cmd().args(["streams", "list"]).output().expect("Failed to run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("No streams"));
}
