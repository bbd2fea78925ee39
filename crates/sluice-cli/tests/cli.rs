//! Integration tests for the `sluice` binary.

use serial_test::serial;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::{tempdir, TempDir};

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-p", "sluice-cli", "--bin", "sluice", "--"]);
    cmd.env_remove("SLUICE_MODE");
    cmd
}

fn sluice(cwd: &Path, args: &[&str]) -> Output {
    cargo_bin()
        .arg("--cwd")
        .arg(cwd)
        .args(args)
        .output()
        .expect("Failed to run sluice")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("stdout should be JSON ({e}): {stdout}"))
}

/// Stderr without cargo's own progress lines.
fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .filter(|l| !l.contains("Compiling") && !l.contains("Finished") && !l.contains("Running"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A project with the default layout and no dependencies.
fn project() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path().join("internal/ts-client");
    fs::create_dir_all(&root).unwrap();
    fs::write(
        root.join("client.ts"),
        "import './tailwind.css';\n\nexport function init(root: HTMLElement): void {\n  root.dataset.ready = 'true';\n}\n",
    )
    .unwrap();
    fs::write(root.join("tailwind.css"), ".ready { display: block; }\n").unwrap();
    dir
}

#[test]
fn test_version() {
    let output = cargo_bin().arg("version").output().expect("Failed to run sluice");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("sluice "), "{stdout}");
}

#[test]
fn test_config_json_defaults() {
    let dir = tempdir().unwrap();
    let output = sluice(dir.path(), &["--json", "config"]);
    assert!(output.status.success(), "{}", stderr_text(&output));

    let json = stdout_json(&output);
    assert_eq!(json["mode"], "development");
    assert_eq!(json["build"]["minify"], false);
    assert_eq!(json["build"]["sourcemap"], false);
    assert_eq!(json["build"]["lib"]["name"], "client");
    assert_eq!(json["server"]["port"], 8081);
    assert_eq!(json["server"]["strict_port"], true);
    assert_eq!(json["server"]["proxy"][0]["prefix"], "/api");
    assert_eq!(json["server"]["proxy"][0]["target"], "http://localhost:8080/");
}

#[test]
fn test_mode_from_env() {
    let dir = tempdir().unwrap();
    let output = cargo_bin()
        .env("SLUICE_MODE", "production")
        .arg("--cwd")
        .arg(dir.path())
        .args(["--json", "config"])
        .output()
        .expect("Failed to run sluice");
    assert!(output.status.success(), "{}", stderr_text(&output));

    let json = stdout_json(&output);
    assert_eq!(json["mode"], "production");
    assert_eq!(json["build"]["minify"], true);
    assert_eq!(json["build"]["sourcemap"], true);
}

#[test]
fn test_unknown_mode() {
    let dir = tempdir().unwrap();

    let strict = sluice(dir.path(), &["--mode", "staging", "config"]);
    assert!(!strict.status.success());
    assert!(
        stderr_text(&strict).contains("CONFIG_UNKNOWN_MODE"),
        "{}",
        stderr_text(&strict)
    );

    let lenient = sluice(
        dir.path(),
        &["--mode", "staging", "--allow-unknown-mode", "--json", "config"],
    );
    assert!(lenient.status.success(), "{}", stderr_text(&lenient));
    let json = stdout_json(&lenient);
    assert_eq!(json["mode"], "development");
    assert_eq!(json["build"]["minify"], false);
}

#[test]
fn test_config_file_overrides_defaults() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("sluice.config.js"),
        r#"import { defineConfig } from 'sluice';

export default defineConfig({
  server: {
    port: 9000,
    proxy: {
      '/graphql': { target: 'http://127.0.0.1:4000', changeOrigin: true },
    },
  },
});
"#,
    )
    .unwrap();

    let output = sluice(dir.path(), &["--json", "config"]);
    assert!(output.status.success(), "{}", stderr_text(&output));

    let json = stdout_json(&output);
    assert_eq!(json["server"]["port"], 9000);
    let proxy = json["server"]["proxy"].as_array().unwrap();
    assert_eq!(proxy.len(), 1);
    assert_eq!(proxy[0]["prefix"], "/graphql");
    assert_eq!(proxy[0]["change_origin"], true);
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = tempdir().unwrap();
    let output = sluice(dir.path(), &["--config", "nope.config.js", "config"]);
    assert!(!output.status.success());
    assert!(stderr_text(&output).contains("CONFIG_"), "{}", stderr_text(&output));
}

#[test]
fn test_build_json() {
    let dir = project();
    let output = sluice(dir.path(), &["--json", "build"]);
    assert!(output.status.success(), "{}", stderr_text(&output));

    let json = stdout_json(&output);
    assert_eq!(json["ok"], true);
    assert_eq!(json["mode"], "production");

    let mut names: Vec<&str> = json["artifacts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "client.css",
            "client.js",
            "client.js.map",
            "client.umd.cjs",
            "client.umd.cjs.map"
        ]
    );

    let out = dir.path().join("internal/static/build");
    for name in names {
        assert!(out.join(name).is_file(), "missing {name}");
    }
}

#[test]
fn test_build_development_mode() {
    let dir = project();
    let output = sluice(dir.path(), &["--mode", "development", "build"]);
    assert!(output.status.success(), "{}", stderr_text(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(development)"), "{stdout}");

    let out = dir.path().join("internal/static/build");
    assert!(out.join("client.js").is_file());
    assert!(!out.join("client.js.map").exists());
}

#[test]
fn test_build_missing_entry_fails() {
    let dir = tempdir().unwrap();

    let output = sluice(dir.path(), &["--json", "build"]);
    assert!(!output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "BUILD_ENTRY_NOT_FOUND");

    let human = sluice(dir.path(), &["build"]);
    assert!(!human.status.success());
    assert!(
        stderr_text(&human).contains("BUILD_ENTRY_NOT_FOUND"),
        "{}",
        stderr_text(&human)
    );
    assert!(!dir.path().join("internal/static/build").exists());
}

#[test]
fn test_watch_and_json_conflict() {
    let dir = project();
    let output = sluice(dir.path(), &["--json", "build", "--watch"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr_text(&output).contains("--watch and --json cannot be combined"));
}

#[test]
#[serial]
fn test_dev_strict_port_conflict_fails() {
    let dir = project();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port().to_string();

    let output = sluice(
        dir.path(),
        &["dev", "--host", "127.0.0.1", "--port", &port],
    );
    assert!(!output.status.success());
    assert!(
        stderr_text(&output).contains("DEV_PORT_UNAVAILABLE"),
        "{}",
        stderr_text(&output)
    );
    drop(taken);
}
