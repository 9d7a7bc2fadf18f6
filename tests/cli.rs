use std::{fs, path::Path, process::Command};

use serde_json::{Value, json};
use tempfile::tempdir;

const GATEWAY_KEY_PEM: &str = include_str!("fixtures/gateway_key.pem");

fn write_config(dir: &Path) -> std::path::PathBuf {
    fs::write(dir.join("gateway.pem"), GATEWAY_KEY_PEM).unwrap();
    let config = dir.join("tapegate.toml");
    fs::write(
        &config,
        r#"
[endpoints]
proxy = "http://localhost:8080"
proxied = "https://dev-123456.okta.com"
cdn = "https://ok12static.oktacdn.com"

[signing]
private_key_path = "gateway.pem"
kid = "gateway-kid"

[logging]
level = "warn"
"#,
    )
    .unwrap();
    config
}

fn tapegate(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tapegate"))
        .args(args)
        .output()
        .expect("tapegate binary should run")
}

#[test]
fn normalize_command_prints_canonical_request() {
    let dir = tempdir().expect("tempdir should be created");
    let config = write_config(dir.path());
    let request = dir.path().join("request.json");
    fs::write(
        &request,
        json!({
            "method": "GET",
            "url": "/oauth2/default/v1/authorize?scope=openid%20email&state=s1&nonce=n1",
            "headers": [["Accept", "text/html"], ["Referer", "http://localhost:3000/"]],
        })
        .to_string(),
    )
    .unwrap();

    let output = tapegate(&[
        "normalize",
        "--config",
        config.to_str().unwrap(),
        "--request",
        request.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let printed: Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(
        printed["request"]["url"],
        "/oauth2/default/v1/authorize?scope=email%20openid&state=STATE&nonce=NONCE"
    );
    let headers = printed["request"]["headers"].as_array().unwrap();
    assert!(!headers.iter().any(|pair| pair[0] == "referer"));
    assert_eq!(printed["session"]["state"], "s1");
}

#[test]
fn diffs_flag_logs_header_tables() {
    let dir = tempdir().expect("tempdir should be created");
    let config = write_config(dir.path());
    let request = dir.path().join("request.json");
    fs::write(
        &request,
        json!({"method": "GET", "url": "/app/home", "headers": [["referer", "x"]]}).to_string(),
    )
    .unwrap();
    let args = [
        "normalize",
        "--config",
        config.to_str().unwrap(),
        "--request",
        request.to_str().unwrap(),
    ];

    let quiet = tapegate(&args);
    assert!(quiet.status.success());
    assert!(!String::from_utf8_lossy(&quiet.stderr).contains("tapegate::diff"));

    let with_diffs = tapegate(&[&args[..], &["--diffs"][..]].concat());
    assert!(with_diffs.status.success());
    let stderr = String::from_utf8_lossy(&with_diffs.stderr);
    assert!(stderr.contains("tapegate::diff"), "stderr: {stderr}");
    assert!(stderr.contains("header diff"), "stderr: {stderr}");
}

fn reconstruct_without_tokens(mode_flag: Option<&str>) -> String {
    let dir = tempdir().expect("tempdir should be created");
    let config = write_config(dir.path());
    let response = dir.path().join("response.json");
    let session = dir.path().join("session.json");
    fs::write(
        &response,
        json!({
            "headers": [["content-type", "application/json"]],
            "body": "{\"token_type\":\"Bearer\"}",
        })
        .to_string(),
    )
    .unwrap();
    fs::write(&session, json!({"flow": "token", "nonce": "n1"}).to_string()).unwrap();

    let mut args = vec![
        "reconstruct",
        "--config",
        config.to_str().unwrap(),
        "--response",
        response.to_str().unwrap(),
        "--session",
        session.to_str().unwrap(),
    ];
    args.extend(mode_flag);
    let output = tapegate(&args);
    assert!(!output.status.success());
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn reconstruct_command_reports_missing_id_token_when_recording() {
    let stderr = reconstruct_without_tokens(Some("--record"));
    assert!(stderr.contains("`id_token`"), "stderr: {stderr}");
}

#[test]
fn reconstruct_command_reports_missing_access_token_in_playback() {
    let stderr = reconstruct_without_tokens(None);
    assert!(stderr.contains("`access_token`"), "stderr: {stderr}");
}

#[test]
fn missing_config_is_reported() {
    let dir = tempdir().expect("tempdir should be created");
    let output = tapegate(&[
        "normalize",
        "--config",
        dir.path().join("absent.toml").to_str().unwrap(),
        "--request",
        "request.json",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("read config"), "stderr: {stderr}");
}
