use std::{fs, path::PathBuf};

use tapegate::{config::LogFormat, context::GatewayContext};
use tempfile::tempdir;

#[test]
fn bundled_example_config_loads_with_fixture_key() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("configs")
        .join("tapegate.example.toml");

    let (config, context) = GatewayContext::load(&path).expect("example config should load");

    assert_eq!(config.signing.kid, "tapegate-key-1");
    assert_eq!(
        config.logging.as_ref().and_then(|logging| logging.format),
        Some(LogFormat::Pretty)
    );
    assert_eq!(context.signing_key.kid(), "tapegate-key-1");
    assert_eq!(
        context.endpoints.issuer(),
        "http://localhost:8080/oauth2/default"
    );
    assert_eq!(context.playback.userinfo_access_token, None);
}

#[test]
fn non_pem_signing_key_is_rejected() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("key.pem"), "not a key").unwrap();
    let config = dir.path().join("tapegate.toml");
    fs::write(
        &config,
        r#"
[endpoints]
proxy = "http://localhost:8080"
proxied = "https://dev-123456.okta.com"
cdn = "https://ok12static.oktacdn.com"

[signing]
private_key_path = "key.pem"
kid = "k"
"#,
    )
    .unwrap();

    let err = GatewayContext::load(&config).unwrap_err();
    assert!(
        format!("{err:#}").contains("load signing key"),
        "unexpected error: {err:#}"
    );
}
