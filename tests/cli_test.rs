mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use common::{serve_http, spsp_body};
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_requires_receiver_and_amount() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("$example.com/alice");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));

    Ok(())
}

#[test]
fn test_cli_rejects_non_numeric_amount() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.args(["$example.com/alice", "lots"]);

    cmd.assert().failure();

    Ok(())
}

#[test]
fn test_cli_reports_discovery_failure() -> Result<(), Box<dyn std::error::Error>> {
    let (base, _requests) = serve_http("404 Not Found", "text/plain", "unknown receiver");
    let mut cmd = Command::new(cargo_bin!());
    cmd.args([format!("{base}/alice").as_str(), "100"])
        .env_remove("ILP_CONNECTOR_URL")
        .env_remove("ILP_AUTH_TOKEN");

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Sending payment. Paying 100"))
        .stderr(predicate::str::contains("status=404"))
        .stderr(predicate::str::contains("unknown"));

    Ok(())
}

#[test]
fn test_cli_reports_unsupported_protocol() -> Result<(), Box<dyn std::error::Error>> {
    let (base, _requests) = serve_http("200 OK", "application/spsp+json", &spsp_body());
    let mut cmd = Command::new(cargo_bin!());
    cmd.args([format!("{base}/alice").as_str(), "100"]);

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("ILP address g.test.alice"))
        .stderr(predicate::str::contains("application/spsp4+json"));

    Ok(())
}
