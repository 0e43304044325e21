//! Smoke tests -- verify the binary runs and key subcommands work end to end.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn airpulse() -> Command {
    let mut cmd = Command::cargo_bin("airpulse").unwrap();
    cmd.env_remove("AIRPULSE_CONFIG").env_remove("RUST_LOG");
    cmd
}

/// Config file pointing the store at a throwaway database.
fn temp_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let db = dir.path().join("airpulse.db");
    let path = dir.path().join("airpulse.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[storage]\ndb_path = {:?}", db.to_str().unwrap()).unwrap();
    path
}

#[test]
fn test_cli_help() {
    airpulse()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Air-quality dashboard daemon"));
}

#[test]
fn test_cli_version() {
    airpulse()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("airpulse"));
}

#[test]
fn test_serve_subcommand_exists() {
    airpulse().args(["serve", "--help"]).assert().success();
}

#[test]
fn test_classify_fast_connection() {
    airpulse()
        .args(["classify", "--online", "true", "--effective-type", "4g", "--downlink", "15", "--rtt", "50"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Tier:             high"))
        .stdout(predicates::str::contains("15000 ms"));
}

#[test]
fn test_classify_offline_json() {
    airpulse()
        .args(["classify", "--online", "false", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"tier\": \"offline\""))
        .stdout(predicates::str::contains("\"polling_interval_ms\": 0"));
}

#[test]
fn test_classify_rejects_unknown_effective_type() {
    airpulse()
        .args(["classify", "--effective-type", "5g"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("5g"));
}

#[test]
fn test_config_prints_defaults() {
    airpulse()
        .arg("config")
        .assert()
        .success()
        .stdout(predicates::str::contains("bind = \"0.0.0.0:8080\""))
        .stdout(predicates::str::contains("[scheduler]"));
}

#[test]
fn test_snapshot_import_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(&dir);

    airpulse()
        .arg("--config")
        .arg(&config)
        .args(["snapshot", "show"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No readings stored."));

    let readings = dir.path().join("readings.json");
    std::fs::write(
        &readings,
        r#"[
            {"aqi": 40, "temperature": 20.0, "humidity": 50.0, "windSpeed": 8.0, "windDirection": "N",
             "visibility": 10.0, "pollutants": {"pm25": 9.0, "pm10": 18.0, "o3": 35.0, "no2": 10.0, "so2": 2.0, "co": 0.2}},
            {"aqi": 160, "temperature": 24.0, "humidity": 40.0, "windSpeed": 3.0, "windDirection": "S",
             "visibility": 4.0, "pollutants": {"pm25": 70.0, "pm10": 110.0, "o3": 90.0, "no2": 45.0, "so2": 12.0, "co": 1.4}}
        ]"#,
    )
    .unwrap();

    airpulse()
        .arg("--config")
        .arg(&config)
        .args(["snapshot", "import"])
        .arg(&readings)
        .assert()
        .success()
        .stdout(predicates::str::contains("Imported 2 reading(s); current AQI 160 (Unhealthy)"));

    airpulse()
        .arg("--config")
        .arg(&config)
        .args(["snapshot", "show", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"currentAQI\": 160"))
        .stdout(predicates::str::contains("\"historicalData\"").and(predicates::str::contains("\"aqi\": 40")));
}

#[test]
fn test_unreadable_config_fallback_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[api\nbind = ").unwrap();

    airpulse()
        .env("AIRPULSE_CONFIG", &path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicates::str::contains("[api]"))
        .stderr(predicates::str::contains("could not be loaded"));
}
