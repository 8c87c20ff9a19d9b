use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::str;

const ENV_VARS: &[&str] = &[
    "GEOLOCATION_CONFIG",
    "GEOLOCATION_DRIVER",
    "GEOLOCATION_FALLBACK_DRIVER",
    "GEOLOCATION_CACHE_ENABLED",
    "GEOLOCATION_CACHE_STORE",
    "GEOLOCATION_CACHE_TTL",
    "IPLOCATE_KEY",
    "IPAPI_KEY",
    "IPAPICO_KEY",
    "MAXMIND_DATABASE_PATH",
    "RUST_LOG",
];

/// A geolocate command isolated from the caller's environment.
fn geolocate() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("geolocate").unwrap();
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.arg("--color").arg("never");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().expect("failed to execute");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    str::from_utf8(&output.stdout)
        .expect("Failed to read stdout as UTF-8")
        .to_string()
}

fn stderr_of_failure(cmd: &mut Command) -> String {
    let output = cmd.output().expect("failed to execute");
    assert!(!output.status.success(), "command unexpectedly succeeded");
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn locate_json(cmd: &mut Command) -> Value {
    serde_json::from_str(&stdout_of(cmd)).expect("stdout is JSON")
}

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("geolocation.toml");
    fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

/// Table output of the static driver
#[test]
fn locate_table() {
    let out = stdout_of(geolocate().args(["--driver", "null", "locate", "8.8.8.8"]));

    let rows: Vec<Vec<&str>> = out
        .lines()
        .map(|line| line.split_whitespace().collect())
        .collect();
    assert_eq!(rows[0], ["Key", "Value"]);
    assert!(rows.contains(&vec!["ip", "8.8.8.8"]));
    assert!(rows.contains(&vec!["iso_code", "ZZ"]));
    assert!(rows.contains(&vec!["city", "N/A"]));
    assert!(rows.contains(&vec!["from_cache", "false"]));
}

#[test]
fn locate_json_output() {
    let json = locate_json(geolocate().args(["--driver", "null", "locate", "1.1.1.1", "--json"]));
    assert_eq!(json["ip"], "1.1.1.1");
    assert_eq!(json["country"], "Unknown");
    assert_eq!(json["asn_number"], "0");
    assert_eq!(json["city"], Value::Null);
    assert_eq!(json["from_cache"], false);
}

#[test]
fn driver_from_environment() {
    let json = locate_json(
        geolocate()
            .env("GEOLOCATION_DRIVER", "null")
            .args(["locate", "9.9.9.9", "--json"]),
    );
    assert_eq!(json["timezone"], "UTC");
}

/// Private addresses never reach a driver
#[test]
fn private_address_is_rejected() {
    let err = stderr_of_failure(geolocate().args(["--driver", "null", "locate", "10.0.0.1"]));
    assert!(err.contains("private or reserved"), "{}", err);
    assert!(err.contains("private-use 10.0.0.0/8"), "{}", err);
}

#[test]
fn malformed_address_is_rejected() {
    let err = stderr_of_failure(geolocate().args(["--driver", "null", "locate", "not.an.ip"]));
    assert!(err.contains("the IP address 'not.an.ip' is invalid"), "{}", err);
}

#[test]
fn invalid_log_filter_fails() {
    let err = stderr_of_failure(geolocate().args([
        "--log-level",
        "geolocate=loud",
        "--driver",
        "null",
        "locate",
        "8.8.8.8",
    ]));
    assert!(err.contains("invalid --log-level filter 'geolocate=loud'"), "{}", err);
}

#[test]
fn unknown_driver_fails() {
    let err =
        stderr_of_failure(geolocate().args(["--driver", "crystal-ball", "locate", "8.8.8.8"]));
    assert!(err.contains("unknown driver: crystal-ball"), "{}", err);
}

#[test]
fn missing_database_fails_without_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let err = stderr_of_failure(
        geolocate()
            .env("MAXMIND_DATABASE_PATH", dir.path().join("absent.mmdb"))
            .args(["--driver", "maxmind", "locate", "8.8.8.8"]),
    );
    assert!(err.contains("driver 'maxmind' is misconfigured"), "{}", err);
}

#[test]
fn fallback_rescues_broken_default() {
    let dir = tempfile::tempdir().unwrap();
    let json = locate_json(
        geolocate()
            .env("MAXMIND_DATABASE_PATH", dir.path().join("absent.mmdb"))
            .args(["--driver", "maxmind", "--fallback", "null", "locate", "8.8.8.8", "--json"]),
    );
    assert_eq!(json["iso_code"], "ZZ");
}

#[test]
fn config_file_overrides_driver_settings() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
driver = "null"

[drivers.null]
city = "Testville"
lat = 51.5074
lon = -0.1278
"#,
    );

    let json = locate_json(geolocate().args(["--config", &config, "locate", "8.8.8.8", "--json"]));
    assert_eq!(json["city"], "Testville");
    assert_eq!(json["iso_code"], "ZZ");

    let json = locate_json(
        geolocate()
            .env("GEOLOCATION_CONFIG", &config)
            .args(["locate", "8.8.4.4", "--json"]),
    );
    assert_eq!(json["city"], "Testville");
}

#[test]
fn distance_between_identical_records() {
    let out = stdout_of(geolocate().args(["--driver", "null", "distance", "8.8.8.8", "1.1.1.1"]));
    assert_eq!(out.trim(), "0.00 km");

    let out = stdout_of(geolocate().args([
        "--driver", "null", "distance", "8.8.8.8", "1.1.1.1", "--unit", "mi",
    ]));
    assert_eq!(out.trim(), "0.00 mi");
}

#[test]
fn list_drivers_marks_default_and_fallback() {
    let out = stdout_of(geolocate().args([
        "--driver",
        "null",
        "--fallback",
        "ipapi",
        "list-drivers",
    ]));
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        [
            "chain",
            "ipapi (fallback)",
            "ipapico",
            "iplocate",
            "ipquery",
            "maxmind",
            "null (default)",
        ]
    );
}

/// The file store keeps results across invocations until cleared
#[test]
fn file_cache_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("cache.json");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
driver = "null"

[cache]
enabled = true
store = "file"
path = {:?}
"#,
            cache_path.to_string_lossy()
        ),
    );
    let locate = || {
        let mut cmd = geolocate();
        cmd.args(["--config", &config, "locate", "8.8.8.8", "--json"]);
        cmd
    };

    assert_eq!(locate_json(&mut locate())["from_cache"], false);
    assert_eq!(locate_json(&mut locate())["from_cache"], true);
    assert!(cache_path.exists());

    let out = stdout_of(geolocate().args(["--config", &config, "clear-cache"]));
    assert!(out.contains("cache cleared"));
    assert_eq!(locate_json(&mut locate())["from_cache"], false);

    let bypass = locate_json(geolocate().args([
        "--config",
        &config,
        "--no-cache",
        "locate",
        "8.8.8.8",
        "--json",
    ]));
    assert_eq!(bypass["from_cache"], false);
}
