use serde_json::Value;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{}_{}.{}", std::process::id(), nanos, ext));
    path
}

fn find_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hmm-em"))
}

fn regime_text(n: usize, phase: f64) -> String {
    let mut out = String::new();
    for t in 0..n {
        let c = if (t / 15) % 2 == 0 { -2.0 } else { 2.0 };
        let a = c + ((t as f64 + phase) * 1.3).sin() * 0.5;
        let b = c + ((t as f64 + phase) * 2.1).cos() * 0.5;
        writeln!(out, "{a:.4} {b:.4}").expect("write to string");
    }
    out
}

#[test]
fn cli_trains_and_writes_model_and_posteriors() {
    let train = unique_temp_path("hmm_cli_train", "data");
    let test = unique_temp_path("hmm_cli_test", "data");
    let output = unique_temp_path("hmm_cli_model", "json");
    let posterior = unique_temp_path("hmm_cli_posterior", "tsv");
    let test_posterior = unique_temp_path("hmm_cli_test_posterior", "tsv");
    fs::write(&train, regime_text(90, 0.0)).expect("failed to write train data");
    fs::write(&test, regime_text(60, 0.7)).expect("failed to write test data");

    let out = Command::new(find_binary())
        .arg(&train)
        .arg(&output)
        .arg("--test")
        .arg(&test)
        .args(["--states", "2", "--n-iter", "3", "--mixture-iters", "5", "--seed", "3"])
        .arg("--posterior-out")
        .arg(&posterior)
        .arg("--test-posterior-out")
        .arg(&test_posterior)
        .arg("--no-progress")
        .output()
        .expect("failed to run hmm-em binary");
    assert!(
        out.status.success(),
        "hmm-em exited with non-zero status: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("General GMM"));
    assert!(stdout.contains("HMM"));
    assert!(stdout.contains("Marginal MAP vs Viterbi agreement (test)"));

    let text = fs::read_to_string(&output).expect("failed to read model json");
    let v: Value = serde_json::from_str(&text).expect("model json is invalid");
    assert_eq!(v["n_states"], 2);
    assert_eq!(v["loglike_train"].as_array().map(Vec::len), Some(4));
    assert_eq!(v["loglike_test"].as_array().map(Vec::len), Some(4));
    assert_eq!(v["transition"].as_array().map(Vec::len), Some(2));

    let tsv = fs::read_to_string(&posterior).expect("failed to read posterior tsv");
    assert!(tsv.starts_with("t\tx0\tx1\tviterbi_state\tmap_state\tp0\tp1"));
    assert_eq!(tsv.lines().count(), 91);

    let test_tsv = fs::read_to_string(&test_posterior).expect("failed to read test posterior tsv");
    assert!(test_tsv.starts_with("t\tx0\tx1\tviterbi_state\tmap_state\tp0\tp1"));
    assert_eq!(test_tsv.lines().count(), 61);

    for p in [train, test, output, posterior, test_posterior] {
        let _ = fs::remove_file(p);
    }
}

#[test]
fn cli_rejects_zero_states() {
    let train = unique_temp_path("hmm_cli_zero", "data");
    let output = unique_temp_path("hmm_cli_zero_model", "json");
    fs::write(&train, regime_text(10, 0.0)).expect("failed to write train data");

    let status = Command::new(find_binary())
        .arg(&train)
        .arg(&output)
        .args(["--states", "0", "--no-progress"])
        .status()
        .expect("failed to run hmm-em binary");
    assert!(!status.success());
    assert!(!output.exists());

    let _ = fs::remove_file(train);
}

#[test]
fn cli_requires_test_data_for_test_posteriors() {
    let train = unique_temp_path("hmm_cli_no_test", "data");
    let output = unique_temp_path("hmm_cli_no_test_model", "json");
    let test_posterior = unique_temp_path("hmm_cli_no_test_posterior", "tsv");
    fs::write(&train, regime_text(20, 0.0)).expect("failed to write train data");

    let status = Command::new(find_binary())
        .arg(&train)
        .arg(&output)
        .arg("--test-posterior-out")
        .arg(&test_posterior)
        .args(["--states", "2", "--no-progress"])
        .status()
        .expect("failed to run hmm-em binary");
    assert!(!status.success());
    assert!(!test_posterior.exists());

    let _ = fs::remove_file(train);
}

#[test]
fn rust_log_controls_crate_log_level() {
    let train = unique_temp_path("hmm_cli_log", "data");
    let output = unique_temp_path("hmm_cli_log_model", "json");
    fs::write(&train, regime_text(40, 0.0)).expect("failed to write train data");

    let run = |filter: &str| {
        let out = Command::new(find_binary())
            .env("RUST_LOG", filter)
            .arg(&train)
            .arg(&output)
            .args(["--states", "2", "--n-iter", "2", "--mixture-iters", "2", "--no-progress"])
            .output()
            .expect("failed to run hmm-em binary");
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stderr)
            .lines()
            .filter(|l| l.contains("HMM EM iteration"))
            .count()
    };
    assert_eq!(run("hmm_em=debug"), 2);
    assert_eq!(run("hmm_em=warn"), 0);

    let _ = fs::remove_file(train);
    let _ = fs::remove_file(output);
}
