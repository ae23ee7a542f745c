use flate2::Compression;
use flate2::write::GzEncoder;
use hmm_em::io::obs::{parse_observations, read_observations};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
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

#[test]
fn read_plain_observations() {
    let path = unique_temp_path("hmm_obs", "data");
    let content = "# header comment\n-2.0341 -2.4199\n -2.5556  -4.2256\n\n1.5e-1\t3.0\n";
    fs::write(&path, content).expect("failed to write test data");

    let x = read_observations(&path).expect("failed to parse observations");
    assert_eq!(x.shape(), &[3, 2]);
    assert_eq!(x[[0, 0]], -2.0341);
    assert_eq!(x[[1, 1]], -4.2256);
    assert_eq!(x[[2, 0]], 0.15);

    let _ = fs::remove_file(path);
}

#[test]
fn read_gz_observations_works() {
    let path = unique_temp_path("hmm_obs_gz", "data.gz");
    let file = fs::File::create(&path).expect("failed to create gz path");
    let mut writer = GzEncoder::new(file, Compression::default());
    writer.write_all(b"1 2\n3 4\n").expect("failed to write gz data");
    writer.finish().expect("failed to finish gzip stream");

    let x = read_observations(&path).expect("failed to parse gz observations");
    assert_eq!(x.shape(), &[2, 2]);
    assert_eq!(x[[1, 0]], 3.0);

    let _ = fs::remove_file(path);
}

#[test]
fn ragged_or_garbled_rows_are_rejected() {
    let err = parse_observations("1 2\n3\n").expect_err("ragged rows must fail");
    assert!(err.to_string().contains("line 2 has 1 columns, expected 2"));
    assert!(parse_observations("1 x\n").is_err());
    assert!(parse_observations("1 inf\n").is_err());
    assert!(parse_observations("# only comments\n\n").is_err());
}

#[test]
fn missing_file_reports_path() {
    let path = unique_temp_path("hmm_obs_missing", "data");
    let err = read_observations(&path).expect_err("missing file must fail");
    assert!(format!("{err:#}").contains("failed to open"));
}
