use std::process::Command;

fn run(fixture: &str) -> (String, String, bool) {
    let path = format!("tests/fixtures/{fixture}");
    let output = Command::new(env!("CARGO_BIN_EXE_escrow-eng"))
        .arg(&path)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn valid_scenario_with_duplicate_settlements() {
    let (stdout, stderr, success) = run("valid.csv");

    assert!(success);
    assert!(stderr.is_empty());

    let mut lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "user,balance,frozen,available");
    lines.remove(0);
    lines.sort();
    // Duplicate settle deliveries apply once: 500 in, 200 out.
    assert_eq!(lines[0], "1,300.0000,0.0000,300.0000");
    assert_eq!(lines[1], "2,250.0000,0.0000,250.0000");
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv");

    assert!(success);
    assert!(stderr.contains("unrecognized op"));
    assert!(stderr.contains("missing amount"));
    assert!(stderr.contains("withdrawal skipped"));
    assert!(stderr.contains("no transfer bound"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "user,balance,frozen,available");
    assert_eq!(lines[1], "1,500.0000,0.0000,500.0000");
}
