use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn action(args: &[&str], workdir: &Path, output_file: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_security-review-action"))
        .env_clear()
        .env("PATH", std::env::var_os("PATH").unwrap_or_default())
        .env("GITHUB_OUTPUT", output_file)
        .current_dir(workdir)
        .args(args)
        .output()
        .expect("run security-review-action")
}

#[test]
fn missing_jbai_token_exits_non_zero() {
    let dir = tempdir().expect("temp dir");
    let output_file = dir.path().join("github_output");

    let output = action(&[], dir.path(), &output_file);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("jbai-token is required"), "stderr: {stderr}");
}

#[cfg(unix)]
fn fake_runtime(dir: &Path, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-java");
    fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write runtime");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod runtime");
    script
}

#[cfg(unix)]
#[test]
fn successful_analysis_publishes_sarif_output() {
    let dir = tempdir().expect("temp dir");
    let result_dir = dir.path().join("out");
    fs::create_dir_all(&result_dir).expect("create result dir");
    let jar = dir.path().join("analysis.jar");
    fs::write(&jar, b"PK").expect("write jar");
    let runtime = fake_runtime(
        dir.path(),
        r#"for arg in "$@"; do
  case "$arg" in
    --result=*) dir="${arg#--result=}" ;;
  esac
done
printf '{"version":"2.1.0","runs":[]}' > "$dir/security-review.sarif""#,
    );
    let output_file = dir.path().join("github_output");

    let output = action(
        &[
            "--jbai-token",
            "secret-token",
            "--result-path",
            result_dir.to_str().expect("utf-8 path"),
            "--tool-path",
            jar.to_str().expect("utf-8 path"),
            "--runtime",
            runtime.to_str().expect("utf-8 path"),
        ],
        dir.path(),
        &output_file,
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(!stderr.contains("secret-token"));
    let published = fs::read_to_string(&output_file).expect("read output file");
    assert_eq!(
        published,
        format!(
            "sarif-file={}\n",
            result_dir.join("security-review.sarif").display()
        )
    );
}

#[cfg(unix)]
#[test]
fn failing_analysis_exits_non_zero() {
    let dir = tempdir().expect("temp dir");
    let jar = dir.path().join("analysis.jar");
    fs::write(&jar, b"PK").expect("write jar");
    let runtime = fake_runtime(dir.path(), "exit 3");
    let output_file = dir.path().join("github_output");

    let output = action(
        &[
            "--jbai-token",
            "secret-token",
            "--tool-path",
            jar.to_str().expect("utf-8 path"),
            "--runtime",
            runtime.to_str().expect("utf-8 path"),
        ],
        dir.path(),
        &output_file,
    );

    assert!(!output.status.success());
    assert!(!output_file.exists());
}

#[cfg(unix)]
#[test]
fn token_reaches_analyzer_through_environment_only() {
    let dir = tempdir().expect("temp dir");
    let result_dir = dir.path().join("out");
    fs::create_dir_all(&result_dir).expect("create result dir");
    let jar = dir.path().join("analysis.jar");
    fs::write(&jar, b"PK").expect("write jar");
    let runtime = fake_runtime(
        dir.path(),
        r#"[ "$JBAI_TOKEN" = "secret-token" ] || exit 7
[ "$JBAI_ENVIRONMENT" = "production" ] || exit 8
case "$*" in
  *secret-token*) exit 9 ;;
esac
for arg in "$@"; do
  case "$arg" in
    --result=*) dir="${arg#--result=}" ;;
  esac
done
printf '{"version":"2.1.0","runs":[]}' > "$dir/security-review.sarif""#,
    );
    let output_file = dir.path().join("github_output");

    let output = action(
        &[
            "--jbai-token",
            "secret-token",
            "--jbai-environment",
            "production",
            "--result-path",
            result_dir.to_str().expect("utf-8 path"),
            "--tool-path",
            jar.to_str().expect("utf-8 path"),
            "--runtime",
            runtime.to_str().expect("utf-8 path"),
        ],
        dir.path(),
        &output_file,
    );

    assert!(
        output.status.success(),
        "status: {:?}, stderr: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
}
