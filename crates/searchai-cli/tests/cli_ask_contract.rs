use assert_cmd::Command;
use predicates::prelude::*;

fn searchai() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("searchai"));
    // Hermetic: no inherited keys, no browser.
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("SEARCHAI_OPENAI_API_KEY")
        .env("SEARCHAI_RENDER_DISABLE", "1")
        .env("RUST_LOG", "error");
    cmd
}

#[test]
fn blank_query_exits_non_zero_before_any_work() {
    searchai()
        .args(["ask", "   "])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn missing_query_is_a_usage_error() {
    searchai().args(["ask"]).assert().failure();
}

#[test]
fn missing_api_key_is_reported_without_leaking_anything() {
    searchai()
        .args(["ask", "what", "is", "rust"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key"));
}

#[test]
fn browser_disabled_is_not_configured() {
    searchai()
        .args(["ask", "rust", "--api-key", "sk-test-not-a-real-key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SEARCHAI_RENDER_DISABLE"))
        .stderr(predicate::str::contains("sk-test-not-a-real-key").not());
}

#[test]
fn invalid_chunk_overlap_is_rejected() {
    searchai()
        .args([
            "ask",
            "rust",
            "--api-key",
            "sk-test",
            "--chunk-size",
            "10",
            "--chunk-overlap",
            "10",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("overlap"));
}

#[test]
fn failures_are_logged_to_stderr() {
    searchai()
        .args(["--no-color", "ask", "rust", "--api-key", "sk-test-not-a-real-key"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("ask failed"))
        .stderr(predicate::str::contains("upstream=false"));
}

#[test]
fn verbose_logging_keeps_the_key_redacted() {
    searchai()
        .args(["-v", "--no-color", "ask", "rust", "--api-key", "sk-test-not-a-real-key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DEBUG"))
        .stderr(predicate::str::contains("sk-test-not-a-real-key").not());
}
