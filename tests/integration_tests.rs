//! Integration tests for the appforge CLI.
//!
//! These exercise the binary surface: argument parsing and the
//! configuration errors a misconfigured environment produces. Nothing
//! here talks to a model, GitHub, or Google Cloud.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const REQUIRED_ENV: [(&str, &str); 6] = [
    ("ANTHROPIC_API_KEY", "sk-test"),
    ("MODEL_API_URL", "https://model.example/v1/messages"),
    ("GITHUB_PAT", "ghp_test"),
    ("GITHUB_REPO_URL", "https://github.com/demo/apps"),
    ("GCP_PROJECT_ID", "demo-project"),
    ("GCS_BUCKET_NAME", "demo-artifacts"),
];

/// Helper to create an appforge Command with a clean environment.
///
/// The working directory is a fresh temp dir so no stray `.env` file
/// leaks configuration into the test.
fn appforge(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("appforge");
    cmd.current_dir(dir.path()).env_clear();
    cmd
}

fn with_required_env(cmd: &mut Command) -> &mut Command {
    for (name, value) in REQUIRED_ENV {
        cmd.env(name, value);
    }
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_appforge_help() {
        let dir = TempDir::new().unwrap();
        appforge(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("generate"));
    }

    #[test]
    fn test_appforge_version() {
        let dir = TempDir::new().unwrap();
        appforge(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_generate_requires_prompt() {
        let dir = TempDir::new().unwrap();
        appforge(&dir).arg("generate").assert().failure();
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        let dir = TempDir::new().unwrap();
        appforge(&dir).arg("deploy").assert().failure();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_generate_without_config_lists_missing_vars() {
        let dir = TempDir::new().unwrap();
        appforge(&dir)
            .arg("generate")
            .arg("a counter app")
            .assert()
            .failure()
            .stderr(predicate::str::contains(
                "Missing required environment variables",
            ))
            .stderr(predicate::str::contains("ANTHROPIC_API_KEY"))
            .stderr(predicate::str::contains("GCS_BUCKET_NAME"));
    }

    #[test]
    fn test_missing_var_report_names_only_the_missing() {
        let dir = TempDir::new().unwrap();
        let mut cmd = appforge(&dir);
        with_required_env(&mut cmd);
        cmd.env_remove("GITHUB_PAT");

        cmd.arg("generate")
            .arg("a counter app")
            .assert()
            .failure()
            .stderr(predicate::str::contains("GITHUB_PAT"))
            .stderr(predicate::str::contains("ANTHROPIC_API_KEY").not());
    }

    #[test]
    fn test_serve_without_config_fails_before_binding() {
        let dir = TempDir::new().unwrap();
        appforge(&dir)
            .arg("serve")
            .assert()
            .failure()
            .stderr(predicate::str::contains(
                "Missing required environment variables",
            ));
    }

    #[test]
    fn test_unparsable_port_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut cmd = appforge(&dir);
        with_required_env(&mut cmd);
        cmd.env("PORT", "not-a-port");

        cmd.arg("serve")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid value for PORT"));
    }

    #[test]
    fn test_non_github_repo_url_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut cmd = appforge(&dir);
        with_required_env(&mut cmd);
        cmd.env("GITHUB_REPO_URL", "https://gitlab.example/demo/apps");

        cmd.arg("generate")
            .arg("a counter app")
            .assert()
            .failure()
            .stderr(predicate::str::contains("GITHUB_REPO_URL"));
    }
}
