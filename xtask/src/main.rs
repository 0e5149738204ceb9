//! Build automation tasks for dwh-oppfolging
//!
//! - `check-release`: version, changelog and workflow consistency before a publish
//! - `generate-cli-docs`: markdown reference for the `dwh-ingest` binary

use anyhow::{bail, Context};
use clap::Parser;
use regex::Regex;
use serde_yaml::Value as Yaml;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for dwh-oppfolging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Check that the workspace is ready to be published
    CheckRelease {
        /// Workspace root
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Generate CLI documentation in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::CheckRelease { root } => check_release(&root)?,
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

// ============================================================================
// Release checks
// ============================================================================

type Version = (u64, u64, u64);

const PUSH_WORKFLOW: &str = ".github/workflows/on_push_test.yml";
const PUBLISH_WORKFLOW: &str = ".github/workflows/on_dispatch_publish.yml";
const REQUIRED_PUSH_PATHS: [&str; 2] = ["crates/**", "Cargo.toml"];

fn parse_version(text: &str) -> anyhow::Result<Version> {
    let mut parts = text.trim().split('.').map(str::parse::<u64>);
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) => Ok((major, minor, patch)),
        _ => bail!("'{text}' is not a MAJOR.MINOR.PATCH version"),
    }
}

fn workspace_version(manifest: &str) -> anyhow::Result<Version> {
    let manifest: toml::Value = toml::from_str(manifest).context("Cargo.toml is not valid TOML")?;
    let version = manifest
        .get("workspace")
        .and_then(|w| w.get("package"))
        .and_then(|p| p.get("version"))
        .and_then(toml::Value::as_str)
        .context("Cargo.toml has no workspace.package.version")?;
    parse_version(version)
}

/// Versions of the `## [x.y.z]` headings, top to bottom
fn changelog_versions(changelog: &str) -> anyhow::Result<Vec<Version>> {
    let heading = Regex::new(r"(?m)^## \[(\d+\.\d+\.\d+)\]")?;
    heading
        .captures_iter(changelog)
        .map(|c| parse_version(&c[1]))
        .collect()
}

fn check_changelog(version: Version, changelog: &[Version]) -> Vec<String> {
    let mut problems = Vec::new();
    match changelog.first() {
        None => problems.push("CHANGELOG.md has no version entries".to_string()),
        Some(newest) if *newest != version => problems.push(format!(
            "workspace version {} does not match newest changelog entry {}",
            show(version),
            show(*newest)
        )),
        Some(_) => {},
    }
    for pair in changelog.windows(2) {
        if pair[0] <= pair[1] {
            problems.push(format!(
                "changelog entry {} is listed above {} but is not newer",
                show(pair[0]),
                show(pair[1])
            ));
        }
    }
    problems
}

fn show((major, minor, patch): Version) -> String {
    format!("{major}.{minor}.{patch}")
}

fn trigger<'a>(workflow: &'a Yaml, event: &str) -> Option<&'a Yaml> {
    workflow.get("on").and_then(|on| on.get(event))
}

fn check_push_workflow(workflow: &Yaml) -> Vec<String> {
    let mut problems = Vec::new();
    for event in ["push", "pull_request"] {
        let Some(trigger) = trigger(workflow, event) else {
            problems.push(format!("{PUSH_WORKFLOW} is not triggered on {event}"));
            continue;
        };
        let paths: Vec<&str> = trigger
            .get("paths")
            .and_then(Yaml::as_sequence)
            .map(|paths| paths.iter().filter_map(Yaml::as_str).collect())
            .unwrap_or_default();
        for required in REQUIRED_PUSH_PATHS {
            if !paths.contains(&required) {
                problems.push(format!("{PUSH_WORKFLOW} {event} paths do not include '{required}'"));
            }
        }
    }
    problems
}

fn requests_id_token(permissions: Option<&Yaml>) -> bool {
    permissions
        .and_then(|p| p.get("id-token"))
        .and_then(Yaml::as_str)
        == Some("write")
}

fn check_publish_workflow(workflow: &Yaml) -> Vec<String> {
    let mut problems = Vec::new();
    let manual_only = match workflow.get("on") {
        Some(Yaml::String(event)) => event == "workflow_dispatch",
        Some(Yaml::Mapping(events)) => events.len() == 1 && events.contains_key("workflow_dispatch"),
        _ => false,
    };
    if !manual_only {
        problems.push(format!("{PUBLISH_WORKFLOW} must only trigger on workflow_dispatch"));
    }

    let job_tokens = workflow
        .get("jobs")
        .and_then(Yaml::as_mapping)
        .is_some_and(|jobs| jobs.values().any(|job| requests_id_token(job.get("permissions"))));
    if !requests_id_token(workflow.get("permissions")) && !job_tokens {
        problems.push(format!("{PUBLISH_WORKFLOW} must request 'id-token: write'"));
    }
    problems
}

fn read(root: &Path, file: &str) -> anyhow::Result<String> {
    fs::read_to_string(root.join(file)).with_context(|| format!("Failed to read {file}"))
}

fn read_yaml(root: &Path, file: &str) -> anyhow::Result<Yaml> {
    serde_yaml::from_str(&read(root, file)?).with_context(|| format!("{file} is not valid YAML"))
}

fn check_release(root: &Path) -> anyhow::Result<()> {
    println!("Checking release readiness...");

    let version = workspace_version(&read(root, "Cargo.toml")?)?;
    let changelog = changelog_versions(&read(root, "CHANGELOG.md")?)?;

    let mut problems = check_changelog(version, &changelog);
    problems.extend(check_push_workflow(&read_yaml(root, PUSH_WORKFLOW)?));
    problems.extend(check_publish_workflow(&read_yaml(root, PUBLISH_WORKFLOW)?));

    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  ✗ {problem}");
        }
        bail!("{} release check(s) failed", problems.len());
    }

    println!("✅ Version {} is ready to publish", show(version));
    Ok(())
}

// ============================================================================
// CLI documentation
// ============================================================================

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<dwh_ingest::Cli>();

    let content = format!(
        r#"# dwh-ingest CLI Reference

This documentation is auto-generated from the CLI source code. Last updated: {}.

All commands print JSON on stdout; logs go to stderr. Source URLs and
credentials are read from the environment (a `.env` file is loaded when
present).

## Environment Variables

- `SSB_API_URL` - SSB KLASS API (default: `https://data.ssb.no/api/klass/v1`)
- `BRREG_API_URL` - Enhetsregisteret API (default: `https://data.brreg.no/enhetsregisteret/api`)
- `SECRET_BACKEND` - `env` or `gcp`
- `GCP_PROJECT` - project for Secret Manager and BigQuery
- `KAFKA_CREDENTIALS_SECRET` - secret holding the Kafka credentials (default: `KAFKA`)
- `KAFKA_LOCAL_BROKERS`, `KAFKA_LOCAL_SCHEMA_REGISTRY` - plaintext cluster instead of the secret
- `LOG_LEVEL`, `LOG_FORMAT`, `LOG_OUTPUT` - logging

## Commands

{}

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("✅ Generated CLI documentation at: {}", file_path.display());
    Ok(())
}
