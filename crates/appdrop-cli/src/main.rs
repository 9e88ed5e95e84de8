use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;

use appdrop::Reporter;
use appdrop::changelog::ChangelogBuilder;
use appdrop::distribution::{APK_CONTENT_TYPE, DistributionClient};
use appdrop::git::{GitTagRepository, SystemGit, TagPattern};
use appdrop::retry::Deadline;
use appdrop::types::{BuildTag, Tag, VersionInfo, version_for};
use appdrop::upload::{
    UploadOptions, UploadOrchestrator, UploadOutcome, UploadReport, UploadRequest, artifact_name,
};
use appdrop_config::{CONFIG_FILE, Config, find_config, load_config_from_file};
use appdrop_webhook::{IssueLinker, changelog_payload, send_webhook};

/// File the resolved build tag is written to by `tag`
const TAG_FILE: &str = "tag-build.json";

/// Content type App Center expects for Android app bundles
const AAB_CONTENT_TYPE: &str = "application/x-authorware-bin";

#[derive(Parser, Debug)]
#[command(name = "appdrop", version)]
#[command(about = "Build-tag changelogs and chunked release uploads for mobile apps")]
struct Cli {
    /// Repository root; `.appdrop.toml` is looked up from here
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Config file to use instead of the nearest .appdrop.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Account or organization owning the app
    #[arg(long)]
    owner: Option<String>,

    /// Application name (default: derived from distribution.base_file_name)
    #[arg(long)]
    app: Option<String>,

    /// Distribution API base URL
    #[arg(long)]
    api_base: Option<String>,

    /// Build tag template with {variant} and {build} placeholders
    #[arg(long)]
    tag_pattern: Option<String>,

    /// Commit-message key marking changelog lines
    #[arg(long)]
    message_key: Option<String>,

    /// Tester group a release is distributed to (repeatable)
    #[arg(long = "tester-group")]
    tester_groups: Vec<String>,

    /// Max upload status requests before giving up
    #[arg(long)]
    max_status_requests: Option<u32>,

    /// Delay between upload status requests (e.g. 2s, 500ms)
    #[arg(long)]
    status_request_delay: Option<String>,

    /// Derive the status delay as artifact_size_mb / coefficient seconds
    #[arg(long)]
    delay_coefficient: Option<u64>,

    /// Chunks uploaded at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Overall upload time budget (e.g. 10m)
    #[arg(long)]
    upload_timeout: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the latest build tag of a variant and write it as JSON.
    Tag {
        variant: String,
        /// Output file
        #[arg(long, default_value = TAG_FILE)]
        output: PathBuf,
    },
    /// Print the name of the next build tag for a variant.
    NextTag { variant: String },
    /// Build the changelog of the latest build and write it to a file.
    Changelog {
        variant: String,
        /// Output file (default: changelog.output or release-notes.txt)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Upload an artifact and distribute it to tester groups.
    Upload {
        variant: String,
        /// Artifact to upload
        artifact: PathBuf,
        /// Release notes file (default: the changelog file)
        #[arg(long)]
        release_notes: Option<PathBuf>,
        /// Print the upload report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Post the changelog to the configured webhook.
    Announce {
        variant: String,
        /// Changelog file (default: the changelog file)
        #[arg(long)]
        changelog: Option<PathBuf>,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

/// Settings shared by every subcommand.
struct Settings {
    repo: PathBuf,
    config: Config,
    /// Directory relative config paths are resolved against
    config_dir: PathBuf,
}

impl Settings {
    fn tag_repository(&self) -> Result<GitTagRepository<SystemGit>> {
        let pattern = TagPattern::new(self.config.tag_pattern())?;
        Ok(GitTagRepository::new(SystemGit::new(&self.repo), pattern))
    }

    fn changelog_file(&self, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(path) => path.to_path_buf(),
            None => self.repo.join(self.config.changelog_file()),
        }
    }
}

#[derive(Debug, Serialize)]
struct TagExport<'a> {
    variant: &'a str,
    tag: Option<&'a BuildTag>,
    version: VersionInfo,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.cmd {
        clap_complete::generate(*shell, &mut Cli::command(), "appdrop", &mut io::stdout());
        return Ok(());
    }

    let ctx = load_settings(&cli)?;
    let mut reporter = CliReporter;

    match &cli.cmd {
        Commands::Tag { variant, output } => run_tag(&ctx, variant, output, &mut reporter),
        Commands::NextTag { variant } => run_next_tag(&ctx, variant),
        Commands::Changelog { variant, output } => {
            run_changelog(&ctx, variant, output.as_deref(), &mut reporter)
        }
        Commands::Upload {
            variant,
            artifact,
            release_notes,
            json,
        } => run_upload(
            &ctx,
            variant,
            artifact,
            release_notes.as_deref(),
            *json,
            &mut reporter,
        ),
        Commands::Announce { variant, changelog } => {
            run_announce(&ctx, variant, changelog.as_deref(), &mut reporter)
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let config_path = match &cli.config {
        Some(path) => {
            if !path.is_file() {
                bail!("config file not found: {}", path.display());
            }
            Some(path.clone())
        }
        None => find_config(&cli.repo),
    };

    let (file_config, config_dir) = match config_path {
        Some(path) => {
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cli.repo.clone());
            (load_config_from_file(&path)?, dir)
        }
        None => (Config::default(), cli.repo.clone()),
    };

    Ok(Settings {
        repo: cli.repo.clone(),
        config: file_config.merge(&overrides(cli)?),
        config_dir,
    })
}

// Flags become a config layer that wins over the file.
fn overrides(cli: &Cli) -> Result<Config> {
    let mut config = Config::default();
    config.distribution.owner = cli.owner.clone();
    config.distribution.app = cli.app.clone();
    config.distribution.api_base = cli.api_base.clone();
    config.distribution.tester_groups = cli.tester_groups.clone();
    config.tags.pattern = cli.tag_pattern.clone();
    config.changelog.message_key = cli.message_key.clone();

    if let Some(max) = cli.max_status_requests {
        config.polling.max_requests = max;
    }
    if let Some(delay) = &cli.status_request_delay {
        config.polling.delay = parse_duration(delay)?;
    }
    config.polling.delay_coefficient = cli.delay_coefficient;
    if let Some(concurrency) = cli.concurrency {
        config.upload.concurrency = concurrency;
    }
    config.upload.timeout = cli
        .upload_timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?;
    Ok(config)
}

fn parse_duration(s: &str) -> Result<Duration> {
    appdrop_duration::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn run_tag(ctx: &Settings, variant: &str, output: &Path, reporter: &mut dyn Reporter) -> Result<()> {
    let tag = ctx.tag_repository()?.find_recent_build_tag(variant)?;
    if tag.is_none() {
        reporter.warn(&format!(
            "no build tags for variant {variant}; using the default version"
        ));
    }

    let export = TagExport {
        variant,
        tag: tag.as_ref(),
        version: version_for(tag.as_ref()),
    };
    let path = ctx.repo.join(output);
    let json = serde_json::to_string_pretty(&export).context("failed to serialize build tag")?;
    fs::write(&path, format!("{json}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("tag: {}", tag.as_ref().map_or("none", |t| t.name.as_str()));
    println!("version_code: {}", export.version.code);
    println!("version_name: {}", export.version.name);
    println!("written: {}", path.display());
    Ok(())
}

fn run_next_tag(ctx: &Settings, variant: &str) -> Result<()> {
    let repo = ctx.tag_repository()?;
    let next = match repo.find_recent_build_tag(variant)? {
        Some(tag) => tag.increment(),
        None => {
            let Some(name) = repo.pattern().render(variant, 1) else {
                bail!("tag pattern {} cannot name a first build", repo.pattern().template());
            };
            Tag::Increment { name }
        }
    };
    println!("{}", next.name());
    Ok(())
}

fn run_changelog(
    ctx: &Settings,
    variant: &str,
    output: Option<&Path>,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let builder = ChangelogBuilder::new(ctx.tag_repository()?, ctx.config.message_key());
    let default_text = ctx.config.default_changelog().map(str::to_string);
    let changelog = builder
        .build_changelog(variant, reporter, |_| default_text)?
        .unwrap_or_default();

    if changelog.trim().is_empty() {
        reporter.warn("changelog is empty");
    }

    let path = ctx.changelog_file(output);
    fs::write(&path, &changelog).with_context(|| format!("failed to write {}", path.display()))?;
    println!("changelog: {}", path.display());
    Ok(())
}

fn run_upload(
    ctx: &Settings,
    variant: &str,
    artifact: &Path,
    release_notes: Option<&Path>,
    json: bool,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let config = &ctx.config;
    let Some(owner) = config.owner() else {
        bail!("no owner configured: pass --owner or set distribution.owner in {CONFIG_FILE}");
    };
    let Some(app) = config.app_name(variant) else {
        bail!(
            "no app configured: pass --app or set distribution.app or distribution.base_file_name in {CONFIG_FILE}"
        );
    };
    check_artifact_type(artifact, config.content_type())?;
    let token = config.api_token(&ctx.config_dir)?;

    let notes_path = ctx.changelog_file(release_notes);
    let notes = match fs::read_to_string(&notes_path) {
        Ok(notes) => notes,
        Err(err) => {
            reporter.warn(&format!(
                "release notes unavailable ({}: {err}); uploading without them",
                notes_path.display()
            ));
            String::new()
        }
    };

    let client = DistributionClient::new(config.api_base(), &token)
        .with_timeout(config.request_timeout());
    let options = UploadOptions {
        poll: config.poll_schedule().clone(),
        concurrency: config.upload_concurrency(),
        chunk_retry: config.chunk_retry(),
        deadline: Deadline::from_timeout(config.upload_timeout()),
    };
    let request = UploadRequest {
        owner: owner.to_string(),
        app,
        artifact: artifact.to_path_buf(),
        file_name: None,
        content_type: config.content_type().to_string(),
        tester_groups: config.tester_groups().to_vec(),
        release_notes: notes,
    };

    let report = UploadOrchestrator::new(&client, options).upload(&request, reporter)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize upload report")?
        );
    } else {
        print_report(&report, artifact);
    }
    Ok(())
}

fn check_artifact_type(artifact: &Path, content_type: &str) -> Result<()> {
    let expected = match content_type {
        APK_CONTENT_TYPE => "apk",
        AAB_CONTENT_TYPE => "aab",
        _ => return Ok(()),
    };
    let extension = artifact.extension().and_then(|e| e.to_str()).unwrap_or_default();
    if !extension.eq_ignore_ascii_case(expected) {
        bail!(
            "file {} is not {expected} (content type {content_type})",
            artifact.display()
        );
    }
    Ok(())
}

fn print_report(report: &UploadReport, artifact: &Path) {
    println!("artifact: {}", artifact_name(artifact));
    println!("upload_id: {}", report.upload_id);
    println!(
        "release_id: {}",
        report.release_id.as_deref().unwrap_or("none")
    );
    println!("chunks: {}", report.chunk_count);
    println!("status_requests: {}", report.poll_attempts);
    println!(
        "duration: {}",
        appdrop_duration::format_duration(
            (report.finished_at - report.started_at)
                .to_std()
                .unwrap_or_default()
        )
    );
    match &report.outcome {
        UploadOutcome::Success => println!("outcome: success"),
        UploadOutcome::PartialSuccess { warning } => {
            println!("outcome: partial success ({warning})")
        }
    }
}

fn run_announce(
    ctx: &Settings,
    variant: &str,
    changelog: Option<&Path>,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let Some(webhook) = &ctx.config.webhook else {
        bail!("no webhook configured: add a [webhook] section to {CONFIG_FILE}");
    };

    let path = ctx.changelog_file(changelog);
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read changelog {}", path.display()))?;
    if text.trim().is_empty() {
        reporter.warn("changelog is empty; nothing to announce");
        return Ok(());
    }

    let build = match ctx.tag_repository()?.find_recent_build_tag(variant)? {
        Some(tag) => tag.name,
        None => version_for(None).name,
    };

    let linker = match (&ctx.config.issues.url_prefix, &ctx.config.issues.number_pattern) {
        (Some(prefix), Some(pattern)) => Some(IssueLinker::new(prefix, pattern)?),
        _ => None,
    };

    let payload = changelog_payload(&build, &text, webhook, linker.as_ref());
    send_webhook(webhook, &payload)?;
    reporter.info(&format!("announced {build}"));
    Ok(())
}
