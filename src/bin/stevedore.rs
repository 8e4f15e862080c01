//! stevedore - declarative container orchestration for one Docker host.
//!
//! ## Usage
//!
//! ```sh
//! stevedore run -f compose.yml [--dry] [--print] [--wait 10s]
//! stevedore pull -f compose.yml
//! stevedore rm -f compose.yml
//! stevedore clean -f compose.yml [--keep 3]
//! stevedore tar -f compose.yml -o release.tar [artifact ...]
//! stevedore recover
//! stevedore info -f compose.yml
//! ```
//!
//! The manifest may also be a release archive (`.tar`, `.tar.gz`,
//! `.tgz`, or `--tar`); its `compose.yml` member is the manifest and its
//! artifact key/value documents extend the template variables.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use stevedore::archive;
use stevedore::diff::{self, DiffOptions};
use stevedore::driver;
use stevedore::engine::{DockerEngine, EngineClient};
use stevedore::pod::spec::parse_duration;
use stevedore::pod::template::{parse_var_assignment, parse_var_document, references_helper};
use stevedore::pod::{self, Pod, SubstitutionRenderer, VariableBag};
use stevedore::report;
use stevedore::retention;
use stevedore::runner::{RunContext, Runner};

// =============================================================================
// CLI Parsing
// =============================================================================

/// Options shared by every manifest-consuming verb.
#[derive(Debug, Default)]
struct ManifestOpts {
    /// Manifest path, release archive path, or `-` for stdin.
    file: String,
    /// `--var K=V` assignments, highest precedence.
    vars: Vec<(String, String)>,
    /// `--vars <file>` key/value documents.
    vars_files: Vec<PathBuf>,
    /// Treat `--file` as a release archive regardless of extension.
    as_tar: bool,
    /// Fail if a release archive carries no artifacts.
    demand_artifacts: bool,
}

#[derive(Debug)]
enum Command {
    Run {
        manifest: ManifestOpts,
        dry: bool,
        print: bool,
        wait: Option<Duration>,
    },
    Pull {
        manifest: ManifestOpts,
    },
    Rm {
        manifest: ManifestOpts,
        dry: bool,
        print: bool,
    },
    Clean {
        manifest: ManifestOpts,
        keep: usize,
    },
    Tar {
        manifest: ManifestOpts,
        output: PathBuf,
        artifacts: Vec<PathBuf>,
    },
    Recover,
    Info {
        manifest: ManifestOpts,
    },
    Version,
    Help,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        return Ok(Command::Help);
    }

    let mut manifest = ManifestOpts {
        file: "compose.yml".to_string(),
        ..Default::default()
    };
    let mut dry = false;
    let mut print = false;
    let mut wait = None;
    let mut keep = 3usize;
    let mut output: Option<PathBuf> = None;
    let mut positional: Vec<PathBuf> = Vec::new();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                manifest.file = take_value(&args, &mut i, "--file")?;
            }
            "--var" => {
                let assignment = take_value(&args, &mut i, "--var")?;
                let pair = parse_var_assignment(&assignment).map_err(|e| e.to_string())?;
                manifest.vars.push(pair);
            }
            "--vars" => {
                manifest
                    .vars_files
                    .push(PathBuf::from(take_value(&args, &mut i, "--vars")?));
            }
            "--tar" => {
                manifest.as_tar = true;
                i += 1;
            }
            "--demand-artifacts" => {
                manifest.demand_artifacts = true;
                i += 1;
            }
            "--dry" => {
                dry = true;
                i += 1;
            }
            "--print" => {
                print = true;
                i += 1;
            }
            "--wait" => {
                let value = take_value(&args, &mut i, "--wait")?;
                wait = Some(parse_duration(&value).map_err(|e| e.to_string())?);
            }
            "--keep" => {
                let value = take_value(&args, &mut i, "--keep")?;
                keep = value
                    .parse()
                    .map_err(|_| format!("--keep expects a number, got '{}'", value))?;
                if keep == 0 {
                    return Err("--keep must be positive".to_string());
                }
            }
            "--output" | "-o" => {
                output = Some(PathBuf::from(take_value(&args, &mut i, "--output")?));
            }
            flag if flag.starts_with('-') && flag != "-" => {
                return Err(format!("unknown option: {}", flag));
            }
            path => {
                positional.push(PathBuf::from(path));
                i += 1;
            }
        }
    }

    match args[1].as_str() {
        "run" => Ok(Command::Run {
            manifest,
            dry,
            print,
            wait,
        }),
        "pull" => Ok(Command::Pull { manifest }),
        "rm" => Ok(Command::Rm {
            manifest,
            dry,
            print,
        }),
        "clean" => Ok(Command::Clean { manifest, keep }),
        "tar" => Ok(Command::Tar {
            manifest,
            output: output.ok_or_else(|| "tar requires --output <path>".to_string())?,
            artifacts: positional,
        }),
        "recover" => Ok(Command::Recover),
        "info" => Ok(Command::Info { manifest }),
        "version" | "--version" | "-v" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        unknown => Err(format!("unknown command: {}", unknown)),
    }
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    if *i + 1 < args.len() {
        let value = args[*i + 1].clone();
        *i += 2;
        Ok(value)
    } else {
        Err(format!("{} requires a value", flag))
    }
}

// =============================================================================
// Manifest Loading
// =============================================================================

/// Raw manifest bytes plus variables from archive artifacts.
struct ManifestInput {
    raw: Vec<u8>,
    artifact_vars: VariableBag,
}

fn read_manifest(opts: &ManifestOpts) -> Result<ManifestInput, String> {
    if opts.file == "-" {
        let mut raw = Vec::new();
        std::io::stdin()
            .read_to_end(&mut raw)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        return Ok(ManifestInput {
            raw,
            artifact_vars: VariableBag::new(),
        });
    }

    let path = PathBuf::from(&opts.file);
    if opts.as_tar || archive::is_archive_path(&path) {
        let release = archive::unpack(&path).map_err(|e| e.to_string())?;
        if opts.demand_artifacts && release.artifacts.is_empty() {
            return Err(format!(
                "archive '{}' carries no artifacts (--demand-artifacts)",
                path.display()
            ));
        }
        let artifact_vars = release.artifact_vars();
        return Ok(ManifestInput {
            raw: release.manifest,
            artifact_vars,
        });
    }

    let raw =
        std::fs::read(&path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    Ok(ManifestInput {
        raw,
        artifact_vars: VariableBag::new(),
    })
}

/// Builds the variable bag (artifacts < vars files < --var) and loads
/// the pod. The `bridgeIp` helper is fetched from the engine once, only
/// when the manifest references it.
async fn load_pod(opts: &ManifestOpts, engine: &dyn EngineClient) -> Result<Pod, String> {
    let input = read_manifest(opts)?;

    let mut bag = input.artifact_vars;
    for file in &opts.vars_files {
        let text = std::fs::read_to_string(file)
            .map_err(|e| format!("failed to read {}: {e}", file.display()))?;
        bag.extend(parse_var_document(&text).map_err(|e| e.to_string())?);
    }
    for (key, value) in &opts.vars {
        bag.insert(key.clone(), value.clone());
    }

    if let Ok(source) = std::str::from_utf8(&input.raw) {
        if references_helper(source, "bridgeIp") && !bag.contains_key("bridgeIp") {
            let ip = engine.bridge_ip().await.map_err(|e| e.to_string())?;
            bag.insert("bridgeIp".to_string(), ip);
        }
    }

    pod::load(&input.raw, &bag, &SubstitutionRenderer).map_err(|e| e.to_string())
}

// =============================================================================
// Command Implementations
// =============================================================================

async fn cmd_run(
    manifest: ManifestOpts,
    dry: bool,
    print: bool,
    wait: Option<Duration>,
) -> Result<(), String> {
    let engine = DockerEngine::connect().await.map_err(|e| e.to_string())?;
    let pod = load_pod(&manifest, &engine).await?;

    let observed = engine.list(&pod.namespace).await.map_err(|e| e.to_string())?;
    let plan = diff::diff(&pod.containers, &observed, &DiffOptions { wait })
        .map_err(|e| e.to_string())?;

    eprintln!("{}", report::describe(&plan));

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let runner = Runner::with_cancellation(&engine, cancel);
    let ctx = RunContext {
        namespace: pod.namespace.clone(),
        manifest_hash: pod.manifest_digest(),
        dry_run: dry,
    };
    let outcome = runner.run(&plan, &ctx).await.map_err(|e| e.to_string())?;

    if print {
        println!("{}", outcome.to_json().map_err(|e| e.to_string())?);
    }
    Ok(())
}

async fn cmd_pull(manifest: ManifestOpts) -> Result<(), String> {
    let engine = DockerEngine::connect().await.map_err(|e| e.to_string())?;
    let pod = load_pod(&manifest, &engine).await?;
    let images = pod.images();

    let pulled = driver::pull_all(&engine, &images, stevedore::DEFAULT_PULL_CONCURRENCY)
        .await
        .map_err(|e| e.to_string())?;
    eprintln!("{} image(s) pulled, {} already present", pulled, images.len() - pulled);
    Ok(())
}

async fn cmd_rm(manifest: ManifestOpts, dry: bool, print: bool) -> Result<(), String> {
    let engine = DockerEngine::connect().await.map_err(|e| e.to_string())?;
    let pod = load_pod(&manifest, &engine).await?;

    let observed = engine.list(&pod.namespace).await.map_err(|e| e.to_string())?;
    let plan = diff::removal_plan(&observed).map_err(|e| e.to_string())?;
    eprintln!("{}", report::describe(&plan));

    let runner = Runner::new(&engine);
    let ctx = RunContext {
        namespace: pod.namespace.clone(),
        manifest_hash: pod.manifest_digest(),
        dry_run: dry,
    };
    let outcome = runner.run(&plan, &ctx).await.map_err(|e| e.to_string())?;

    if print {
        println!("{}", outcome.to_json().map_err(|e| e.to_string())?);
    }
    Ok(())
}

async fn cmd_clean(manifest: ManifestOpts, keep: usize) -> Result<(), String> {
    let engine = DockerEngine::connect().await.map_err(|e| e.to_string())?;
    let pod = load_pod(&manifest, &engine).await?;

    let outcome = retention::clean(&engine, &pod, keep)
        .await
        .map_err(|e| e.to_string())?;
    for image in &outcome.removed {
        eprintln!("removed {}", image);
    }
    eprintln!(
        "{} image(s) removed, {} kept",
        outcome.removed.len(),
        outcome.kept.len()
    );
    Ok(())
}

fn cmd_tar(
    manifest: ManifestOpts,
    output: PathBuf,
    artifact_paths: Vec<PathBuf>,
) -> Result<(), String> {
    let input = read_manifest(&manifest)?;

    let mut artifacts = Vec::new();
    for path in &artifact_paths {
        let basename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("artifact path '{}' has no file name", path.display()))?
            .to_string();
        let contents =
            std::fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        artifacts.push((basename, contents));
    }
    if manifest.demand_artifacts && artifacts.is_empty() {
        return Err("no artifacts given (--demand-artifacts)".to_string());
    }

    archive::pack(&input.raw, &artifacts, &output).map_err(|e| e.to_string())?;
    eprintln!(
        "packed manifest and {} artifact(s) into {}",
        artifacts.len(),
        output.display()
    );
    Ok(())
}

async fn cmd_recover() -> Result<(), String> {
    let engine = DockerEngine::connect().await.map_err(|e| e.to_string())?;
    let outcome = driver::recover(&engine).await.map_err(|e| e.to_string())?;
    for name in &outcome.started {
        eprintln!("started {}", name);
    }
    eprintln!(
        "{} container(s) started, {} left stopped",
        outcome.started.len(),
        outcome.skipped.len()
    );
    Ok(())
}

async fn cmd_info(manifest: ManifestOpts) -> Result<(), String> {
    let engine = DockerEngine::connect().await.map_err(|e| e.to_string())?;
    let pod = load_pod(&manifest, &engine).await?;
    let observed = engine.list(&pod.namespace).await.map_err(|e| e.to_string())?;

    println!("namespace: {}", pod.namespace);
    println!("{:<24} {:<32} {}", "CONTAINER", "IMAGE", "STATUS");
    for spec in &pod.containers {
        let status = observed
            .iter()
            .find(|o| o.name == spec.name)
            .map(|o| o.state.status.to_string())
            .unwrap_or_else(|| "absent".to_string());
        println!("{:<24} {:<32} {}", spec.name.to_string(), spec.image.to_string(), status);
    }
    Ok(())
}

fn cmd_version() {
    println!("stevedore version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"stevedore - declarative container orchestration for one Docker host

USAGE:
    stevedore <command> [options]

COMMANDS:
    run        Converge the host to the manifest
    pull       Pull every image the manifest references
    rm         Remove the pod's containers
    clean      Remove old image revisions (keep the newest --keep)
    tar        Package manifest plus artifacts into a release archive
    recover    Start stopped managed containers after an engine restart
    info       Show declared containers and their observed status
    version    Show version info
    help       Show this help

OPTIONS:
    --file, -f <path>     Manifest or release archive; '-' reads stdin
                          (default: compose.yml)
    --var K=V             Set a template variable (repeatable)
    --vars <file>         Load template variables from a key/value file
    --tar                 Treat --file as a release archive
    --demand-artifacts    Fail when the archive carries no artifacts
    --dry                 Compute and report the plan without applying it
    --print               Print the structured plan report as JSON
    --wait <dur>          Watch created containers for early exit (run)
    --keep <n>            Image revisions to keep per repository (clean,
                          default 3)
    --output, -o <path>   Archive path to write (tar)

EXAMPLES:
    stevedore run -f compose.yml --var version=1.4 --wait 10s
    stevedore run -f release.tar.gz --print
    stevedore clean -f compose.yml --keep 5
"#
    );
}

// =============================================================================
// Main
// =============================================================================

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received, aborting after the current action");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = match parse_args() {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            return ExitCode::FAILURE;
        }
    };

    let result = match command {
        Command::Run {
            manifest,
            dry,
            print,
            wait,
        } => cmd_run(manifest, dry, print, wait).await,
        Command::Pull { manifest } => cmd_pull(manifest).await,
        Command::Rm {
            manifest,
            dry,
            print,
        } => cmd_rm(manifest, dry, print).await,
        Command::Clean { manifest, keep } => cmd_clean(manifest, keep).await,
        Command::Tar {
            manifest,
            output,
            artifacts,
        } => cmd_tar(manifest, output, artifacts),
        Command::Recover => cmd_recover().await,
        Command::Info { manifest } => cmd_info(manifest).await,
        Command::Version => {
            cmd_version();
            Ok(())
        }
        Command::Help => {
            cmd_help();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
