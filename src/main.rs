//! Binary entry point for the Condor CLI.

use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;

use condor::{
    CredentialProbe, GcloudCompute, GcloudError, ObjectStore, ProcessCommandRunner, RemoteExecutor,
    RunContext, RunError, RunOrchestrator, RunnerConfig, StorageError, locations, script,
};

mod cli;

use cli::{Cli, RunCommand, UploadCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("remote run failed: {0}")]
    Run(#[from] RunError<GcloudError>),
    #[error("upload failed: {0}")]
    Upload(#[from] StorageError),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
        Cli::Upload(command) => upload_command(&command),
    }
}

async fn run_command(args: RunCommand) -> Result<i32, CliError> {
    let script_path = Utf8PathBuf::from(&args.script);
    let source = std::fs::read_to_string(&script_path)
        .map_err(|err| CliError::Script(format!("{script_path}: {err}")))?;
    let script_name = script_path
        .file_name()
        .ok_or_else(|| CliError::InvalidPath(script_path.to_string()))?;
    let job_script = script::transform(script_name, &source);

    let config = RunnerConfig::load_without_cli_args()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let config = apply_overrides(config, &args);
    let spec = config
        .instance_spec()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let candidates = locations::candidates(&config.region);

    let probe = CredentialProbe::new(
        &config.gcloud_bin,
        config.credentials_file.clone().map(Utf8PathBuf::from),
        ProcessCommandRunner,
    );
    let provider = GcloudCompute::new(&config.project_id, ProcessCommandRunner)
        .with_gcloud_bin(&config.gcloud_bin)
        .with_poll_interval(config.poll_interval())
        .with_boot_grace(config.boot_grace());
    let executor = RemoteExecutor::new(&config.project_id, ProcessCommandRunner)
        .with_gcloud_bin(&config.gcloud_bin);
    let orchestrator = RunOrchestrator::new(probe, provider, executor)
        .with_readiness_timeout(config.readiness_timeout())
        .with_keep_instance(!config.delete_instance);

    let ctx = config
        .run_timeout()
        .map_or_else(RunContext::new, RunContext::with_timeout);
    let env_vars = config.forwarded_env();
    let report = orchestrator
        .execute(&ctx, &spec, &candidates, &job_script, &env_vars)
        .await?;

    let mut stdout = io::stdout();
    write!(stdout, "{}", report.outcome.stdout).ok();
    // The job's last line may lack a newline and `process::exit` skips
    // destructors, so the buffered writer must be drained here.
    stdout.flush().ok();
    let mut stderr = io::stderr();
    write!(stderr, "{}", report.outcome.stderr).ok();
    if let Some(stranded) = &report.stranded {
        writeln!(
            stderr,
            "instance {} in {} was not deleted; remove it with: {}",
            stranded.name,
            stranded.location,
            config.manual_delete_command(&stranded.location, &stranded.name)
        )
        .ok();
    }

    Ok(i32::from(!report.outcome.succeeded))
}

fn upload_command(args: &UploadCommand) -> Result<i32, CliError> {
    let config = RunnerConfig::load_without_cli_args()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let source = Utf8PathBuf::from(&args.source);
    let dest_key = resolve_dest_key(&source, args.dest_key.as_deref())
        .ok_or_else(|| CliError::InvalidPath(source.to_string()))?;

    let store = ObjectStore::new(ProcessCommandRunner).with_gcloud_bin(&config.gcloud_bin);
    let uri = store.upload(&args.bucket, &source, &dest_key)?;

    writeln!(io::stdout(), "{uri}").ok();
    Ok(0)
}

fn apply_overrides(mut config: RunnerConfig, args: &RunCommand) -> RunnerConfig {
    if let Some(region) = &args.region {
        config.region.clone_from(region);
    }
    if let Some(machine_type) = &args.machine_type {
        config.machine_type.clone_from(machine_type);
    }
    if let Some(accelerator_type) = &args.accelerator_type {
        config.accelerator_type.clone_from(accelerator_type);
    }
    if let Some(count) = args.accelerator_count {
        config.accelerator_count = count;
    }
    if args.keep_instance {
        config.delete_instance = false;
    }
    if let Some(secs) = args.timeout_secs {
        config.run_timeout_secs = Some(secs);
    }
    config
}

fn resolve_dest_key(source: &Utf8Path, explicit: Option<&str>) -> Option<String> {
    match explicit {
        Some(key) => Some(key.to_owned()),
        None => source.file_name().map(str::to_owned),
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
