//! Command-line interface definitions for the `condor` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `condor` binary.
#[derive(Debug, Parser)]
#[command(
    name = "condor",
    about = "Run a Python job script on a disposable GPU VM and tear it down",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision a GPU instance, run the script, and delete the instance.
    #[command(
        name = "run",
        about = "Provision a GPU instance, run the script, and delete the instance"
    )]
    Run(RunCommand),
    /// Upload a local file to provider object storage.
    #[command(name = "upload", about = "Upload a local file to provider object storage")]
    Upload(UploadCommand),
}

/// Arguments for the `condor run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Path to the Python job script to execute remotely.
    ///
    /// Notebook shell escapes (lines starting with `!`) are stripped before
    /// upload, and `import os` is inserted when the script lacks it.
    #[arg(value_name = "SCRIPT")]
    pub(crate) script: String,
    /// Override the preferred region for this run.
    ///
    /// Placement falls back through the remaining known regions when the
    /// preferred one has no accelerator capacity.
    #[arg(long, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Override the machine type for this run.
    #[arg(long, value_name = "TYPE")]
    pub(crate) machine_type: Option<String>,
    /// Override the accelerator type for this run.
    #[arg(long, value_name = "TYPE")]
    pub(crate) accelerator_type: Option<String>,
    /// Override the number of accelerators for this run.
    #[arg(long, value_name = "COUNT")]
    pub(crate) accelerator_count: Option<u32>,
    /// Keep the instance after the run and print manual deletion
    /// instructions instead of deleting it.
    #[arg(long)]
    pub(crate) keep_instance: bool,
    /// Bound the whole run to this many seconds.
    #[arg(long, value_name = "SECS")]
    pub(crate) timeout_secs: Option<u64>,
}

/// Arguments for the `condor upload` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct UploadCommand {
    /// Destination bucket name (without the `gs://` prefix).
    #[arg(value_name = "BUCKET")]
    pub(crate) bucket: String,
    /// Local file to upload.
    #[arg(value_name = "SOURCE")]
    pub(crate) source: String,
    /// Object key in the bucket; defaults to the source file name.
    #[arg(long, value_name = "KEY")]
    pub(crate) dest_key: Option<String>,
}
