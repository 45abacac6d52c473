//! Core library for the Condor ephemeral GPU runner.
//!
//! The crate provisions a short-lived accelerator VM, rewrites a
//! notebook-authored Python script for unattended execution, runs it on the
//! instance, and guarantees teardown on every exit path once the instance
//! exists (create → wait for readiness → execute → reap).

pub mod auth;
pub mod command;
pub mod config;
pub mod context;
pub mod gcloud;
pub mod locations;
pub mod provider;
pub mod remote;
pub mod run;
pub mod script;
pub mod storage;
pub mod test_support;

pub use auth::{AuthError, CREDENTIALS_FILE_ENV, Credential, CredentialProbe, CredentialSource};
pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, RunnerConfig};
pub use context::RunContext;
pub use gcloud::{GcloudCompute, GcloudError};
pub use provider::{
    ComputeProvider, InstanceHandle, InstanceSpec, InstanceSpecBuilder, Location, Provisioned,
    Reaped, SpecError,
};
pub use remote::{ExecutionError, RemoteExecutor, RunOutcome};
pub use run::{RunError, RunOrchestrator, RunReport, RunState, StrandReason, StrandedInstance};
pub use script::{TransformedScript, transform};
pub use storage::{ObjectStore, StorageError};
