//! Remote staging and execution of the transformed job script.
//!
//! The executor copies the rewritten script to the instance with `gcloud
//! compute scp`, then runs it through `gcloud compute ssh --command` with
//! the forwarded environment exported and the job's Python dependencies
//! installed first. The staging artifact is a temp file that is removed on
//! every path out of the step.

mod command;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::command::{CommandError, CommandRunner};
use crate::provider::InstanceHandle;
use crate::script::TransformedScript;

pub use command::{JOB_DEPENDENCIES, REMOTE_SCRIPT_DIR, build_job_command};

/// Final result of a remote job execution. Never mutated after creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    /// Whether the remote script exited with status zero.
    pub succeeded: bool,
    /// Captured standard output of the remote command.
    pub stdout: String,
    /// Captured standard error of the remote command.
    pub stderr: String,
    /// Human-readable description of the exit status.
    pub exit_detail: String,
}

/// Errors raised while staging or executing the job remotely.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Raised when the instance handle carries no external address.
    #[error("instance {name} has no external address")]
    MissingAddress {
        /// Instance the execution targeted.
        name: String,
    },
    /// Raised when the script cannot be written to local staging.
    #[error("failed to stage script locally: {message}")]
    Stage {
        /// Operating system error string.
        message: String,
    },
    /// Raised when the copy to the instance fails. Copies are not retried.
    #[error("failed to copy script to instance {name}: {detail}")]
    Copy {
        /// Instance the copy targeted.
        name: String,
        /// Failure detail from the copy command.
        detail: String,
    },
    /// Raised when a CLI command cannot be started.
    #[error(transparent)]
    Runner(#[from] CommandError),
}

/// Executes transformed scripts on a provisioned instance.
#[derive(Clone, Debug)]
pub struct RemoteExecutor<R: CommandRunner> {
    gcloud_bin: String,
    project: String,
    runner: R,
}

impl<R: CommandRunner> RemoteExecutor<R> {
    /// Creates an executor scoped to `project` using the given runner.
    #[must_use]
    pub fn new(project: impl Into<String>, runner: R) -> Self {
        Self {
            gcloud_bin: crate::gcloud::DEFAULT_GCLOUD_BIN.to_owned(),
            project: project.into(),
            runner,
        }
    }

    /// Overrides the path to the `gcloud` executable.
    #[must_use]
    pub fn with_gcloud_bin(mut self, bin: impl Into<String>) -> Self {
        self.gcloud_bin = bin.into();
        self
    }

    /// Copies `script` to the instance and runs it with `env_vars` exported.
    ///
    /// The remote exit status is captured into the returned [`RunOutcome`];
    /// a non-zero script exit is a result, not an error. The local staging
    /// file is deleted when this method returns, on success and failure
    /// alike.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] when the handle lacks an external address,
    /// staging fails, the copy fails, or a CLI command cannot be started.
    pub fn execute(
        &self,
        handle: &InstanceHandle,
        script: &TransformedScript,
        env_vars: &BTreeMap<String, String>,
    ) -> Result<RunOutcome, ExecutionError> {
        if handle.external_ip.is_none() {
            return Err(ExecutionError::MissingAddress {
                name: handle.name.clone(),
            });
        }

        let staged = self.stage(script)?;
        let remote_path = format!("{REMOTE_SCRIPT_DIR}/{}", script.original_name);
        self.copy_to_instance(handle, staged.path().as_os_str().to_owned(), &remote_path)?;

        let job_command = build_job_command(env_vars, &remote_path);
        self.run_over_ssh(handle, &job_command)
        // `staged` drops here, removing the temp file on every path.
    }

    fn stage(&self, script: &TransformedScript) -> Result<NamedTempFile, ExecutionError> {
        let mut staged = NamedTempFile::new().map_err(|err| ExecutionError::Stage {
            message: err.to_string(),
        })?;
        staged
            .write_all(script.text.as_bytes())
            .and_then(|()| staged.flush())
            .map_err(|err| ExecutionError::Stage {
                message: err.to_string(),
            })?;
        Ok(staged)
    }

    fn copy_to_instance(
        &self,
        handle: &InstanceHandle,
        local_path: OsString,
        remote_path: &str,
    ) -> Result<(), ExecutionError> {
        let args = vec![
            OsString::from("compute"),
            OsString::from("scp"),
            local_path,
            OsString::from(format!("{}:{remote_path}", handle.name)),
            OsString::from(format!("--zone={}", handle.location.zone)),
            OsString::from(format!("--project={}", self.project)),
            OsString::from("--quiet"),
        ];

        let output = self.runner.run(&self.gcloud_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(ExecutionError::Copy {
            name: handle.name.clone(),
            detail: output.stderr.trim().to_owned(),
        })
    }

    fn run_over_ssh(
        &self,
        handle: &InstanceHandle,
        job_command: &str,
    ) -> Result<RunOutcome, ExecutionError> {
        let args = vec![
            OsString::from("compute"),
            OsString::from("ssh"),
            OsString::from(&handle.name),
            OsString::from(format!("--zone={}", handle.location.zone)),
            OsString::from(format!("--project={}", self.project)),
            OsString::from("--command"),
            OsString::from(job_command),
            OsString::from("--quiet"),
        ];

        let output = self.runner.run(&self.gcloud_bin, &args)?;
        let exit_detail = output.code.map_or_else(
            || String::from("terminated without exit status"),
            |code| format!("exited with status {code}"),
        );

        Ok(RunOutcome {
            succeeded: output.is_success(),
            stdout: output.stdout,
            stderr: output.stderr,
            exit_detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Location;
    use crate::script;
    use crate::test_support::ScriptedRunner;
    use std::net::{IpAddr, Ipv4Addr};

    fn handle(external_ip: Option<IpAddr>) -> InstanceHandle {
        InstanceHandle {
            name: String::from("condor-test"),
            location: Location::new("us-central1", "us-central1-b"),
            external_ip,
        }
    }

    fn reachable_handle() -> InstanceHandle {
        handle(Some(IpAddr::V4(Ipv4Addr::new(34, 10, 0, 9))))
    }

    fn job_script() -> TransformedScript {
        script::transform("predict.py", "import os\nprint(\"hello\")\n")
    }

    #[test]
    fn execute_requires_external_address() {
        let executor = RemoteExecutor::new("demo-project", ScriptedRunner::new());
        let err = executor
            .execute(&handle(None), &job_script(), &BTreeMap::new())
            .expect_err("missing address should fail");

        assert!(matches!(err, ExecutionError::MissingAddress { .. }));
    }

    #[test]
    fn copy_failure_aborts_without_ssh() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "scp: connection refused");
        let executor = RemoteExecutor::new("demo-project", runner.clone());

        let err = executor
            .execute(&reachable_handle(), &job_script(), &BTreeMap::new())
            .expect_err("copy failure expected");

        assert!(matches!(err, ExecutionError::Copy { .. }));
        assert_eq!(runner.invocations().len(), 1, "ssh must not run after a failed copy");
    }

    #[test]
    fn execute_captures_streams_and_success() {
        let runner = ScriptedRunner::new();
        runner.push_success(); // scp
        runner.push_output(Some(0), "model saved\n", ""); // ssh
        let executor = RemoteExecutor::new("demo-project", runner.clone());

        let outcome = executor
            .execute(&reachable_handle(), &job_script(), &BTreeMap::new())
            .expect("execution should succeed");

        assert!(outcome.succeeded);
        assert_eq!(outcome.stdout, "model saved\n");
        assert_eq!(outcome.exit_detail, "exited with status 0");

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 2);
        let scp = invocations[0].command_string();
        assert!(scp.contains("compute scp"), "{scp}");
        assert!(scp.contains("condor-test:/tmp/predict.py"), "{scp}");
        let ssh = invocations[1].command_string();
        assert!(ssh.contains("compute ssh condor-test"), "{ssh}");
        assert!(ssh.contains("python3 /tmp/predict.py"), "{ssh}");
    }

    #[test]
    fn non_zero_script_exit_is_an_unsuccessful_outcome() {
        let runner = ScriptedRunner::new();
        runner.push_success(); // scp
        runner.push_output(Some(3), "", "Traceback (most recent call last)"); // ssh
        let executor = RemoteExecutor::new("demo-project", runner);

        let outcome = executor
            .execute(&reachable_handle(), &job_script(), &BTreeMap::new())
            .expect("execution completes even when the script fails");

        assert!(!outcome.succeeded);
        assert_eq!(outcome.exit_detail, "exited with status 3");
        assert!(outcome.stderr.contains("Traceback"));
    }

    #[test]
    fn forwarded_environment_is_exported_in_the_remote_command() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_output(Some(0), "", "");
        let executor = RemoteExecutor::new("demo-project", runner.clone());

        let mut env = BTreeMap::new();
        env.insert(String::from("MONGODB_URL"), String::from("mongodb://db:27017"));
        env.insert(String::from("MONGODB_PASSWORD"), String::from("p a$s"));
        executor
            .execute(&reachable_handle(), &job_script(), &env)
            .expect("execution should succeed");

        let ssh = runner.invocations()[1].command_string();
        assert!(ssh.contains("export MONGODB_URL='mongodb://db:27017'"), "{ssh}");
        assert!(ssh.contains("export MONGODB_PASSWORD='p a$s'"), "{ssh}");
    }
}
