//! Orchestrates the end-to-end ephemeral GPU run.
//!
//! The run workflow probes credentials, searches an ordered list of
//! locations for accelerator capacity, waits for the instance to become
//! reachable, executes the transformed job script remotely, and tears the
//! instance down. Once an instance exists, every exit path passes through
//! the reaper exactly once; the only exception is an explicit keep-instance
//! override, which records manual deletion instructions instead.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::time::Duration;

use thiserror::Error;
use tokio::task;
use tokio::time::timeout;

use crate::auth::{AuthError, CredentialProbe, CredentialSource};
use crate::command::CommandRunner;
use crate::context::RunContext;
use crate::provider::{
    ComputeProvider, InstanceHandle, InstanceSpec, Location, Provisioned, Reaped, SpecError,
};
use crate::remote::{ExecutionError, RemoteExecutor, RunOutcome};
use crate::script::TransformedScript;

const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(600);

/// States of the orchestrated run. Teardown is reachable from every state
/// past `Provisioned`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    /// Nothing has happened yet.
    Init,
    /// A provider credential was resolved.
    Authenticated,
    /// An instance name and location are fixed; teardown is now owed.
    Provisioned,
    /// The instance is running and reachable.
    Ready,
    /// The remote job has finished (in either direction).
    Executed,
    /// Teardown has completed or been explicitly skipped.
    Reaped,
    /// The run finished and the job succeeded.
    Done,
    /// The run finished with a failure.
    Failed,
}

impl Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::Authenticated => "authenticated",
            Self::Provisioned => "provisioned",
            Self::Ready => "ready",
            Self::Executed => "executed",
            Self::Reaped => "reaped",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Why an instance outlived the run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StrandReason {
    /// The operator opted out of teardown.
    KeptByRequest,
    /// Teardown was attempted and failed.
    ReapFailed {
        /// Failure detail from the provider.
        detail: String,
    },
}

/// An instance that still exists after the run, needing manual follow-up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StrandedInstance {
    /// Instance name.
    pub name: String,
    /// Location the instance lives in.
    pub location: Location,
    /// Why the instance was not deleted.
    pub reason: StrandReason,
}

/// Result of a completed run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunReport {
    /// Captured output and exit status of the remote job.
    pub outcome: RunOutcome,
    /// Set when the instance still exists and the operator must act.
    pub stranded: Option<StrandedInstance>,
}

/// Errors surfaced while performing a run.
#[derive(Debug, Error)]
pub enum RunError<ProviderError>
where
    ProviderError: std::error::Error + 'static,
{
    /// Raised when the instance spec fails validation. Checked once before
    /// the location search so a bad spec is never retried across locations.
    #[error("invalid instance spec: {0}")]
    Spec(#[from] SpecError),
    /// Raised when no usable provider credential is available. No billable
    /// resource was touched.
    #[error("credential probe failed: {0}")]
    Auth(#[from] AuthError),
    /// Raised when every location candidate rejected the create request. No
    /// instance exists, so no teardown is owed.
    #[error("no capacity in any of the {attempts} locations tried")]
    AllLocationsExhausted {
        /// Number of locations attempted.
        attempts: usize,
    },
    /// Raised when the instance does not become reachable in time. Teardown
    /// has already run when this error is returned.
    #[error("instance did not become ready: {message}")]
    Wait {
        /// Human-readable description of the failure.
        message: String,
        /// Provider-specific error.
        #[source]
        source: ProviderError,
    },
    /// Raised when staging, copying, or starting the remote job fails.
    /// Teardown has already run when this error is returned.
    #[error("remote execution failed: {message}")]
    Execution {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying execution error.
        #[source]
        source: ExecutionError,
    },
    /// Raised when the overall run deadline expires. Teardown has already
    /// run when this error is returned.
    #[error("run deadline exceeded during {stage}")]
    DeadlineExceeded {
        /// Stage that was interrupted.
        stage: String,
    },
    /// Raised when the blocking execution task aborts unexpectedly.
    #[error("remote execution task aborted: {message}")]
    TaskAborted {
        /// Panic or cancellation detail.
        message: String,
    },
}

/// Executes the run flow using the provided probe, provider, and executor.
#[derive(Debug)]
pub struct RunOrchestrator<P, R: CommandRunner> {
    probe: CredentialProbe<R>,
    provider: P,
    executor: RemoteExecutor<R>,
    readiness_timeout: Duration,
    keep_instance: bool,
}

impl<P, R> RunOrchestrator<P, R>
where
    P: ComputeProvider,
    P::Error: Display + Send + Sync + std::error::Error + 'static,
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// Creates a new orchestrator with default timeouts and teardown on.
    #[must_use]
    pub const fn new(probe: CredentialProbe<R>, provider: P, executor: RemoteExecutor<R>) -> Self {
        Self {
            probe,
            provider,
            executor,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            keep_instance: false,
        }
    }

    /// Overrides the readiness timeout.
    #[must_use]
    pub const fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Opts out of teardown; manual deletion instructions are recorded in
    /// the run context instead.
    #[must_use]
    pub const fn with_keep_instance(mut self, keep: bool) -> Self {
        self.keep_instance = keep;
        self
    }

    /// Runs the end-to-end workflow and returns the remote job outcome.
    ///
    /// A non-zero remote exit status is reported through
    /// [`RunOutcome::succeeded`], not as an error. Teardown is attempted on
    /// every path once an instance exists; a teardown failure never masks
    /// the job result and is reported via [`RunReport::stranded`].
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when authentication, the location search,
    /// readiness, or remote execution fail.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        spec: &InstanceSpec,
        candidates: &[Location],
        script: &TransformedScript,
        env_vars: &BTreeMap<String, String>,
    ) -> Result<RunReport, RunError<P::Error>> {
        self.advance(ctx, RunState::Init);
        spec.validate()?;
        for line in &script.dropped_lines {
            ctx.note(format!("dropped notebook line: {line}"));
        }
        self.authenticate(ctx)?;

        let location = self.provision_with_fallback(ctx, spec, candidates).await?;

        // An instance now exists: every path below must flow through
        // `release`, which invokes the reaper (or the keep override) before
        // the result is surfaced.
        let result = self.run_on_instance(ctx, spec, &location, script, env_vars).await;
        let stranded = self.release(ctx, spec, &location).await;

        match result {
            Ok(outcome) => {
                self.advance(
                    ctx,
                    if outcome.succeeded {
                        RunState::Done
                    } else {
                        RunState::Failed
                    },
                );
                Ok(RunReport { outcome, stranded })
            }
            Err(err) => {
                self.advance(ctx, RunState::Failed);
                Err(err)
            }
        }
    }

    fn authenticate(&self, ctx: &RunContext) -> Result<(), RunError<P::Error>> {
        let credential = self.probe.probe()?;
        match &credential.source {
            CredentialSource::ExplicitFile(path) => {
                ctx.note(format!("using service-account key file {path}"));
            }
            CredentialSource::AmbientSession { account } => {
                ctx.note(format!("using ambient session for {account}"));
            }
        }
        self.advance(ctx, RunState::Authenticated);
        Ok(())
    }

    /// Walks the candidate list in order and fixes the first location that
    /// accepts the create request. The search is sequential on purpose:
    /// trying locations in parallel could create multiple billable
    /// instances for a single run.
    async fn provision_with_fallback(
        &self,
        ctx: &RunContext,
        spec: &InstanceSpec,
        candidates: &[Location],
    ) -> Result<Location, RunError<P::Error>> {
        for location in candidates {
            ctx.note(format!("trying {location} for instance {}", spec.name));
            match self.provider.ensure(spec, location).await {
                Ok(Provisioned::Created) => {
                    ctx.note(format!("created instance {} in {location}", spec.name));
                    self.advance(ctx, RunState::Provisioned);
                    return Ok(location.clone());
                }
                Ok(Provisioned::AlreadyExists) => {
                    ctx.note(format!(
                        "instance {} already exists in {location}",
                        spec.name
                    ));
                    self.advance(ctx, RunState::Provisioned);
                    return Ok(location.clone());
                }
                Err(err) => {
                    ctx.note(format!("{location} rejected instance {}: {err}", spec.name));
                }
            }
        }

        self.advance(ctx, RunState::Failed);
        Err(RunError::AllLocationsExhausted {
            attempts: candidates.len(),
        })
    }

    async fn run_on_instance(
        &self,
        ctx: &RunContext,
        spec: &InstanceSpec,
        location: &Location,
        script: &TransformedScript,
        env_vars: &BTreeMap<String, String>,
    ) -> Result<RunOutcome, RunError<P::Error>> {
        let handle = self
            .provider
            .wait_for_ready(location, &spec.name, self.readiness_timeout)
            .await
            .map_err(|err| RunError::Wait {
                message: err.to_string(),
                source: err,
            })?;
        self.advance(ctx, RunState::Ready);

        let outcome = self.execute_remote(ctx, handle, script, env_vars).await?;
        ctx.note(format!("remote job {}", outcome.exit_detail));
        self.advance(ctx, RunState::Executed);
        Ok(outcome)
    }

    /// Runs the blocking copy-and-execute step on a worker thread so the
    /// run deadline can interrupt it.
    async fn execute_remote(
        &self,
        ctx: &RunContext,
        handle: InstanceHandle,
        script: &TransformedScript,
        env_vars: &BTreeMap<String, String>,
    ) -> Result<RunOutcome, RunError<P::Error>> {
        if ctx.deadline_exceeded() {
            return Err(RunError::DeadlineExceeded {
                stage: String::from("remote execution"),
            });
        }

        let executor = self.executor.clone();
        let script = script.clone();
        let env_vars = env_vars.clone();
        let job = task::spawn_blocking(move || executor.execute(&handle, &script, &env_vars));

        let joined = match ctx.remaining() {
            Some(left) => match timeout(left, job).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(RunError::DeadlineExceeded {
                        stage: String::from("remote execution"),
                    });
                }
            },
            None => job.await,
        };

        let result = joined.map_err(|err| RunError::TaskAborted {
            message: err.to_string(),
        })?;
        result.map_err(|err| RunError::Execution {
            message: err.to_string(),
            source: err,
        })
    }

    /// Releases the instance. Never fatal: teardown problems are recorded
    /// and surfaced as a stranded instance so the job result survives.
    async fn release(
        &self,
        ctx: &RunContext,
        spec: &InstanceSpec,
        location: &Location,
    ) -> Option<StrandedInstance> {
        if self.keep_instance {
            ctx.note(format!(
                "keeping instance {} in {location} by request; delete it manually when done",
                spec.name
            ));
            self.advance(ctx, RunState::Reaped);
            return Some(StrandedInstance {
                name: spec.name.clone(),
                location: location.clone(),
                reason: StrandReason::KeptByRequest,
            });
        }

        let stranded = match self.provider.reap(location, &spec.name).await {
            Ok(Reaped::Deleted) => {
                ctx.note(format!("deleted instance {} in {location}", spec.name));
                None
            }
            Ok(Reaped::AlreadyAbsent) => {
                ctx.note(format!(
                    "instance {} in {location} was already gone",
                    spec.name
                ));
                None
            }
            Err(err) => {
                ctx.note(format!(
                    "warning: failed to delete instance {} in {location}: {err}; \
                     delete it manually to avoid charges",
                    spec.name
                ));
                Some(StrandedInstance {
                    name: spec.name.clone(),
                    location: location.clone(),
                    reason: StrandReason::ReapFailed {
                        detail: err.to_string(),
                    },
                })
            }
        };
        self.advance(ctx, RunState::Reaped);
        stranded
    }

    fn advance(&self, ctx: &RunContext, state: RunState) {
        ctx.note(format!("state: {state}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script;
    use crate::test_support::{EnvGuard, ScriptedRunner};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use thiserror::Error;

    #[derive(Clone, Debug, Error, Eq, PartialEq)]
    #[error("{0}")]
    struct FakeProviderError(String);

    /// In-memory provider scripted per zone, recording every call.
    #[derive(Debug, Default)]
    struct FakeProvider {
        /// Zones that accept the create request; all others reject.
        accepting_zones: Vec<String>,
        /// When set, readiness fails with this message instead of returning
        /// a handle.
        wait_failure: Option<String>,
        /// When set, reap fails with this message.
        reap_failure: Option<String>,
        ensure_calls: Mutex<Vec<Location>>,
        reap_calls: Mutex<Vec<(Location, String)>>,
    }

    impl FakeProvider {
        fn accepting(zones: &[&str]) -> Self {
            Self {
                accepting_zones: zones.iter().map(|zone| (*zone).to_owned()).collect(),
                ..Self::default()
            }
        }

        fn ensure_calls(&self) -> Vec<Location> {
            self.ensure_calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }

        fn reap_calls(&self) -> Vec<(Location, String)> {
            self.reap_calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    impl ComputeProvider for &FakeProvider {
        type Error = FakeProviderError;

        fn ensure<'a>(
            &'a self,
            spec: &'a InstanceSpec,
            location: &'a Location,
        ) -> crate::provider::ProviderFuture<'a, Provisioned, Self::Error> {
            Box::pin(async move {
                if let Ok(mut calls) = self.ensure_calls.lock() {
                    calls.push(location.clone());
                }
                let _ = spec;
                if self.accepting_zones.contains(&location.zone) {
                    Ok(Provisioned::Created)
                } else {
                    Err(FakeProviderError(format!("no capacity in {location}")))
                }
            })
        }

        fn wait_for_ready<'a>(
            &'a self,
            location: &'a Location,
            name: &'a str,
            _timeout: Duration,
        ) -> crate::provider::ProviderFuture<'a, InstanceHandle, Self::Error> {
            Box::pin(async move {
                if let Some(message) = &self.wait_failure {
                    return Err(FakeProviderError(message.clone()));
                }
                Ok(InstanceHandle {
                    name: name.to_owned(),
                    location: location.clone(),
                    external_ip: Some(IpAddr::V4(Ipv4Addr::new(34, 10, 0, 9))),
                })
            })
        }

        fn reap<'a>(
            &'a self,
            location: &'a Location,
            name: &'a str,
        ) -> crate::provider::ProviderFuture<'a, Reaped, Self::Error> {
            Box::pin(async move {
                if let Ok(mut calls) = self.reap_calls.lock() {
                    calls.push((location.clone(), name.to_owned()));
                }
                if let Some(message) = &self.reap_failure {
                    return Err(FakeProviderError(message.clone()));
                }
                Ok(Reaped::Deleted)
            })
        }
    }

    fn spec() -> InstanceSpec {
        InstanceSpec::builder()
            .name("condor-run-test")
            .machine_type("n1-standard-4")
            .accelerator_type("nvidia-tesla-t4")
            .accelerator_count(1)
            .image_family("ubuntu-2204-lts")
            .image_project("ubuntu-os-cloud")
            .boot_disk_size("200GB")
            .build()
            .expect("spec should validate")
    }

    fn candidates() -> Vec<Location> {
        vec![
            Location::new("us-central1", "us-central1-a"),
            Location::new("us-central1", "us-central1-b"),
            Location::new("us-east1", "us-east1-b"),
        ]
    }

    fn job_script() -> TransformedScript {
        script::transform("predict.py", "!pip install tensorflow\nimport os\nprint(\"ok\")\n")
    }

    /// Probe runner answering with an ambient session, plus an executor
    /// runner scripted for scp and ssh.
    fn orchestrator<'p>(
        provider: &'p FakeProvider,
        executor_runner: &ScriptedRunner,
    ) -> RunOrchestrator<&'p FakeProvider, ScriptedRunner> {
        let probe_runner = ScriptedRunner::new();
        probe_runner.push_output(Some(0), "dev@example.com\n", "");
        let probe = CredentialProbe::new("gcloud", None, probe_runner);
        let executor = RemoteExecutor::new("demo-project", executor_runner.clone());
        RunOrchestrator::new(probe, provider, executor)
    }

    async fn guard_env() -> EnvGuard {
        EnvGuard::set_vars(&[("GOOGLE_APPLICATION_CREDENTIALS", "")]).await
    }

    #[tokio::test]
    async fn fallback_fixes_first_accepting_location() {
        let _guard = guard_env().await;
        let provider = FakeProvider::accepting(&["us-east1-b"]);
        let runner = ScriptedRunner::new();
        runner.push_success(); // scp
        runner.push_output(Some(0), "trained\n", ""); // ssh
        let orchestrator = orchestrator(&provider, &runner);

        let ctx = RunContext::silent();
        let report = orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect("run should succeed");

        assert_eq!(provider.ensure_calls().len(), 3, "two rejections then success");
        assert_eq!(
            provider.ensure_calls().last().map(|loc| loc.zone.clone()),
            Some(String::from("us-east1-b"))
        );
        assert_eq!(report.outcome.stdout, "trained\n");
        assert!(report.outcome.succeeded);
        assert!(report.stranded.is_none());
        assert_eq!(
            provider.reap_calls(),
            vec![(
                Location::new("us-east1", "us-east1-b"),
                String::from("condor-run-test")
            )]
        );
    }

    #[tokio::test]
    async fn dropped_notebook_lines_are_reported() {
        let _guard = guard_env().await;
        let provider = FakeProvider::accepting(&["us-central1-a"]);
        let runner = ScriptedRunner::new();
        runner.push_success(); // scp
        runner.push_output(Some(0), "ok\n", ""); // ssh
        let orchestrator = orchestrator(&provider, &runner);

        let ctx = RunContext::silent();
        orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect("run should succeed");

        let entries = ctx.entries();
        assert!(
            entries
                .iter()
                .any(|entry| entry == "dropped notebook line: !pip install tensorflow"),
            "dropped line missing from the diagnostic log: {entries:?}"
        );
    }

    #[tokio::test]
    async fn invalid_spec_fails_before_the_location_search() {
        let _guard = guard_env().await;
        let provider = FakeProvider::accepting(&["us-central1-a"]);
        let runner = ScriptedRunner::new();
        let orchestrator = orchestrator(&provider, &runner);
        let mut bad_spec = spec();
        bad_spec.machine_type = String::new();

        let ctx = RunContext::silent();
        let err = orchestrator
            .execute(&ctx, &bad_spec, &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect_err("invalid spec expected");

        assert!(matches!(err, RunError::Spec(_)));
        assert!(provider.ensure_calls().is_empty(), "no location may be tried");
        assert!(provider.reap_calls().is_empty());
    }

    #[tokio::test]
    async fn exhausted_search_never_reaps() {
        let _guard = guard_env().await;
        let provider = FakeProvider::accepting(&[]);
        let runner = ScriptedRunner::new();
        let orchestrator = orchestrator(&provider, &runner);

        let ctx = RunContext::silent();
        let err = orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect_err("exhausted search expected");

        assert!(matches!(err, RunError::AllLocationsExhausted { attempts: 3 }));
        assert!(provider.reap_calls().is_empty(), "no instance was created");
        assert_eq!(provider.ensure_calls().len(), 3);
    }

    #[tokio::test]
    async fn readiness_timeout_still_reaps_exactly_once() {
        let _guard = guard_env().await;
        let mut provider = FakeProvider::accepting(&["us-central1-a"]);
        provider.wait_failure = Some(String::from("not ready after 600s"));
        let runner = ScriptedRunner::new();
        let orchestrator = orchestrator(&provider, &runner);

        let ctx = RunContext::silent();
        let err = orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect_err("readiness failure expected");

        assert!(matches!(err, RunError::Wait { .. }));
        assert_eq!(provider.reap_calls().len(), 1, "reap exactly once");
        let entries = ctx.entries();
        assert!(
            entries.iter().any(|entry| entry == "state: failed"),
            "terminal state should be failed: {entries:?}"
        );
    }

    #[tokio::test]
    async fn execution_failure_still_reaps() {
        let _guard = guard_env().await;
        let provider = FakeProvider::accepting(&["us-central1-a"]);
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "scp: connection refused"); // scp fails
        let orchestrator = orchestrator(&provider, &runner);

        let ctx = RunContext::silent();
        let err = orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect_err("execution failure expected");

        assert!(matches!(err, RunError::Execution { .. }));
        assert_eq!(provider.reap_calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_job_exit_reaps_and_reports_unsuccessful_outcome() {
        let _guard = guard_env().await;
        let provider = FakeProvider::accepting(&["us-central1-a"]);
        let runner = ScriptedRunner::new();
        runner.push_success(); // scp
        runner.push_output(Some(2), "", "Traceback"); // ssh
        let orchestrator = orchestrator(&provider, &runner);

        let ctx = RunContext::silent();
        let report = orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect("run completes even when the job fails");

        assert!(!report.outcome.succeeded);
        assert_eq!(provider.reap_calls().len(), 1);
        assert!(ctx.entries().iter().any(|entry| entry == "state: failed"));
    }

    #[tokio::test]
    async fn keep_instance_skips_reap_and_reports_stranded() {
        let _guard = guard_env().await;
        let provider = FakeProvider::accepting(&["us-central1-a"]);
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_output(Some(0), "done\n", "");
        let orchestrator = orchestrator(&provider, &runner).with_keep_instance(true);

        let ctx = RunContext::silent();
        let report = orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect("run should succeed");

        assert!(provider.reap_calls().is_empty());
        let stranded = report.stranded.expect("kept instance should be reported");
        assert_eq!(stranded.reason, StrandReason::KeptByRequest);
        assert_eq!(stranded.name, "condor-run-test");
    }

    #[tokio::test]
    async fn reap_failure_does_not_mask_a_successful_run() {
        let _guard = guard_env().await;
        let mut provider = FakeProvider::accepting(&["us-central1-a"]);
        provider.reap_failure = Some(String::from("permission denied"));
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_output(Some(0), "results stored\n", "");
        let orchestrator = orchestrator(&provider, &runner);

        let ctx = RunContext::silent();
        let report = orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect("job result must survive a teardown failure");

        assert!(report.outcome.succeeded);
        assert_eq!(report.outcome.stdout, "results stored\n");
        let stranded = report.stranded.expect("stranded instance expected");
        assert!(matches!(stranded.reason, StrandReason::ReapFailed { .. }));
    }

    #[tokio::test]
    async fn auth_failure_aborts_before_any_provisioning() {
        let _guard = guard_env().await;
        let provider = FakeProvider::accepting(&["us-central1-a"]);
        let probe_runner = ScriptedRunner::new();
        probe_runner.push_output(Some(1), "", "gcloud not initialised");
        let probe = CredentialProbe::new("gcloud", None, probe_runner);
        let executor = RemoteExecutor::new("demo-project", ScriptedRunner::new());
        let orchestrator = RunOrchestrator::new(probe, &provider, executor);

        let ctx = RunContext::silent();
        let err = orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect_err("auth failure expected");

        assert!(matches!(err, RunError::Auth(_)));
        assert!(provider.ensure_calls().is_empty());
        assert!(provider.reap_calls().is_empty());
    }

    #[tokio::test]
    async fn expired_deadline_aborts_execution_but_still_reaps() {
        let _guard = guard_env().await;
        let provider = FakeProvider::accepting(&["us-central1-a"]);
        let runner = ScriptedRunner::new();
        let orchestrator = orchestrator(&provider, &runner);

        let ctx = RunContext::with_timeout(Duration::ZERO);
        let err = orchestrator
            .execute(&ctx, &spec(), &candidates(), &job_script(), &BTreeMap::new())
            .await
            .expect_err("expired deadline expected");

        assert!(matches!(err, RunError::DeadlineExceeded { .. }));
        assert!(runner.invocations().is_empty(), "no remote command may start");
        assert_eq!(provider.reap_calls().len(), 1);
    }

    #[tokio::test]
    async fn end_to_end_zone_fallback_preserves_stdout_verbatim() {
        let _guard = guard_env().await;
        // Region us-central1 with zones [a, b]: zone a rejects on capacity,
        // zone b accepts; the run must succeed with the captured stdout.
        let provider = FakeProvider::accepting(&["us-central1-b"]);
        let runner = ScriptedRunner::new();
        runner.push_success(); // scp
        runner.push_output(Some(0), "epoch 1: loss 0.42\nsaved model\n", ""); // ssh
        let orchestrator = orchestrator(&provider, &runner);

        let ctx = RunContext::silent();
        let report = orchestrator
            .execute(
                &ctx,
                &spec(),
                &[
                    Location::new("us-central1", "us-central1-a"),
                    Location::new("us-central1", "us-central1-b"),
                ],
                &job_script(),
                &BTreeMap::new(),
            )
            .await
            .expect("run should succeed");

        assert_eq!(provider.ensure_calls().len(), 2);
        assert_eq!(report.outcome.stdout, "epoch 1: loss 0.42\nsaved model\n");
        assert!(report.stranded.is_none());
        assert!(ctx.entries().iter().any(|entry| entry == "state: done"));
    }
}
