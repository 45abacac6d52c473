//! Compute provider backed by the `gcloud` CLI.
//!
//! Every operation is a `gcloud compute instances` invocation through the
//! [`CommandRunner`] abstraction, with `--format=json` output parsed via
//! serde. The orchestrator never sees the transport; it only talks to the
//! [`ComputeProvider`] trait.

mod error;

use std::ffi::OsString;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::time::sleep;

use crate::command::{CommandOutput, CommandRunner};
use crate::provider::{
    ComputeProvider, InstanceHandle, InstanceSpec, Location, Provisioned, ProviderFuture, Reaped,
};

pub use error::GcloudError;

/// Default path to the `gcloud` executable.
pub const DEFAULT_GCLOUD_BIN: &str = "gcloud";

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const BOOT_GRACE: Duration = Duration::from_secs(30);

/// Instance status reported by the provider once the VM is started.
const STATUS_RUNNING: &str = "RUNNING";

/// Provider that drives Compute Engine through the `gcloud` CLI.
#[derive(Clone, Debug)]
pub struct GcloudCompute<R: CommandRunner> {
    gcloud_bin: String,
    project: String,
    poll_interval: Duration,
    boot_grace: Duration,
    runner: R,
}

/// Subset of `gcloud compute instances describe --format=json` we consume.
#[derive(Clone, Debug, Deserialize)]
struct InstanceSnapshot {
    status: String,
    #[serde(default, rename = "networkInterfaces")]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Clone, Debug, Deserialize)]
struct NetworkInterface {
    #[serde(default, rename = "accessConfigs")]
    access_configs: Vec<AccessConfig>,
}

#[derive(Clone, Debug, Deserialize)]
struct AccessConfig {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

impl InstanceSnapshot {
    /// First NAT address reported across network interfaces, if any.
    fn external_ip(&self) -> Option<IpAddr> {
        self.network_interfaces
            .iter()
            .flat_map(|interface| interface.access_configs.iter())
            .filter_map(|config| config.nat_ip.as_deref())
            .find_map(|address| IpAddr::from_str(address).ok())
    }
}

impl<R: CommandRunner> GcloudCompute<R> {
    /// Creates a provider scoped to `project` using the given runner.
    #[must_use]
    pub fn new(project: impl Into<String>, runner: R) -> Self {
        Self {
            gcloud_bin: DEFAULT_GCLOUD_BIN.to_owned(),
            project: project.into(),
            poll_interval: POLL_INTERVAL,
            boot_grace: BOOT_GRACE,
            runner,
        }
    }

    /// Overrides the path to the `gcloud` executable.
    #[must_use]
    pub fn with_gcloud_bin(mut self, bin: impl Into<String>) -> Self {
        self.gcloud_bin = bin.into();
        self
    }

    /// Overrides the readiness polling interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the post-boot grace delay applied after the instance
    /// reports `RUNNING`. Status alone does not capture SSH daemon startup,
    /// so readiness is only declared after this delay.
    #[must_use]
    pub const fn with_boot_grace(mut self, grace: Duration) -> Self {
        self.boot_grace = grace;
        self
    }

    fn scope_args(&self, zone: &str) -> Vec<OsString> {
        vec![
            OsString::from("--zone"),
            OsString::from(zone),
            OsString::from("--project"),
            OsString::from(&self.project),
        ]
    }

    fn describe(&self, location: &Location, name: &str) -> Result<Option<CommandOutput>, GcloudError> {
        let mut args = vec![
            OsString::from("compute"),
            OsString::from("instances"),
            OsString::from("describe"),
            OsString::from(name),
        ];
        args.extend(self.scope_args(&location.zone));
        args.push(OsString::from("--format=json"));
        args.push(OsString::from("--quiet"));

        let output = self.runner.run(&self.gcloud_bin, &args)?;
        if output.is_success() {
            Ok(Some(output))
        } else {
            // Describe fails for absent instances; the caller decides whether
            // absence is acceptable.
            Ok(None)
        }
    }

    fn snapshot(&self, location: &Location, name: &str) -> Result<Option<InstanceSnapshot>, GcloudError> {
        let Some(output) = self.describe(location, name)? else {
            return Ok(None);
        };
        serde_json::from_str::<InstanceSnapshot>(&output.stdout)
            .map(Some)
            .map_err(|err| GcloudError::Parse {
                operation: "describe".to_owned(),
                message: err.to_string(),
            })
    }

    fn create(&self, spec: &InstanceSpec, location: &Location) -> Result<(), GcloudError> {
        let mut args = vec![
            OsString::from("compute"),
            OsString::from("instances"),
            OsString::from("create"),
            OsString::from(&spec.name),
        ];
        args.extend(self.scope_args(&location.zone));
        args.extend([
            OsString::from("--machine-type"),
            OsString::from(&spec.machine_type),
            OsString::from("--accelerator"),
            OsString::from(format!(
                "type={},count={}",
                spec.accelerator_type, spec.accelerator_count
            )),
            OsString::from("--image-family"),
            OsString::from(&spec.image_family),
            OsString::from("--image-project"),
            OsString::from(&spec.image_project),
            OsString::from("--boot-disk-size"),
            OsString::from(&spec.boot_disk_size),
            OsString::from("--maintenance-policy"),
            OsString::from("TERMINATE"),
            OsString::from("--scopes"),
            OsString::from("cloud-platform"),
            OsString::from("--metadata"),
            OsString::from("install-nvidia-driver=True"),
            OsString::from("--quiet"),
        ]);

        let output = self.runner.run(&self.gcloud_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(GcloudError::ProvisionRejected {
            name: spec.name.clone(),
            location: location.to_string(),
            detail: failure_detail(&output),
        })
    }

    async fn wait_loop(
        &self,
        location: &Location,
        name: &str,
        timeout: Duration,
    ) -> Result<InstanceHandle, GcloudError> {
        let deadline = Instant::now() + timeout;
        let mut grace_applied = false;

        while Instant::now() <= deadline {
            let Some(snapshot) = self.snapshot(location, name)? else {
                sleep(self.poll_interval).await;
                continue;
            };

            if snapshot.status != STATUS_RUNNING {
                sleep(self.poll_interval).await;
                continue;
            }

            if !grace_applied {
                sleep(self.boot_grace).await;
                grace_applied = true;
            }

            if let Some(address) = snapshot.external_ip() {
                return Ok(InstanceHandle {
                    name: name.to_owned(),
                    location: location.clone(),
                    external_ip: Some(address),
                });
            }

            sleep(self.poll_interval).await;
        }

        Err(GcloudError::ReadinessTimeout {
            name: name.to_owned(),
            zone: location.zone.clone(),
            waited_secs: timeout.as_secs(),
        })
    }

    fn delete(&self, location: &Location, name: &str) -> Result<Reaped, GcloudError> {
        let mut args = vec![
            OsString::from("compute"),
            OsString::from("instances"),
            OsString::from("delete"),
            OsString::from(name),
        ];
        args.extend(self.scope_args(&location.zone));
        args.push(OsString::from("--quiet"));

        let output = self.runner.run(&self.gcloud_bin, &args)?;
        if output.is_success() {
            return Ok(Reaped::Deleted);
        }
        if output.stderr.to_ascii_lowercase().contains("not found") {
            return Ok(Reaped::AlreadyAbsent);
        }
        Err(GcloudError::ReapFailed {
            name: name.to_owned(),
            zone: location.zone.clone(),
            detail: failure_detail(&output),
        })
    }
}

fn failure_detail(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        output
            .code
            .map_or_else(|| String::from("terminated without exit status"), |code| {
                format!("exited with status {code}")
            })
    } else {
        stderr.to_owned()
    }
}

impl<R> ComputeProvider for GcloudCompute<R>
where
    R: CommandRunner + Send + Sync,
{
    type Error = GcloudError;

    fn ensure<'a>(
        &'a self,
        spec: &'a InstanceSpec,
        location: &'a Location,
    ) -> ProviderFuture<'a, Provisioned, Self::Error> {
        Box::pin(async move {
            spec.validate()?;
            if self.describe(location, &spec.name)?.is_some() {
                return Ok(Provisioned::AlreadyExists);
            }
            self.create(spec, location)?;
            Ok(Provisioned::Created)
        })
    }

    fn wait_for_ready<'a>(
        &'a self,
        location: &'a Location,
        name: &'a str,
        timeout: Duration,
    ) -> ProviderFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(self.wait_loop(location, name, timeout))
    }

    fn reap<'a>(
        &'a self,
        location: &'a Location,
        name: &'a str,
    ) -> ProviderFuture<'a, Reaped, Self::Error> {
        Box::pin(async move { self.delete(location, name) })
    }
}
