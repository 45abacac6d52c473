//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, a `condor.toml` configuration file, and
//! `CONDOR_*` environment variables. The config is the only place the
//! environment surface of the run is read; components receive plain values.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::provider::{InstanceSpec, Location};

/// Runner configuration derived from environment variables, configuration
/// files, and defaults.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CONDOR",
    discovery(
        app_name = "condor",
        env_var = "CONDOR_CONFIG_PATH",
        config_file_name = "condor.toml",
        dotfile_name = ".condor.toml",
        project_file_name = "condor.toml"
    )
)]
pub struct RunnerConfig {
    /// Project identifier used for billing and resource scoping. Loads as
    /// empty so [`RunnerConfig::validate`] can report the missing field with
    /// a remediation hint; operations that need a project must validate.
    #[ortho_config(default = String::new())]
    pub project_id: String,
    /// Preferred region tried first during placement.
    #[ortho_config(default = "us-central1".to_owned())]
    pub region: String,
    /// Machine class for the instance.
    #[ortho_config(default = "n1-standard-4".to_owned())]
    pub machine_type: String,
    /// Accelerator type attached to the instance.
    #[ortho_config(default = "nvidia-tesla-t4".to_owned())]
    pub accelerator_type: String,
    /// Number of accelerators to attach.
    #[ortho_config(default = 1)]
    pub accelerator_count: u32,
    /// Boot image family.
    #[ortho_config(default = "ubuntu-2204-lts".to_owned())]
    pub image_family: String,
    /// Project owning the boot image.
    #[ortho_config(default = "ubuntu-os-cloud".to_owned())]
    pub image_project: String,
    /// Boot disk size passed through to the provider.
    #[ortho_config(default = "200GB".to_owned())]
    pub boot_disk_size: String,
    /// Whether to delete the instance when the run finishes. When false the
    /// run prints manual deletion instructions instead of reaping.
    #[ortho_config(default = true)]
    pub delete_instance: bool,
    /// Seconds to wait for the instance to become reachable.
    #[ortho_config(default = 600)]
    pub readiness_timeout_secs: u64,
    /// Post-boot grace delay applied after the instance reports running.
    /// Covers SSH daemon startup that instance status does not capture;
    /// tune per image if the default proves wrong.
    #[ortho_config(default = 30)]
    pub boot_grace_secs: u64,
    /// Interval between readiness polls.
    #[ortho_config(default = 10)]
    pub poll_interval_secs: u64,
    /// Optional overall bound on remote execution, in seconds.
    pub run_timeout_secs: Option<u64>,
    /// Path to the `gcloud` executable.
    #[ortho_config(default = "gcloud".to_owned())]
    pub gcloud_bin: String,
    /// Explicit service-account key file. Falls back to
    /// `GOOGLE_APPLICATION_CREDENTIALS` when unset.
    pub credentials_file: Option<String>,
    /// Names of process environment variables forwarded to the remote job.
    #[ortho_config(default = Vec::new())]
    pub forward_env: Vec<String>,
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl RunnerConfig {
    fn require_field(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {field}: set CONDOR_{env_suffix} or add {field} to condor.toml",
                env_suffix = field.to_uppercase()
            )));
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files, and
    /// environment variables, without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("condor")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.project_id, "project_id")?;
        Self::require_field(&self.region, "region")?;
        Self::require_field(&self.machine_type, "machine_type")?;
        Self::require_field(&self.accelerator_type, "accelerator_type")?;
        Self::require_field(&self.image_family, "image_family")?;
        Self::require_field(&self.image_project, "image_project")?;
        Self::require_field(&self.boot_disk_size, "boot_disk_size")?;
        Self::require_field(&self.gcloud_bin, "gcloud_bin")?;
        Ok(())
    }

    /// Builds an [`InstanceSpec`] with a name unique to this run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn instance_spec(&self) -> Result<InstanceSpec, ConfigError> {
        self.validate()?;
        InstanceSpec::builder()
            .name(format!("condor-{}", Uuid::new_v4().simple()))
            .machine_type(&self.machine_type)
            .accelerator_type(&self.accelerator_type)
            .accelerator_count(self.accelerator_count)
            .image_family(&self.image_family)
            .image_project(&self.image_project)
            .boot_disk_size(&self.boot_disk_size)
            .build()
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Collects the forwarded environment variables that are actually set in
    /// the current process environment.
    #[must_use]
    pub fn forwarded_env(&self) -> BTreeMap<String, String> {
        self.forward_env
            .iter()
            .filter_map(|name| env::var(name).ok().map(|value| (name.clone(), value)))
            .collect()
    }

    /// Readiness polling timeout as a [`Duration`].
    #[must_use]
    pub const fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Post-boot grace delay as a [`Duration`].
    #[must_use]
    pub const fn boot_grace(&self) -> Duration {
        Duration::from_secs(self.boot_grace_secs)
    }

    /// Readiness polling interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Optional overall run timeout as a [`Duration`].
    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Returns the command for deleting a kept instance by hand.
    #[must_use]
    pub fn manual_delete_command(&self, location: &Location, name: &str) -> String {
        format!(
            "{} compute instances delete {name} --zone={} --project={}",
            self.gcloud_bin, location.zone, self.project_id
        )
    }
}
