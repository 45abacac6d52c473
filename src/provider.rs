//! Provider abstraction for provisioning disposable accelerator instances.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// A (region, zone) pair considered for instance placement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Location {
    /// Provider region (for example `us-central1`).
    pub region: String,
    /// Availability zone within the region (for example `us-central1-a`).
    pub zone: String,
}

impl Location {
    /// Creates a location from a region and zone pair.
    #[must_use]
    pub fn new(region: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.zone)
    }
}

/// Parameters required to create a new instance.
///
/// The spec is immutable once built; the `name` must be unique per run so a
/// leftover instance from an earlier invocation is never mistaken for ours.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Instance name, unique per run.
    pub name: String,
    /// Machine class to request (for example `n1-standard-4`).
    pub machine_type: String,
    /// Accelerator type attached to the instance (for example
    /// `nvidia-tesla-t4`).
    pub accelerator_type: String,
    /// Number of accelerators to attach.
    pub accelerator_count: u32,
    /// Boot image family (for example `ubuntu-2204-lts`).
    pub image_family: String,
    /// Project owning the boot image (for example `ubuntu-os-cloud`).
    pub image_project: String,
    /// Boot disk size passed through to the provider (for example `200GB`).
    pub boot_disk_size: String,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::new()
    }

    /// Validates the spec, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any string field is empty or
    /// the accelerator count is zero.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::Validation("name".to_owned()));
        }
        if self.machine_type.is_empty() {
            return Err(SpecError::Validation("machine_type".to_owned()));
        }
        if self.accelerator_type.is_empty() {
            return Err(SpecError::Validation("accelerator_type".to_owned()));
        }
        if self.accelerator_count == 0 {
            return Err(SpecError::Validation("accelerator_count".to_owned()));
        }
        if self.image_family.is_empty() {
            return Err(SpecError::Validation("image_family".to_owned()));
        }
        if self.image_project.is_empty() {
            return Err(SpecError::Validation("image_project".to_owned()));
        }
        if self.boot_disk_size.is_empty() {
            return Err(SpecError::Validation("boot_disk_size".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`InstanceSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceSpecBuilder {
    name: String,
    machine_type: String,
    accelerator_type: String,
    accelerator_count: u32,
    image_family: String,
    image_project: String,
    boot_disk_size: String,
}

impl InstanceSpecBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the machine type.
    #[must_use]
    pub fn machine_type(mut self, value: impl Into<String>) -> Self {
        self.machine_type = value.into();
        self
    }

    /// Sets the accelerator type.
    #[must_use]
    pub fn accelerator_type(mut self, value: impl Into<String>) -> Self {
        self.accelerator_type = value.into();
        self
    }

    /// Sets the accelerator count.
    #[must_use]
    pub const fn accelerator_count(mut self, value: u32) -> Self {
        self.accelerator_count = value;
        self
    }

    /// Sets the boot image family.
    #[must_use]
    pub fn image_family(mut self, value: impl Into<String>) -> Self {
        self.image_family = value.into();
        self
    }

    /// Sets the project owning the boot image.
    #[must_use]
    pub fn image_project(mut self, value: impl Into<String>) -> Self {
        self.image_project = value.into();
        self
    }

    /// Sets the boot disk size.
    #[must_use]
    pub fn boot_disk_size(mut self, value: impl Into<String>) -> Self {
        self.boot_disk_size = value.into();
        self
    }

    /// Builds and validates the [`InstanceSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<InstanceSpec, SpecError> {
        let spec = InstanceSpec {
            name: self.name.trim().to_owned(),
            machine_type: self.machine_type.trim().to_owned(),
            accelerator_type: self.accelerator_type.trim().to_owned(),
            accelerator_count: self.accelerator_count,
            image_family: self.image_family.trim().to_owned(),
            image_project: self.image_project.trim().to_owned(),
            boot_disk_size: self.boot_disk_size.trim().to_owned(),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Handle for an instance that exists at the provider.
///
/// The orchestrator exclusively owns the handle for the lifetime of a run and
/// is the only component allowed to reap it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Instance name as known to the provider.
    pub name: String,
    /// Location the instance was placed in.
    pub location: Location,
    /// External address, populated once the provider reports network
    /// interfaces. Required before remote execution may proceed.
    pub external_ip: Option<IpAddr>,
}

/// Result of an idempotent provisioning call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Provisioned {
    /// The instance was created by this call.
    Created,
    /// An instance with this name already existed at the location.
    AlreadyExists,
}

/// Result of an idempotent delete call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reaped {
    /// The instance was deleted by this call.
    Deleted,
    /// No instance with this name existed at the location.
    AlreadyAbsent,
}

/// Errors raised while constructing instance specs.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a spec is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal capability interface implemented by compute providers.
///
/// The orchestrator only ever talks to this trait; the real implementation
/// drives the `gcloud` CLI and tests substitute an in-memory fake.
pub trait ComputeProvider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Ensures an instance matching `spec` exists at `location`.
    ///
    /// Implementations must be idempotent: an instance that already exists is
    /// reported as [`Provisioned::AlreadyExists`] rather than recreated.
    fn ensure<'a>(
        &'a self,
        spec: &'a InstanceSpec,
        location: &'a Location,
    ) -> ProviderFuture<'a, Provisioned, Self::Error>;

    /// Blocks until the instance is running and reachable, bounded by
    /// `timeout`, and returns a handle carrying the external address.
    fn wait_for_ready<'a>(
        &'a self,
        location: &'a Location,
        name: &'a str,
        timeout: Duration,
    ) -> ProviderFuture<'a, InstanceHandle, Self::Error>;

    /// Deletes the instance. A missing instance is reported as
    /// [`Reaped::AlreadyAbsent`], never as an error.
    fn reap<'a>(
        &'a self,
        location: &'a Location,
        name: &'a str,
    ) -> ProviderFuture<'a, Reaped, Self::Error>;
}
