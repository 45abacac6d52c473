//! Credential probe gating the run before any billable resource is touched.
//!
//! The probe resolves an identity in the same order the provider tooling
//! does: an explicit service-account key file first, then the ambient
//! session held by the local `gcloud` installation. It performs no side
//! effects beyond the check and runs exactly once per run.

use std::env;
use std::ffi::OsString;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::command::{CommandError, CommandRunner};

/// Environment variable naming an explicit service-account key file.
pub const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Where the resolved credential came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CredentialSource {
    /// A service-account key file present on disk.
    ExplicitFile(Utf8PathBuf),
    /// The active account of the local provider CLI session.
    AmbientSession {
        /// Account name reported by the CLI.
        account: String,
    },
}

/// A resolved provider identity. Resolved once at orchestrator start and
/// never mutated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credential {
    /// Origin of the credential.
    pub source: CredentialSource,
}

/// Errors raised while probing for credentials.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AuthError {
    /// Raised when the CLI used for the ambient check cannot be started.
    #[error(transparent)]
    Runner(#[from] CommandError),
    /// Raised when neither an explicit key file nor an ambient session is
    /// available.
    #[error(
        "no provider credential found: set {CREDENTIALS_FILE_ENV} to a key \
         file or run `gcloud auth application-default login`"
    )]
    NoCredential,
}

/// Verifies that a usable provider identity exists.
#[derive(Clone, Debug)]
pub struct CredentialProbe<R: CommandRunner> {
    gcloud_bin: String,
    explicit_file: Option<Utf8PathBuf>,
    runner: R,
}

impl<R: CommandRunner> CredentialProbe<R> {
    /// Creates a probe. `explicit_file` overrides the environment lookup;
    /// when `None`, [`CREDENTIALS_FILE_ENV`] is consulted instead.
    #[must_use]
    pub fn new(gcloud_bin: impl Into<String>, explicit_file: Option<Utf8PathBuf>, runner: R) -> Self {
        Self {
            gcloud_bin: gcloud_bin.into(),
            explicit_file,
            runner,
        }
    }

    /// Resolves a credential, preferring an explicit key file.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoCredential`] when no identity is available, or
    /// [`AuthError::Runner`] when the ambient check cannot be executed.
    pub fn probe(&self) -> Result<Credential, AuthError> {
        if let Some(path) = self.explicit_path() {
            if path.is_file() {
                return Ok(Credential {
                    source: CredentialSource::ExplicitFile(path),
                });
            }
        }

        self.probe_ambient_session()
    }

    fn explicit_path(&self) -> Option<Utf8PathBuf> {
        if let Some(path) = &self.explicit_file {
            return Some(path.clone());
        }
        env::var(CREDENTIALS_FILE_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(Utf8PathBuf::from)
    }

    fn probe_ambient_session(&self) -> Result<Credential, AuthError> {
        let args = vec![
            OsString::from("auth"),
            OsString::from("list"),
            OsString::from("--filter=status:ACTIVE"),
            OsString::from("--format=value(account)"),
            OsString::from("--quiet"),
        ];
        let output = self.runner.run(&self.gcloud_bin, &args)?;

        let account = output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty());
        match account {
            Some(account) if output.is_success() => Ok(Credential {
                source: CredentialSource::AmbientSession {
                    account: account.to_owned(),
                },
            }),
            _ => Err(AuthError::NoCredential),
        }
    }
}
