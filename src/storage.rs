//! Object storage uploads through the `gcloud` CLI.
//!
//! Auxiliary to the run flow: jobs occasionally need a dataset or artifact
//! pushed to a bucket first, so the binary exposes this as its own
//! subcommand rather than wiring it into the orchestrator.

use std::ffi::OsString;

use camino::Utf8Path;
use thiserror::Error;

use crate::command::{CommandError, CommandRunner};

/// Errors raised while uploading to object storage.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StorageError {
    /// Raised when the local source file does not exist.
    #[error("upload source missing: {path}")]
    MissingSource {
        /// Path that was expected to be uploaded.
        path: String,
    },
    /// Raised when the upload command fails.
    #[error("upload to {uri} failed: {detail}")]
    UploadFailed {
        /// Destination URI of the attempted upload.
        uri: String,
        /// Failure detail from the CLI.
        detail: String,
    },
    /// Raised when the CLI cannot be started.
    #[error(transparent)]
    Runner(#[from] CommandError),
}

/// Uploads local files to provider object storage.
#[derive(Clone, Debug)]
pub struct ObjectStore<R: CommandRunner> {
    gcloud_bin: String,
    runner: R,
}

impl<R: CommandRunner> ObjectStore<R> {
    /// Creates a store using the given runner.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            gcloud_bin: crate::gcloud::DEFAULT_GCLOUD_BIN.to_owned(),
            runner,
        }
    }

    /// Overrides the path to the `gcloud` executable.
    #[must_use]
    pub fn with_gcloud_bin(mut self, bin: impl Into<String>) -> Self {
        self.gcloud_bin = bin.into();
        self
    }

    /// Uploads `source` to `bucket` under `dest_key` and returns the
    /// resulting `gs://` URI.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the source is missing, the upload
    /// fails, or the CLI cannot be started.
    pub fn upload(
        &self,
        bucket: &str,
        source: &Utf8Path,
        dest_key: &str,
    ) -> Result<String, StorageError> {
        if !source.is_file() {
            return Err(StorageError::MissingSource {
                path: source.to_string(),
            });
        }

        let uri = format!("gs://{bucket}/{dest_key}");
        let args = vec![
            OsString::from("storage"),
            OsString::from("cp"),
            OsString::from(source.as_str()),
            OsString::from(&uri),
            OsString::from("--quiet"),
        ];

        let output = self.runner.run(&self.gcloud_bin, &args)?;
        if output.is_success() {
            return Ok(uri);
        }
        Err(StorageError::UploadFailed {
            uri,
            detail: output.stderr.trim().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use camino::Utf8PathBuf;

    fn temp_source() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("dataset.csv");
        std::fs::write(&path, "a,b\n1,2\n").expect("write source file");
        let path = Utf8PathBuf::from_path_buf(path).expect("utf8 path");
        (dir, path)
    }

    #[test]
    fn upload_returns_destination_uri() {
        let (_dir, source) = temp_source();
        let runner = ScriptedRunner::new();
        runner.push_success();
        let store = ObjectStore::new(runner.clone());

        let uri = store
            .upload("models-bucket", &source, "inputs/dataset.csv")
            .expect("upload should succeed");

        assert_eq!(uri, "gs://models-bucket/inputs/dataset.csv");
        let invocation = runner.invocations()[0].command_string();
        assert!(invocation.contains("storage cp"), "{invocation}");
        assert!(invocation.ends_with("gs://models-bucket/inputs/dataset.csv --quiet"), "{invocation}");
    }

    #[test]
    fn missing_source_fails_before_running_the_cli() {
        let runner = ScriptedRunner::new();
        let store = ObjectStore::new(runner.clone());
        let source = Utf8PathBuf::from("/nonexistent/dataset.csv");

        let err = store
            .upload("models-bucket", &source, "inputs/dataset.csv")
            .expect_err("missing source expected");

        assert!(matches!(err, StorageError::MissingSource { .. }));
        assert!(runner.invocations().is_empty());
    }

    #[test]
    fn failed_upload_reports_the_uri() {
        let (_dir, source) = temp_source();
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "AccessDeniedException: 403");
        let store = ObjectStore::new(runner);

        let err = store
            .upload("models-bucket", &source, "inputs/dataset.csv")
            .expect_err("upload failure expected");

        let StorageError::UploadFailed { uri, detail } = err else {
            panic!("expected UploadFailed, got {err:?}");
        };
        assert_eq!(uri, "gs://models-bucket/inputs/dataset.csv");
        assert!(detail.contains("403"));
    }
}
