//! Composition of the remote job command string.
//!
//! The job runs on a freshly booted Ubuntu image, so the command installs
//! the Python toolchain and the job's dependencies before invoking the
//! script. Forwarded environment values are shell-escaped and exported
//! first so the script can read them through `os.environ`.

use std::collections::BTreeMap;

use shell_escape::unix::escape;

/// Remote directory receiving the staged script.
pub const REMOTE_SCRIPT_DIR: &str = "/tmp";

/// Python packages the job domain requires on the remote host.
pub const JOB_DEPENDENCIES: [&str; 6] = [
    "pandas",
    "numpy",
    "scikit-learn",
    "tensorflow",
    "matplotlib",
    "pymongo",
];

/// Builds the full remote command: exports, dependency install, then the
/// script invocation. `env_vars` iterates in key order, so the rendered
/// command is deterministic.
#[must_use]
pub fn build_job_command(env_vars: &BTreeMap<String, String>, remote_script_path: &str) -> String {
    let mut command = String::new();
    for (key, value) in env_vars {
        let escaped_value = escape(value.as_str().into());
        command.push_str("export ");
        command.push_str(key);
        command.push('=');
        command.push_str(escaped_value.as_ref());
        command.push_str("; ");
    }

    let escaped_script = escape(remote_script_path.into());
    command.push_str(&format!(
        concat!(
            "cd {dir} && ",
            "sudo apt-get update -qq && ",
            "sudo apt-get install -y -qq python3-pip python3-dev && ",
            "pip3 install --quiet {deps} && ",
            "python3 {script}"
        ),
        dir = REMOTE_SCRIPT_DIR,
        deps = JOB_DEPENDENCIES.join(" "),
        script = escaped_script,
    ));
    command
}
