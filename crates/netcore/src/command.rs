//! Shims for the two privileged binaries this crate shells out to: `ip`
//! and `iptables`.
//!
//! Both commands run synchronously via [`CommandRunner`], a small trait
//! that lets `BridgeProvisioner`, `InterfaceInspector`, and `PortMapper` be
//! unit-tested against a fake instead of real `ip`/`iptables` binaries.

use std::process::Command;

use crate::error::{NetError, Result};

/// Runs a named binary with arguments and returns its combined
/// stdout+stderr on success.
///
/// `run` mirrors `runIp`/`runIptables` from the source spec: locate the
/// binary on `PATH`, execute it synchronously, and on non-zero exit return
/// an error that names the joined argv. No retry.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning combined stdout+stderr.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

/// The real [`CommandRunner`], backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NetError::external_tool(format!("{program}: command not found"))
            } else {
                NetError::external_tool(format!("{program}: {e}"))
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(NetError::external_tool(format!(
                "{program} {} failed ({}): {}{}",
                args.join(" "),
                output.status,
                stdout,
                stderr
            )));
        }

        Ok(format!("{stdout}{stderr}"))
    }
}

/// Run `ip` with the given arguments.
pub fn run_ip(runner: &dyn CommandRunner, args: &[&str]) -> Result<String> {
    runner.run("ip", args)
}

/// Run `iptables` with the given arguments. Callers that don't need the
/// output (most of them — `iptables` writes little to stdout) can discard
/// the `Ok` value.
pub fn run_iptables(runner: &dyn CommandRunner, args: &[&str]) -> Result<String> {
    runner.run("iptables", args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_a_distinguishable_error() {
        let runner = SystemCommandRunner;
        let err = runner.run("this-binary-does-not-exist-xyz", &[]).unwrap_err();
        assert!(err.is_external_tool());
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn nonzero_exit_carries_joined_argv() {
        let runner = SystemCommandRunner;
        // `false` always exits 1 and is present on every POSIX system.
        let err = runner.run("false", &[]).unwrap_err();
        assert!(err.is_external_tool());
    }
}
