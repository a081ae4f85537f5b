use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::debug;

use super::handle::ProcessHandle;
use crate::config::{PackageManagerConfig, SandboxConfig};
use crate::error::ExecError;

/// Runs shell command lines with a sandbox directory as the filesystem root.
///
/// Implementations must publish the child's pid on `handle` for as long as it
/// runs and clear it afterwards, on success and failure alike.
pub trait SandboxRunner {
    /// Run `command`, streaming its output to ours.
    fn run(&self, handle: &ProcessHandle, root: &Path, command: &str) -> Result<(), ExecError>;

    /// Run `command` and return what it wrote to stdout.
    fn output(&self, handle: &ProcessHandle, root: &Path, command: &str)
    -> Result<String, ExecError>;
}

impl<R: SandboxRunner + ?Sized> SandboxRunner for &R {
    fn run(&self, handle: &ProcessHandle, root: &Path, command: &str) -> Result<(), ExecError> {
        (**self).run(handle, root, command)
    }

    fn output(
        &self,
        handle: &ProcessHandle,
        root: &Path,
        command: &str,
    ) -> Result<String, ExecError> {
        (**self).output(handle, root, command)
    }
}

/// Executes `chroot <root> <shell> -c <command>` in a fresh session.
#[derive(Debug, Clone)]
pub struct ChrootRunner {
    chroot: PathBuf,
    shell: String,
    env: Vec<(String, String)>,
}

impl ChrootRunner {
    pub fn new(config: &SandboxConfig) -> Self {
        let mut env = vec![
            ("PATH".to_string(), config.path.clone()),
            ("HOME".to_string(), "/root".to_string()),
            ("LANG".to_string(), "C".to_string()),
        ];
        for (key, value) in &config.env {
            match env.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => env.push((key.clone(), value.clone())),
            }
        }

        Self {
            chroot: PathBuf::from(&config.chroot),
            shell: config.shell.clone(),
            env,
        }
    }

    fn command(&self, root: &Path, command: &str) -> Command {
        let mut cmd = Command::new(&self.chroot);
        cmd.arg(root)
            .arg(&self.shell)
            .arg("-c")
            .arg(command)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());

        // Own session, so the handle can signal the whole process group.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: setsid is async-signal-safe and touches no parent state.
            unsafe {
                cmd.pre_exec(|| {
                    nix::unistd::setsid().map_err(io::Error::from)?;
                    Ok(())
                });
            }
        }

        cmd
    }

    fn spawn(&self, mut cmd: Command, command: &str) -> Result<Child, ExecError> {
        debug!("Executing in sandbox: {}", command);
        cmd.spawn().map_err(|source| ExecError::Spawn {
            command: command.to_string(),
            source,
        })
    }
}

impl SandboxRunner for ChrootRunner {
    fn run(&self, handle: &ProcessHandle, root: &Path, command: &str) -> Result<(), ExecError> {
        let mut cmd = self.command(root, command);
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());

        let mut child = self.spawn(cmd, command)?;
        let status = {
            let _active = handle.track(child.id());
            child.wait()
        };
        let status = status.map_err(|source| ExecError::Wait {
            command: command.to_string(),
            source,
        })?;
        check_status(status, command)
    }

    fn output(
        &self,
        handle: &ProcessHandle,
        root: &Path,
        command: &str,
    ) -> Result<String, ExecError> {
        let mut cmd = self.command(root, command);
        cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());

        let child = self.spawn(cmd, command)?;
        let output = {
            let _active = handle.track(child.id());
            child.wait_with_output()
        };
        let output = output.map_err(|source| ExecError::Wait {
            command: command.to_string(),
            source,
        })?;
        check_status(output.status, command)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn check_status(status: ExitStatus, command: &str) -> Result<(), ExecError> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(ExecError::Status {
            command: command.to_string(),
            code,
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ExecError::Signaled {
                command: command.to_string(),
                signal,
            });
        }
    }

    Err(ExecError::Status {
        command: command.to_string(),
        code: -1,
    })
}

/// Quote `arg` for `/bin/sh`, leaving plain words untouched.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Full package-manager invocation: binary, configured extra flags, `args`.
pub fn package_manager_command(config: &PackageManagerConfig, args: &[&str]) -> String {
    std::iter::once(config.binary.as_str())
        .chain(config.extra_args.iter().map(String::as_str))
        .chain(args.iter().copied())
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Command line that regenerates the index of the repo mounted at
/// `repo_dir` (an in-sandbox path).
pub fn reindex_command(repo_dir: &Path, config: &PackageManagerConfig) -> String {
    format!(
        "cd {} && {}",
        shell_quote(&repo_dir.to_string_lossy()),
        package_manager_command(config, &["index", "--skip-signing", "."])
    )
}
