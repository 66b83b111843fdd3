use std::{
    env, fs,
    io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};
use tracing::debug;

use super::{Captured, Host};
use crate::invocation::Invocation;

/// The machine we are running on
pub struct Native {}

impl Native {
    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        command
    }
}

/// Exit code the way a shell reports it, signals included
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

impl Host for Native {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn current_dir(&self) -> io::Result<PathBuf> {
        env::current_dir()
    }

    fn hostname(&self) -> Option<String> {
        // bash sets HOSTNAME without exporting it, so usually we end up in the files
        self.var("HOSTNAME")
            .into_iter()
            .chain(
                ["/proc/sys/kernel/hostname", "/etc/hostname"]
                    .into_iter()
                    .filter_map(|p| fs::read_to_string(p).ok()),
            )
            .map(|name| name.trim().to_string())
            .find(|name| !name.is_empty())
    }

    fn ensure_file(&self, path: &Path) -> io::Result<()> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(drop)
    }

    fn run(&self, invocation: &Invocation) -> io::Result<i32> {
        debug!("{}", invocation);

        let status = Self::command(invocation)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;

        Ok(exit_code(status))
    }

    fn capture(&self, invocation: &Invocation) -> io::Result<Captured> {
        debug!("{}", invocation);

        let output = Self::command(invocation)
            .stdin(Stdio::null())
            .output()?;

        Ok(Captured {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
