pub mod native;

use crate::invocation::Invocation;
use std::{
    io,
    path::{Path, PathBuf},
};

/// Output of a command whose stdout we need
#[derive(Clone, Debug, Default)]
pub struct Captured {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// - Reads the invoking environment
/// - Runs external commands (inheriting the terminal, or captured)
/// - Creates files the runtime would otherwise create wrongly
pub trait Host {
    fn var(&self, key: &str) -> Option<String>;
    fn current_dir(&self) -> io::Result<PathBuf>;
    /// the host's network name, if it can be found
    fn hostname(&self) -> Option<String>;
    /// create `path` empty if missing, never truncate it
    fn ensure_file(&self, path: &Path) -> io::Result<()>;
    /// run in the foreground, returning the shell-style exit code
    fn run(&self, invocation: &Invocation) -> io::Result<i32>;
    fn capture(&self, invocation: &Invocation) -> io::Result<Captured>;
}
