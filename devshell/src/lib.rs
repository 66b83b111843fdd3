pub mod config;
pub mod host;
pub mod invocation;
pub mod job;
pub mod launcher;
pub mod ps;
pub mod session;
