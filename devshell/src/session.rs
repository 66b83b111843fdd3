use anyhow::Context;
use std::io::{self, Write};
use tracing::{error, info, warn};

use crate::{
    config::Config,
    host::Host,
    launcher::{self, Environment, LaunchPlan},
};

/// Shell convention for "command not found"
const NOT_FOUND: i32 = 127;
/// Shell convention for "found but not executable"
const NOT_EXECUTABLE: i32 = 126;

/// Reads the environment, plans, then either prints or runs the plan
pub fn launch<H: Host>(host: &H, config: &Config, dry_run: bool) -> anyhow::Result<i32> {
    let env = Environment::capture(host, config).context("reading the environment")?;
    let plan = launcher::plan(config, &env);

    if dry_run {
        print_plan(&plan, &mut io::stdout().lock())?;
        return Ok(0);
    }

    execute(host, &plan)
}

/// One command per line, in the order they would run
pub fn print_plan<W: Write>(plan: &LaunchPlan, out: &mut W) -> io::Result<()> {
    for invocation in plan.invocations() {
        writeln!(out, "{}", invocation)?;
    }
    Ok(())
}

/// Runs the plan and hands back the runtime's exit code as-is
pub fn execute<H: Host>(host: &H, plan: &LaunchPlan) -> anyhow::Result<i32> {
    if let Some(grant) = &plan.display_grant {
        // the session is still useful without a display, so keep going
        match host.run(grant) {
            Ok(0) => info!("display access granted"),
            Ok(code) => warn!(code, "`{}` failed", grant),
            Err(err) => warn!("could not run `{}`: {}", grant, err),
        }
    }

    if let Err(err) = host.ensure_file(&plan.history) {
        warn!("could not create {}: {}", plan.history.display(), err);
    }

    info!("starting session: {}", plan.run);

    match host.run(&plan.run) {
        Ok(code) => {
            info!(code, "session ended");
            Ok(code)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            error!("{}: command not found", plan.run.program);
            Ok(NOT_FOUND)
        }
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            error!("{}: {}", plan.run.program, err);
            Ok(NOT_EXECUTABLE)
        }
        Err(err) => Err(err).with_context(|| format!("starting {}", plan.run.program)),
    }
}
