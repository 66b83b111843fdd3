use std::{path::PathBuf, process::exit};

use devshell::{
    config::{Config, CONFIG_ENV},
    host::{native::Native, Host},
    job::JobArgs,
    ps::PsArgs,
    session,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(argh::FromArgs)]
/// start an interactive shell in the gpu development container
struct Arguments {
    #[argh(switch, short = 'n')]
    /// print the commands instead of running them
    dry_run: bool,

    #[argh(option, short = 'c')]
    /// json file overriding the built-in settings
    config: Option<PathBuf>,

    #[argh(switch, short = 'v')]
    /// log what is being done
    verbose: bool,

    #[argh(switch)]
    /// log even more
    debug: bool,

    #[argh(subcommand)]
    command: Option<Command>,
}

#[derive(argh::FromArgs)]
#[argh(subcommand)]
enum Command {
    Ps(PsArgs),
    Job(JobArgs),
}

fn run(args: Arguments) -> anyhow::Result<i32> {
    let host = Native {};

    let config_path = args
        .config
        .or_else(|| host.var(CONFIG_ENV).map(PathBuf::from));
    let config = Config::load(config_path.as_deref())?;

    match args.command {
        None => session::launch(&host, &config, args.dry_run),
        Some(Command::Ps(ps)) => ps.run(&config).map(|_| 0),
        Some(Command::Job(job)) => job.run(&host, &config, args.dry_run).map(|_| 0),
    }
}

fn main() {
    let args: Arguments = argh::from_env();

    // stderr, so the session and printed commands stay clean
    let level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args) {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("Error: {:?}", err);
            exit(1);
        }
    }
}
