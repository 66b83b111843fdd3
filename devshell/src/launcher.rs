//! Turns the config and the invoking environment into the commands of a launch.
//!
//! Nothing in here touches the host; [`crate::session`] does that.

use std::{io, path::PathBuf};
use tracing::{debug, warn};

use crate::{
    config::{Config, Mount},
    host::Host,
    invocation::Invocation,
};

/// What we read from the invoking shell
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    pub cwd: PathBuf,
    pub hostname: Option<String>,
    /// forwarded variables in config order, `None` when unset
    pub forwarded: Vec<(String, Option<String>)>,
}

impl Environment {
    pub fn capture<H: Host>(host: &H, config: &Config) -> io::Result<Self> {
        let cwd = host.current_dir()?;

        let hostname = host.hostname();
        if hostname.is_none() {
            warn!("could not find the host name, keeping the runtime's default");
        }

        let forwarded = config
            .forward_env
            .iter()
            .map(|name| {
                let value = host.var(name);
                if value.is_none() {
                    warn!("{} is not set, forwarding it empty", name);
                }
                (name.clone(), value)
            })
            .collect();

        let env = Self {
            cwd,
            hostname,
            forwarded,
        };
        debug!("{:?}", env);
        Ok(env)
    }
}

/// Everything a launch does, in order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchPlan {
    pub display_grant: Option<Invocation>,
    /// must exist before the run, or the runtime makes a directory out of it
    pub history: PathBuf,
    pub run: Invocation,
}

impl LaunchPlan {
    pub fn invocations(&self) -> impl Iterator<Item = &Invocation> {
        self.display_grant.iter().chain(std::iter::once(&self.run))
    }
}

/// Lets any local client talk to the X server
pub fn display_grant() -> Invocation {
    Invocation::new("xhost").arg("+")
}

/// project, data directories, X11 socket, history; in that order
pub fn mounts(config: &Config, env: &Environment) -> Vec<Mount> {
    let mut mounts = Vec::with_capacity(config.data_mounts.len() + 3);
    mounts.push(Mount::new(&env.cwd, &config.project_target));
    mounts.extend(config.data_mounts.iter().map(|m| m.resolve(&env.cwd)));
    mounts.push(Mount::identity(&config.x11_socket));
    mounts.push(config.history.resolve(&env.cwd));
    mounts
}

pub fn run_invocation(config: &Config, env: &Environment) -> Invocation {
    let mut run = Invocation::new(config.runtime.binary())
        .arg("run")
        .arg(format!("--gpus={}", config.gpus))
        .args(["--rm", "-it"])
        .arg(format!("--shm-size={}", config.shm_size));

    for mount in mounts(config, env) {
        run = run.arg("-v").arg(mount.spec());
    }

    for (name, value) in &env.forwarded {
        run = run
            .arg("-e")
            .arg(format!("{}={}", name, value.as_deref().unwrap_or_default()));
    }

    if let Some(hostname) = &env.hostname {
        run = run.arg("-h").arg(hostname);
    }

    if config.privileged {
        run = run.arg("--privileged");
    }

    run.arg(&config.image).args(&config.command)
}

pub fn plan(config: &Config, env: &Environment) -> LaunchPlan {
    LaunchPlan {
        display_grant: config.grant_display_access.then(display_grant),
        history: config.history.resolve(&env.cwd).host,
        run: run_invocation(config, env),
    }
}

#[cfg(test)]
mod tests {
    use super::{mounts, plan, Environment};
    use crate::{
        config::Config,
        host::{fake::FakeHost, Host},
    };
    use std::path::PathBuf;

    fn env(cwd: &str, display: Option<&str>) -> Environment {
        Environment {
            cwd: PathBuf::from(cwd),
            hostname: Some(String::from("workstation")),
            forwarded: vec![(String::from("DISPLAY"), display.map(String::from))],
        }
    }

    #[test]
    fn full_command_line() {
        let plan = plan(&Config::default(), &env("/home/me/sceneflow", Some(":1")));

        assert_eq!(plan.display_grant.as_ref().unwrap().to_string(), "xhost +");
        assert_eq!(
            plan.run.to_string(),
            "docker run --gpus=all --rm -it --shm-size=16gb \
             -v /home/me/sceneflow:/project \
             -v /efs:/efs -v /efs2:/efs2 -v /bigdata:/bigdata -v /Datasets:/Datasets \
             -v /tmp/.X11-unix:/tmp/.X11-unix \
             -v /home/me/sceneflow/docker_history.txt:/root/.bash_history \
             -e DISPLAY=:1 -h workstation --privileged kylevedder/offline_sceneflow:latest"
        );
        assert_eq!(
            plan.history,
            PathBuf::from("/home/me/sceneflow/docker_history.txt")
        );
    }

    #[test]
    fn seven_mounts() {
        let config = Config::default();
        let env = env("/work", Some(":0"));
        assert_eq!(mounts(&config, &env).len(), 7);
        assert_eq!(plan(&config, &env).run.values_of("-v").count(), 7);
    }

    #[test]
    fn any_cwd_is_the_project() {
        for cwd in ["/", "/home/me", "/tmp/with space", "/srv/a/b/c"] {
            let plan = plan(&Config::default(), &env(cwd, Some(":0")));
            let expected = format!("{}:/project", cwd);
            assert!(
                plan.run.values_of("-v").any(|v| v == expected),
                "{cwd}: {:?}",
                plan.run
            );
        }
    }

    #[test]
    fn remove_and_tty_together() {
        let mut config = Config::default();
        for privileged in [true, false] {
            config.privileged = privileged;
            let run = plan(&config, &env("/work", None)).run;
            assert!(run.has_arg("--rm") && run.has_arg("-it"));
            assert_eq!(run.has_arg("--privileged"), privileged);
            // flags go before the image
            assert!(run.position("-it") < run.position("kylevedder/offline_sceneflow:latest"));
        }
    }

    #[test]
    fn display_only_changes_env() {
        let config = Config::default();
        let a = plan(&config, &env("/work", Some(":0"))).run;
        let b = plan(&config, &env("/work", Some("localhost:10.0"))).run;

        assert_eq!(
            a.values_of("-v").collect::<Vec<_>>(),
            b.values_of("-v").collect::<Vec<_>>()
        );
        assert_eq!(a.values_of("-e").collect::<Vec<_>>(), vec!["DISPLAY=:0"]);
        assert_eq!(
            b.values_of("-e").collect::<Vec<_>>(),
            vec!["DISPLAY=localhost:10.0"]
        );

        let differing = a
            .args
            .iter()
            .zip(b.args.iter())
            .filter(|(x, y)| x != y)
            .count();
        assert_eq!(a.args.len(), b.args.len());
        assert_eq!(differing, 1);
    }

    #[test]
    fn unset_display_is_forwarded_empty() {
        let run = plan(&Config::default(), &env("/work", None)).run;
        assert_eq!(run.values_of("-e").collect::<Vec<_>>(), vec!["DISPLAY="]);
    }

    #[test]
    fn no_hostname() {
        let mut env = env("/work", Some(":0"));
        env.hostname = None;
        assert!(!plan(&Config::default(), &env).run.has_arg("-h"));
    }

    #[test]
    fn no_display_grant() {
        let config = Config {
            grant_display_access: false,
            ..Default::default()
        };
        let plan = plan(&config, &env("/work", Some(":0")));
        assert!(plan.display_grant.is_none());
        assert_eq!(plan.invocations().count(), 1);
    }

    #[test]
    fn command_after_image() {
        let config = Config {
            command: vec![String::from("bash"), String::from("-l")],
            ..Default::default()
        };
        let run = plan(&config, &env("/work", Some(":0"))).run;
        assert_eq!(&run.args[run.args.len() - 3..], ["kylevedder/offline_sceneflow:latest", "bash", "-l"]);
    }

    #[test]
    fn independent_launches() {
        // nothing names the container, so two sessions never collide
        let config = Config::default();
        let first = plan(&config, &env("/work", Some(":0")));
        let second = plan(&config, &env("/work", Some(":0")));
        assert_eq!(first, second);
        assert!(!first.run.args.iter().any(|a| a.starts_with("--name")));
    }

    #[test]
    fn capture_from_host() {
        let host = FakeHost::new("/home/me/sceneflow").with_var("DISPLAY", ":2");
        let env = Environment::capture(&host, &Config::default()).unwrap();

        assert_eq!(env.cwd, host.current_dir().unwrap());
        assert_eq!(env.hostname.as_deref(), Some("workstation"));
        assert_eq!(
            env.forwarded,
            [(String::from("DISPLAY"), Some(String::from(":2")))]
        );
    }

    #[test]
    fn forwarded_in_config_order() {
        let config = Config {
            forward_env: vec![
                String::from("TERM"),
                String::from("DISPLAY"),
                String::from("CUDA_VISIBLE_DEVICES"),
            ],
            ..Default::default()
        };
        let host = FakeHost::new("/work")
            .with_var("DISPLAY", ":0")
            .with_var("TERM", "xterm");
        let env = Environment::capture(&host, &config).unwrap();
        let run = plan(&config, &env).run;

        assert_eq!(
            run.values_of("-e").collect::<Vec<_>>(),
            vec!["TERM=xterm", "DISPLAY=:0", "CUDA_VISIBLE_DEVICES="]
        );
    }
}
