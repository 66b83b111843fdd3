use anyhow::Context;
use bollard::{container::ListContainersOptions, service::ContainerSummary};
use std::{
    collections::HashMap,
    io::{self, Write},
};
use tracing::debug;

use crate::config::Config;

#[derive(argh::FromArgs)]
#[argh(subcommand, name = "ps")]
/// list running sessions of the image
pub struct PsArgs {
    #[argh(option, short = 'i')]
    /// image to look for, defaults to the configured one
    pub image: Option<String>,
}

impl PsArgs {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let image = self.image.unwrap_or_else(|| config.image.clone());
        let sessions = list(&image)?;
        render(&image, &sessions, &mut io::stdout().lock())?;
        Ok(())
    }
}

/// A running container started from the image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub names: Vec<String>,
    pub status: String,
}

impl From<ContainerSummary> for Session {
    fn from(summary: ContainerSummary) -> Self {
        Self {
            id: summary.id.unwrap_or_default().chars().take(12).collect(),
            names: summary
                .names
                .unwrap_or_default()
                .into_iter()
                .map(|n| n.trim_start_matches('/').to_string())
                .collect(),
            status: summary.status.unwrap_or_default(),
        }
    }
}

pub fn list(image: &str) -> anyhow::Result<Vec<Session>> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting the runtime")?;

    rt.block_on(query(image))
}

async fn query(image: &str) -> anyhow::Result<Vec<Session>> {
    let docker = bollard::Docker::connect_with_local_defaults()
        .context("connecting to the container engine")?;

    let filters = HashMap::from([("ancestor", vec![image])]);
    let containers = docker
        .list_containers(Some(ListContainersOptions {
            filters,
            ..Default::default()
        }))
        .await
        .context("listing containers")?;

    debug!("{} containers from {}", containers.len(), image);

    Ok(containers.into_iter().map(Session::from).collect())
}

pub fn render<W: Write>(image: &str, sessions: &[Session], out: &mut W) -> io::Result<()> {
    if sessions.is_empty() {
        return writeln!(out, "no running sessions of {}", image);
    }

    writeln!(out, "{:<12}  {:<24}  STATUS", "CONTAINER ID", "NAMES")?;
    for session in sessions {
        writeln!(
            out,
            "{:<12}  {:<24}  {}",
            session.id,
            session.names.join(","),
            session.status
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{render, Session};
    use bollard::service::ContainerSummary;

    #[test]
    fn from_summary() {
        let summary = ContainerSummary {
            id: Some(String::from(
                "4f66ad9a0b2e1c3d5e7f9a0b2c4d6e8f0a1b3c5d7e9f1a2b3c4d5e6f7a8b9c0d",
            )),
            names: Some(vec![String::from("/quirky_turing")]),
            status: Some(String::from("Up 3 hours")),
            ..Default::default()
        };

        assert_eq!(
            Session::from(summary),
            Session {
                id: String::from("4f66ad9a0b2e"),
                names: vec![String::from("quirky_turing")],
                status: String::from("Up 3 hours"),
            }
        );
    }

    #[test]
    fn empty_summary() {
        let session = Session::from(ContainerSummary::default());
        assert_eq!(session.id, "");
        assert!(session.names.is_empty());
    }

    #[test]
    fn table() {
        let sessions = vec![
            Session {
                id: String::from("4f66ad9a0b2e"),
                names: vec![String::from("quirky_turing")],
                status: String::from("Up 3 hours"),
            },
            Session {
                id: String::from("a1b2c3d4e5f6"),
                names: vec![String::from("eager_hopper")],
                status: String::from("Up 2 minutes"),
            },
        ];

        let mut out = Vec::new();
        render("img", &sessions, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines = out.lines().collect::<Vec<_>>();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("CONTAINER ID"));
        assert!(lines[1].starts_with("4f66ad9a0b2e  quirky_turing"));
        assert!(lines[2].ends_with("Up 2 minutes"));
    }

    #[test]
    fn nothing_running() {
        let mut out = Vec::new();
        render("kylevedder/offline_sceneflow:latest", &[], &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "no running sessions of kylevedder/offline_sceneflow:latest\n"
        );
    }
}
