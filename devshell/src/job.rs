//! Cluster jobs: writes a numbered job directory with the scripts that run a
//! command inside the image under SLURM, and optionally starts it.

use anyhow::Context;
use itertools::Itertools;
use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info};

use crate::{
    config::{Config, Mount},
    host::Host,
    invocation::Invocation,
};

#[derive(argh::FromArgs)]
#[argh(subcommand, name = "job")]
/// write (and start) a cluster job running a command in the image
pub struct JobArgs {
    #[argh(positional)]
    /// the command to run inside the container
    pub command: String,

    #[argh(option, default = "PathBuf::from(\"./job_dir/\")")]
    /// where numbered job directories go
    pub job_dir: PathBuf,

    #[argh(option, default = "1")]
    /// gpus to request
    pub num_gpus: u32,

    #[argh(option, default = "2")]
    /// cpus per gpu
    pub cpus_per_gpu: u32,

    #[argh(option, default = "12")]
    /// memory per gpu, in GB
    pub mem_per_gpu: u32,

    #[argh(option, default = "180")]
    /// time limit in minutes
    pub runtime_mins: u32,

    #[argh(option)]
    /// time limit in hours, overrides --runtime-mins
    pub runtime_hours: Option<u32>,

    #[argh(option, default = "String::from(\"ff3d\")")]
    /// slurm job name
    pub job_name: String,

    #[argh(option, default = "String::from(\"ee-med\")")]
    /// slurm quality of service
    pub qos: String,

    #[argh(option, default = "String::from(\"eaton-compute\")")]
    /// slurm partition
    pub partition: String,

    #[argh(switch)]
    /// only write the files
    pub dry_run: bool,

    #[argh(switch)]
    /// run interactively through srun inside a detached screen
    pub use_srun: bool,

    #[argh(option)]
    /// exclude every node whose name contains this
    pub blacklist_substring: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("container image {} squash file does not exist", .0.display())]
    MissingImage(PathBuf),
    #[error("sinfo failed: {0}")]
    Sinfo(String),
    #[error("{0} exited with {1}")]
    Failed(String, i32),
    #[error("{0} hours does not fit in a time limit")]
    RuntimeTooLong(u32),
}

/// Everything the scripts need, resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub dir: PathBuf,
    pub command: String,
    pub num_gpus: u32,
    pub cpus_per_gpu: u32,
    pub mem_per_gpu: u32,
    pub runtime_mins: u32,
    pub job_name: String,
    pub qos: String,
    pub partition: String,
    pub exclude: Vec<String>,
    pub image: PathBuf,
    pub mounts: Vec<Mount>,
}

/// `HH:MM:00`, hours are not wrapped into days
pub fn runtime_format(runtime_mins: u32) -> String {
    format!("{:02}:{:02}:00", runtime_mins / 60, runtime_mins % 60)
}

/// `<root>/<N>` with N the number of visible entries already in `root`, counted from `cwd`
pub fn next_job_dir(root: &Path, cwd: &Path) -> io::Result<PathBuf> {
    let existing = match fs::read_dir(cwd.join(root)) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .count(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
        Err(err) => return Err(err),
    };
    Ok(root.join(format!("{:06}", existing)))
}

/// Node names from `sinfo --Node`: first column, header skipped
pub fn parse_nodes(sinfo: &str) -> Vec<String> {
    sinfo
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

pub fn blacklist(nodes: &[String], substring: &str) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| node.contains(substring))
        .cloned()
        .collect()
}

fn available_nodes<H: Host>(host: &H) -> anyhow::Result<Vec<String>> {
    let sinfo = host
        .capture(&Invocation::new("sinfo").arg("--Node"))
        .context("running sinfo")?;
    if !sinfo.success {
        return Err(JobError::Sinfo(sinfo.stderr.trim().to_string()).into());
    }
    Ok(parse_nodes(&sinfo.stdout))
}

/// Drops `.` components so printed paths stay tidy
fn tidy(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

impl Job {
    fn script(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn container_mounts(&self) -> String {
        self.mounts.iter().map(Mount::spec).join(",")
    }

    fn run_command(&self) -> String {
        format!("bash {}", self.script("command.sh").display())
    }

    pub fn command_script(&self) -> String {
        format!("#!/bin/bash\n{}\n", self.command)
    }

    pub fn srun_script(&self) -> String {
        format!(
            "#!/bin/bash\n\
             srun --gpus={} --nodes=1 --mem-per-gpu={}G --cpus-per-gpu={} --time={} \
             --exclude={} --job-name={} --qos={} --partition={} \
             --container-mounts={} --container-image={} {}\n",
            self.num_gpus,
            self.mem_per_gpu,
            self.cpus_per_gpu,
            runtime_format(self.runtime_mins),
            self.exclude.join(","),
            self.job_name,
            self.qos,
            self.partition,
            self.container_mounts(),
            self.image.display(),
            self.run_command(),
        )
    }

    pub fn screen_script(&self) -> String {
        format!(
            "#!/bin/bash\nscreen -L -Logfile {} -dmS {} bash {}\n",
            self.script("stdout.log").display(),
            self.job_name,
            self.script("srun.sh").display(),
        )
    }

    pub fn sbatch_script(&self) -> String {
        let directives = [
            format!("--job-name={}", self.job_name),
            format!("--qos={}", self.qos),
            format!("--partition={}", self.partition),
            String::from("--nodes=1"),
            format!("--output={}", self.script("job.out").display()),
            format!("--error={}", self.script("job.err").display()),
            format!("--time={}", runtime_format(self.runtime_mins)),
            format!("--gpus={}", self.num_gpus),
            format!("--mem-per-gpu={}G", self.mem_per_gpu),
            format!("--cpus-per-gpu={}", self.cpus_per_gpu),
            format!("--exclude={}", self.exclude.join(",")),
            format!("--container-mounts={}", self.container_mounts()),
            format!("--container-image={}", self.image.display()),
        ];

        let mut script = String::from("#!/bin/bash\n");
        for directive in directives {
            script.push_str("#SBATCH ");
            script.push_str(&directive);
            script.push('\n');
        }
        script.push_str(&format!(
            "\n{} && echo 'done' > {}\n",
            self.run_command(),
            self.script("job.done").display()
        ));
        script
    }

    /// Writes `command.sh` plus either `srun.sh`/`screen.sh` or `sbatch.bash`
    pub fn write(&self, cwd: &Path, use_srun: bool) -> io::Result<Vec<PathBuf>> {
        let dir = cwd.join(&self.dir);
        fs::create_dir_all(&dir)?;

        let mut files = vec![("command.sh", self.command_script())];
        if use_srun {
            files.push(("srun.sh", self.srun_script()));
            files.push(("screen.sh", self.screen_script()));
        } else {
            files.push(("sbatch.bash", self.sbatch_script()));
        }

        files
            .into_iter()
            .map(|(name, content)| {
                let path = dir.join(name);
                debug!("writing {}", path.display());
                fs::write(&path, content).map(|_| path)
            })
            .collect()
    }
}

impl JobArgs {
    /// Resolves everything against `cwd` into a [`Job`], asking slurm for nodes if needed
    pub fn prepare<H: Host>(&self, host: &H, config: &Config, cwd: &Path) -> anyhow::Result<Job> {
        let image = cwd.join(&config.job.squash_image);
        if !image.is_file() {
            return Err(JobError::MissingImage(image).into());
        }

        let exclude = match &self.blacklist_substring {
            Some(substring) => {
                let nodes = available_nodes(host)?;
                println!("Blacklisting nodes with substring {}", substring);
                println!("Available nodes: {:?}", nodes);
                let exclude = blacklist(&nodes, substring);
                println!("Blacklisted nodes: {:?}", exclude);
                exclude
            }
            None => Vec::new(),
        };

        let mut mounts = config.job.container_mounts.clone();
        mounts.push(Mount::new(cwd, &config.project_target));

        let runtime_mins = match self.runtime_hours {
            Some(hours) => hours
                .checked_mul(60)
                .ok_or(JobError::RuntimeTooLong(hours))?,
            None => self.runtime_mins,
        };

        // scripts refer to the job dir the way it was given
        let dir = next_job_dir(&tidy(&self.job_dir), cwd)?;

        Ok(Job {
            dir,
            command: self.command.clone(),
            num_gpus: self.num_gpus,
            cpus_per_gpu: self.cpus_per_gpu,
            mem_per_gpu: self.mem_per_gpu,
            runtime_mins,
            job_name: self.job_name.clone(),
            qos: self.qos.clone(),
            partition: self.partition.clone(),
            exclude,
            image,
            mounts,
        })
    }

    pub fn run<H: Host>(self, host: &H, config: &Config, dry_run: bool) -> anyhow::Result<()> {
        let cwd = host.current_dir().context("reading the working directory")?;
        let job = self.prepare(host, config, &cwd)?;

        let written = job.write(&cwd, self.use_srun).with_context(|| {
            format!("writing job files to {}", job.dir.display())
        })?;
        info!("wrote {} files", written.len());

        if !(dry_run || self.dry_run) {
            if self.use_srun {
                let screen = Invocation::new("bash")
                    .arg(job.script("screen.sh").display().to_string());
                let code = host.run(&screen).context("starting screen")?;
                if code != 0 {
                    return Err(JobError::Failed(screen.to_string(), code).into());
                }
            } else {
                println!(
                    "RUN COMMAND: sbatch {}",
                    job.script("sbatch.bash").display()
                );
            }
        }

        println!("Config files written to {}", cwd.join(&job.dir).display());
        Ok(())
    }
}
