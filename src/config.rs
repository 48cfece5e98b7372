//! Command line and resolved configuration

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::Endpoint;
use crate::core::{DispatchPolicy, TargetDescriptor};
use crate::progress::ProgressMode;
use crate::targets::{self, ImageOptions, TargetsFile};

/// fanbuild - run independent build targets concurrently
#[derive(Parser, Debug)]
#[command(name = "fanbuild", version)]
#[command(about = "Run independent build targets concurrently and report every failure")]
pub struct Cli {
    /// Target to build (`all` runs every target in the file)
    #[arg(long, default_value = "all")]
    pub target: String,

    /// Progress output (auto, plain, tty, json)
    #[arg(long, default_value = "auto")]
    pub progress: ProgressMode,

    /// Engine endpoint (local://, docker://, docker+unix://..., docker+tcp://...)
    #[arg(long, default_value = "local://")]
    pub connect: String,

    /// Targets file (default: ./fanbuild.yml, then the user config dir)
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Force new pulls on images
    #[arg(long)]
    pub pull: bool,

    /// Seconds allowed for progress output to drain after cancellation
    #[arg(long, default_value_t = 5.0)]
    pub grace: f64,

    /// Do not start targets once the run has been canceled
    #[arg(long)]
    pub skip_canceled: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print the target names and exit
    #[arg(long)]
    pub list: bool,
}

impl Cli {
    /// Default `env_logger` filter; `RUST_LOG` still wins.
    pub fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }

    /// Presence-only switches given on the command line.
    pub fn switches(&self) -> Vec<Switch> {
        let mut switches = Vec::new();
        if self.pull {
            switches.push(Switch::Pull);
        }
        switches
    }
}

/// Flags whose only meaning is their presence; each adjusts [`ImageOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    Pull,
}

impl Switch {
    pub fn apply(self, options: &mut ImageOptions) {
        match self {
            Switch::Pull => options.force_pull = true,
        }
    }
}

/// Which targets to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    One(String),
}

impl Selection {
    pub fn parse(target: &str) -> Self {
        match target {
            "all" => Selection::All,
            name => Selection::One(name.to_string()),
        }
    }
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub selection: Selection,
    pub progress: ProgressMode,
    pub endpoint: Endpoint,
    pub targets_path: PathBuf,
    /// Directory the targets run in: the targets file's directory.
    pub root: PathBuf,
    pub targets: TargetsFile,
    pub image: ImageOptions,
    pub grace: Duration,
    pub policy: DispatchPolicy,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let endpoint = Endpoint::parse(&cli.connect)?;
        let grace = Duration::try_from_secs_f64(cli.grace)
            .with_context(|| format!("invalid grace period {}", cli.grace))?;

        let targets_path = targets::discover(cli.file.as_deref())?;
        let targets = TargetsFile::from_file(&targets_path)?;
        let root = match targets_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let root = root
            .canonicalize()
            .with_context(|| format!("resolving {}", root.display()))?;

        let mut image = ImageOptions::default();
        for switch in cli.switches() {
            switch.apply(&mut image);
        }

        let policy = if cli.skip_canceled {
            DispatchPolicy::SkipWhenCanceled
        } else {
            DispatchPolicy::Always
        };

        Ok(Self {
            selection: Selection::parse(&cli.target),
            progress: cli.progress,
            endpoint,
            targets_path,
            root,
            targets,
            image,
            grace,
            policy,
        })
    }

    /// Descriptors for the selected targets, in file order.
    pub fn select(&self) -> Result<Vec<TargetDescriptor>> {
        let all = self.targets.descriptors(self.image);
        match &self.selection {
            Selection::All => Ok(all),
            Selection::One(name) => match all.into_iter().find(|d| &d.name == name) {
                Some(descriptor) => Ok(vec![descriptor]),
                None => anyhow::bail!(
                    "unknown target {:?} (known: all, {})",
                    name,
                    self.targets.names().join(", ")
                ),
            },
        }
    }
}
