//! pursuit-server - shared-memory environment server for highway pursuit
//!
//! Hosts the environment server against the synthetic road simulation. The
//! client creates the shared resources under `<shm-dir>/<prefix>*` and then
//! launches this binary with the same prefix.

mod config;
mod headless;

use anyhow::{Context, Result};
use config::ServerConfig;
use headless::HeadlessSimulation;
use pursuit_env::{EnvServer, HookRegistry, LocalInterceptor};
use std::{env, path::PathBuf, sync::Arc};
use tracing::{error, info, warn};

fn main() -> Result<()> {
    let cli = CliOptions::parse(env::args().skip(1));
    let (mut config, load_error) = match ServerConfig::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(err) => (ServerConfig::default(), Some(err)),
    };

    // RUST_LOG wins over the configured filter.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    info!("Starting pursuit-server v{}", env!("CARGO_PKG_VERSION"));
    if let Some(err) = load_error {
        warn!("{err:#}. Using defaults");
    }
    for problem in &cli.problems {
        error!("{problem}");
    }
    cli.apply(&mut config);

    let summary = run(config)?;
    info!(
        frames = summary.frames.0,
        tps = summary.info.ticks_per_second,
        server_seconds = summary.info.server_seconds,
        sim_seconds = summary.info.sim_seconds,
        "Session finished"
    );
    Ok(())
}

fn run(config: ServerConfig) -> Result<pursuit_env::ServerSummary> {
    let names = config
        .resource_names()
        .context("invalid resource prefix")?;
    info!(
        prefix = %names.prefix(),
        dir = %names.dir().display(),
        "Serving shared-memory environment"
    );

    let registry = Arc::new(HookRegistry::new());
    let interceptor = Arc::new(LocalInterceptor::new(Arc::clone(&registry)));
    let simulation = HeadlessSimulation::new(&config.headless);
    let road = simulation.spawn_loop(Arc::clone(&interceptor))?;

    let result = EnvServer::new(config.env, names, simulation, interceptor, &registry)
        .and_then(EnvServer::run);
    road.stop();
    result.context("environment server failed")
}

struct CliOptions {
    config: Option<PathBuf>,
    prefix: Option<String>,
    shm_dir: Option<PathBuf>,
    real_time: bool,
    frameskip: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    /// Argument errors, reported once logging is up.
    problems: Vec<String>,
}

impl CliOptions {
    fn parse<I: Iterator<Item = String>>(mut args: I) -> Self {
        let mut opts = CliOptions {
            config: None,
            prefix: None,
            shm_dir: None,
            real_time: false,
            frameskip: None,
            width: None,
            height: None,
            problems: Vec::new(),
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    if let Some(path) = args.next() {
                        opts.config = Some(PathBuf::from(path));
                    } else {
                        opts.problems.push("--config requires a file path".to_owned());
                    }
                }
                "--prefix" => {
                    if let Some(prefix) = args.next() {
                        opts.prefix = Some(prefix);
                    } else {
                        opts.problems.push("--prefix requires a value".to_owned());
                    }
                }
                "--shm-dir" => {
                    if let Some(path) = args.next() {
                        opts.shm_dir = Some(PathBuf::from(path));
                    } else {
                        opts.problems.push("--shm-dir requires a directory path".to_owned());
                    }
                }
                "--real-time" => opts.real_time = true,
                "--frameskip" => {
                    opts.frameskip = parse_number(&mut args, "--frameskip", &mut opts.problems)
                }
                "--width" => opts.width = parse_number(&mut args, "--width", &mut opts.problems),
                "--height" => {
                    opts.height = parse_number(&mut args, "--height", &mut opts.problems)
                }
                other => opts.problems.push(format!("Ignoring unknown argument {other}")),
            }
        }

        opts
    }

    fn apply(&self, config: &mut ServerConfig) {
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(dir) = &self.shm_dir {
            config.shm_dir = Some(dir.clone());
        }
        if self.real_time {
            config.env.real_time = true;
        }
        if let Some(frameskip) = self.frameskip {
            config.env.frameskip = frameskip.max(1);
        }
        if let Some(width) = self.width {
            config.headless.width = width.max(1);
        }
        if let Some(height) = self.height {
            config.headless.height = height.max(1);
        }
    }
}

fn parse_number<I: Iterator<Item = String>>(
    args: &mut I,
    flag: &str,
    problems: &mut Vec<String>,
) -> Option<u32> {
    let Some(raw) = args.next() else {
        problems.push(format!("{flag} requires an integer"));
        return None;
    };
    match raw.parse::<u32>() {
        Ok(value) => Some(value),
        Err(err) => {
            problems.push(format!("{flag} must be an integer, got {raw}: {err}"));
            None
        }
    }
}
