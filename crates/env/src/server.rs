//! Environment server run loop.

use std::sync::Arc;

use pursuit_core::{EnvError, FrameCount, Info};
use pursuit_ipc::{ChannelConfig, RequestChannel, ResourceNames};
use tracing::{error, info, warn};

use crate::bridge::{self, InstalledHooks};
use crate::clock::VirtualClock;
use crate::config::EnvConfig;
use crate::controller::EpisodeController;
use crate::hooks::{HookRegistry, Interceptor};
use crate::rendezvous::FrameRendezvous;
use crate::simulation::{self, Simulation};

/// What a finished run did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerSummary {
    /// Frames advanced during the run.
    pub frames: FrameCount,
    /// Final metrics.
    pub info: Info,
}

/// Serves one client until CLOSE or a fatal error.
pub struct EnvServer<S: Simulation> {
    config: EnvConfig,
    prefix: String,
    channel: RequestChannel,
    controller: EpisodeController<S>,
    rendezvous: Arc<FrameRendezvous>,
    interceptor: Arc<dyn Interceptor>,
    hooks: Option<InstalledHooks>,
}

impl<S: Simulation> EnvServer<S> {
    /// Install the simulation hooks and prepare the channel.
    ///
    /// The simulation is gated from here on: its update entry point blocks
    /// until the server advances a frame.
    pub fn new(
        config: EnvConfig,
        names: ResourceNames,
        simulation: S,
        interceptor: Arc<dyn Interceptor>,
        registry: &Arc<HookRegistry>,
    ) -> Result<Self, EnvError> {
        config.validate()?;
        let clock = Arc::new(VirtualClock::from_config(&config));
        let rendezvous = Arc::new(FrameRendezvous::new(clock, config.game_timeout()));
        let hooks = bridge::install(interceptor.as_ref(), registry, Arc::clone(&rendezvous))?;
        interceptor.set_enabled(true)?;

        let prefix = names.prefix().to_owned();
        let channel = RequestChannel::new(ChannelConfig {
            names,
            client_timeout: config.client_timeout(),
        });
        let controller = EpisodeController::new(simulation, Arc::clone(&rendezvous), &config);

        Ok(Self {
            config,
            prefix,
            channel,
            controller,
            rendezvous,
            interceptor,
            hooks: Some(hooks),
        })
    }

    /// Rendezvous shared with the simulation thread.
    pub fn rendezvous(&self) -> &Arc<FrameRendezvous> {
        &self.rendezvous
    }

    /// Serve until CLOSE, then release everything.
    pub fn run(mut self) -> Result<ServerSummary, EnvError> {
        info!(
            prefix = %self.prefix,
            real_time = self.config.real_time,
            frameskip = self.config.frameskip,
            "Environment server starting"
        );

        let result = self.serve();
        if let Err(err) = &result {
            error!(%err, code = err.code().as_str(), "Environment server stopped on error");
            // Errors raised outside a request are only reported here.
            if self.channel.server_info().is_some() {
                if let Err(write_err) = self.channel.write_return_code(err.code()) {
                    warn!(%write_err, "Could not report error to client");
                }
            }
        }

        let summary = ServerSummary {
            frames: self.controller.total_frames(),
            info: self.controller.info(),
        };
        self.shutdown();
        result.map(|()| summary)
    }

    fn serve(&mut self) -> Result<(), EnvError> {
        self.controller.warm_up(self.config.skip_intro)?;
        let server_info = simulation::server_info(self.controller.simulation())?;
        self.channel.connect(server_info)?;

        while !self.controller.is_terminated() {
            let controller = &mut self.controller;
            self.channel
                .execute_on_instruction(|code, channel| controller.handle(code, channel))?;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.rendezvous.disable();
        if let Err(err) = self.interceptor.set_enabled(false) {
            warn!(%err, "Failed to disable simulation hooks");
        }
        self.hooks = None;
        self.channel.dispose();
        info!(
            frames = self.controller.total_frames().0,
            "Environment server stopped"
        );
    }
}
