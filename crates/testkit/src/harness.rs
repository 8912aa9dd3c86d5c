//! A full server, game thread and client wired together in one process.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use pursuit_core::{EnvError, Info, InputSet, Termination};
use pursuit_env::{
    EnvConfig, EnvServer, FrameRendezvous, HookRegistry, LocalInterceptor, ResponseBuffers,
    ServerSummary,
};
use pursuit_ipc::{ClientConfig, EnvClient, ResourceNames};
use tempfile::TempDir;

use crate::game_thread::GameThread;
use crate::stub::{ScriptHandle, ScriptedSimulation};

/// Prefix of every resource a harness creates.
pub const TEST_PREFIX: &str = "pursuit-test-";

/// Config with short timeouts and no intro skipping, so frame counts stay small.
pub fn test_config() -> EnvConfig {
    EnvConfig {
        skip_intro: false,
        client_timeout_ms: 10_000,
        game_timeout_ms: 5_000,
        ..EnvConfig::default()
    }
}

/// In-process environment: scripted simulation, server thread and client.
pub struct EnvHarness {
    client: EnvClient,
    script: ScriptHandle,
    rendezvous: Arc<FrameRendezvous>,
    game: Option<GameThread>,
    server: Option<JoinHandle<Result<ServerSummary, EnvError>>>,
    _dir: TempDir,
}

impl EnvHarness {
    /// Start a server for the default scripted simulation.
    pub fn start(config: EnvConfig) -> Result<Self> {
        Self::start_with(config, ScriptedSimulation::new())
    }

    /// Start a server for `simulation`. The client has not shaken hands yet.
    pub fn start_with(config: EnvConfig, simulation: ScriptedSimulation) -> Result<Self> {
        let dir = tempfile::tempdir().context("creating resource directory")?;
        let names = ResourceNames::new(TEST_PREFIX, dir.path())?;
        let client = EnvClient::create(ClientConfig {
            names: names.clone(),
            response_timeout: Duration::from_secs(10),
        })?;

        let registry = Arc::new(HookRegistry::new());
        let interceptor = Arc::new(LocalInterceptor::new(Arc::clone(&registry)));
        let script = simulation.handle();
        let server = EnvServer::new(
            config,
            names,
            simulation,
            interceptor.clone(),
            &registry,
        )?;
        let rendezvous = Arc::clone(server.rendezvous());

        let game = GameThread::spawn(interceptor, script.clone())?;
        let server = thread::Builder::new()
            .name("pursuit-server".to_owned())
            .spawn(move || server.run())
            .context("spawning server thread")?;

        Ok(Self {
            client,
            script,
            rendezvous,
            game: Some(game),
            server: Some(server),
            _dir: dir,
        })
    }

    /// Start a server and complete the handshake.
    pub fn connect(config: EnvConfig) -> Result<Self> {
        let mut harness = Self::start(config)?;
        harness.client.handshake()?;
        Ok(harness)
    }

    /// The client end.
    pub fn client(&mut self) -> &mut EnvClient {
        &mut self.client
    }

    /// The client end, for inspection only.
    pub fn client_ref(&self) -> &EnvClient {
        &self.client
    }

    /// Script of the simulation being served.
    pub fn script(&self) -> &ScriptHandle {
        &self.script
    }

    /// Rendezvous gating the game thread.
    pub fn rendezvous(&self) -> &Arc<FrameRendezvous> {
        &self.rendezvous
    }

    /// Whether the server thread is still serving.
    pub fn server_running(&self) -> bool {
        self.server
            .as_ref()
            .is_some_and(|server| !server.is_finished())
    }

    /// Block until the server thread stops or `timeout` passes.
    pub fn wait_for_server(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.server_running() {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Make the game hang in its next frame.
    pub fn pause_game(&self) {
        if let Some(game) = &self.game {
            game.pause();
        }
    }

    /// Wait for the server to stop and return its outcome.
    ///
    /// Only returns once the server has stopped on its own, after CLOSE or a
    /// fatal error.
    pub fn finish(mut self) -> Result<ServerSummary, EnvError> {
        let outcome = match self.server.take() {
            Some(server) => server
                .join()
                .unwrap_or_else(|_| Err(EnvError::native("server thread panicked"))),
            None => Err(EnvError::native("server already finished")),
        };
        self.rendezvous.disable();
        if let Some(game) = self.game.take() {
            game.stop();
        }
        outcome
    }
}

impl Drop for EnvHarness {
    fn drop(&mut self) {
        self.rendezvous.disable();
    }
}

/// [`ResponseBuffers`] keeping everything in memory, for driving an
/// `EpisodeController` without a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingBuffers {
    /// Inputs handed to the next step.
    pub actions: InputSet,
    /// Last observation written.
    pub observation: Option<Vec<u8>>,
    /// Last info written.
    pub info: Option<Info>,
    /// Last reward written.
    pub reward: Option<f32>,
    /// Last termination written.
    pub termination: Option<Termination>,
}

impl RecordingBuffers {
    /// Buffers that hand `actions` to every step.
    pub fn with_actions(actions: InputSet) -> Self {
        Self {
            actions,
            ..Self::default()
        }
    }

    /// Whether nothing was written yet.
    pub fn is_untouched(&self) -> bool {
        self.observation.is_none()
            && self.info.is_none()
            && self.reward.is_none()
            && self.termination.is_none()
    }
}

impl ResponseBuffers for RecordingBuffers {
    fn read_actions(&self) -> Result<InputSet, EnvError> {
        Ok(self.actions)
    }

    fn write_observation(&mut self, pixels: &[u8]) -> Result<(), EnvError> {
        self.observation = Some(pixels.to_vec());
        Ok(())
    }

    fn write_info(&mut self, info: &Info) -> Result<(), EnvError> {
        self.info = Some(*info);
        Ok(())
    }

    fn write_reward(&mut self, reward: f32) -> Result<(), EnvError> {
        self.reward = Some(reward);
        Ok(())
    }

    fn write_termination(&mut self, termination: Termination) -> Result<(), EnvError> {
        self.termination = Some(termination);
        Ok(())
    }
}
