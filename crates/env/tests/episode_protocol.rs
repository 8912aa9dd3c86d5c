//! End-to-end episodes over shared memory against the scripted simulation.

use std::time::{Duration, Instant};

use pursuit_core::{EnvError, ErrorCode, FrameCount, InputSet, ServerInfo, Termination};
use pursuit_env::EnvConfig;
use pursuit_ipc::ClientError;
use pursuit_testkit::{test_config, EnvHarness, FrameEvent, ScriptedSimulation};

fn server_error(result: Result<impl std::fmt::Debug, ClientError>) -> ErrorCode {
    match result {
        Err(ClientError::Server(code)) => code,
        other => panic!("expected a server error, got {other:?}"),
    }
}

fn close(mut harness: EnvHarness) -> pursuit_env::ServerSummary {
    harness.client().close().expect("close");
    harness.finish().expect("server run")
}

#[test]
fn handshake_advertises_the_simulation_layout() {
    let mut harness = EnvHarness::connect(test_config()).unwrap();

    assert_eq!(
        harness.client().server_info(),
        Some(ServerInfo {
            obs_height: 3,
            obs_width: 4,
            obs_channels: 4,
            action_count: 8,
        })
    );
    assert_eq!(harness.script().frames(), 1, "warm-up runs one frame");
    assert_eq!(harness.script().new_games(), 0);

    let summary = close(harness);
    assert_eq!(summary.frames, FrameCount(1));
}

#[test]
fn skip_intro_starts_a_game_before_the_handshake() {
    let config = EnvConfig {
        skip_intro: true,
        ..test_config()
    };
    let mut harness = EnvHarness::connect(config).unwrap();
    assert_eq!(harness.script().new_games(), 1);
    assert_eq!(harness.script().frames(), 3);

    harness.client().reset(false).unwrap();
    assert_eq!(harness.script().new_games(), 2, "first reset always starts a game");
    close(harness);
}

#[test]
fn reset_starts_a_clean_episode() {
    let mut harness = EnvHarness::connect(test_config()).unwrap();
    // The reset frame itself dies and scores; neither may leak into the episode.
    harness.script().queue([FrameEvent {
        score: 40,
        dies: true,
    }]);

    harness.client().reset(false).unwrap();
    assert_eq!(harness.client().termination().unwrap(), Termination::NONE);
    assert_eq!(harness.client().observation().unwrap(), &[2u8; 48][..]);
    assert_eq!(harness.script().new_games(), 1);

    let outcome = harness.client().step(InputSet::empty()).unwrap();
    assert_eq!(outcome.reward, 0.0);
    assert_eq!(outcome.termination, Termination::NONE);

    let summary = close(harness);
    assert_eq!(summary.frames, FrameCount(3));
}

#[test]
fn step_before_reset_is_rejected_without_advancing() {
    let mut harness = EnvHarness::connect(test_config()).unwrap();

    let code = server_error(harness.client().step(InputSet::ACCELERATE));
    assert_eq!(code, ErrorCode::EnvironmentNotReset);
    assert_eq!(harness.script().frames(), 1);
    assert_eq!(harness.client().termination().unwrap(), Termination::NONE);
    assert!(harness.client().observation().unwrap().iter().all(|&b| b == 0));

    harness.client().reset(false).unwrap();
    harness.client().step(InputSet::ACCELERATE).unwrap();
    assert_eq!(harness.script().frames(), 3);
    close(harness);
}

#[test]
fn frameskip_sums_the_reward_of_every_frame() {
    let config = EnvConfig {
        frameskip: 3,
        ..test_config()
    };
    let mut harness = EnvHarness::connect(config).unwrap();
    harness.client().reset(false).unwrap();
    harness.script().queue([
        FrameEvent::score(3),
        FrameEvent::IDLE,
        FrameEvent::score(5),
    ]);

    let outcome = harness.client().step(InputSet::ACCELERATE).unwrap();
    assert_eq!(outcome.reward, 8.0);
    assert!(!outcome.termination.is_done());
    assert_eq!(harness.script().frames(), 5);

    let summary = close(harness);
    assert_eq!(summary.frames, FrameCount(5));
}

#[test]
fn termination_ends_the_step_early_and_requires_a_reset() {
    let config = EnvConfig {
        frameskip: 4,
        ..test_config()
    };
    let mut harness = EnvHarness::connect(config).unwrap();
    harness.client().reset(false).unwrap();
    harness.script().queue([
        FrameEvent::score(2),
        FrameEvent::death(),
        FrameEvent::score(100),
    ]);

    let outcome = harness.client().step(InputSet::ACCELERATE).unwrap();
    assert_eq!(outcome.reward, 2.0);
    assert!(outcome.termination.is_terminated());
    assert!(!outcome.termination.is_truncated());
    assert_eq!(harness.script().frames(), 4, "warm-up, reset and two step frames");
    assert_eq!(harness.script().queued(), 1);

    let code = server_error(harness.client().step(InputSet::ACCELERATE));
    assert_eq!(code, ErrorCode::EnvironmentNotReset);
    assert_eq!(harness.script().frames(), 4);

    // The episode already ended, so the reset neither respawns nor restarts.
    harness.client().reset(false).unwrap();
    assert_eq!(harness.script().respawns(), 0);
    assert_eq!(harness.script().new_games(), 1);
    assert_eq!(harness.script().queued(), 0);
    assert_eq!(harness.client().termination().unwrap(), Termination::NONE);

    let outcome = harness.client().step(InputSet::empty()).unwrap();
    assert_eq!(outcome.reward, 0.0, "reset frame score is discarded");
    close(harness);
}

#[test]
fn new_game_reset_restarts_a_dead_episode() {
    let mut harness = EnvHarness::connect(test_config()).unwrap();
    harness.client().reset(false).unwrap();
    assert_eq!(harness.script().new_games(), 1);

    harness.script().queue([FrameEvent::death()]);
    let outcome = harness.client().step(InputSet::ACCELERATE).unwrap();
    assert!(outcome.termination.is_done());

    harness.client().reset(true).unwrap();
    assert_eq!(harness.script().new_games(), 2);
    assert_eq!(harness.script().respawns(), 0);
    assert_eq!(harness.client().termination().unwrap(), Termination::NONE);

    harness.script().queue([FrameEvent::score(4)]);
    let outcome = harness.client().step(InputSet::ACCELERATE).unwrap();
    assert_eq!(outcome.reward, 4.0);
    assert!(!outcome.termination.is_done());
    close(harness);
}

#[test]
fn reset_kinds_follow_the_episode_state() {
    let mut harness = EnvHarness::connect(test_config()).unwrap();
    harness.client().reset(false).unwrap();
    harness.client().step(InputSet::empty()).unwrap();

    harness.client().reset(true).unwrap();
    assert_eq!(harness.script().new_games(), 2);
    assert_eq!(harness.script().respawns(), 0);

    harness.client().reset(false).unwrap();
    assert_eq!(harness.script().new_games(), 2);
    assert_eq!(harness.script().respawns(), 1);
    close(harness);
}

#[test]
fn held_inputs_reach_every_frame_of_the_step() {
    let config = EnvConfig {
        frameskip: 2,
        ..test_config()
    };
    let mut harness = EnvHarness::connect(config).unwrap();
    harness.client().reset(false).unwrap();

    let inputs = InputSet::ACCELERATE | InputSet::STEER_LEFT;
    harness.client().step(inputs).unwrap();

    let held = harness.script().held_per_frame();
    assert_eq!(held.len(), 4);
    assert_eq!(&held[2..], &[inputs, inputs]);
    close(harness);
}

#[test]
fn unknown_action_is_reported_and_the_server_keeps_going() {
    let simulation = ScriptedSimulation::new().with_input_channels(9);
    let mut harness = EnvHarness::start_with(test_config(), simulation).unwrap();
    let info = harness.client().handshake().unwrap();
    assert_eq!(info.action_count, 9);
    harness.client().reset(false).unwrap();

    let mut actions = [0u8; 9];
    actions[8] = 1;
    let code = server_error(harness.client().step_raw(&actions));
    assert_eq!(code, ErrorCode::UnknownAction);
    assert_eq!(harness.script().frames(), 2);

    let outcome = harness.client().step(InputSet::BRAKE).unwrap();
    assert_eq!(outcome.termination, Termination::NONE);
    assert_eq!(harness.client().return_code().unwrap(), ErrorCode::Acknowledged);
    close(harness);
}

#[test]
fn unknown_instruction_is_acknowledged_and_ignored() {
    let mut harness = EnvHarness::connect(test_config()).unwrap();

    assert_eq!(
        harness.client().send_raw(42).unwrap(),
        ErrorCode::Acknowledged
    );
    assert_eq!(harness.script().frames(), 1);
    harness.client().reset(false).unwrap();
    close(harness);
}

#[test]
fn closing_twice_is_harmless() {
    let mut harness = EnvHarness::connect(test_config()).unwrap();
    harness.client().reset(false).unwrap();

    harness.client().close().unwrap();
    harness.client().close().unwrap();
    assert!(harness.client().is_closed());
    assert!(harness.finish().is_ok());
}

#[test]
fn silent_client_is_a_client_timeout() {
    let config = EnvConfig {
        client_timeout_ms: 200,
        ..test_config()
    };
    let harness = EnvHarness::connect(config).unwrap();

    assert!(harness.wait_for_server(Duration::from_secs(10)));
    assert!(harness.client_ref().take_response());
    assert_eq!(
        harness.client_ref().return_code().unwrap(),
        ErrorCode::ClientTimeout
    );
    assert_eq!(
        harness.finish().unwrap_err(),
        EnvError::ClientTimeout(Duration::from_millis(200))
    );
}

#[test]
fn stalled_simulation_is_a_game_timeout() {
    let config = EnvConfig {
        game_timeout_ms: 100,
        ..test_config()
    };
    let mut harness = EnvHarness::connect(config).unwrap();
    harness.client().reset(false).unwrap();

    harness.pause_game();
    let code = server_error(harness.client().step(InputSet::ACCELERATE));
    assert_eq!(code, ErrorCode::GameTimeout);
    assert_eq!(
        harness.finish().unwrap_err(),
        EnvError::GameTimeout(Duration::from_millis(100))
    );
}

#[test]
fn virtual_clock_moves_exactly_one_frame_per_frame() {
    let mut harness = EnvHarness::connect(test_config()).unwrap();
    harness.client().reset(false).unwrap();
    for _ in 0..5 {
        harness.client().step(InputSet::ACCELERATE).unwrap();
    }

    let samples = harness.script().counter_samples();
    assert_eq!(samples.len(), 7);
    for pair in samples.windows(2) {
        assert_eq!(pair[1] - pair[0], 16_667);
    }
    close(harness);
}

#[test]
fn info_accumulates_server_and_simulation_time() {
    let mut harness = EnvHarness::connect(test_config()).unwrap();
    let after_reset = harness.client().reset(false).unwrap();
    let mut last = after_reset;
    for _ in 0..3 {
        let outcome = harness.client().step(InputSet::ACCELERATE).unwrap();
        assert!(outcome.info.server_seconds >= last.server_seconds);
        assert!(outcome.info.sim_seconds >= last.sim_seconds);
        last = outcome.info;
    }
    assert!(last.server_seconds > 0.0);
    assert!(last.sim_seconds > 0.0);
    if cfg!(target_os = "linux") {
        assert!(after_reset.memory_mb > 0.0);
    }
    close(harness);
}

#[test]
fn real_time_steps_are_paced_to_the_frame_rate() {
    let config = EnvConfig {
        real_time: true,
        fps: 50.0,
        frameskip: 3,
        ..test_config()
    };
    let mut harness = EnvHarness::connect(config).unwrap();
    harness.client().reset(false).unwrap();

    let started = Instant::now();
    harness.client().step(InputSet::ACCELERATE).unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(55), "step took {elapsed:?}");
    assert!(!harness.rendezvous().clock().is_virtual());
    close(harness);
}
