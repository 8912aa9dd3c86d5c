//! Property tests for reward accumulation over skipped frames

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use pursuit_core::{InputSet, InstructionCode};
use pursuit_env::{EnvConfig, EpisodeController, FrameRendezvous, VirtualClock};
use pursuit_testkit::{test_config, FrameEvent, RecordingBuffers, ScriptedSimulation};

/// Run one reset and one step over `events`; returns (reward, terminated, step frames).
fn run_step(frameskip: u32, events: &[FrameEvent]) -> (f32, bool, u64) {
    let config = EnvConfig {
        frameskip,
        ..test_config()
    };
    let rendezvous = Arc::new(FrameRendezvous::new(
        Arc::new(VirtualClock::from_config(&config)),
        Duration::from_secs(5),
    ));
    let simulation = ScriptedSimulation::new();
    let script = simulation.handle();
    let game = {
        let rendezvous = Arc::clone(&rendezvous);
        let script = script.clone();
        thread::spawn(move || {
            while rendezvous.is_enabled() {
                rendezvous.run_simulation_frame(&|| script.run_frame(None));
            }
        })
    };

    let mut controller = EpisodeController::new(simulation, Arc::clone(&rendezvous), &config);
    let mut buffers = RecordingBuffers::with_actions(InputSet::ACCELERATE);
    controller
        .handle(InstructionCode::ResetNewLife, &mut buffers)
        .unwrap();
    let before = controller.total_frames().0;
    script.queue(events.iter().copied());
    controller.handle(InstructionCode::Step, &mut buffers).unwrap();
    let frames = controller.total_frames().0 - before;

    rendezvous.disable();
    game.join().unwrap();
    (
        buffers.reward.unwrap(),
        buffers.termination.unwrap().is_terminated(),
        frames,
    )
}

fn frame_event() -> impl Strategy<Value = FrameEvent> {
    (0i64..50, prop::bool::weighted(0.2)).prop_map(|(score, dies)| FrameEvent { score, dies })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: A step sums the scores of the frames it ran and stops on the first death
    #[test]
    fn step_reward_is_the_sum_up_to_the_first_death(
        frameskip in 1u32..6,
        events in prop::collection::vec(frame_event(), 6),
    ) {
        let window = &events[..frameskip as usize];
        let ran = window
            .iter()
            .position(|event| event.dies)
            .map_or(window.len(), |death| death + 1);
        let expected: i64 = window[..ran].iter().map(|event| event.score).sum();

        let (reward, terminated, frames) = run_step(frameskip, &events);
        prop_assert_eq!(reward, expected as f32);
        prop_assert_eq!(frames, ran as u64);
        prop_assert_eq!(terminated, window[..ran].iter().any(|event| event.dies));
    }
}
