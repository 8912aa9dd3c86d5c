//! Property tests for the virtual performance counter

use proptest::prelude::*;
use pursuit_env::VirtualClock;

proptest! {
    /// Property: Every frame adds the same rounded-up tick count on top of the seed
    #[test]
    fn counter_is_seed_plus_whole_frames(
        frequency in 1_000i64..10_000_000,
        fps in 10.0f32..240.0,
        seed in 0i64..1_000_000_000,
        frames in 0u32..200,
    ) {
        let clock = VirtualClock::new_virtual(frequency, fps);
        let per_frame = clock.ticks_per_frame();
        prop_assert!(per_frame as f64 >= frequency as f64 / f64::from(fps));
        prop_assert!(((per_frame - 1) as f64) < frequency as f64 / f64::from(fps));

        prop_assert_eq!(clock.query_counter(&|| seed).unwrap(), seed);
        for _ in 0..frames {
            clock.advance_one_tick();
        }
        // Later real-counter values are ignored once seeded.
        prop_assert_eq!(
            clock.query_counter(&|| -1).unwrap(),
            seed + i64::from(frames) * per_frame
        );
        prop_assert_eq!(clock.query_frequency().unwrap(), frequency);
    }
}
