mod common;

use std::time::{Duration, Instant};

use common::snapshot_at;
use proptest::prelude::*;
use procusage::usage::{CpuScale, DeltaEngine};

proptest! {
    #[test]
    fn cpu_percent_matches_tick_ratio(
        base_proc in 0u64..1_000_000,
        base_sys in 0u64..1_000_000,
        sys_delta in 1u64..1_000_000,
        share in 0.0f64..=1.0,
    ) {
        let proc_delta = (sys_delta as f64 * share) as u64;
        let engine = DeltaEngine::new(Duration::ZERO, CpuScale::Machine);
        let t0 = Instant::now();

        let cold = engine.update(snapshot_at(t0, base_proc, base_sys, 1));
        prop_assert_eq!(cold.cpu_percent, 0.0);

        let reading = engine.update(snapshot_at(
            t0 + Duration::from_secs(1),
            base_proc + proc_delta,
            base_sys + sys_delta,
            1,
        ));
        let expected = 100.0 * proc_delta as f64 / sys_delta as f64;
        prop_assert!(
            (reading.cpu_percent - expected).abs() < 1e-9,
            "got {} expected {}", reading.cpu_percent, expected
        );
    }

    #[test]
    fn non_positive_system_delta_returns_previous_reading(
        proc_a in 0u64..1_000,
        sys_a in 1u64..1_000,
        proc_b in 0u64..1_000_000,
        sys_back in 0u64..1_000,
    ) {
        let engine = DeltaEngine::new(Duration::ZERO, CpuScale::Machine);
        let t0 = Instant::now();
        engine.update(snapshot_at(t0, 0, 0, 1));
        let previous = engine.update(snapshot_at(t0 + Duration::from_secs(1), proc_a, sys_a, 1));

        let stalled_sys = sys_a.saturating_sub(sys_back);
        let reading = engine.update(snapshot_at(
            t0 + Duration::from_secs(2),
            proc_b,
            stalled_sys,
            1,
        ));
        prop_assert_eq!(reading, previous);
    }

    #[test]
    fn readings_stay_inside_the_scale(
        samples in prop::collection::vec((0u64..10_000, 0u64..10_000), 2..20),
        core in any::<bool>(),
    ) {
        let scale = if core { CpuScale::Core } else { CpuScale::Machine };
        let engine = DeltaEngine::new(Duration::ZERO, scale);
        let t0 = Instant::now();
        let (mut proc_ticks, mut sys_ticks) = (0u64, 0u64);

        for (i, (proc_step, sys_step)) in samples.into_iter().enumerate() {
            proc_ticks += proc_step;
            sys_ticks += sys_step;
            let reading = engine.update(snapshot_at(
                t0 + Duration::from_millis(i as u64 + 1),
                proc_ticks,
                sys_ticks,
                1,
            ));
            prop_assert!(reading.cpu_percent.is_finite());
            prop_assert!(reading.cpu_percent >= 0.0);
            prop_assert!(reading.cpu_percent <= scale.ceiling(4));
        }
    }
}
