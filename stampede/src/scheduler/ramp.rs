use stampede_core::Stage;
use std::time::Duration;

/// Desired number of VUs `elapsed` into the run, or `None` once every stage has ended.
///
/// Within a stage the level moves linearly from the previous stage's target (or
/// `start_vus`) to the stage's own target, truncated toward the starting level. At a
/// boundary the value is the target of the stage that just ended. A zero-length stage
/// takes effect as a step at its start.
pub(crate) fn target_at(stages: &[Stage], start_vus: u64, elapsed: Duration) -> Option<u64> {
    let mut from = start_vus;
    let mut stage_start = Duration::ZERO;

    for stage in stages {
        let stage_end = stage_start.saturating_add(stage.duration);
        if elapsed < stage_end {
            return Some(interpolate(
                from,
                stage.target,
                elapsed - stage_start,
                stage.duration,
            ));
        }
        from = stage.target;
        stage_start = stage_end;
    }

    None
}

fn interpolate(from: u64, to: u64, into: Duration, length: Duration) -> u64 {
    let step = |diff: u64| (diff as u128 * into.as_nanos() / length.as_nanos()) as u64;
    if to >= from {
        from + step(to - from)
    } else {
        from - step(from - to)
    }
}
