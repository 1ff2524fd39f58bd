use std::time::Duration;

/// Interval of the scheduler's ramp-control loop.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// How long a VU retired during ramp-down may keep running its iteration.
pub const DEFAULT_GRACEFUL_RAMP_DOWN: Duration = Duration::from_secs(30);

/// How long VUs may keep running after the last stage ends.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Applied to requests that do not carry their own timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_SCENARIO_NAME: &str = "default";

/// Percentiles listed for trend metrics in the run summary.
pub const SUMMARY_PERCENTILES: [f64; 3] = [90., 95., 99.];

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;
pub const EXIT_SCHEDULER_FAULT: i32 = 103;
pub const EXIT_INVALID_CONFIG: i32 = 104;
pub const EXIT_EXTERNAL_ABORT: i32 = 105;
