use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeZone};
use tracing::{debug, info, warn};

use crate::config::TimestampConfig;
use crate::error::{ServerError, ServerResult};
use crate::serializer::AccessSerializer;

/// Render one timestamp record, newline-terminated.
pub fn format_stamp<Tz>(format: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{}\n", at.format(format))
}

/// Background writer appending a wall-clock stamp every `interval`.
///
/// Deadlines are absolute on the monotonic clock, each exactly one interval
/// after the previous one, so scheduling does not drift with the time spent
/// committing. Missed deadlines are skipped rather than replayed.
pub struct TimestampInjector {
    handle: JoinHandle<u64>,
}

impl TimestampInjector {
    pub fn spawn(
        serializer: Arc<AccessSerializer>,
        config: &TimestampConfig,
    ) -> ServerResult<Self> {
        let interval = config.interval();
        let format = config.format.clone();
        let handle = thread::Builder::new()
            .name("timestamp".into())
            .spawn(move || run(&serializer, interval, &format))
            .map_err(ServerError::Spawn)?;
        info!(interval_secs = interval.as_secs(), "timestamp writer started");
        Ok(Self { handle })
    }

    /// Wait for the writer to observe shutdown. Returns the number of
    /// stamps it committed.
    pub fn join(self) -> u64 {
        match self.handle.join() {
            Ok(written) => {
                debug!(written, "timestamp writer joined");
                written
            }
            Err(_) => {
                warn!("timestamp writer panicked");
                0
            }
        }
    }
}

fn run(serializer: &AccessSerializer, interval: Duration, format: &str) -> u64 {
    let shutdown = Arc::clone(serializer.shutdown_signal());
    let mut written = 0;
    let mut deadline = Instant::now() + interval;
    loop {
        if shutdown.wait_until(deadline) {
            break;
        }

        let stamp = format_stamp(format, &Local::now());
        match serializer.append(stamp.as_bytes()) {
            Ok(()) => {
                written += 1;
                debug!(stamp = stamp.trim_end(), "timestamp appended");
            }
            Err(ServerError::ShuttingDown) => break,
            Err(e) => warn!(error = %e, "timestamp append failed"),
        }

        deadline += interval;
        let now = Instant::now();
        while deadline <= now {
            deadline += interval;
        }
    }
    written
}
