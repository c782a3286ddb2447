use tokio::time::Instant;
use tracing::trace;

use crate::metrics::NODE_OPERATION_LATENCY;

/// Records how long a NodeStore operation took when dropped
pub(crate) struct ScopedTimer {
    start: Instant,
    name: &'static str,
}

impl ScopedTimer {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        NODE_OPERATION_LATENCY
            .with_label_values(&[self.name])
            .observe(elapsed.as_secs_f64() * 1000.0);
        trace!(target: "timing", "[TIMING] {} took {} ms", self.name, elapsed.as_millis());
    }
}
