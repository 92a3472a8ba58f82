/// Aggregate over a whole run. Owned by the session and handed out as a
/// snapshot for the summary.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RoundTripStats {
    pub sent: u32,
    pub received: u32,
    pub min_ms: f64,
    pub max_ms: f64,
    pub sum_ms: f64,
}

impl RoundTripStats {
    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    /// Fold in one reply. `received` is bumped first, so the first sample
    /// is the one that finds it at 1 and seeds min, max and sum.
    pub fn record_reply(&mut self, elapsed_ms: f64) {
        self.received += 1;
        if self.received == 1 {
            self.min_ms = elapsed_ms;
            self.max_ms = elapsed_ms;
            self.sum_ms = elapsed_ms;
        } else {
            self.sum_ms += elapsed_ms;
            if elapsed_ms < self.min_ms {
                self.min_ms = elapsed_ms;
            }
            if elapsed_ms > self.max_ms {
                self.max_ms = elapsed_ms;
            }
        }
    }

    pub fn mean_ms(&self) -> Option<f64> {
        if self.received == 0 {
            None
        } else {
            Some(self.sum_ms / self.received as f64)
        }
    }

    /// Share of requests without a reply, relative to what was sent.
    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.sent.saturating_sub(self.received) as f64 * 100.0 / self.sent as f64
        }
    }
}
