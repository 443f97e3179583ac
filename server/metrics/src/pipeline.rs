use metrics::{counter, histogram};

pub struct ProducerMetrics {
    ns: &'static str,
}

impl ProducerMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    pub fn items_produced(&self, n: u64) {
        counter!(format!("{}_producer_items_total", self.ns)).increment(n);
    }

    pub fn create_failed(&self) {
        counter!(format!("{}_producer_create_failed_total", self.ns)).increment(1);
    }

    pub fn db_seconds(&self, seconds: f64) {
        histogram!(format!("{}_producer_db_seconds", self.ns)).record(seconds);
    }
}

pub struct RelayMetrics {
    ns: &'static str,
}

impl RelayMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    pub fn dispatched(&self, n: u64) {
        counter!(format!("{}_relay_dispatched_total", self.ns)).increment(n);
    }

    pub fn publish_failed(&self, reason: &'static str) {
        counter!(format!("{}_relay_publish_failed_total", self.ns), "reason" => reason).increment(1);
    }

    pub fn dead_lettered(&self) {
        counter!(format!("{}_relay_dead_lettered_total", self.ns)).increment(1);
    }

    /// Age of a record at dispatch time: insert-to-publish latency.
    pub fn outbox_lag_seconds(&self, seconds: f64) {
        histogram!(format!("{}_relay_outbox_lag_seconds", self.ns)).record(seconds);
    }
}

pub struct ConsumerMetrics {
    ns: &'static str,
}

impl ConsumerMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    pub fn consumed(&self) {
        counter!(format!("{}_consumer_consumed_total", self.ns)).increment(1);
    }

    pub fn requeued(&self) {
        counter!(format!("{}_consumer_requeued_total", self.ns)).increment(1);
    }

    pub fn dead_lettered(&self) {
        counter!(format!("{}_consumer_dead_lettered_total", self.ns)).increment(1);
    }

    pub fn reconnects(&self) {
        counter!(format!("{}_consumer_reconnects_total", self.ns)).increment(1);
    }

    pub fn apply_seconds(&self, seconds: f64) {
        histogram!(format!("{}_consumer_apply_seconds", self.ns)).record(seconds);
    }
}
