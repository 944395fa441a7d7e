use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonic counter, cheap to bump from any task.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Value that moves both ways (e.g. work in flight).
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the value after the increment.
    pub fn increment(&self) -> i64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the value after the decrement.
    pub fn decrement(&self) -> i64 {
        self.value.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let c = Counter::new("commits");
        c.inc();
        c.add(2);
        assert_eq!(c.get(), 3);
        assert_eq!(c.name(), "commits");
    }

    #[test]
    fn gauge_reports_value_after_change() {
        let g = Gauge::new("pending");
        assert_eq!(g.increment(), 1);
        assert_eq!(g.increment(), 2);
        assert_eq!(g.decrement(), 1);
        assert_eq!(g.get(), 1);
    }
}
