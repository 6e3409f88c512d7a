//! Stale-path signalling for the page cache in front of the API.

use std::sync::Mutex;

use tracing::debug;

pub const CHECKOUT: &str = "/checkout";
pub const TICKETS: &str = "/tickets";
pub const PAYMENT: &str = "/payment";
pub const BOOKING: &str = "/booking";

pub trait Revalidate: Send + Sync {
    fn revalidate(&self, path: &str);
}

/// Default sink: records stale paths in the log for the edge cache to pick up.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRevalidator;

impl Revalidate for LogRevalidator {
    fn revalidate(&self, path: &str) {
        debug!(path, "Path marked stale");
    }
}

/// Collects paths in memory; used by tests to assert what went stale.
#[derive(Debug, Default)]
pub struct RecordingRevalidator {
    paths: Mutex<Vec<String>>,
}

impl RecordingRevalidator {
    pub fn paths(&self) -> Vec<String> {
        match self.paths.lock() {
            Ok(paths) => paths.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Revalidate for RecordingRevalidator {
    fn revalidate(&self, path: &str) {
        match self.paths.lock() {
            Ok(mut paths) => paths.push(path.to_string()),
            Err(poisoned) => poisoned.into_inner().push(path.to_string()),
        }
    }
}

pub fn revalidate_all(sink: &dyn Revalidate, paths: &[&str]) {
    for path in paths {
        sink.revalidate(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_revalidator_keeps_order() {
        let sink = RecordingRevalidator::default();
        revalidate_all(&sink, &[CHECKOUT, TICKETS]);
        sink.revalidate(PAYMENT);
        assert_eq!(sink.paths(), vec!["/checkout", "/tickets", "/payment"]);
    }
}
