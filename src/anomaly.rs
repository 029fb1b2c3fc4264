use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;

static ANOMALY_NOTIFIER: Lazy<AnomalyNotifier> = Lazy::new(AnomalyNotifier::new);

/// Emits one structured warn line per anomaly (stale sequence numbers,
/// unknown order ids, order rejections) and keeps a per-context counter so
/// a noisy session is visible at a glance in the final summary.
pub fn note_anomaly(context: &str, detail: &str) {
    ANOMALY_NOTIFIER.note(context, detail);
}

pub fn anomaly_count(context: &str) -> u64 {
    ANOMALY_NOTIFIER.count(context)
}

struct AnomalyNotifier {
    counts: Mutex<HashMap<String, u64>>,
}

impl AnomalyNotifier {
    fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn note(&self, context: &str, detail: &str) {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(context.to_string()).or_insert(0);
        *count += 1;
        log::warn!("[Anomaly] {} (count: {}): {}", context, count, detail);
    }

    fn count(&self, context: &str) -> u64 {
        self.counts
            .lock()
            .unwrap()
            .get(context)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_context() {
        note_anomaly("test-context-a", "first");
        note_anomaly("test-context-a", "second");
        assert_eq!(anomaly_count("test-context-a"), 2);
        assert_eq!(anomaly_count("test-context-untouched"), 0);
    }
}
