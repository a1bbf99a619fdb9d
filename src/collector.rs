use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::issue::IssueRecord;

#[derive(Default)]
struct Inner {
    issues: Vec<IssueRecord>,
    drained: bool,
}

/// Run-scoped, append-only store of issue records. Appends and the drain
/// share one lock, so a drain never interleaves with a partial append.
#[derive(Default)]
pub struct Collector {
    inner: Mutex<Inner>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, issue: IssueRecord) {
        let mut inner = self.lock();
        if inner.drained {
            log::warn!("issue reported after drain: {}", issue.title());
        }
        inner.issues.push(issue);
    }

    /// Appends a batch in one critical section, keeping it contiguous.
    pub fn extend(&self, issues: impl IntoIterator<Item = IssueRecord>) {
        let mut inner = self.lock();
        let before = inner.issues.len();
        inner.issues.extend(issues);
        if inner.drained && inner.issues.len() > before {
            log::warn!(
                "{} issues reported after drain",
                inner.issues.len() - before
            );
        }
    }

    /// Takes every record appended so far, in insertion order, and leaves
    /// the collector empty.
    pub fn drain(&self) -> Vec<IssueRecord> {
        let mut inner = self.lock();
        inner.drained = true;
        std::mem::take(&mut inner.issues)
    }

    pub fn len(&self) -> usize {
        self.lock().issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Reporting must never fail, so a poisoned lock is taken over as is.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::issue::Severity;

    fn issue(severity: Severity, title: impl Into<String>) -> IssueRecord {
        IssueRecord::new(
            severity,
            title,
            "Home",
            "http://localhost:3000/es",
            "Server Error",
            "description",
        )
        .unwrap()
    }

    #[test]
    fn test_drain_preserves_insertion_order() {
        let collector = Collector::new();
        collector.report(issue(Severity::Low, "first"));
        collector.report(issue(Severity::Critical, "second"));
        collector.extend(vec![
            issue(Severity::Low, "third"),
            issue(Severity::High, "fourth"),
        ]);

        let titles: Vec<String> = collector
            .drain()
            .iter()
            .map(|issue| issue.title().to_string())
            .collect();
        assert_eq!(titles, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_drain_clears_collector() {
        let collector = Collector::new();
        collector.report(issue(Severity::Medium, "only"));
        assert_eq!(collector.len(), 1);
        assert_eq!(collector.drain().len(), 1);
        assert!(collector.is_empty());
        assert!(collector.drain().is_empty());
    }

    #[test]
    fn test_reports_after_drain_are_kept() {
        let collector = Collector::new();
        collector.report(issue(Severity::Medium, "before"));
        let first = collector.drain();
        collector.report(issue(Severity::Medium, "after"));
        let second = collector.drain();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].title(), "after");
    }

    #[test]
    fn test_concurrent_reports_are_neither_lost_nor_duplicated() {
        let collector = Arc::new(Collector::new());
        let handles: Vec<_> = (0..50)
            .map(|index| {
                let collector = collector.clone();
                std::thread::spawn(move || {
                    collector.report(issue(
                        Severity::Medium,
                        format!("worker {}", index),
                    ));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut titles: Vec<String> = collector
            .drain()
            .iter()
            .map(|issue| issue.title().to_string())
            .collect();
        assert_eq!(titles.len(), 50);
        titles.sort();
        titles.dedup();
        assert_eq!(titles.len(), 50);
    }

    #[test]
    fn test_drain_racing_appends_splits_without_loss() {
        let collector = Arc::new(Collector::new());
        let writers: Vec<_> = (0..4)
            .map(|worker| {
                let collector = collector.clone();
                std::thread::spawn(move || {
                    for index in 0..250 {
                        collector.report(issue(
                            Severity::Low,
                            format!("{}-{}", worker, index),
                        ));
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        while writers.iter().any(|writer| !writer.is_finished()) {
            drained.extend(collector.drain());
        }
        for writer in writers {
            writer.join().unwrap();
        }
        drained.extend(collector.drain());

        assert_eq!(drained.len(), 1000);
        let mut titles: Vec<&str> =
            drained.iter().map(|issue| issue.title()).collect();
        titles.sort();
        titles.dedup();
        assert_eq!(titles.len(), 1000);
    }

    #[test]
    fn test_report_survives_poisoned_lock() {
        let collector = Arc::new(Collector::new());
        let poisoner = collector.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the collector");
        })
        .join();

        collector.report(issue(Severity::High, "still recorded"));
        assert_eq!(collector.drain().len(), 1);
    }
}
