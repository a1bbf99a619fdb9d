use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::issue::{IssueRecord, Severity};

pub mod render;
pub mod writer;

/// The issues of one run, stratified by severity. Within a bucket the
/// collector's insertion order is kept.
#[derive(Debug, Clone)]
pub struct Report {
    started_at: DateTime<Utc>,
    generated_at: DateTime<Utc>,
    buckets: [Vec<IssueRecord>; 4],
}

impl Report {
    /// `None` for an empty run, which produces no report at all.
    pub fn from_issues(
        issues: Vec<IssueRecord>,
        started_at: DateTime<Utc>,
        generated_at: DateTime<Utc>,
    ) -> Option<Report> {
        if issues.is_empty() {
            return None;
        }
        let mut buckets: [Vec<IssueRecord>; 4] = Default::default();
        for issue in issues {
            buckets[issue.severity().rank() as usize].push(issue);
        }
        Some(Report {
            started_at,
            generated_at,
            buckets,
        })
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn issues(&self, severity: Severity) -> &[IssueRecord] {
        &self.buckets[severity.rank() as usize]
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues(severity).len()
    }

    pub fn total(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// The most urgent severity present.
    pub fn highest(&self) -> Option<Severity> {
        Severity::ALL
            .into_iter()
            .find(|severity| self.count(*severity) > 0)
    }

    /// Every issue, most urgent bucket first.
    pub fn ordered(&self) -> impl Iterator<Item = &IssueRecord> {
        Severity::ALL
            .into_iter()
            .flat_map(|severity| self.issues(severity).iter())
    }

    pub fn to_json(&self) -> JsonReport<'_> {
        JsonReport {
            started_at: self.started_at,
            generated_at: self.generated_at,
            total: self.total(),
            summary: Summary {
                critical: self.count(Severity::Critical),
                high: self.count(Severity::High),
                medium: self.count(Severity::Medium),
                low: self.count(Severity::Low),
            },
            issues: self.ordered().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub summary: Summary,
    pub issues: Vec<&'a IssueRecord>,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn issue(severity: Severity, title: &str) -> IssueRecord {
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

    fn severity() -> impl Strategy<Value = Severity> {
        prop::sample::select(Severity::ALL.to_vec())
    }

    #[test]
    fn test_empty_run_has_no_report() {
        assert!(Report::from_issues(Vec::new(), Utc::now(), Utc::now()).is_none());
    }

    #[test]
    fn test_counts_and_highest() {
        let report = Report::from_issues(
            vec![
                issue(Severity::Low, "a"),
                issue(Severity::Medium, "b"),
                issue(Severity::Low, "c"),
            ],
            Utc::now(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(report.total(), 3);
        assert_eq!(report.count(Severity::Low), 2);
        assert_eq!(report.count(Severity::Critical), 0);
        assert_eq!(report.highest(), Some(Severity::Medium));
    }

    #[test]
    fn test_json_lists_issues_by_bucket() {
        let report = Report::from_issues(
            vec![issue(Severity::Low, "a"), issue(Severity::Critical, "b")],
            Utc::now(),
            Utc::now(),
        )
        .unwrap();
        let value = serde_json::to_value(report.to_json()).unwrap();
        assert_eq!(value["total"], 2);
        assert_eq!(value["summary"]["critical"], 1);
        assert_eq!(value["issues"][0]["title"], "b");
        assert_eq!(value["issues"][1]["severity"], "LOW");
    }

    proptest! {
        // Buckets come out in domain order, each keeping insertion order.
        #[test]
        fn test_report_is_stable_partition(severities in prop::collection::vec(severity(), 1..60)) {
            let issues: Vec<IssueRecord> = severities
                .iter()
                .enumerate()
                .map(|(index, severity)| issue(*severity, &index.to_string()))
                .collect();
            let report = Report::from_issues(issues.clone(), Utc::now(), Utc::now()).unwrap();

            let mut expected = issues;
            expected.sort_by_key(|issue| issue.severity().rank());
            let actual: Vec<IssueRecord> = report.ordered().cloned().collect();
            prop_assert_eq!(actual, expected);
            prop_assert_eq!(report.total(), severities.len());
        }
    }
}
