use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::{stream, FutureExt, StreamExt};
use log::{error, info, warn};
use tokio::time::timeout;

use crate::collector::Collector;
use crate::config::{ReportOptions, Target, Timeouts};
use crate::issue::{IssueRecord, Severity};
use crate::probe::{Probe, ProbeContext, ProbeResult, Requirement};
use crate::report::{writer::write_report, Report};
use crate::session::{Session, SessionManager};

#[derive(Clone, Debug)]
pub struct RunnerOptions {
    /// Probes in flight at once; 1 runs them strictly one after another.
    pub workers: usize,
    pub probe_timeout: Duration,
    /// Where screenshots of failed browser probes are stored, if anywhere.
    pub evidence_directory: Option<PathBuf>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            workers: 1,
            probe_timeout: Timeouts::default().probe,
            evidence_directory: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run: usize,
    pub failed: usize,
    pub panicked: usize,
    pub timed_out: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Verdict {
    Completed,
    Failed,
    Panicked,
    TimedOut,
}

impl RunSummary {
    fn record(&mut self, verdict: Verdict) {
        self.run += 1;
        match verdict {
            Verdict::Completed => {}
            Verdict::Failed => self.failed += 1,
            Verdict::Panicked => self.panicked += 1,
            Verdict::TimedOut => self.timed_out += 1,
        }
    }
}

pub struct ProbeRunner {
    probes: Vec<Arc<dyn Probe>>,
    sessions: Arc<dyn SessionManager>,
    target: Target,
    timeouts: Timeouts,
    http: reqwest::Client,
    options: RunnerOptions,
}

impl ProbeRunner {
    pub fn new(
        probes: Vec<Arc<dyn Probe>>,
        sessions: Arc<dyn SessionManager>,
        target: Target,
        timeouts: Timeouts,
        options: RunnerOptions,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sweep/", env!("CARGO_PKG_VERSION")))
            .timeout(timeouts.http_request)
            .build()?;
        Ok(ProbeRunner {
            probes,
            sessions,
            target,
            timeouts,
            http,
            options,
        })
    }

    pub fn probes(&self) -> &[Arc<dyn Probe>] {
        &self.probes
    }

    /// Runs every probe once, in registration order, appending what each
    /// finds to `collector`. Probe failures never stop the run.
    pub async fn run(&self, collector: &Collector) -> RunSummary {
        let workers = self.options.workers.max(1);
        info!(
            "running {} probes against {} ({} at a time)",
            self.probes.len(),
            self.target.base_url,
            workers
        );
        let summary = Mutex::new(RunSummary::default());
        let total = self.probes.len();
        stream::iter(self.probes.iter().enumerate())
            .for_each_concurrent(workers, |(index, probe)| {
                let summary = &summary;
                async move {
                    info!("[{}/{}] {}", index + 1, total, probe.name());
                    let (issues, verdict) =
                        self.run_probe(index, probe.as_ref()).await;
                    info!(
                        "[{}/{}] {} finished with {} issues",
                        index + 1,
                        total,
                        probe.name(),
                        issues.len()
                    );
                    collector.extend(issues);
                    summary
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .record(verdict);
                }
            })
            .await;
        let summary = summary.into_inner().unwrap_or_else(PoisonError::into_inner);
        info!(
            "{} probes run: {} failed, {} panicked, {} timed out; {} issues collected",
            summary.run,
            summary.failed,
            summary.panicked,
            summary.timed_out,
            collector.len()
        );
        summary
    }

    async fn run_probe(
        &self,
        index: usize,
        probe: &dyn Probe,
    ) -> (Vec<IssueRecord>, Verdict) {
        let requirement = probe.requirement();
        let session = if requirement.needs_browser() {
            match self.open_session(requirement).await {
                Ok(session) => Some(session),
                Err(message) => {
                    error!("{}: {}", probe.name(), message);
                    let issue = self.test_error(
                        probe,
                        "Browser session unavailable",
                        &message,
                    );
                    return (vec![issue], Verdict::Failed);
                }
            }
        } else {
            None
        };

        let found = Collector::new();
        let cx = ProbeContext::new(
            &self.target,
            &self.http,
            &self.timeouts,
            session.as_ref(),
        )
        .recording_into(&found);
        let outcome = timeout(
            self.options.probe_timeout,
            AssertUnwindSafe(probe.run(&cx)).catch_unwind(),
        )
        .await;

        let result = match outcome {
            Ok(Ok(ProbeResult::Failed(failure))) => {
                error!("{} failed: {}", probe.name(), failure.error);
                let mut issues = failure.into_issues();
                if let Some(session) = &session
                    && let Some(path) = self.capture(index, probe, session).await
                    && let Some(last) = issues.pop()
                {
                    issues.push(last.with_screenshot(path));
                }
                (issues, Verdict::Failed)
            }
            Ok(Ok(result)) => (result.into_issues(), Verdict::Completed),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!("{} panicked: {}", probe.name(), message);
                let mut issues = salvage(probe, &found);
                issues.push(self.test_error(probe, "Probe panicked", &message));
                (issues, Verdict::Panicked)
            }
            Err(_) => {
                let message = format!(
                    "did not finish within {}s",
                    self.options.probe_timeout.as_secs()
                );
                error!("{} {}", probe.name(), message);
                let mut issues = salvage(probe, &found);
                issues.push(self.test_error(probe, "Probe timed out", &message));
                (issues, Verdict::TimedOut)
            }
        };

        if let Some(session) = session {
            session.close().await;
        }
        result
    }

    async fn open_session(
        &self,
        requirement: Requirement,
    ) -> Result<Session, String> {
        let mut session =
            self.sessions.open().await.map_err(|error| error.to_string())?;
        if let Requirement::Authenticated(role) = requirement {
            session.login(&self.target, role).await;
        }
        Ok(session)
    }

    async fn capture(
        &self,
        index: usize,
        probe: &dyn Probe,
        session: &Session,
    ) -> Option<PathBuf> {
        let directory = self.options.evidence_directory.as_deref()?;
        let path = evidence_path(directory, index, probe.name());
        if let Err(error) = tokio::fs::create_dir_all(directory).await {
            warn!("could not create {}: {}", directory.display(), error);
            return None;
        }
        match session.driver().screenshot(&path).await {
            Ok(()) => Some(path),
            Err(error) => {
                warn!("screenshot for {} failed: {}", probe.name(), error);
                None
            }
        }
    }

    fn test_error(
        &self,
        probe: &dyn Probe,
        title: &str,
        error: &str,
    ) -> IssueRecord {
        IssueRecord::test_error(
            Severity::Medium,
            &format!("{}: {}", title, probe.name()),
            probe.name(),
            self.target.base_url.as_str(),
            error,
        )
    }
}

// Issues a probe recorded before it was cut short.
fn salvage(probe: &dyn Probe, found: &Collector) -> Vec<IssueRecord> {
    let issues = found.drain();
    if !issues.is_empty() {
        warn!(
            "keeping {} issues {} found before it stopped",
            issues.len(),
            probe.name()
        );
    }
    issues
}

fn evidence_path(directory: &Path, index: usize, name: &str) -> PathBuf {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    directory.join(format!("{:03}-{}.png", index + 1, slug))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// One execution of the probe catalog. Owns the run's collector.
pub struct Run {
    collector: Collector,
    started_at: DateTime<Utc>,
}

impl Default for Run {
    fn default() -> Self {
        Self::new()
    }
}

impl Run {
    pub fn new() -> Self {
        Run {
            collector: Collector::new(),
            started_at: Utc::now(),
        }
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub async fn execute(&self, runner: &ProbeRunner) -> RunSummary {
        runner.run(&self.collector).await
    }

    /// Drains the collector. `None` when nothing was found.
    pub fn into_report(self) -> Option<Report> {
        Report::from_issues(self.collector.drain(), self.started_at, Utc::now())
    }

    /// Produces the report and writes it. Nothing is written for a clean
    /// run.
    pub async fn finish(
        self,
        options: &ReportOptions,
    ) -> Result<Option<(Report, PathBuf)>> {
        let Some(report) = self.into_report() else {
            info!("no issues found, no report written");
            return Ok(None);
        };
        let path = write_report(&report, options).await?;
        Ok(Some((report, path)))
    }
}
