use std::fmt::{self, Display};

use crate::issue::{IssueRecord, Severity};
use crate::report::Report;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn render_markdown(report: &Report) -> String {
    format!("{}", RenderedReport(report))
}

struct RenderedReport<'a>(&'a Report);

impl<'a> Display for RenderedReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(f, "# QA Report")?;
        writeln!(f)?;
        writeln!(f, "- Run started: {}", report.started_at().format(TIME_FORMAT))?;
        writeln!(f, "- Generated: {}", report.generated_at().format(TIME_FORMAT))?;
        writeln!(f, "- Total issues: {}", report.total())?;
        writeln!(f)?;
        writeln!(f, "## Summary")?;
        writeln!(f)?;
        writeln!(f, "| Severity | Count |")?;
        writeln!(f, "|----------|-------|")?;
        for severity in Severity::ALL {
            writeln!(f, "| {} | {} |", severity, report.count(severity))?;
        }

        let mut number = 0;
        for severity in Severity::ALL {
            let issues = report.issues(severity);
            if issues.is_empty() {
                continue;
            }
            writeln!(f)?;
            writeln!(f, "## {} ({})", severity, issues.len())?;
            for issue in issues {
                number += 1;
                writeln!(f)?;
                write!(f, "{}", RenderedIssue(number, issue))?;
            }
        }
        Ok(())
    }
}

struct RenderedIssue<'a>(usize, &'a IssueRecord);

impl<'a> Display for RenderedIssue<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let RenderedIssue(number, issue) = self;
        writeln!(f, "### {}. {}", number, Inline(issue.title()))?;
        writeln!(f)?;
        writeln!(f, "- **Page:** {}", Inline(issue.page()))?;
        writeln!(f, "- **URL:** {}", Inline(issue.url()))?;
        writeln!(f, "- **Type:** {}", Inline(issue.issue_type()))?;
        writeln!(f, "- **Description:** {}", Inline(issue.description()))?;
        if let Some(error) = issue.error_message() {
            writeln!(f, "- **Error:** {}", Inline(error))?;
        }
        if let Some(expected) = issue.expected() {
            writeln!(f, "- **Expected:** {}", Inline(expected))?;
        }
        if let Some(actual) = issue.actual() {
            writeln!(f, "- **Actual:** {}", Inline(actual))?;
        }
        if let Some(screenshot) = issue.screenshot() {
            writeln!(f, "- **Screenshot:** {}", screenshot.display())?;
        }
        Ok(())
    }
}

/// A field value on one line, so it cannot open a block of its own.
struct Inline<'a>(&'a str);

impl<'a> Display for Inline<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, line) in self.0.lines().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            f.write_str(line.trim())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn test_render_groups_by_severity() {
        let issues = vec![
            IssueRecord::new(
                Severity::Low,
                "External link without noopener",
                "External Links",
                "http://localhost:3000/es",
                "Security Issue",
                "https://x.org opens in a new tab without rel=noopener",
            )
            .unwrap(),
            IssueRecord::new(
                Severity::Critical,
                "Server error on /es",
                "Home (es)",
                "http://localhost:3000/es",
                "Server Error",
                "The es home page failed to render",
            )
            .unwrap()
            .with_error_message("HTTP 500"),
            IssueRecord::new(
                Severity::High,
                "Login with valid credentials failed",
                "Login",
                "http://localhost:3000/es/users/sign_in",
                "Authentication Error",
                "test@example.com could not sign in",
            )
            .unwrap()
            .with_error_message("still on the sign-in page after submitting")
            .with_comparison("signed in", "still signed out")
            .with_screenshot("evidence/007-valid-login.png"),
        ];
        let report = Report::from_issues(
            issues,
            Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 5, 10, 5, 30).unwrap(),
        )
        .unwrap();

        assert_snapshot!(render_markdown(&report), @r"
# QA Report

- Run started: 2026-01-05 10:00:00 UTC
- Generated: 2026-01-05 10:05:30 UTC
- Total issues: 3

## Summary

| Severity | Count |
|----------|-------|
| CRITICAL | 1 |
| HIGH | 1 |
| MEDIUM | 0 |
| LOW | 1 |

## CRITICAL (1)

### 1. Server error on /es

- **Page:** Home (es)
- **URL:** http://localhost:3000/es
- **Type:** Server Error
- **Description:** The es home page failed to render
- **Error:** HTTP 500

## HIGH (1)

### 2. Login with valid credentials failed

- **Page:** Login
- **URL:** http://localhost:3000/es/users/sign_in
- **Type:** Authentication Error
- **Description:** test@example.com could not sign in
- **Error:** still on the sign-in page after submitting
- **Expected:** signed in
- **Actual:** still signed out
- **Screenshot:** evidence/007-valid-login.png

## LOW (1)

### 3. External link without noopener

- **Page:** External Links
- **URL:** http://localhost:3000/es
- **Type:** Security Issue
- **Description:** https://x.org opens in a new tab without rel=noopener
");
    }

    #[test]
    fn test_every_issue_gets_one_block() {
        let issues: Vec<IssueRecord> = Severity::ALL
            .iter()
            .cycle()
            .take(10)
            .enumerate()
            .map(|(index, severity)| {
                IssueRecord::new(
                    *severity,
                    format!("issue {}", index),
                    "Home",
                    "http://localhost:3000/es",
                    "Test",
                    "description",
                )
                .unwrap()
            })
            .collect();
        let report = Report::from_issues(issues, Utc::now(), Utc::now()).unwrap();
        let rendered = render_markdown(&report);
        assert_eq!(rendered.matches("\n### ").count(), 10);
        assert!(rendered.find("## CRITICAL (3)") < rendered.find("## HIGH (3)"));
        assert!(rendered.find("## MEDIUM (2)") < rendered.find("## LOW (2)"));
    }

    #[test]
    fn test_multiline_values_stay_inside_their_block() {
        let issue = IssueRecord::new(
            Severity::Medium,
            "JavaScript console errors",
            "Home",
            "http://localhost:3000/es",
            "JavaScript Error",
            "first line\n### injected\r\n- **Page:** elsewhere",
        )
        .unwrap()
        .with_error_message("TypeError: x is undefined\n    at app.js:1");
        let report = Report::from_issues(vec![issue], Utc::now(), Utc::now()).unwrap();
        let rendered = render_markdown(&report);
        assert_eq!(rendered.matches("\n### ").count(), 1);
        assert_eq!(rendered.matches("\n- **Page:**").count(), 1);
        assert!(rendered.contains(
            "- **Description:** first line ### injected - **Page:** elsewhere\n"
        ));
        assert!(rendered.contains("- **Error:** TypeError: x is undefined at app.js:1\n"));
    }
}
