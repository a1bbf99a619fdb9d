use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ::url::Url;
use anyhow::Result;
use clap::Parser;

use sweep::{
    browser::BrowserOptions,
    config::{
        ReportFormat, ReportOptions, Settle, Target, Timeouts,
        DEFAULT_BASE_URL, DEFAULT_SIGNED_IN_MARKER,
    },
    issue::Severity,
    probes,
    runner::{ProbeRunner, Run, RunnerOptions},
    session::ChromeSessions,
};

#[derive(Parser)]
#[command(version, about)]
struct CLI {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the probes against a deployed application and write a report.
    Run {
        #[arg(long, env = "SWEEP_BASE_URL", default_value = DEFAULT_BASE_URL)]
        base_url: Url,
        #[arg(long, env = "SWEEP_USER_EMAIL")]
        user_email: Option<String>,
        #[arg(long, env = "SWEEP_USER_PASSWORD", hide_env_values = true)]
        user_password: Option<String>,
        #[arg(long, env = "SWEEP_ADMIN_EMAIL")]
        admin_email: Option<String>,
        #[arg(long, env = "SWEEP_ADMIN_PASSWORD", hide_env_values = true)]
        admin_password: Option<String>,
        /// Selector proving a successful sign-in.
        #[arg(long, default_value = DEFAULT_SIGNED_IN_MARKER)]
        signed_in_marker: String,
        /// Judge sign-in by the URL alone.
        #[arg(long, default_value_t = false)]
        no_signed_in_marker: bool,
        /// Only run probes in these groups or with these names.
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        headless: bool,
        #[arg(long, default_value_t = false)]
        no_sandbox: bool,
        #[arg(long, default_value_t = 1366)]
        width: u16,
        #[arg(long, default_value_t = 768)]
        height: u16,
        #[arg(long, default_value = "es-ES")]
        locale: String,
        #[arg(long)]
        chrome: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Seconds a single probe may take.
        #[arg(long, default_value_t = 120)]
        probe_timeout: u64,
        /// Seconds to wait after each navigation.
        #[arg(long, default_value_t = 2)]
        settle: u64,
        #[arg(long, default_value = ".")]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,
        /// Directory for screenshots of failed probes.
        #[arg(long)]
        evidence: Option<PathBuf>,
        /// Exit with status 1 when an issue at least this severe is found.
        #[arg(long)]
        fail_on: Option<Severity>,
    },
    /// Print the registered probes.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_target(true)
        .init();
    let cli = CLI::parse();
    match cli.command {
        Command::Run {
            base_url,
            user_email,
            user_password,
            admin_email,
            admin_password,
            signed_in_marker,
            no_signed_in_marker,
            only,
            headless,
            no_sandbox,
            width,
            height,
            locale,
            chrome,
            workers,
            probe_timeout,
            settle,
            output,
            format,
            evidence,
            fail_on,
        } => {
            let mut target = Target::new(base_url);
            if let Some(email) = user_email {
                target.user.email = email;
            }
            if let Some(password) = user_password {
                target.user.password = password;
            }
            if let Some(email) = admin_email {
                target.admin.email = email;
            }
            if let Some(password) = admin_password {
                target.admin.password = password;
            }
            target.signed_in_marker =
                (!no_signed_in_marker).then_some(signed_in_marker);

            let timeouts = Timeouts {
                probe: Duration::from_secs(probe_timeout),
                ..Timeouts::default()
            };
            let settle = Settle {
                after_navigation: Duration::from_secs(settle),
                ..Settle::default()
            };
            let browser_options = BrowserOptions {
                headless,
                no_sandbox,
                width,
                height,
                locale,
                executable: chrome,
            };
            let runner_options = RunnerOptions {
                workers,
                probe_timeout: timeouts.probe,
                evidence_directory: evidence,
            };
            let report_options = ReportOptions {
                output_directory: output,
                format,
            };

            let sessions = Arc::new(ChromeSessions::new(
                browser_options,
                timeouts.clone(),
                settle,
            ));
            let runner = ProbeRunner::new(
                probes::select(probes::catalog(), &only)?,
                sessions,
                target,
                timeouts,
                runner_options,
            )?;

            let run = Run::new();
            run.execute(&runner).await;
            match run.finish(&report_options).await {
                Ok(None) => Ok(()),
                Ok(Some((report, path))) => {
                    println!(
                        "{} issues ({} critical, {} high, {} medium, {} low) written to {}",
                        report.total(),
                        report.count(Severity::Critical),
                        report.count(Severity::High),
                        report.count(Severity::Medium),
                        report.count(Severity::Low),
                        path.display()
                    );
                    if let (Some(threshold), Some(highest)) =
                        (fail_on, report.highest())
                        && highest.at_least(threshold)
                    {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                Err(error) => {
                    eprintln!("{:#}", error);
                    std::process::exit(2);
                }
            }
        }
        Command::List => {
            for probe in probes::catalog() {
                println!(
                    "{:<14} {:<32} {:?}",
                    probe.group(),
                    probe.name(),
                    probe.requirement()
                );
            }
            Ok(())
        }
    }
}
