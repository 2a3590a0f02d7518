//! Report delivery.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use super::{Report, SUBJECT};
use crate::error::{CheckError, Result};

/// Delivers a rendered report somewhere.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn notify(&self, report: &Report) -> Result<()>;
}

/// Writes reports to standard output.
#[derive(Debug, Default, Clone)]
pub struct PrintNotifier;

#[async_trait]
impl Notifier for PrintNotifier {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn notify(&self, report: &Report) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(report.render().as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

/// Mails reports by piping a message to `sendmail -t`.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    to: String,
    program: PathBuf,
}

impl SendmailNotifier {
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            program: PathBuf::from("sendmail"),
        }
    }

    /// Use a different sendmail-compatible binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// RFC 822 message with the recipients taken from the headers.
    pub fn message(&self, report: &Report) -> String {
        format!(
            "To: {}\r\nSubject: {}\r\nDate: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
            self.to,
            SUBJECT,
            chrono::Local::now().to_rfc2822(),
            report.render().replace('\n', "\r\n")
        )
    }
}

#[async_trait]
impl Notifier for SendmailNotifier {
    fn name(&self) -> &str {
        "sendmail"
    }

    async fn notify(&self, report: &Report) -> Result<()> {
        let mut child = Command::new(&self.program)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(self.message(report).as_bytes()).await?;
            // Closing stdin ends the message
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(CheckError::Io(std::io::Error::other(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))));
        }
        info!("Report for {} sent to {}", report.server, self.to);
        Ok(())
    }
}
