//! Completion notification: the one message every run ends with.
//!
//! [`Notification::for_report`] renders the run report into a subject, a
//! plain-text body and an HTML body. A [`Notifier`] delivers it:
//!
//! - [`MailDropNotifier`] writes an RFC 5322 `.eml` file per message into a
//!   drop directory, for pickup by a local MTA or inspection in tests;
//! - [`WebhookNotifier`] POSTs the message as JSON;
//! - [`TracingNotifier`] only logs it.

use crate::config::PipelineConfig;
use crate::error::NotifyError;
use crate::output::RunReport;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub const SUBJECT: &str = "Your AI content generation is complete";

/// A rendered completion message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub recipient_user_id: i64,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

impl Notification {
    /// Render the message for a finished run.
    pub fn for_report(report: &RunReport, config: &PipelineConfig) -> Self {
        let link = config.course_url(report.course_id);
        let body = report_body(report);

        let text_body = format!(
            "The AI content generation for your course has been completed. \
             You can view the generated content by visiting the course page: {link}\n\n{body}"
        );
        let html_body = format!(
            "<p>The AI content generation for your course has been completed.</p>\
             <p>You can view the generated content by visiting the course page: \
             <a href=\"{}\">Course Page</a></p><br><br><pre>{}</pre>",
            escape_html(&link),
            nl2br(&escape_html(&body))
        );

        Self {
            recipient_user_id: report.user_id,
            subject: SUBJECT.to_string(),
            text_body,
            html_body,
        }
    }
}

/// Stage lines, instructions and the latest generated content.
pub fn report_body(report: &RunReport) -> String {
    let mut body = report.render_lines();
    body.push_str("\n\nAdditional Instructions:\n");
    body.push_str(&report.instructions);
    body.push_str("\n\nGenerated Course Content:\n");
    if let Some(ref content) = report.content {
        body.push_str(&content.text);
    }
    if let Some(ref speaker) = report.speaker_text {
        body.push_str("\n\nSpeaker Text:\n");
        body.push_str(speaker);
    }
    body
}

/// Escape the five HTML-significant characters.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

fn nl2br(s: &str) -> String {
    s.replace('\n', "<br />\n")
}

/// Delivers completion messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Logs the message instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        info!(user_id = n.recipient_user_id, subject = %n.subject, "\n{}", n.text_body);
        Ok(())
    }
}

/// Writes each message as a multipart `.eml` file into a drop directory.
#[derive(Debug, Clone)]
pub struct MailDropNotifier {
    dir: PathBuf,
    from: String,
    domain: String,
}

impl MailDropNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            from: "noreply@localhost".to_string(),
            domain: "localhost".to_string(),
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Domain of recipient addresses, `user-<id>@<domain>`.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    fn render(&self, n: &Notification, boundary: &str) -> String {
        let date = chrono::Utc::now().to_rfc2822();
        format!(
            "From: {from}\r\n\
             To: user-{uid}@{domain}\r\n\
             Subject: {subject}\r\n\
             Date: {date}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\
             \r\n\
             --{boundary}\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             {text}\r\n\
             --{boundary}\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             \r\n\
             {html}\r\n\
             --{boundary}--\r\n",
            from = self.from,
            uid = n.recipient_user_id,
            domain = self.domain,
            subject = n.subject,
            text = n.text_body.replace('\n', "\r\n"),
            html = n.html_body.replace('\n', "\r\n"),
        )
    }
}

#[async_trait]
impl Notifier for MailDropNotifier {
    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = self.dir.join(format!("{id}.eml"));
        let write_err = |source: std::io::Error| NotifyError::Write {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(write_err)?;
        tokio::fs::write(&path, self.render(n, &format!("=_{id}")))
            .await
            .map_err(write_err)?;
        info!(user_id = n.recipient_user_id, "notification written to {}", path.display());
        Ok(())
    }
}

/// POSTs each message as JSON to a URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Webhook(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(n)
            .send()
            .await
            .map_err(|e| NotifyError::Webhook(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Webhook(format!(
                "{} answered {}",
                self.url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentStage, CourseContent, RunId};
    use crate::output::{RunState, RunStatus, Stage, StageOutcome};

    fn report() -> RunReport {
        RunReport {
            run_id: RunId::parse("r1").unwrap(),
            course_id: 42,
            user_id: 7,
            instructions: "Make it <short>".into(),
            outcomes: vec![
                StageOutcome {
                    stage: Stage::ExtractPdfPages,
                    success: true,
                    message: "0 PDF pages".into(),
                },
                StageOutcome {
                    stage: Stage::RenderImages,
                    success: false,
                    message: "marp failed".into(),
                },
            ],
            status: RunStatus::Failed,
            state: RunState::Notified(RunStatus::Failed),
            video_url: None,
            content: Some(CourseContent {
                stage: ContentStage::SlideMarkup,
                text: "# Deck".into(),
            }),
            speaker_text: None,
            duration_ms: 10,
        }
    }

    #[test]
    fn body_has_report_instructions_and_content() {
        let body = report_body(&report());
        assert!(body.starts_with("[OK] extract-pdf-pages: 0 PDF pages\n[FAILED] render-images"));
        assert!(body.contains("\n\nAdditional Instructions:\nMake it <short>"));
        assert!(body.ends_with("\n\nGenerated Course Content:\n# Deck"));
    }

    #[test]
    fn messages_link_the_course() {
        let n = Notification::for_report(&report(), &PipelineConfig::default());
        assert_eq!(n.subject, SUBJECT);
        assert!(n.text_body.contains("http://localhost/course/view.php?id=42"));
        assert!(n.html_body.contains("<a href=\"http://localhost/course/view.php?id=42\">Course Page</a>"));
        assert_eq!(n.recipient_user_id, 7);
    }

    #[test]
    fn html_body_escapes_report() {
        let n = Notification::for_report(&report(), &PipelineConfig::default());
        assert!(n.html_body.contains("Make it &lt;short&gt;"));
        assert!(n.html_body.contains("<br />"));
        assert!(n.html_body.ends_with("</pre>"));
    }

    #[test]
    fn escape_html_covers_quotes() {
        assert_eq!(escape_html(r#"a&b"c'd"#), "a&amp;b&quot;c&#039;d");
    }

    #[tokio::test]
    async fn mail_drop_writes_multipart_file() {
        let tmp = tempfile::tempdir().unwrap();
        let notifier = MailDropNotifier::new(tmp.path()).with_domain("lms.test");
        let n = Notification::for_report(&report(), &PipelineConfig::default());
        notifier.send(&n).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let eml = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(eml.contains("To: user-7@lms.test\r\n"));
        assert!(eml.contains("Subject: Your AI content generation is complete\r\n"));
        assert!(eml.contains("multipart/alternative"));
    }
}
