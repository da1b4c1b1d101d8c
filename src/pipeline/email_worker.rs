//! Email worker: renders email jobs and hands them to a sender.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::comparables::{DiffSummary, FieldChange};
use crate::event::{EmailJobEvent, HandlerError, Router};
use crate::types::JobFrequency;

/// A rendered message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum SendError {
    /// The provider may accept the message later.
    #[error("temporary send failure: {0}")]
    Temporary(String),

    /// The provider will never accept this message (bad address, blocked).
    #[error("rejected by provider: {0}")]
    Rejected(String),
}

/// Delivers rendered emails.
pub trait EmailSender: Send + Sync + 'static {
    fn send(
        &self,
        ctx: &CancellationToken,
        email: &OutgoingEmail,
    ) -> impl Future<Output = std::result::Result<(), SendError>> + Send;
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    async fn send(&self, _ctx: &CancellationToken, email: &OutgoingEmail) -> std::result::Result<(), SendError> {
        info!(to = %email.to, subject = %email.subject, body = %email.body, "email (log sender)");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum EmailWorkerError {
    #[error("email job carries an unreadable summary: {0}")]
    Render(#[from] serde_json::Error),

    #[error(transparent)]
    Send(#[from] SendError),
}

impl From<EmailWorkerError> for HandlerError {
    fn from(err: EmailWorkerError) -> Self {
        if matches!(err, EmailWorkerError::Send(SendError::Temporary(_))) {
            HandlerError::transient("email worker", err)
        } else {
            HandlerError::permanent("email worker", err)
        }
    }
}

pub type Result<T> = std::result::Result<T, EmailWorkerError>;

fn cadence(frequency: JobFrequency) -> &'static str {
    match frequency {
        JobFrequency::Immediate => "Update",
        JobFrequency::Weekly => "Weekly digest",
        JobFrequency::Monthly => "Monthly digest",
        JobFrequency::Unknown => "Notification",
    }
}

fn describe(change: &FieldChange) -> String {
    match change {
        FieldChange::Name { from, to } => format!("renamed from {from:?} to {to:?}"),
        FieldChange::BaselineStatus { from, to } => {
            format!("baseline status {from:?} -> {to:?}").to_lowercase()
        }
        FieldChange::BaselineLowDate { to, .. } => match to {
            Some(date) => format!("newly available since {date}"),
            None => "newly available date cleared".to_string(),
        },
        FieldChange::BaselineHighDate { to, .. } => match to {
            Some(date) => format!("widely available since {date}"),
            None => "widely available date cleared".to_string(),
        },
        FieldChange::BrowserStatus { browser, to, .. } => {
            format!("{browser}: {}", format!("{to:?}").to_lowercase())
        }
        FieldChange::BrowserDate { browser, to, .. } => match to {
            Some(date) => format!("{browser}: shipped {date}"),
            None => format!("{browser}: ship date cleared"),
        },
        FieldChange::BrowserVersion { browser, to, .. } => match to {
            Some(version) => format!("{browser}: version {version}"),
            None => format!("{browser}: version cleared"),
        },
        FieldChange::Docs { to, .. } => format!("documentation now has {} link(s)", to.len()),
    }
}

/// Renders a plain-text email for one job.
pub fn render(job: &EmailJobEvent) -> Result<OutgoingEmail> {
    let summary = DiffSummary::from_bytes(&job.summary_raw)?;
    let subject = format!(
        "{} for \"{}\": {}",
        cadence(job.metadata.frequency),
        job.metadata.query,
        summary.text
    );

    let mut lines = vec![format!("Changes to your saved search \"{}\".", job.metadata.query)];
    let diff = &summary.diff;
    if !diff.added.is_empty() {
        lines.extend(["".to_string(), "Added:".to_string()]);
        lines.extend(diff.added.iter().map(|f| format!("  + {} ({})", f.name, f.id)));
    }
    if !diff.removed.is_empty() {
        lines.extend(["".to_string(), "Removed:".to_string()]);
        lines.extend(diff.removed.iter().map(|f| format!("  - {} ({})", f.name, f.id)));
    }
    if !diff.modified.is_empty() {
        lines.extend(["".to_string(), "Updated:".to_string()]);
        for feature in &diff.modified {
            lines.push(format!("  * {} ({})", feature.name, feature.id));
            lines.extend(feature.changes.iter().map(|c| format!("      {}", describe(c))));
        }
    }
    lines.push(String::new());
    lines.push(format!(
        "Generated {} (event {}).",
        job.metadata.generated_at.format("%Y-%m-%d %H:%M UTC"),
        job.metadata.event_id
    ));

    let mut body = lines.join("\n");
    body.push('\n');

    Ok(OutgoingEmail {
        to: job.recipient_email.clone(),
        subject,
        body,
    })
}

pub struct EmailWorker<E> {
    sender: Arc<E>,
}

impl<E: EmailSender> EmailWorker<E> {
    pub fn new(sender: Arc<E>) -> Self {
        EmailWorker { sender }
    }

    /// Routes [`EmailJobEvent`]s to this worker.
    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let worker = self.clone();
        router.register::<EmailJobEvent, _, _>(move |ctx, _event_id, job| {
            let worker = worker.clone();
            async move { worker.handle_job(&ctx, &job).await.map_err(HandlerError::from) }
        });
    }

    #[instrument(skip(self, ctx, job), fields(subscription_id = %job.subscription_id, channel_id = %job.channel_id))]
    pub async fn handle_job(&self, ctx: &CancellationToken, job: &EmailJobEvent) -> Result<()> {
        let email = render(job)?;
        self.sender.send(ctx, &email).await?;
        info!("email sent");
        Ok(())
    }
}
