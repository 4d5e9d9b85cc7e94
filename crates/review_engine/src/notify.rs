use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{TalkId, TalkStatus};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

/// Something a speaker or reviewer should hear about. Emitted only after the
/// state change it describes has been committed.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StatusChanged {
        recipient: String,
        talk_id: TalkId,
        talk_title: String,
        status: TalkStatus,
    },
    CommentAdded {
        recipient: String,
        talk_id: TalkId,
        talk_title: String,
        author_name: String,
        comment: String,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Notification::StatusChanged { recipient, .. }
            | Notification::CommentAdded { recipient, .. } => recipient,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Sending half of the notification queue. Emitting never blocks and never
/// fails the caller.
#[derive(Clone)]
pub struct NotificationOutbox {
    tx: mpsc::Sender<Notification>,
}

impl NotificationOutbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn emit(&self, notification: Notification) {
        if let Err(err) = self.tx.try_send(notification) {
            warn!(error = %err, "dropping notification, outbox unavailable");
        }
    }
}

/// Drains the outbox until every sender is gone. Delivery errors are logged
/// and skipped.
pub fn spawn_notifier_worker(
    mut rx: mpsc::Receiver<Notification>,
    notifier: Arc<dyn Notifier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            if let Err(error) = notifier.notify(&notification).await {
                warn!(
                    recipient = notification.recipient(),
                    %error,
                    "notification delivery failed"
                );
            }
        }
    })
}

/// Writes notifications to the log. Mail delivery lives outside this service.
pub struct LogNotifier {
    public_url: Option<String>,
}

impl LogNotifier {
    pub fn new(public_url: Option<String>) -> Self {
        Self { public_url }
    }

    fn talk_link(&self, talk_id: TalkId) -> String {
        match &self.public_url {
            Some(base) => format!("{}/talks/{}", base.trim_end_matches('/'), talk_id.0),
            None => format!("/talks/{}", talk_id.0),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification {
            Notification::StatusChanged {
                recipient,
                talk_id,
                talk_title,
                status,
            } => info!(
                %recipient,
                talk = %talk_title,
                link = %self.talk_link(*talk_id),
                %status,
                "talk status notification"
            ),
            Notification::CommentAdded {
                recipient,
                talk_id,
                talk_title,
                author_name,
                comment,
            } => info!(
                %recipient,
                talk = %talk_title,
                link = %self.talk_link(*talk_id),
                author = %author_name,
                chars = comment.chars().count(),
                "talk comment notification"
            ),
        }
        Ok(())
    }
}
