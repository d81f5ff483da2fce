//! User decisions requested by a running job.
//!
//! A job thread that needs input calls [`DecisionProvider::request_decision`]
//! and blocks until an answer comes back. There is no timeout.

use serde::{Deserialize, Serialize};
use stowage_file_ops::Collision;
use tokio::sync::{mpsc, oneshot};

/// Answers a job can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Retry,
    Skip,
    Cancel,
    Overwrite,
}

/// Why a decision is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DecisionKind {
    /// An operation failed.
    Error,
    /// The destination collides with existing content.
    Collision { collision: Collision },
}

/// A question put to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub job_id: String,
    pub kind: DecisionKind,
    pub title: String,
    pub message: String,
    /// Path of the file the question is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Offered actions, in display order.
    pub options: Vec<DecisionAction>,
    /// Whether the answer may be applied to every later occurrence.
    pub allow_apply_to_all: bool,
}

impl DecisionRequest {
    /// Builds an error question offering `options`.
    ///
    /// Apply-to-all is offered together with skip.
    pub fn error(
        job_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        file: Option<String>,
        options: &[DecisionAction],
    ) -> Self {
        Self {
            job_id: job_id.into(),
            kind: DecisionKind::Error,
            title: title.into(),
            message: message.into(),
            file,
            options: options.to_vec(),
            allow_apply_to_all: options.contains(&DecisionAction::Skip),
        }
    }

    /// Builds a collision question restricted to overwrite or cancel.
    ///
    /// There is a single destination, so neither skip nor apply-to-all
    /// make sense.
    pub fn collision(job_id: impl Into<String>, collision: Collision, destination: String) -> Self {
        Self {
            job_id: job_id.into(),
            kind: DecisionKind::Collision { collision },
            title: "File collision".into(),
            message: format!("{}: {destination}", collision.description()),
            file: Some(destination),
            options: vec![DecisionAction::Overwrite, DecisionAction::Cancel],
            allow_apply_to_all: false,
        }
    }

    pub fn offers(&self, action: DecisionAction) -> bool {
        self.options.contains(&action)
    }
}

/// The user's answer. `action` is `None` when the question was dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub action: Option<DecisionAction>,
    #[serde(default)]
    pub apply_to_all: bool,
}

impl DecisionResponse {
    pub fn choose(action: DecisionAction) -> Self {
        Self {
            action: Some(action),
            apply_to_all: false,
        }
    }

    pub fn choose_for_all(action: DecisionAction) -> Self {
        Self {
            action: Some(action),
            apply_to_all: true,
        }
    }

    pub fn dismissed() -> Self {
        Self {
            action: None,
            apply_to_all: false,
        }
    }

    /// Drops actions and flags that `request` did not offer.
    pub fn restrict_to(self, request: &DecisionRequest) -> Self {
        match self.action {
            Some(action) if request.offers(action) => Self {
                action: Some(action),
                apply_to_all: self.apply_to_all && request.allow_apply_to_all,
            },
            _ => Self::dismissed(),
        }
    }
}

/// Resolves decisions for a job. Called from the job thread, which blocks
/// until the call returns.
pub trait DecisionProvider: Send + Sync {
    fn request_decision(&self, request: &DecisionRequest) -> DecisionResponse;
}

impl<F> DecisionProvider for F
where
    F: Fn(&DecisionRequest) -> DecisionResponse + Send + Sync,
{
    fn request_decision(&self, request: &DecisionRequest) -> DecisionResponse {
        self(request)
    }
}

/// A decision waiting for an answer on the UI side of a [`decision_channel`].
#[derive(Debug)]
pub struct PendingDecision {
    request: DecisionRequest,
    reply: oneshot::Sender<DecisionResponse>,
}

impl PendingDecision {
    pub fn request(&self) -> &DecisionRequest {
        &self.request
    }

    /// Answers the decision, waking the job thread.
    pub fn respond(self, response: DecisionResponse) {
        // The job may have gone away; nothing to wake then.
        let _ = self.reply.send(response);
    }
}

/// Job-side end of a [`decision_channel`].
#[derive(Debug, Clone)]
pub struct ChannelDecisionProvider {
    tx: mpsc::Sender<PendingDecision>,
}

impl DecisionProvider for ChannelDecisionProvider {
    /// Blocks the calling thread. Must not be called from an async context.
    fn request_decision(&self, request: &DecisionRequest) -> DecisionResponse {
        let (reply, answer) = oneshot::channel();
        let pending = PendingDecision {
            request: request.clone(),
            reply,
        };
        if self.tx.blocking_send(pending).is_err() {
            tracing::debug!(job = %request.job_id, "decision receiver dropped");
            return DecisionResponse::dismissed();
        }
        answer
            .blocking_recv()
            .unwrap_or_else(|_| DecisionResponse::dismissed())
    }
}

/// Creates a rendezvous channel between job threads and an async UI.
///
/// A dropped [`PendingDecision`] or receiver counts as a dismissal.
pub fn decision_channel() -> (ChannelDecisionProvider, mpsc::Receiver<PendingDecision>) {
    let (tx, rx) = mpsc::channel(1);
    (ChannelDecisionProvider { tx }, rx)
}
