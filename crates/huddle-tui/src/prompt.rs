use futures_util::future::BoxFuture;
use huddle_session::IdentityProvider;
use tokio::sync::{mpsc, oneshot};

/// A pending name request: the UI answers through the sender.
pub type PromptRequest = oneshot::Sender<Option<String>>;

/// Asks the UI for a display name on every connect.
pub struct PromptProvider {
    requests: mpsc::UnboundedSender<PromptRequest>,
}

impl PromptProvider {
    pub fn new(requests: mpsc::UnboundedSender<PromptRequest>) -> Self {
        Self { requests }
    }
}

impl IdentityProvider for PromptProvider {
    fn request_name(&mut self) -> BoxFuture<'_, Option<String>> {
        let (reply, answer) = oneshot::channel();
        let asked = self.requests.send(reply).is_ok();
        Box::pin(async move {
            if !asked {
                return None;
            }
            // A dropped prompt counts as declining.
            answer.await.ok().flatten()
        })
    }
}
