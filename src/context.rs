use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;

/// Cooperative cancellation flag shared between a transport and the calls it
/// is running. Cloning yields a handle to the same flag.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any handle.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-call context handed to operations that ask for it.
///
/// The dispatcher never interrupts an operation; long-running operations are
/// expected to poll [`CallContext::is_cancelled`] themselves.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancel: CancelToken,
    peer: Option<SocketAddr>,
    request_id: Option<i64>,
}

impl CallContext {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            peer: None,
            request_id: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub(crate) fn for_request(&self, request_id: Option<i64>) -> Self {
        Self {
            request_id,
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// `None` for notifications.
    pub fn request_id(&self) -> Option<i64> {
        self.request_id
    }
}
