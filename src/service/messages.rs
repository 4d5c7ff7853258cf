//! Typed channel vocabulary between the framework and the service actor.

use tokio::sync::{mpsc, oneshot};

use crate::headers::Headers;

/// One incoming request, as delivered by the framework.
#[derive(Debug)]
pub struct Request {
    /// Fully qualified endpoint name (prefix included).
    pub name: String,
    /// Request header pairs.
    pub info: Headers,
    pub body: Vec<u8>,
    pub timeout_ms: u32,
    pub priority: i8,
}

/// The reply for one request.
#[derive(Debug)]
pub struct Response {
    /// Response header pairs; the first is always `status`.
    pub info: Headers,
    pub body: Vec<u8>,
}

impl Response {
    /// Numeric status, for callers that only branch on it.
    pub fn status(&self) -> Option<u16> {
        self.info.get_str("status")?.parse().ok()
    }
}

/// Everything the actor's mailbox can carry.
#[derive(Debug)]
pub enum ServiceMessage {
    /// A request expecting exactly one reply.
    Request { request: Request, reply: oneshot::Sender<Response> },
    /// Periodic rescan tick.
    Refresh,
    /// A multipart upload's expiry timer fired.
    AppendExpire { file: String, id: String },
}

/// Cloneable sending side of the actor mailbox.
#[derive(Debug, Clone)]
pub struct ServiceSender {
    sender: mpsc::UnboundedSender<ServiceMessage>,
}

impl ServiceSender {
    /// Enqueues a request and returns the channel its reply arrives on.
    pub fn request(&self, request: Request) -> oneshot::Receiver<Response> {
        let (reply, receiver) = oneshot::channel();
        let _ = self.sender.send(ServiceMessage::Request { request, reply });
        receiver
    }

    /// Enqueues a refresh tick.
    pub fn refresh(&self) {
        let _ = self.sender.send(ServiceMessage::Refresh);
    }

    pub(crate) fn append_expire(&self, file: String, id: String) {
        let _ = self.sender.send(ServiceMessage::AppendExpire { file, id });
    }
}

/// Creates the actor mailbox.
pub fn channel() -> (ServiceSender, mpsc::UnboundedReceiver<ServiceMessage>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ServiceSender { sender }, receiver)
}
