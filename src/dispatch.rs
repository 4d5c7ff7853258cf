//! Interface the service consumes from the surrounding framework.
//!
//! The framework owns name registration and asynchronous sends; the core
//! only calls through this trait. Registration is always relative to the
//! service prefix: `subscribe("a.txt/get")` registers the process for
//! `prefix + "a.txt/get"`.

use async_trait::async_trait;

/// Delivery mode for notification sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Deliver to one subscriber of the target name.
    Unicast,
    /// Deliver to every subscriber of the target name.
    Multicast,
}

/// Name registration and asynchronous delivery, provided by the framework.
#[async_trait]
pub trait Dispatch: Send {
    /// Registers this process for `prefix + suffix`.
    async fn subscribe(&mut self, suffix: &str);

    /// Drops the registration for `prefix + suffix`.
    async fn unsubscribe(&mut self, suffix: &str);

    /// Sends `body` to `name` without awaiting a response.
    async fn send_async(
        &mut self,
        mode: SendMode,
        name: &str,
        body: &[u8],
        timeout_ms: u32,
        priority: i8,
    );
}
