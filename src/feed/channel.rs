use tokio::{sync::mpsc, task::JoinHandle};

use crate::{FeedConfig, Result};

/// Signals produced by a push channel, in the order the transport saw them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelMessage {
    /// The channel is established and will start delivering messages.
    Opened,
    /// One message. `event` carries a transport-level event name, if any.
    Message { event: Option<String>, data: String },
    /// The channel broke. The feed manager will reconnect.
    Error(String),
}

/// Receiving end of one push connection.
///
/// Dropping the channel releases the connection: the optional pump task that
/// feeds it is aborted.
#[derive(Debug)]
pub struct PushChannel {
    rx: mpsc::Receiver<ChannelMessage>,
    pump: Option<JoinHandle<()>>,
}

impl PushChannel {
    pub fn new(rx: mpsc::Receiver<ChannelMessage>) -> Self {
        Self { rx, pump: None }
    }

    /// Creates a channel together with the sender a transport writes into.
    pub fn pair(buffer: usize) -> (mpsc::Sender<ChannelMessage>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }

    /// Ties a background task to the channel's lifetime.
    pub fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }

    /// Next signal, or `None` once the transport closed.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Creates push connections for feeds.
///
/// `connect` is synchronous, like constructing a socket: it fails only when
/// the channel cannot be created at all (bad URL, no runtime). Such a failure
/// makes the feed manager fall back to polling. Problems after creation are
/// reported through [`ChannelMessage::Error`] or by closing the channel.
pub trait PushConnector: Send + Sync {
    fn connect(&self, feed: &FeedConfig) -> Result<PushChannel>;
}

/// Connector for deployments without push endpoints: every feed polls.
#[derive(Clone, Copy, Debug, Default)]
pub struct PollingOnly;

impl PushConnector for PollingOnly {
    fn connect(&self, feed: &FeedConfig) -> Result<PushChannel> {
        Err(crate::OpsDeckError::Channel(format!(
            "no push transport configured for feed '{}'",
            feed.key
        )))
    }
}
