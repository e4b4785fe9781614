//! Server-sent events push transport.

use reqwest::header;
use tokio::sync::mpsc;

use crate::{
    executor::Auth, request::join_url, ChannelMessage, FeedConfig, OpsDeckError, PushChannel,
    PushConnector, RequestExecutor, Result,
};

const CHANNEL_BUFFER: usize = 64;

/// Opens `text/event-stream` connections under a push base URL.
#[derive(Clone, Debug)]
pub struct SseConnector {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
}

impl SseConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            auth: Auth::None,
        }
    }

    /// Shares the executor's HTTP client and credentials.
    pub fn from_executor(executor: &RequestExecutor, base_url: impl Into<String>) -> Self {
        Self {
            http: executor.http().clone(),
            base_url: base_url.into(),
            auth: executor.auth().clone(),
        }
    }
}

impl SseConnector {
    fn push_url(&self, feed: &FeedConfig) -> Result<reqwest::Url> {
        let path = feed.push_path.as_deref().ok_or_else(|| {
            OpsDeckError::Channel(format!("feed '{}' has no push endpoint", feed.key))
        })?;
        let mut url = reqwest::Url::parse(&join_url(&self.base_url, path))
            .map_err(|err| OpsDeckError::Channel(format!("invalid push url: {err}")))?;
        if !feed.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&feed.params);
        }
        Ok(url)
    }
}

impl PushConnector for SseConnector {
    fn connect(&self, feed: &FeedConfig) -> Result<PushChannel> {
        let url = self.push_url(feed)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| OpsDeckError::Channel(format!("no async runtime: {err}")))?;

        let request = self
            .auth
            .apply(self.http.get(url))
            .header(header::ACCEPT, "text/event-stream");
        let (tx, channel) = PushChannel::pair(CHANNEL_BUFFER);
        let pump = runtime.spawn(pump_events(request, tx));
        Ok(channel.with_pump(pump))
    }
}

async fn pump_events(request: reqwest::RequestBuilder, tx: mpsc::Sender<ChannelMessage>) {
    let mut response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            let _ = tx.send(ChannelMessage::Error(err.to_string())).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let _ = tx
            .send(ChannelMessage::Error(format!("push endpoint returned {status}")))
            .await;
        return;
    }

    if tx.send(ChannelMessage::Opened).await.is_err() {
        return;
    }

    let mut parser = SseParser::default();
    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                for frame in parser.feed(&bytes) {
                    let message = ChannelMessage::Message {
                        event: frame.event,
                        data: frame.data,
                    };
                    if tx.send(message).await.is_err() {
                        return;
                    }
                }
            }
            // End of stream: dropping `tx` closes the channel.
            Ok(None) => return,
            Err(err) => {
                let _ = tx.send(ChannelMessage::Error(err.to_string())).await;
                return;
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Chunks may split lines anywhere.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
            if let Some(frame) = self.line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            if self.data.is_empty() {
                self.event = None;
                return None;
            }
            let data = self.data.join("\n");
            self.data.clear();
            return Some(SseFrame {
                event: self.event.take(),
                data,
            });
        }

        // Comment line, e.g. a heartbeat.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            _ => {}
        }
        None
    }
}
