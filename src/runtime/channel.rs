//! WebSocket transport for one channel.
//!
//! Each [`ChannelHandle`] owns a task that connects, forwards inbound text
//! frames as [`ChannelEvent`]s and writes whatever the driver queues on it.
//! The task ends on close, on transport error, or when the handle is dropped.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::RuntimeEvent;
use crate::protocol::CLOSE_ABNORMAL;
use crate::scanner::{ChannelEvent, ChannelId};

/// Close code reported when the peer sent a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

pub(crate) struct ChannelHandle {
    id: ChannelId,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub(crate) fn open(
        id: ChannelId,
        url: String,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(id, url, rx, events));
        Self { id, outbound, task }
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    /// Queue a text frame. Returns false once the transport task has exited.
    pub(crate) fn send(&self, text: String) -> bool {
        self.outbound.send(Outbound::Text(text)).is_ok()
    }

    /// Queue a close frame and hand back the task so the caller can wait for
    /// the close to be flushed.
    pub(crate) fn close(self, code: u16, reason: String) -> JoinHandle<()> {
        let _ = self.outbound.send(Outbound::Close { code, reason });
        self.task
    }
}

async fn run_channel(
    id: ChannelId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
) {
    let emit = |event: ChannelEvent| {
        let _ = events.send(RuntimeEvent::Channel(event));
    };

    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            emit(ChannelEvent::Error {
                channel: id,
                message: e.to_string(),
            });
            return;
        }
    };
    emit(ChannelEvent::Opened { channel: id });

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        emit(ChannelEvent::Error { channel: id, message: e.to_string() });
                        emit(ChannelEvent::Closed { channel: id, code: CLOSE_ABNORMAL, reason: "send failed".into() });
                        return;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(channel = id.0, error = %e, "close frame not delivered");
                    }
                    let _ = sink.close().await;
                    return;
                }
                None => {
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(ChannelEvent::Message { channel: id, text }),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    emit(ChannelEvent::Closed { channel: id, code, reason });
                    return;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    tracing::debug!(channel = id.0, len = bytes.len(), "ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(ChannelEvent::Error { channel: id, message: e.to_string() });
                    emit(ChannelEvent::Closed { channel: id, code: CLOSE_ABNORMAL, reason: e.to_string() });
                    return;
                }
                None => {
                    emit(ChannelEvent::Closed { channel: id, code: CLOSE_ABNORMAL, reason: "stream ended".into() });
                    return;
                }
            },
        }
    }
}
