//! Push-channel session loop.
//!
//! Reads frames from one open push connection, parses them into typed
//! [`PushMessage`] variants and feeds them into the monitoring session:
//! `status` payloads are merged exactly like polled snapshots, `log`,
//! `info` and `error` payloads become log lines, and `ping` is answered
//! with `pong`. Runs until the socket closes or the session is cancelled.

use engage_core::log::{LogEntry, LogLevel};
use engage_core::push_messages::is_loggable;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client::PushStream;
use crate::messages::{parse_message, OutboundMessage, PushMessage};
use crate::monitor::{SessionCtx, UpdateSource};

/// How a push session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// The service closed with the normal-closure code. No retry.
    Normal,
    /// The monitoring session was torn down; a close frame was sent.
    Cancelled,
    /// Any other close, a receive error, or the stream ending.
    Dropped { reason: String },
}

/// Drive one push connection until it ends.
pub(crate) async fn run_session(ctx: &SessionCtx, ws_stream: PushStream) -> SessionEnd {
    let (mut sink, mut stream) = ws_stream.split();

    if let Err(e) = send_outbound(&mut sink, &OutboundMessage::ping()).await {
        return SessionEnd::Dropped {
            reason: format!("failed to send ping: {e}"),
        };
    }

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                close_normally(&mut sink, ctx.job_id()).await;
                return SessionEnd::Cancelled;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_text(ctx, &mut sink, &text).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(job_id = %ctx.job_id(), ?frame, "Push channel closed by service");
                    return match frame {
                        Some(frame) if frame.code == CloseCode::Normal => SessionEnd::Normal,
                        Some(frame) => SessionEnd::Dropped {
                            reason: format!("closed with code {}", u16::from(frame.code)),
                        },
                        None => SessionEnd::Dropped {
                            reason: "closed without status".to_string(),
                        },
                    };
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::trace!(job_id = %ctx.job_id(), "Ignoring binary frame");
                }
                Some(Ok(_)) => {
                    // Protocol-level ping/pong is handled by tungstenite.
                }
                Some(Err(e)) => {
                    tracing::warn!(job_id = %ctx.job_id(), error = %e, "Push channel receive error");
                    return SessionEnd::Dropped {
                        reason: e.to_string(),
                    };
                }
                None => {
                    return SessionEnd::Dropped {
                        reason: "stream ended".to_string(),
                    };
                }
            }
        }
    }
}

/// Dispatch one text frame.
async fn handle_text<S>(ctx: &SessionCtx, sink: &mut S, text: &str)
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let message = match parse_message(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                job_id = %ctx.job_id(),
                error = %e,
                raw_message = %text,
                "Failed to parse push message",
            );
            ctx.log(LogLevel::Error, format!("Invalid message from service: {e}"));
            return;
        }
    };

    match message {
        PushMessage::Log(data) => {
            if is_loggable(&data.message) {
                let level = LogLevel::classify(&data.message);
                ctx.log_entry(LogEntry::with_timestamp(data.timestamp, level, data.message));
            }
        }
        PushMessage::Status(update) => ctx.apply(&update, UpdateSource::Push),
        PushMessage::Error(notice) => {
            ctx.log(LogLevel::Error, format!("Service error: {}", notice.message));
        }
        PushMessage::Info(notice) => {
            if !notice.message.is_empty() {
                ctx.log(LogLevel::Info, notice.message);
            }
        }
        PushMessage::Ping => {
            if let Err(e) = send_outbound(sink, &OutboundMessage::pong()).await {
                tracing::warn!(job_id = %ctx.job_id(), error = %e, "Failed to answer ping");
            }
        }
        PushMessage::Pong => {
            tracing::trace!(job_id = %ctx.job_id(), "Pong received");
        }
    }
}

async fn send_outbound<S>(sink: &mut S, message: &OutboundMessage) -> Result<(), tungstenite::Error>
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let text = message
        .to_text()
        .map_err(|e| tungstenite::Error::Io(std::io::Error::other(e)))?;
    sink.send(Message::Text(text)).await
}

async fn close_normally<S>(sink: &mut S, job_id: &str)
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!(job_id, error = %e, "Close frame not delivered");
    }
}
