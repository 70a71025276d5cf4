//! WebSocket log subscription for live indexing.
//!
//! A [`LogStream`] opens a `logsSubscribe` subscription for one program and
//! spawns a task that forwards notifications into a bounded channel. The task
//! re-subscribes after a delay when the socket drops, bumps the
//! subscription's resync counter once the new session is confirmed, and
//! sends `logsUnsubscribe` when the subscription is cancelled.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::CommitmentLevel;
use crate::types::traits::LogSubscription;
use crate::types::transaction::LogNotification;
use crate::utils::error::{IndexerError, Result};
use crate::utils::logging::{self, LogLevel};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket notification from Solana (logsSubscribe)
#[derive(Debug, Deserialize)]
struct LogsNotification {
    params: LogsNotificationParams,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationParams {
    result: LogsNotificationResult,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationResult {
    value: LogsNotificationValue,
    context: LogsNotificationContext,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationValue {
    signature: String,
    err: Option<serde_json::Value>,
}

/// Subscription response from Solana
#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    result: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: serde_json::Value,
}

impl From<LogsNotification> for LogNotification {
    fn from(n: LogsNotification) -> Self {
        let err = n
            .params
            .result
            .value
            .err
            .filter(|e| !e.is_null())
            .map(|e| e.to_string());
        LogNotification {
            signature: n.params.result.value.signature,
            slot: n.params.result.context.slot,
            err,
        }
    }
}

struct Session {
    stream: WsStream,
    subscription_id: u64,
}

enum Interruption {
    Cancelled,
    ReceiverClosed,
    Disconnected(String),
}

/// Opens `logsSubscribe` subscriptions against a PubSub endpoint.
#[derive(Debug, Clone)]
pub struct LogStream {
    ws_url: String,
    commitment: CommitmentLevel,
    reconnect_delay: Duration,
}

impl LogStream {
    /// Creates a stream factory for `ws_url`.
    pub fn new(
        ws_url: impl Into<String>,
        commitment: CommitmentLevel,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            commitment,
            reconnect_delay,
        }
    }

    /// Subscribes to logs mentioning `program_id`.
    ///
    /// The first connection is made before returning so a bad endpoint is
    /// reported to the caller; later drops are retried by the feeding task.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::ConnectionError` if the socket cannot be opened or
    /// the node rejects the subscription.
    pub async fn subscribe(&self, program_id: &Pubkey, buffer: usize) -> Result<LogSubscription> {
        let session = self.open(program_id).await?;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (resync_tx, resync_rx) = watch::channel(0u64);
        let cancel = CancellationToken::new();

        let stream = self.clone();
        let program_id = *program_id;
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            stream.pump(session, program_id, tx, resync_tx, token).await;
        });

        Ok(LogSubscription::new(rx, cancel, Some(task)).with_resyncs(resync_rx))
    }

    async fn open(&self, program_id: &Pubkey) -> Result<Session> {
        logging::log(
            LogLevel::Debug,
            &format!(
                "Connecting to WebSocket: {}",
                logging::redact_url(&self.ws_url)
            ),
        );

        let (mut stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| IndexerError::ConnectionError(format!("WebSocket connection failed: {e}")))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [program_id.to_string()] },
                { "commitment": self.commitment.as_str() }
            ]
        });

        stream
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| IndexerError::ConnectionError(format!("Failed to send subscription: {e}")))?;

        let subscription_id = tokio::time::timeout(CONFIRMATION_TIMEOUT, async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(response) = serde_json::from_str::<SubscriptionResponse>(&text) {
                            return Ok(response.result);
                        }
                        if let Ok(response) = serde_json::from_str::<ErrorResponse>(&text) {
                            return Err(IndexerError::ConnectionError(format!(
                                "Subscription rejected: {}",
                                response.error
                            )));
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(IndexerError::ConnectionError(format!(
                            "WebSocket error before confirmation: {e}"
                        )))
                    }
                    None => {
                        return Err(IndexerError::ConnectionError(
                            "WebSocket closed before confirmation".to_string(),
                        ))
                    }
                }
            }
        })
        .await
        .map_err(|_| {
            IndexerError::ConnectionError("Timed out waiting for subscription".to_string())
        })??;

        tracing::info!(
            program_id = %program_id,
            subscription_id,
            "WebSocket subscribed"
        );

        Ok(Session {
            stream,
            subscription_id,
        })
    }

    async fn pump(
        &self,
        mut session: Session,
        program_id: Pubkey,
        tx: mpsc::Sender<LogNotification>,
        resync: watch::Sender<u64>,
        cancel: CancellationToken,
    ) {
        loop {
            match Self::forward(&mut session, &tx, &cancel).await {
                Interruption::Cancelled | Interruption::ReceiverClosed => {
                    Self::close(session).await;
                    return;
                }
                Interruption::Disconnected(reason) => {
                    tracing::warn!(
                        program_id = %program_id,
                        reason = %reason,
                        "WebSocket disconnected, reconnecting"
                    );
                }
            }

            session = loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(self.reconnect_delay) => {}
                }
                match self.open(&program_id).await {
                    Ok(s) => break s,
                    Err(e) => logging::log_error("WebSocket reconnect", &e.to_string()),
                }
            };
            // notifications sent while disconnected are gone
            resync.send_modify(|generation| *generation += 1);
        }
    }

    async fn forward(
        session: &mut Session,
        tx: &mpsc::Sender<LogNotification>,
        cancel: &CancellationToken,
    ) -> Interruption {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => return Interruption::Cancelled,
                message = session.stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(notification) = serde_json::from_str::<LogsNotification>(&text) else {
                        continue;
                    };
                    // blocks while the worker is busy; the channel is the backpressure point
                    tokio::select! {
                        () = cancel.cancelled() => return Interruption::Cancelled,
                        sent = tx.send(notification.into()) => {
                            if sent.is_err() {
                                return Interruption::ReceiverClosed;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Interruption::Disconnected(format!("closed by server: {frame:?}"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Interruption::Disconnected(e.to_string()),
                None => return Interruption::Disconnected("stream ended".to_string()),
            }
        }
    }

    async fn close(mut session: Session) {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "logsUnsubscribe",
            "params": [session.subscription_id]
        });
        if let Err(e) = session.stream.send(Message::Text(request.to_string())).await {
            tracing::debug!(error = %e, "logsUnsubscribe not delivered");
        }
        let _ = session.stream.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_notification_deserialization() {
        let json_data = r#"{
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": {
                        "slot": 5208469
                    },
                    "value": {
                        "signature": "5h6xBEauJ3PK6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc",
                        "err": null,
                        "logs": [
                            "Program 11111111111111111111111111111111 invoke [1]",
                            "Program 11111111111111111111111111111111 success"
                        ]
                    }
                },
                "subscription": 12345
            }
        }"#;

        let notification: LogsNotification = serde_json::from_str(json_data).unwrap();
        let notification = LogNotification::from(notification);
        assert_eq!(
            notification.signature,
            "5h6xBEauJ3PK6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc"
        );
        assert_eq!(notification.slot, 5208469);
        assert!(notification.err.is_none());
    }

    #[test]
    fn test_failed_notification_carries_error() {
        let json_data = r#"{
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": { "slot": 7 },
                    "value": {
                        "signature": "sig",
                        "err": { "InstructionError": [0, { "Custom": 1 }] },
                        "logs": []
                    }
                },
                "subscription": 1
            }
        }"#;

        let notification: LogsNotification = serde_json::from_str(json_data).unwrap();
        let notification = LogNotification::from(notification);
        assert!(notification.err.unwrap().contains("InstructionError"));
    }

    #[test]
    fn test_subscription_ack_is_not_a_notification() {
        let ack = r#"{"jsonrpc":"2.0","result":23784,"id":1}"#;
        assert!(serde_json::from_str::<LogsNotification>(ack).is_err());
        assert_eq!(
            serde_json::from_str::<SubscriptionResponse>(ack).unwrap().result,
            23784
        );
    }
}
