use super::PaymentNotification;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_postgres::AsyncMessage;
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;
use crate::utils::error::EngineResult;

/// Channel notified by the payment trigger in the bundled migration
pub const PAYMENT_CHANNEL: &str = "payment_recorded";

/// Listens on the payment NOTIFY channel so recorded payments trigger an
/// on-demand recompute of the paying customer.
pub struct PaymentListener {
    config: DatabaseConfig,
    channel: String,
}

impl PaymentListener {
    pub fn new(config: DatabaseConfig, channel: String) -> Self {
        Self { config, channel }
    }

    /// Connects, issues `LISTEN` and returns the receiving end of the
    /// parsed notifications. The listener stops when `shutdown` flips.
    pub async fn start(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> EngineResult<mpsc::UnboundedReceiver<PaymentNotification>> {
        let (tx, rx) = mpsc::unbounded_channel();

        info!("🔄 Connecting payment listener to DB...");
        let (client, mut connection) =
            tokio_postgres::connect(&self.config.url, tokio_postgres::NoTls)
                .await?;

        // The connection must be polled while LISTEN executes, so pump its
        // messages into a channel from a separate task.
        let (message_tx, mut message_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = stream.next().await {
                match message {
                    Ok(message) => {
                        if message_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Listener connection error: {}", e);
                        break;
                    }
                }
            }
            warn!("Listener connection stream ended");
        });

        client
            .batch_execute(&listen_statement(&self.channel))
            .await?;

        info!("✅ Started listening on channel: {}", self.channel);

        tokio::spawn(async move {
            // Keep the client alive for as long as we listen
            let _client = client;

            loop {
                tokio::select! {
                    message = message_rx.recv() => {
                        match message {
                            Some(AsyncMessage::Notification(notif)) => {
                                debug!("Received notification: {:?}", notif.payload());
                                match serde_json::from_str::<PaymentNotification>(notif.payload()) {
                                    Ok(payment) => {
                                        if tx.send(payment).is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        error!("Failed to parse notification payload: {}", e);
                                    }
                                }
                            }
                            Some(AsyncMessage::Notice(notice)) => {
                                debug!("Received notice: {:?}", notice);
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            info!("Payment listener closed");
        });

        Ok(rx)
    }
}

/// `LISTEN` with the channel as a quoted identifier, so the name is taken verbatim
fn listen_statement(channel: &str) -> String {
    format!("LISTEN \"{}\"", channel.replace('"', "\"\""))
}
