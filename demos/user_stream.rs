use std::error::Error;
use std::time::Duration;

use fanfou_stream::api::ApiClient;
use fanfou_stream::auth::Credentials;
use fanfou_stream::stream::session::{DisconnectReason, Notification, StreamSession};
use tracing_subscriber::EnvFilter;

const RESTART_DELAY: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // FANFOU_CONSUMER_KEY, FANFOU_CONSUMER_SECRET, FANFOU_OAUTH_TOKEN,
    // FANFOU_OAUTH_TOKEN_SECRET
    let credentials = Credentials::from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut session = StreamSession::new(ApiClient::new()?, credentials)?;
        session.start();

        while let Some(notification) = session.recv().await {
            match notification {
                Notification::Connected => {
                    if let Some(identity) = session.identity() {
                        println!("connected as {}", identity.id);
                    }
                }
                Notification::Disconnected(reason) => {
                    println!("disconnected: {reason:?}");
                    // Heartbeat timeouts reconnect on their own.
                    if reason != DisconnectReason::HeartbeatTimeout {
                        tokio::time::sleep(RESTART_DELAY).await;
                        session.start();
                    }
                }
                Notification::Heartbeat => {}
                Notification::Garbage(residual) => {
                    println!("garbage: {residual}");
                }
                Notification::Event { category, record } => {
                    let text = record
                        .object
                        .as_ref()
                        .and_then(|object| object.text.as_deref())
                        .unwrap_or_default();
                    println!("{category}: {text}");
                }
            }
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
