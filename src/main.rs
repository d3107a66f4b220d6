// Pagebound - Rust Edition
// Runs one user session against the remote store until interrupted

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagebound::api::firebase::FirebaseClient;
use pagebound::api::memory::MemoryStore;
use pagebound::api::payment::PaymentOutcome;
use pagebound::api::store::RemoteStore;
use pagebound::features::presence::PresenceEvent;
use pagebound::utils::config::Settings;
use pagebound::Session;

/// How often the membership reward is checked
const MEMBERSHIP_TICK: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "pagebound=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let settings = Settings::from_env();

    let uid = settings
        .uid
        .clone()
        .ok_or_else(|| anyhow!("PAGEBOUND_UID must be set"))?;
    let username = settings.username.clone().unwrap_or_else(|| uid.clone());

    info!("Starting Pagebound (Rust Edition)...");

    let remote: Arc<dyn RemoteStore> = if settings.offline {
        warn!("Offline mode: using the in-process store");
        Arc::new(MemoryStore::new())
    } else {
        let http_client = reqwest::Client::builder()
            .user_agent("Pagebound/1.0")
            .build()
            .context("Failed to create HTTP client")?;
        let firebase = FirebaseClient::from_file(
            http_client,
            &settings.firebase_key_path,
            settings.poll_interval,
        )
        .context("Failed to load Firebase credentials")?;
        info!("Firebase client initialized");
        Arc::new(firebase)
    };

    let session = Arc::new(Session::login(remote, settings, &uid, &username).await?);
    session
        .presence_event(PresenceEvent::Enter { visible: true })
        .await;

    // Returning from the payment processor: `pagebound --payment-return "?payment=success"`
    let args: Vec<String> = env::args().collect();
    if let Some(query) = args
        .iter()
        .position(|a| a == "--payment-return")
        .and_then(|i| args.get(i + 1))
    {
        match PaymentOutcome::from_return_query(query) {
            Some(outcome) => match session.complete_payment(outcome, Utc::now()).await {
                Ok(Some(kind)) => info!("Applied payment: {:?}", kind),
                Ok(None) => info!("No payment applied"),
                Err(e) => error!("Payment return failed: {:?}", e),
            },
            None => warn!("Unrecognized payment return: {}", query),
        }
    }

    let ticker = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MEMBERSHIP_TICK);
            loop {
                interval.tick().await;
                if let Err(e) = session.membership_tick(Utc::now()).await {
                    warn!("Membership tick skipped: {}", e);
                }
            }
        })
    };

    info!("Session running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    ticker.abort();
    if session.terminate().await.is_err() {
        warn!("Exiting with changes that never reached the store");
    }
    info!("Goodbye!");
    Ok(())
}
