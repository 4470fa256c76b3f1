use std::sync::Arc;
use tracing::{error, info, warn};

use voicero::api::{client::VoiceroClient, storefront::StorefrontClient};
use voicero::bus::{Event, EventBus};
use voicero::config::Config;
use voicero::dom::Page;
use voicero::server::{AppState, WidgetServer};
use voicero::store::Store;
use voicero::widget::shim::{ShimPlayer, ShimRecorder};
use voicero::widget::{Widget, WidgetParts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Voicero widget daemon starting...");
    let config = Config::from_env()?;

    let bus = Arc::new(EventBus::new());

    info!("Initializing store at {}", config.db_path.display());
    let store = Store::new(&config.db_path).await?;
    store.init().await?;
    let store = Arc::new(store);

    let cached_threads = match store.load_threads().await {
        Ok(threads) => threads,
        Err(e) => {
            warn!("cached threads unavailable: {:#}", e);
            Vec::new()
        }
    };

    let page = Arc::new(Page::empty().with_bus(bus.clone()));
    let recorder = Arc::new(ShimRecorder::new());
    let player = Arc::new(ShimPlayer::new(bus.clone()));
    let backend = Arc::new(VoiceroClient::new(&config)?);
    let storefront = Arc::new(StorefrontClient::new(
        config.store_url.clone(),
        config.http_timeout_secs,
    )?);

    let widget = Arc::new(Widget::new(
        &config,
        WidgetParts {
            backend,
            storefront,
            storage: store.clone(),
            doc: page.clone(),
            bus: bus.clone(),
            recorder: recorder.clone(),
            player: player.clone(),
            context: Default::default(),
            cached_threads,
        },
    ));

    // Persist every transcript message for the offline fallback
    let mut rx = bus.subscribe();
    let persist_store = store.clone();
    let persist_handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Event::MessageAppended { interface, message }) => {
                    if let Err(e) = persist_store.save_message(interface, &message).await {
                        error!("Failed to cache message: {:#}", e);
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Message cache lagged, {} events skipped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    widget.init().await;

    let server = WidgetServer::new(AppState {
        widget,
        page,
        bus,
        recorder,
        player,
    });
    let app = server.router();

    info!("Starting widget server on port {}", config.port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
        _ = persist_handle => {
            error!("Message cache task finished unexpectedly");
        }
    }

    Ok(())
}
