mod core;
mod fetch;
mod handle;
mod http;
mod launcher;
mod notify;

use std::sync::Arc;
use std::time::Duration;

use epcyp_proto::channel::Channel;
use epcyp_proto::config::Config;
use epcyp_proto::favorite::Favorite;
use epcyp_proto::settings::{JsonSettingsStore, SettingsStore};
use epcyp_proto::yp::YpSource;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    /// Channels that were not in the previous successful update.
    NewArrivals(Arc<Vec<Channel>>),
    FavoritesChanged(Arc<Vec<Favorite>>),
    SourcesChanged(Arc<Vec<YpSource>>),
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // WARN and ERROR only
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// Write favorite and YP list edits back to the settings store.
fn spawn_persister(
    store: Arc<dyn SettingsStore>,
    mut rx: broadcast::Receiver<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(BroadcastMessage::FavoritesChanged(favorites)) => {
                    if let Err(e) = store.save_favorites(&favorites) {
                        warn!("Cannot save favorites: {}", e);
                    }
                }
                Ok(BroadcastMessage::SourcesChanged(sources)) => {
                    if let Err(e) = store.save_yp_sources(&sources) {
                        warn!("Cannot save YP list: {}", e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Persister lagged by {} messages", n),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut term =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!("Cannot install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = epcyp_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("epcyp.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,epcyp=debug,hyper=warn,reqwest=warn")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let mut config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let store: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(&config.paths));
    let favorites = store.load_favorites();
    let sources = store.load_yp_sources();
    info!(
        "{} favorites, YP sources: {}",
        favorites.len(),
        sources
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut peercast = launcher::PeercastProcess::start(&config.peercast);

    let fetcher =
        fetch::HttpFetcher::new(Duration::from_secs(config.update.fetch_timeout_secs))?;
    let notifier = notify::from_config(&config.notify);

    // All external inputs funnel into FeedCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::FeedEvent>(256);

    let feed_core = core::FeedCore::new(
        &config,
        fetcher,
        notifier,
        favorites,
        sources,
        broadcast_tx.clone(),
        event_tx,
    );
    let handle = feed_core.handle();

    let _persister = spawn_persister(Arc::clone(&store), broadcast_tx.subscribe());
    let _arrivals = handle.on_new_arrivals(|channels| {
        let names: Vec<&str> = channels.iter().map(|c| c.name.as_str()).collect();
        info!("New channels: {}", names.join(", "));
    });

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            handle.clone(),
        );
    }

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Signal received, shutting down");
        signal_handle.shutdown().await;
    });

    info!("epcyp initialised, running event loop");
    let core_task = tokio::spawn(feed_core.run(event_rx));

    // Fill the list right away rather than waiting for the first countdown
    if let Err(e) = handle.request_manual_refresh().await {
        warn!("Initial refresh refused: {}", e);
    }

    core_task.await??;

    // Persist what the session changed
    let last = handle.snapshot().await;
    config.update.auto_update = last.scheduler.auto_update();
    config.view.sort_key = last.sort_key;
    config.view.sort_order = last.sort_order;
    if let Err(e) = config.save() {
        warn!("Cannot save config: {}", e);
    }
    if let Err(e) = store.save_favorites(last.matcher.favorites()) {
        warn!("Cannot save favorites: {}", e);
    }
    if let Err(e) = store.save_yp_sources(&last.sources) {
        warn!("Cannot save YP list: {}", e);
    }

    if config.peercast.exit_on_quit && peercast.is_running() {
        peercast.stop().await;
    }
    info!("epcyp stopped");
    Ok(())
}
