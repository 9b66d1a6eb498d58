use std::sync::Arc;

use chrono::Utc;
use epcyp_proto::channel::{Channel, ChannelKey};
use epcyp_proto::error::CooldownError;
use epcyp_proto::favorite::FavoriteMatcher;
use epcyp_proto::protocol::Command;
use epcyp_proto::scheduler::SchedulerStatus;
use epcyp_proto::state::{FeedSnapshot, StateManager};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::FeedEvent;
use crate::BroadcastMessage;

/// Cloneable front door to a running `FeedCore`.  Reads go straight to the
/// published snapshot; writes are queued as events.
#[derive(Clone)]
pub struct FeedHandle {
    event_tx: mpsc::Sender<FeedEvent>,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl FeedHandle {
    pub(crate) fn new(
        event_tx: mpsc::Sender<FeedEvent>,
        state_manager: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            event_tx,
            state_manager,
            broadcast_tx,
        }
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        self.state_manager.get_state().await
    }

    /// Favorite matcher of the latest snapshot, without cloning the lists.
    pub async fn matcher(&self) -> Arc<FavoriteMatcher> {
        let state = self.state_manager.arc();
        let snapshot = state.read().await;
        Arc::clone(&snapshot.matcher)
    }

    pub async fn current_channels(&self) -> Vec<Channel> {
        self.snapshot().await.current_channels()
    }

    pub async fn favorite_channels(&self) -> Vec<Channel> {
        self.snapshot().await.favorite_channels()
    }

    pub async fn search_channels(&self, word: &str) -> Vec<Channel> {
        self.snapshot().await.search_channels(word)
    }

    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.snapshot().await.scheduler_status(Utc::now())
    }

    /// `Err` carries the seconds left in the cooldown window.  A refresh
    /// while a fetch is running, or after shutdown, is accepted and does
    /// nothing.
    pub async fn request_manual_refresh(&self) -> Result<(), CooldownError> {
        let (reply, verdict) = oneshot::channel();
        if self
            .event_tx
            .send(FeedEvent::ManualRefresh { reply })
            .await
            .is_err()
        {
            debug!("FeedHandle: refresh after shutdown ignored");
            return Ok(());
        }
        verdict.await.unwrap_or(Ok(()))
    }

    pub async fn send(&self, cmd: Command) -> anyhow::Result<()> {
        self.event_tx
            .send(FeedEvent::ClientCommand(cmd))
            .await
            .map_err(|_| anyhow::anyhow!("feed core is not running"))
    }

    pub async fn set_auto_update(&self, enabled: bool) -> anyhow::Result<()> {
        self.send(Command::SetAutoUpdate { enabled }).await
    }

    pub async fn play(&self, key: ChannelKey) -> anyhow::Result<()> {
        self.send(Command::Play { key }).await
    }

    pub async fn open_bbs(&self, key: ChannelKey) -> anyhow::Result<()> {
        self.send(Command::OpenBbs { key }).await
    }

    pub async fn register_favorite(
        &self,
        favorite_idx: usize,
        channel_name: &str,
    ) -> anyhow::Result<()> {
        self.send(Command::RegisterFavorite {
            favorite_idx,
            channel_name: channel_name.to_string(),
        })
        .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.broadcast_tx.subscribe()
    }

    /// Call `callback` with every batch of newly arrived channels.
    pub fn on_new_arrivals<C>(&self, callback: C) -> JoinHandle<()>
    where
        C: Fn(&[Channel]) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(BroadcastMessage::NewArrivals(channels)) => callback(&channels),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("FeedHandle: arrival listener lagged by {} messages", n)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Idempotent; a no-op once the core has stopped.
    pub async fn shutdown(&self) {
        let _ = self.event_tx.send(FeedEvent::Shutdown).await;
    }
}
