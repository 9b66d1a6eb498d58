/// FeedCore: single-owner event loop for the channel feed session.
///
/// The loop owns the working `FeedSnapshot` (channel list, favorite matcher,
/// scheduler) exclusively.  Everything else talks to it through `FeedEvent`
/// messages, usually via a `FeedHandle`:
///
/// ```text
///   ticker task ──── Tick ─────────┐
///   FeedHandle ───── ManualRefresh ┤
///              └──── ClientCommand ┼──► FeedCore ──► StateManager (publish)
///   fetch task ───── FetchCompleted┘         └─────► broadcast (StateUpdated,
///                                                    NewArrivals, ...)
/// ```
///
/// At most one fetch task exists at a time; the scheduler hands out a ticket
/// per fetch and a completion with any other ticket is dropped.  Shutdown
/// cancels the ticker and any running fetch; results that still arrive are
/// never applied.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use epcyp_proto::channel::Channel;
use epcyp_proto::config::Config;
use epcyp_proto::error::CooldownError;
use epcyp_proto::favorite::{Favorite, FavoriteMatcher};
use epcyp_proto::protocol::Command;
use epcyp_proto::reconcile::{merge_sources, reconcile, FeedStatus, SourceOutcome};
use epcyp_proto::scheduler::{FetchTicket, RefreshOutcome, TickOutcome, UpdateScheduler};
use epcyp_proto::state::{FeedSnapshot, StateManager};
use epcyp_proto::yp::YpSource;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fetch::{self, FeedFetcher};
use crate::handle::FeedHandle;
use crate::launcher::Launcher;
use crate::notify::Notifier;
use crate::BroadcastMessage;

// ── FeedEvent ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum FeedEvent {
    /// One-second scheduler tick.
    Tick,
    /// User-initiated refresh; answered with the cooldown verdict.
    ManualRefresh {
        reply: oneshot::Sender<Result<(), CooldownError>>,
    },
    ClientCommand(Command),
    FetchCompleted {
        ticket: FetchTicket,
        outcomes: Vec<SourceOutcome>,
    },
    Shutdown,
}

// ── FeedCore ──────────────────────────────────────────────────────────────────

pub struct FeedCore<F: FeedFetcher> {
    state_manager: Arc<StateManager>,
    /// Authoritative copy; readers get it through `publish`.
    working: FeedSnapshot,
    fetcher: F,
    fetch_timeout: Duration,
    notifier: Arc<dyn Notifier>,
    launcher: Launcher,
    event_tx: mpsc::Sender<FeedEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Cancels the ticker and the in-flight fetch on shutdown.
    cancel: CancellationToken,
    tick_period: Duration,
}

impl<F: FeedFetcher> FeedCore<F> {
    pub fn new(
        config: &Config,
        fetcher: F,
        notifier: Arc<dyn Notifier>,
        favorites: Vec<Favorite>,
        sources: Vec<YpSource>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<FeedEvent>,
    ) -> Self {
        let scheduler = UpdateScheduler::new(config.update.scheduler(), config.update.auto_update);
        let working = FeedSnapshot::new(
            FavoriteMatcher::new(favorites),
            sources,
            scheduler,
            config.view.sort_key,
            config.view.sort_order,
        );
        let state_manager = Arc::new(StateManager::new(working.clone()));

        Self {
            state_manager,
            working,
            fetcher,
            fetch_timeout: Duration::from_secs(config.update.fetch_timeout_secs),
            notifier,
            launcher: Launcher::new(config.player.clone(), config.peercast.port),
            event_tx,
            broadcast_tx,
            cancel: CancellationToken::new(),
            tick_period: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn handle(&self) -> FeedHandle {
        FeedHandle::new(
            self.event_tx.clone(),
            Arc::clone(&self.state_manager),
            self.broadcast_tx.clone(),
        )
    }

    /// Run the event loop until `Shutdown`.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<FeedEvent>) -> anyhow::Result<()> {
        info!(
            "FeedCore: starting event loop ({} sources, {} favorites)",
            self.working.sources.len(),
            self.working.matcher.len()
        );
        self.spawn_ticker();

        loop {
            match event_rx.recv().await {
                None => {
                    info!("FeedCore: event channel closed, shutting down");
                    break;
                }
                Some(FeedEvent::Shutdown) => {
                    info!("FeedCore: shutdown requested");
                    break;
                }
                Some(FeedEvent::Tick) => self.handle_tick().await,
                Some(FeedEvent::ManualRefresh { reply }) => {
                    let verdict = self.handle_manual_refresh().await;
                    let _ = reply.send(verdict);
                }
                Some(FeedEvent::ClientCommand(cmd)) => {
                    debug!("FeedCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("FeedCore: command error: {}", e);
                    }
                }
                Some(FeedEvent::FetchCompleted { ticket, outcomes }) => {
                    self.handle_fetch_completed(ticket, outcomes).await;
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    fn spawn_ticker(&self) {
        let tx = self.event_tx.clone();
        let cancel = self.cancel.clone();
        let period = self.tick_period;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(FeedEvent::Tick).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("FeedCore: ticker stopped");
        });
    }

    // ── scheduling ────────────────────────────────────────────────────────────

    async fn handle_tick(&mut self) {
        match self.working.scheduler.tick(Utc::now()) {
            TickOutcome::Fetch(ticket) => {
                info!("FeedCore: countdown expired, updating");
                self.start_fetch(ticket);
                self.publish().await;
            }
            TickOutcome::Counting { .. } | TickOutcome::Rearmed => self.publish().await,
            TickOutcome::Holding | TickOutcome::Stopped => {}
        }
    }

    async fn handle_manual_refresh(&mut self) -> Result<(), CooldownError> {
        let verdict = match self.working.scheduler.request_refresh(Utc::now()) {
            RefreshOutcome::Started(ticket) => {
                info!("FeedCore: manual refresh");
                self.start_fetch(ticket);
                Ok(())
            }
            RefreshOutcome::AlreadyFetching => {
                debug!("FeedCore: refresh while fetching, ignored");
                Ok(())
            }
            RefreshOutcome::Rejected(e) => {
                info!(
                    "FeedCore: refresh rejected, {}s until next allowed",
                    e.seconds_remaining
                );
                Err(e)
            }
            RefreshOutcome::Stopped => Ok(()),
        };
        self.publish().await;
        verdict
    }

    fn start_fetch(&self, ticket: FetchTicket) {
        let fetcher = self.fetcher.clone();
        let sources = self.working.sources.clone();
        let tx = self.event_tx.clone();
        let cancel = self.cancel.clone();
        let timeout = self.fetch_timeout;
        debug!(
            "FeedCore: fetch #{} from {} sources",
            ticket.generation(),
            sources.len()
        );

        tokio::spawn(async move {
            let outcomes = tokio::select! {
                _ = cancel.cancelled() => return,
                outcomes = fetch::fetch_all(&fetcher, &sources, timeout) => outcomes,
            };
            let _ = tx.send(FeedEvent::FetchCompleted { ticket, outcomes }).await;
        });
    }

    async fn handle_fetch_completed(&mut self, ticket: FetchTicket, outcomes: Vec<SourceOutcome>) {
        let merged = merge_sources(outcomes);
        for failure in &merged.failures {
            warn!("FeedCore: {} failed: {}", failure.source, failure.message);
        }

        let result = reconcile(&self.working.channels, merged.channels);
        if !self
            .working
            .scheduler
            .complete(ticket, Utc::now(), result.status)
        {
            return;
        }

        self.working.feed_status = Some(result.status);
        self.working.source_failures = merged.failures;
        match result.status {
            FeedStatus::Updated => {
                info!(
                    "FeedCore: {} channels, {} new",
                    result.merged.len(),
                    result.newly_arrived.len()
                );
                self.working.channels = result.merged;
            }
            FeedStatus::NoData => {
                warn!(
                    "FeedCore: no channels received, keeping {} from last update",
                    self.working.channels.len()
                );
            }
        }
        self.publish().await;

        if !result.newly_arrived.is_empty() {
            self.notify_arrivals(&result.newly_arrived);
            let _ = self
                .broadcast_tx
                .send(BroadcastMessage::NewArrivals(Arc::new(result.newly_arrived)));
        }
    }

    /// A new channel notifies when its first matching favorite asks for it.
    fn notify_arrivals(&self, arrivals: &[Channel]) {
        let matcher = &self.working.matcher;
        for channel in arrivals {
            let Some(favorite) = matcher.match_first(channel).and_then(|idx| matcher.get(idx)) else {
                continue;
            };
            if favorite.notify {
                self.notifier
                    .notify(&format!("★{}", channel.name), &channel.detail_line());
            }
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::SetAutoUpdate { enabled } => {
                info!("FeedCore: auto update {}", if enabled { "on" } else { "off" });
                self.working.scheduler.set_auto_update(enabled);
            }
            Command::SetSort { key, order } => {
                self.working.sort_key = key;
                self.working.sort_order = order;
            }
            Command::RegisterFavorite {
                favorite_idx,
                channel_name,
            } => {
                Arc::make_mut(&mut self.working.matcher)
                    .register_channel(favorite_idx, &channel_name)?;
                info!("FeedCore: registered {:?} to favorite #{}", channel_name, favorite_idx);
                self.favorites_changed();
            }
            Command::SetFavorites { favorites } => {
                Arc::make_mut(&mut self.working.matcher).set_favorites(favorites);
                self.favorites_changed();
            }
            Command::SetSources { sources } => {
                info!("FeedCore: {} YP sources", sources.len());
                self.working.sources = sources;
                let _ = self.broadcast_tx.send(BroadcastMessage::SourcesChanged(Arc::new(
                    self.working.sources.clone(),
                )));
            }
            Command::Play { key } => {
                let channel = self
                    .working
                    .find(&key)
                    .ok_or_else(|| anyhow::anyhow!("no channel {} ({})", key.name, key.id))?;
                self.launcher.play(channel);
                return Ok(());
            }
            Command::OpenBbs { key } => {
                let channel = self
                    .working
                    .find(&key)
                    .ok_or_else(|| anyhow::anyhow!("no channel {} ({})", key.name, key.id))?;
                self.launcher.open_bbs(channel);
                return Ok(());
            }
        }
        self.publish().await;
        Ok(())
    }

    fn favorites_changed(&self) {
        let favorites = self.working.matcher.favorites().to_vec();
        let _ = self
            .broadcast_tx
            .send(BroadcastMessage::FavoritesChanged(Arc::new(favorites)));
    }

    // ── publish / teardown ────────────────────────────────────────────────────

    async fn publish(&self) {
        let next = self.working.clone();
        self.state_manager
            .update(move |state| {
                let rev = state.rev;
                *state = next;
                state.rev = rev;
            })
            .await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn cleanup(&mut self) {
        self.cancel.cancel();
        self.working.scheduler.stop();
        self.publish().await;
        info!("FeedCore: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use epcyp_proto::error::FeedError;
    use epcyp_proto::scheduler::SchedulerState;
    use tokio::sync::Semaphore;
    use tokio::task::JoinHandle;

    #[derive(Clone, Default)]
    struct FakeFetcher {
        bodies: Arc<Mutex<VecDeque<String>>>,
        calls: Arc<AtomicUsize>,
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeFetcher {
        fn with_bodies(bodies: &[String]) -> Self {
            Self {
                bodies: Arc::new(Mutex::new(bodies.iter().cloned().collect())),
                ..Self::default()
            }
        }

        fn gated(mut self) -> (Self, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            self.gate = Some(Arc::clone(&gate));
            (self, gate)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FeedFetcher for FakeFetcher {
        fn fetch(
            &self,
            _source: &YpSource,
        ) -> impl Future<Output = Result<String, FeedError>> + Send {
            let this = self.clone();
            async move {
                this.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &this.gate {
                    let _permit = gate.acquire().await;
                }
                let body = this.bodies.lock().unwrap().pop_front().unwrap_or_default();
                Ok(body)
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<(String, String)>>);

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, body: &str) {
            self.0
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
        }
    }

    struct Harness {
        handle: FeedHandle,
        core: JoinHandle<anyhow::Result<()>>,
        notes: Arc<RecordingNotifier>,
    }

    fn line(name: &str, listeners: i32) -> String {
        format!(
            "{name}<>{name}ID<>198.51.100.1:7144<>http://bbs.example/<>genre<>detail<>{listeners}<>0<>500<>FLV<><><><><><>0:10<>click<>comment<>0"
        )
    }

    fn config(min_interval_secs: u64) -> Config {
        let mut config = Config::default();
        config.update.min_interval_secs = min_interval_secs;
        config
    }

    fn start_with(
        config: Config,
        fetcher: FakeFetcher,
        favorites: Vec<Favorite>,
        tick_period: Duration,
    ) -> Harness {
        let (broadcast_tx, _) = broadcast::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let notes = Arc::new(RecordingNotifier::default());
        let core = FeedCore::new(
            &config,
            fetcher,
            notes.clone(),
            favorites,
            vec![YpSource::new("SP", "http://sp.example/")],
            broadcast_tx,
            event_tx,
        )
        .with_tick_period(tick_period);
        let handle = core.handle();
        let core = tokio::spawn(core.run(event_rx));
        Harness {
            handle,
            core,
            notes,
        }
    }

    fn start(config: Config, fetcher: FakeFetcher, favorites: Vec<Favorite>) -> Harness {
        start_with(config, fetcher, favorites, Duration::from_secs(1))
    }

    async fn wait_until<P>(handle: &FeedHandle, pred: P) -> FeedSnapshot
    where
        P: Fn(&FeedSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = handle.snapshot().await;
                if pred(&snapshot) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time")
    }

    #[tokio::test]
    async fn test_manual_refresh_publishes_sorted_channels() {
        let fetcher = FakeFetcher::with_bodies(&[[line("Low", 1), line("High", 9)].join("\n")]);
        let h = start(config(0), fetcher, Vec::new());

        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));
        let snapshot = wait_until(&h.handle, |s| s.channels.len() == 2).await;
        assert_eq!(snapshot.feed_status, Some(FeedStatus::Updated));

        let names: Vec<_> = h
            .handle
            .current_channels()
            .await
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["High", "Low"]);
        assert!(h.handle.scheduler_status().await.last_update.is_some());
    }

    #[tokio::test]
    async fn test_refresh_inside_cooldown_is_rejected() {
        let fetcher = FakeFetcher::with_bodies(&[line("A", 1)]);
        let h = start(config(30), fetcher, Vec::new());

        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));
        wait_until(&h.handle, |s| s.feed_status.is_some()).await;

        let err = h
            .handle
            .request_manual_refresh()
            .await
            .expect_err("second refresh must be refused");
        assert!((1..=30).contains(&err.seconds_remaining));
        assert_eq!(
            h.handle.scheduler_status().await.state,
            SchedulerState::Cooldown
        );
    }

    #[tokio::test]
    async fn test_refresh_while_fetching_starts_no_second_fetch() {
        let (fetcher, gate) = FakeFetcher::with_bodies(&[line("A", 1)]).gated();
        let h = start(config(0), fetcher.clone(), Vec::new());

        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));
        wait_until(&h.handle, |_| fetcher.calls() == 1).await;
        assert_eq!(
            h.handle.scheduler_status().await.state,
            SchedulerState::Fetching
        );
        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));

        gate.add_permits(1);
        wait_until(&h.handle, |s| s.channels.len() == 1).await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_new_arrivals_notify_first_matching_favorite() {
        let fetcher = FakeFetcher::with_bodies(&[
            [line("Alpha", 1), line("Beta", 2)].join("\n"),
            [line("Alpha", 1), line("Beta", 2), line("Gamma", 3)].join("\n"),
        ]);
        let mut alpha = Favorite::new("alpha", "^alpha$");
        alpha.notify = true;
        let beta = Favorite::new("beta", "beta");
        let h = start(config(0), fetcher, vec![alpha, beta]);

        let arrived = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&arrived);
        h.handle.on_new_arrivals(move |channels| {
            sink.lock()
                .unwrap()
                .extend(channels.iter().map(|c| c.name.clone()));
        });

        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));
        wait_until(&h.handle, |s| s.channels.len() == 2).await;
        wait_until(&h.handle, |_| arrived.lock().unwrap().len() == 2).await;

        {
            let notes = h.notes.0.lock().unwrap();
            assert_eq!(notes.len(), 1);
            assert_eq!(notes[0].0, "★Alpha");
            assert_eq!(notes[0].1, "genre - detail comment ");
        }
        assert_eq!(h.handle.favorite_channels().await.len(), 2);

        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));
        wait_until(&h.handle, |s| s.channels.len() == 3).await;
        wait_until(&h.handle, |_| arrived.lock().unwrap().len() == 3).await;
        assert_eq!(arrived.lock().unwrap()[2], "Gamma");
        assert_eq!(h.notes.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_fetch_keeps_previous_channels() {
        let fetcher = FakeFetcher::with_bodies(&[line("A", 1), String::new()]);
        let h = start(config(0), fetcher, Vec::new());

        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));
        let first = wait_until(&h.handle, |s| s.channels.len() == 1).await;
        let last_update = first.scheduler.last_update();

        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));
        let after = wait_until(&h.handle, |s| s.feed_status == Some(FeedStatus::NoData)).await;
        assert_eq!(after.channels, first.channels);
        assert_eq!(after.scheduler.last_update(), last_update);
    }

    #[tokio::test]
    async fn test_shutdown_discards_in_flight_fetch() {
        let (fetcher, gate) = FakeFetcher::with_bodies(&[line("A", 1)]).gated();
        let h = start(config(0), fetcher.clone(), Vec::new());

        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));
        wait_until(&h.handle, |_| fetcher.calls() == 1).await;

        h.handle.shutdown().await;
        tokio::time::timeout(Duration::from_secs(2), h.core)
            .await
            .expect("core stops")
            .expect("core task")
            .expect("core result");
        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = h.handle.snapshot().await;
        assert!(snapshot.channels.is_empty());
        assert!(snapshot.scheduler.is_stopped());
        // the core is gone; further requests are no-ops
        assert_eq!(h.handle.request_manual_refresh().await, Ok(()));
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_countdown_drives_automatic_fetch() {
        let mut config = config(0);
        config.update.auto_update = true;
        config.update.countdown_ticks = 2;
        let fetcher = FakeFetcher::with_bodies(&[line("A", 1)]);
        let h = start_with(config, fetcher, Vec::new(), Duration::from_millis(10));

        wait_until(&h.handle, |s| s.channels.len() == 1).await;
    }

    #[tokio::test]
    async fn test_register_favorite_broadcasts_new_list() {
        let h = start(config(0), FakeFetcher::default(), vec![Favorite::new("f", "")]);
        let mut rx = h.handle.subscribe();

        h.handle
            .register_favorite(0, "New (Ch)")
            .await
            .expect("send");
        let favorites = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(BroadcastMessage::FavoritesChanged(favorites)) = rx.recv().await {
                    return favorites;
                }
            }
        })
        .await
        .expect("favorites broadcast");
        assert_eq!(favorites[0].pattern, r"New \(Ch\)");

        let snapshot = wait_until(&h.handle, |s| !s.matcher.favorites()[0].pattern.is_empty()).await;
        assert!(snapshot.matcher.errors().is_empty());
    }

    #[tokio::test]
    async fn test_play_unknown_channel_keeps_core_running() {
        let h = start(config(0), FakeFetcher::default(), Vec::new());
        h.handle
            .play(epcyp_proto::channel::ChannelKey {
                name: "nope".into(),
                id: "0".into(),
            })
            .await
            .expect("send");
        h.handle.set_auto_update(true).await.expect("send");
        wait_until(&h.handle, |s| s.scheduler.auto_update()).await;
    }
}
