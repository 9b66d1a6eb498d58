use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use epcyp_proto::channel::{Channel, ChannelKey};
use epcyp_proto::favorite::Favorite;
use epcyp_proto::protocol::{ChannelRow, Command, CooldownReport, StatusReport};
use epcyp_proto::scheduler::SchedulerStatus;
use epcyp_proto::view::{SortKey, SortOrder};
use epcyp_proto::yp::YpSource;
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::handle::FeedHandle;
use crate::BroadcastMessage;

#[derive(Clone)]
struct HttpState {
    handle: FeedHandle,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    word: String,
}

#[derive(Deserialize)]
struct RegisterBody {
    channel_name: String,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    handle: FeedHandle,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(handle);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(handle: FeedHandle) -> Router {
    Router::new()
        .route("/api/channels", get(list_channels))
        .route("/api/channels/favorites", get(list_favorite_channels))
        .route("/api/channels/search", get(search_channels))
        .route("/api/status", get(status))
        .route("/api/scheduler", get(scheduler))
        .route("/api/refresh", post(refresh))
        .route("/api/auto-update/:enabled", post(set_auto_update))
        .route("/api/sort/:key/:order", post(set_sort))
        .route("/api/favorites", get(get_favorites).put(put_favorites))
        .route("/api/favorites/:idx/register", post(register_favorite))
        .route("/api/sources", get(get_sources).put(put_sources))
        .route("/api/play", post(play))
        .route("/api/bbs", post(open_bbs))
        .route("/api/events", get(events))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { handle })
}

async fn rows(state: &HttpState, channels: Vec<Channel>) -> Json<Vec<ChannelRow>> {
    let matcher = state.handle.matcher().await;
    Json(ChannelRow::rows(channels, &matcher))
}

async fn list_channels(State(state): State<HttpState>) -> Json<Vec<ChannelRow>> {
    let channels = state.handle.current_channels().await;
    rows(&state, channels).await
}

async fn list_favorite_channels(State(state): State<HttpState>) -> Json<Vec<ChannelRow>> {
    let channels = state.handle.favorite_channels().await;
    rows(&state, channels).await
}

async fn search_channels(
    State(state): State<HttpState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<ChannelRow>> {
    let channels = state.handle.search_channels(&params.word).await;
    rows(&state, channels).await
}

async fn scheduler(State(state): State<HttpState>) -> Json<SchedulerStatus> {
    Json(state.handle.scheduler_status().await)
}

async fn status(State(state): State<HttpState>) -> Json<StatusReport> {
    let snapshot = state.handle.snapshot().await;
    Json(StatusReport {
        rev: snapshot.rev,
        scheduler: snapshot.scheduler_status(Utc::now()),
        channel_count: snapshot.channels.len(),
        feed_status: snapshot.feed_status,
        source_failures: snapshot.source_failures.clone(),
        favorite_errors: snapshot
            .matcher
            .errors()
            .iter()
            .map(|e| e.to_string())
            .collect(),
    })
}

async fn refresh(State(state): State<HttpState>) -> Response {
    info!("HTTP API: refresh");
    match state.handle.request_manual_refresh().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(CooldownReport {
                seconds_remaining: e.seconds_remaining,
            }),
        )
            .into_response(),
    }
}

async fn set_auto_update(
    State(state): State<HttpState>,
    Path(enabled): Path<bool>,
) -> StatusCode {
    info!("HTTP API: auto update {}", enabled);
    status_of(state.handle.set_auto_update(enabled).await)
}

async fn set_sort(
    State(state): State<HttpState>,
    Path((key, order)): Path<(String, String)>,
) -> StatusCode {
    let (Ok(key), Ok(order)) = (key.parse::<SortKey>(), order.parse::<SortOrder>()) else {
        return StatusCode::BAD_REQUEST;
    };
    send(&state, Command::SetSort { key, order }).await
}

async fn get_favorites(State(state): State<HttpState>) -> Json<Vec<Favorite>> {
    Json(state.handle.snapshot().await.matcher.favorites().to_vec())
}

async fn put_favorites(
    State(state): State<HttpState>,
    Json(favorites): Json<Vec<Favorite>>,
) -> StatusCode {
    info!("HTTP API: {} favorites", favorites.len());
    send(&state, Command::SetFavorites { favorites }).await
}

async fn register_favorite(
    State(state): State<HttpState>,
    Path(idx): Path<usize>,
    Json(body): Json<RegisterBody>,
) -> StatusCode {
    if idx >= state.handle.snapshot().await.matcher.len() {
        return StatusCode::NOT_FOUND;
    }
    info!("HTTP API: register {:?} to favorite #{}", body.channel_name, idx);
    status_of(state.handle.register_favorite(idx, &body.channel_name).await)
}

async fn get_sources(State(state): State<HttpState>) -> Json<Vec<YpSource>> {
    Json(state.handle.snapshot().await.sources)
}

async fn put_sources(
    State(state): State<HttpState>,
    Json(sources): Json<Vec<YpSource>>,
) -> StatusCode {
    send(&state, Command::SetSources { sources }).await
}

async fn play(State(state): State<HttpState>, Json(key): Json<ChannelKey>) -> StatusCode {
    if !known(&state, &key).await {
        return StatusCode::NOT_FOUND;
    }
    info!("HTTP API: play {}", key.name);
    status_of(state.handle.play(key).await)
}

async fn open_bbs(State(state): State<HttpState>, Json(key): Json<ChannelKey>) -> StatusCode {
    if !known(&state, &key).await {
        return StatusCode::NOT_FOUND;
    }
    status_of(state.handle.open_bbs(key).await)
}

async fn known(state: &HttpState, key: &ChannelKey) -> bool {
    state.handle.snapshot().await.find(key).is_some()
}

/// Server-sent events mirroring the daemon broadcast channel.
async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.handle.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if let Some(event) = to_event(&msg) {
                        return Some((Ok(event), rx));
                    }
                }
                Err(RecvError::Lagged(n)) => debug!("HTTP API: event stream lagged by {}", n),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_event(msg: &BroadcastMessage) -> Option<Event> {
    let event = match msg {
        BroadcastMessage::StateUpdated => Event::default().event("state").data(""),
        BroadcastMessage::NewArrivals(channels) => {
            let names: Vec<&str> = channels.iter().map(|c| c.name.as_str()).collect();
            Event::default().event("arrivals").json_data(names).ok()?
        }
        BroadcastMessage::FavoritesChanged(_) => Event::default().event("favorites").data(""),
        BroadcastMessage::SourcesChanged(_) => Event::default().event("sources").data(""),
        BroadcastMessage::Log(line) => Event::default().event("log").data(line),
    };
    Some(event)
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    status_of(state.handle.send(cmd).await)
}

fn status_of(sent: anyhow::Result<()>) -> StatusCode {
    match sent {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!("HTTP API: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
