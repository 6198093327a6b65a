//! Periodic statistics feed over Server-Sent Events.

use crate::auth::PageUrl;
use crate::rest::{AppState, StatsResponse};
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use rotator_core::event_bus::cancelled;
use rotator_core::Shutdown;
use rotator_orchestrator::BannerRotator;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// GET /v1/stats/stream
pub async fn stats_stream(
    State(state): State<AppState>,
    PageUrl(page_url): PageUrl,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (sender, receiver) = mpsc::channel::<SseEvent>(4);
    info!(page_url = %page_url, "Statistics stream opened");
    tokio::spawn(produce(
        state.rotator.clone(),
        page_url,
        state.stats_interval,
        state.shutdown.clone(),
        sender,
    ));

    // The body ends when the producer drops its sender.
    Sse::new(ReceiverStream::new(receiver).map(Ok)).keep_alive(KeepAlive::default())
}

/// Sends one frame per tick until the client goes away, the server shuts
/// down or a read fails.
async fn produce(
    rotator: Arc<BannerRotator>,
    page_url: String,
    period: Duration,
    mut shutdown: Shutdown,
    sender: mpsc::Sender<SseEvent>,
) {
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => {
                debug!(page_url = %page_url, "Statistics stream closed for shutdown");
                return;
            }
            _ = sender.closed() => break,
            _ = ticker.tick() => {}
        }

        let frame = match rotator.page_stat(&page_url).await {
            Ok(stat) => StatsResponse::from_page(&stat),
            Err(e) => {
                warn!(page_url = %page_url, error = %e, "Statistics stream stopped");
                let _ = sender
                    .send(SseEvent::default().event("error").data(e.to_string()))
                    .await;
                return;
            }
        };

        let event = match SseEvent::default().event("stats").json_data(&frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to encode statistics frame");
                return;
            }
        };
        tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => return,
            sent = sender.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    debug!(page_url = %page_url, "Statistics stream closed by client");
}
