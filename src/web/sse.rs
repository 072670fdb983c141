//! Server-Sent Events for overlay updates

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::render::{paint_state, OverlayFrameState, OverlayStyle, OverlaySurface};

/// Stream the overlay's draw commands, once now and again on every write
pub fn create_overlay_stream(
    surface: &OverlaySurface,
    view_width: u32,
    view_height: u32,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let style = surface.style();

    // Latest value wins; intermediate writes between polls are skipped
    let stream = WatchStream::new(surface.subscribe()).map(move |state| {
        Ok(overlay_event(state.as_ref(), view_width, view_height, &style))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn overlay_event(
    state: Option<&OverlayFrameState>,
    view_width: u32,
    view_height: u32,
    style: &OverlayStyle,
) -> Event {
    let commands = state
        .map(|s| paint_state(s, view_width, view_height, style))
        .unwrap_or_default();

    let data = serde_json::json!({
        "revision": state.map(|s| s.revision).unwrap_or(0),
        "commands": commands,
    });

    Event::default().event("overlay").data(data.to_string())
}
