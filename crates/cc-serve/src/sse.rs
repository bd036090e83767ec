use crate::routes::error::map_error;
use crate::{build_codecrow, AppState};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use cc_core::types::{JobId, JobLogPage};
use futures::stream::{self, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;

const LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn to_event<T: serde::Serialize>(value: &T) -> Event {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Event::default().data(json)
}

/// Domain event history after `after`, then live events from the bus.
pub async fn subscribe(state: AppState, after: Option<i64>) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let history = match codecrow.events().list(after, None) {
        Ok(events) => events,
        Err(err) => return map_error(&err, None).into_response(),
    };
    drop(codecrow);
    let last_seen = history.last().map_or(after.unwrap_or(0), |event| event.seq);
    let history_stream =
        stream::iter(history.into_iter().map(|event| Ok::<Event, Infallible>(to_event(&event))));

    let live_stream =
        BroadcastStream::new(state.event_bus().subscribe()).filter_map(move |item| async move {
            match item {
                Ok(event) if event.seq > last_seen => Some(Ok(to_event(&event))),
                _ => None,
            }
        });

    let stream = history_stream.chain(live_stream);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

struct LogCursor {
    state: AppState,
    job_id: JobId,
    after: i64,
    done: bool,
}

/// Polls the job's log table and emits one `log` event per entry, then a
/// final `complete` event once the job is terminal and fully drained.
pub async fn job_logs(state: AppState, job_id: JobId, after: i64) -> Response {
    let first = match poll_logs(&state, &job_id, after) {
        Ok(page) => page,
        Err(response) => return response,
    };
    let cursor = LogCursor {
        state,
        job_id,
        after,
        done: false,
    };
    let stream = stream::unfold(
        (cursor, Some(first)),
        |(mut cursor, pending)| async move {
            if cursor.done {
                return None;
            }
            let page = match pending {
                Some(page) => page,
                None => {
                    tokio::time::sleep(LOG_POLL_INTERVAL).await;
                    match poll_logs(&cursor.state, &cursor.job_id, cursor.after) {
                        Ok(page) => page,
                        Err(_) => {
                            cursor.done = true;
                            let event = Event::default().event("error").data("log poll failed");
                            return Some((vec![event], (cursor, None)));
                        }
                    }
                }
            };
            cursor.after = page.latest_sequence;
            let mut events: Vec<Event> = page
                .logs
                .iter()
                .map(|entry| to_event(entry).event("log"))
                .collect();
            if page.is_complete {
                cursor.done = true;
                events.push(Event::default().event("complete").data(page.latest_sequence.to_string()));
            }
            Some((events, (cursor, None)))
        },
    )
    .flat_map(|events| stream::iter(events.into_iter().map(Ok::<Event, Infallible>)));

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn poll_logs(state: &AppState, job_id: &JobId, after: i64) -> Result<JobLogPage, Response> {
    let codecrow = build_codecrow(state).map_err(|err| map_error(&err, None).into_response())?;
    codecrow
        .jobs()
        .logs_since(job_id, after, None)
        .map_err(|err| map_error(&err, None).into_response())
}
