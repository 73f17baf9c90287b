use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::observability::{request_label, REQUEST_DURATION_SECONDS, REQUESTS_TOTAL};
use crate::protocol::{parse_request, Notification, ProtocolError, Request, Response};

const NOTIFY_QUEUE: usize = 256;

/// Per-connection state: the engine plus the units this client listens on.
struct Session {
    engine: Arc<Engine>,
    notify_tx: mpsc::Sender<String>,
    listeners: HashMap<Ulid, JoinHandle<()>>,
}

impl Session {
    fn new(engine: Arc<Engine>, notify_tx: mpsc::Sender<String>) -> Self {
        Self {
            engine,
            notify_tx,
            listeners: HashMap::new(),
        }
    }

    async fn handle_line(&mut self, line: &str) -> Response {
        let req = match parse_request(line) {
            Ok(req) => req,
            Err(e) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "error").increment(1);
                return e.into();
            }
        };

        let op = request_label(&req);
        let start = Instant::now();
        let result = self.execute(req).await;
        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(start.elapsed().as_secs_f64());

        match result {
            Ok(resp) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
                resp
            }
            Err(e) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "error").increment(1);
                tracing::debug!("{op} failed: {e}");
                e.into()
            }
        }
    }

    async fn execute(&mut self, req: Request) -> Result<Response, EngineError> {
        let engine = &self.engine;
        let resp = match req {
            Request::RegisterUnit {
                id,
                property_id,
                owner_id,
                name,
                price_per_night,
                max_guests,
            } => {
                engine
                    .register_unit(id, property_id, owner_id, name, price_per_night, max_guests)
                    .await?;
                Response::ok(engine.get_unit_info(id).await?)
            }
            Request::UpdateUnit {
                id,
                name,
                price_per_night,
                max_guests,
                active,
                actor,
            } => Response::ok(
                engine
                    .update_unit(id, name, price_per_night, max_guests, active, actor)
                    .await?,
            ),
            Request::GetUnit { id } => Response::ok(engine.get_unit_info(id).await?),
            Request::ListUnits { owner_id } => Response::ok(engine.list_units(owner_id).await),
            Request::IsAvailable {
                unit_id,
                check_in,
                check_out,
            } => Response::ok(engine.is_available(unit_id, check_in, check_out).await?),
            Request::FilterAvailable {
                unit_ids,
                check_in,
                check_out,
            } => Response::ok(engine.filter_available(unit_ids, check_in, check_out).await?),
            Request::UnavailableCalendar { unit_id } => {
                Response::ok(engine.unavailable_calendar(unit_id).await?)
            }
            Request::BlockingRanges { unit_id } => Response::ok(engine.blocking_ranges_for(unit_id).await?),
            Request::AdmitBooking {
                unit_id,
                check_in,
                check_out,
                guests,
                user_id,
            } => Response::ok(
                engine
                    .admit_booking(unit_id, check_in, check_out, guests, user_id)
                    .await?,
            ),
            Request::TransitionBooking {
                booking_id,
                status,
                actor,
            } => Response::ok(engine.transition_booking(booking_id, status, actor).await?),
            Request::GetBooking { id } => Response::ok(engine.get_booking(id).await?),
            Request::BookingsForUnit { unit_id } => Response::ok(engine.bookings_for_unit(unit_id).await?),
            Request::BookingsForUser { user_id } => Response::ok(engine.bookings_for_user(user_id).await),
            Request::BookingsForHost { owner_id } => Response::ok(engine.bookings_for_host(owner_id).await),
            Request::CreateBlockedDate {
                unit_id,
                start,
                end,
                reason,
                actor,
            } => Response::ok(
                engine
                    .create_blocked_date(unit_id, start, end, reason, actor)
                    .await?,
            ),
            Request::RemoveBlockedDate { id, actor } => {
                engine.remove_blocked_date(id, actor).await?;
                Response::ok(id)
            }
            Request::BlockedDates { unit_id } => Response::ok(engine.blocked_dates_for_unit(unit_id).await?),
            Request::Listen { unit_id } => {
                if engine.get_unit(&unit_id).is_none() {
                    return Err(EngineError::NotFound(unit_id));
                }
                self.listen(unit_id);
                Response::ok(unit_id)
            }
            Request::Unlisten { unit_id } => {
                if let Some(handle) = self.listeners.remove(&unit_id) {
                    handle.abort();
                }
                Response::ok(unit_id)
            }
            Request::UnlistenAll => {
                self.unlisten_all();
                Response::ok(true)
            }
        };
        Ok(resp)
    }

    /// Forward the unit's events into this connection's outbound queue.
    fn listen(&mut self, unit_id: Ulid) {
        if self.listeners.contains_key(&unit_id) {
            return;
        }
        let mut rx = self.engine.notify.subscribe(unit_id);
        let tx = self.notify_tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(line) = (Notification { notify: unit_id, event }).to_line() else {
                            continue;
                        };
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("listener on unit {unit_id} lagged, dropped {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.listeners.insert(unit_id, handle);
    }

    fn unlisten_all(&mut self) {
        for (_, handle) in self.listeners.drain() {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unlisten_all();
    }
}

fn codec_io(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::other(other),
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (notify_tx, mut notify_rx) = mpsc::channel::<String>(NOTIFY_QUEUE);
    let mut session = Session::new(engine, notify_tx);
    // The codec ends the stream once after a decode error; reading resumes after that.
    let mut after_decode_error = false;

    loop {
        tokio::select! {
            frame = framed.next() => {
                let Some(frame) = frame else {
                    if std::mem::take(&mut after_decode_error) {
                        continue;
                    }
                    break;
                };
                let resp = match frame {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => session.handle_line(&line).await,
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        after_decode_error = true;
                        ProtocolError::LineTooLong(MAX_LINE_LEN).into()
                    }
                    Err(LinesCodecError::Io(e)) => return Err(e),
                };
                framed.send(resp.to_line()).await.map_err(codec_io)?;
            }
            Some(line) = notify_rx.recv() => {
                framed.send(line).await.map_err(codec_io)?;
            }
        }
    }

    Ok(())
}
