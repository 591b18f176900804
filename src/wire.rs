//! Newline-delimited JSON request adapter over TCP.
//!
//! Every line is one `Request` tagged by `op`; every reply is one line,
//! `{"ok":true,"data":...}` or `{"ok":false,"error":{"kind","message"}}`.
//! After `subscribe`, notifications for the requester arrive as
//! `{"notification":{...}}` lines interleaved with replies.

use std::io;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::notify::Notification;
use crate::observability::{op_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateTable {
        requester: Requester,
        id: Ulid,
        name: String,
    },
    RemoveTable {
        requester: Requester,
        id: Ulid,
    },
    ListTables {},
    GetConfig {},
    UpdateConfig {
        requester: Requester,
        config: ReservationConfig,
    },
    CreateReservation {
        requester: Requester,
        reservation: ReservationRequest,
    },
    UpdateReservation {
        requester: Requester,
        id: Ulid,
        patch: ReservationPatch,
    },
    ApproveReservation {
        requester: Requester,
        id: Ulid,
    },
    RejectReservation {
        requester: Requester,
        id: Ulid,
        reason: String,
    },
    CancelReservation {
        requester: Requester,
        id: Ulid,
    },
    CompleteReservation {
        requester: Requester,
        id: Ulid,
    },
    GetReservation {
        id: Ulid,
    },
    ListReservations {
        resource_id: Ulid,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    },
    ListPendingApprovals {
        requester: Requester,
    },
    Subscribe {
        requester: Requester,
    },
}

/// A connection's live notification feed.
pub struct Subscription {
    pub user_id: Ulid,
    pub rx: broadcast::Receiver<Notification>,
}

/// Reservation as shown to callers: times in the offset the user submitted.
#[derive(Debug, Serialize)]
pub struct ReservationView<'a> {
    pub id: Ulid,
    pub user_id: Ulid,
    pub resource_id: Ulid,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub duration_hours: f64,
    pub num_members: u32,
    pub num_guests: u32,
    pub all_day: bool,
    pub reason: Option<&'a str>,
    pub status: ReservationStatus,
    pub approved: bool,
    pub approval: &'a ApprovalState,
    pub rejection_reason: Option<&'a str>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Reservation> for ReservationView<'a> {
    fn from(r: &'a Reservation) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            resource_id: r.resource_id,
            start: r.local_start(),
            end: r.local_end(),
            duration_hours: r.duration_hours,
            num_members: r.num_members,
            num_guests: r.num_guests,
            all_day: r.all_day,
            reason: r.reason.as_deref(),
            status: r.status,
            approved: r.approved(),
            approval: &r.approval,
            rejection_reason: r.rejection_reason(),
            created_at: DateTime::from_timestamp_millis(r.created_at).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(r.updated_at).unwrap_or_default(),
        }
    }
}

fn ok(data: Value) -> Value {
    json!({ "ok": true, "data": data })
}

fn err(kind: &str, message: String) -> Value {
    json!({ "ok": false, "error": { "kind": kind, "message": message } })
}

fn outcome_json(outcome: &ReservationOutcome) -> Value {
    json!({
        "reservation": ReservationView::from(&outcome.reservation),
        "message": outcome.message(),
    })
}

fn reservation_json(r: &Reservation) -> Value {
    json!(ReservationView::from(r))
}

fn list_json(rs: &[Reservation]) -> Value {
    Value::Array(rs.iter().map(reservation_json).collect())
}

/// Execute one request against the engine.
pub async fn execute(
    engine: &Engine,
    req: Request,
    subscription: &mut Option<Subscription>,
) -> Result<Value, EngineError> {
    match req {
        Request::CreateTable { requester, id, name } => {
            engine.create_table(&requester, id, name).await?;
            Ok(json!({ "id": id }))
        }
        Request::RemoveTable { requester, id } => {
            engine.remove_table(&requester, id).await?;
            Ok(json!({ "id": id }))
        }
        Request::ListTables {} => Ok(json!(engine.list_tables().await)),
        Request::GetConfig {} => Ok(json!(*engine.config().await)),
        Request::UpdateConfig { requester, config } => {
            engine.update_config(&requester, config).await?;
            Ok(json!(*engine.config().await))
        }
        Request::CreateReservation { requester, reservation } => {
            let outcome = engine.create_reservation(&requester, reservation).await?;
            Ok(outcome_json(&outcome))
        }
        Request::UpdateReservation { requester, id, patch } => {
            let outcome = engine.update_reservation(&requester, id, patch).await?;
            Ok(outcome_json(&outcome))
        }
        Request::ApproveReservation { requester, id } => {
            let outcome = engine.approve_reservation(&requester, id).await?;
            Ok(outcome_json(&outcome))
        }
        Request::RejectReservation { requester, id, reason } => {
            let r = engine.reject_reservation(&requester, id, &reason).await?;
            Ok(reservation_json(&r))
        }
        Request::CancelReservation { requester, id } => {
            let r = engine.cancel_reservation(&requester, id).await?;
            Ok(reservation_json(&r))
        }
        Request::CompleteReservation { requester, id } => {
            let r = engine.complete_reservation(&requester, id).await?;
            Ok(reservation_json(&r))
        }
        Request::GetReservation { id } => {
            let r = engine.get_reservation(id).await?;
            Ok(reservation_json(&r))
        }
        Request::ListReservations { resource_id, from, to } => {
            let rs = engine
                .list_reservations(resource_id, from.timestamp_millis(), to.timestamp_millis())
                .await?;
            Ok(list_json(&rs))
        }
        Request::ListPendingApprovals { requester } => {
            if !requester.is_admin() {
                return Err(EngineError::Forbidden("only administrators can review approvals"));
            }
            Ok(list_json(&engine.list_pending_approvals().await))
        }
        Request::Subscribe { requester } => {
            *subscription = Some(Subscription {
                user_id: requester.id,
                rx: engine.notify.subscribe(requester.id),
            });
            Ok(json!({ "subscribed": requester.id }))
        }
    }
}

async fn handle_line(
    engine: &Engine,
    line: &str,
    subscription: &mut Option<Subscription>,
) -> Value {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "bad_request").increment(1);
            return err("bad_request", e.to_string());
        }
    };
    let op = op_label(&req);
    let start = std::time::Instant::now();
    let result = execute(engine, req, subscription).await;
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(start.elapsed().as_secs_f64());
    match result {
        Ok(data) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            ok(data)
        }
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => e.kind()).increment(1);
            err(e.kind(), e.to_string())
        }
    }
}

async fn next_notification(subscription: &mut Option<Subscription>) -> Option<Notification> {
    let Some(sub) = subscription.as_mut() else {
        return std::future::pending().await;
    };
    match sub.rx.recv().await {
        Ok(n) => Some(n),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::warn!("subscriber lagged, {skipped} notifications dropped");
            None
        }
        Err(broadcast::error::RecvError::Closed) => {
            *subscription = None;
            None
        }
    }
}

fn codec_io(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut subscription: Option<Subscription> = None;
    let result = serve(&mut framed, &engine, &mut subscription).await;
    if let Some(sub) = subscription.take() {
        drop(sub.rx);
        engine.notify.prune(&sub.user_id);
    }
    result
}

async fn serve(
    framed: &mut Framed<TcpStream, LinesCodec>,
    engine: &Engine,
    subscription: &mut Option<Subscription>,
) -> io::Result<()> {
    loop {
        tokio::select! {
            line = framed.next() => {
                let reply = match line {
                    None => return Ok(()),
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => handle_line(engine, &line, subscription).await,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        err("limit_exceeded", "request line too long".into())
                    }
                    Some(Err(e)) => return Err(codec_io(e)),
                };
                framed.send(reply.to_string()).await.map_err(codec_io)?;
            }
            Some(n) = next_notification(subscription) => {
                framed
                    .send(json!({ "notification": n }).to_string())
                    .await
                    .map_err(codec_io)?;
            }
        }
    }
}
