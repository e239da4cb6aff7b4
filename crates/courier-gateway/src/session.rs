//! Per-session supervisor task.
//!
//! Each live session runs exactly one of these. It opens the transport,
//! consumes the adapter's ordered event stream, drives the status state
//! machine (connecting → qr_ready/connected → disconnected), and applies
//! the reconnect policy when the connection closes for a transient reason.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use courier_core::disconnect::DisconnectReason;
use courier_core::events::SessionEvent;
use courier_core::session::{SessionKey, SessionSnapshot, SessionStatus};
use courier_transport::TransportEvent;

use crate::registry::{HandleSlot, RegistryInner};

/// Why the event dispatch loop ended.
enum CloseOutcome {
    Closed(DisconnectReason),
    /// The adapter dropped its stream without a close event.
    StreamEnded,
}

pub(crate) async fn run(
    inner: Arc<RegistryInner>,
    key: SessionKey,
    epoch: u64,
    snapshot: watch::Sender<SessionSnapshot>,
    handle_slot: HandleSlot,
) {
    let mut attempts: u32 = 0;
    loop {
        let creds = match inner.creds.load(&key) {
            Ok(creds) => creds,
            Err(e) => {
                warn!(session_key = %key, error = %e, "credential load failed, connecting fresh");
                None
            }
        };

        let mut conn = match inner.transport.connect(&key, creds).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(session_key = %key, error = %e, "transport connect failed");
                if !schedule_retry(&inner, &key, epoch, &snapshot, &mut attempts, DisconnectReason::Unknown).await {
                    return;
                }
                continue;
            }
        };
        *handle_slot.lock() = Some(conn.handle.clone());

        let outcome = dispatch(&inner, &key, &snapshot, &mut conn.events, &mut attempts).await;
        *handle_slot.lock() = None;

        let reason = match outcome {
            CloseOutcome::Closed(reason) => reason,
            CloseOutcome::StreamEnded => DisconnectReason::Unknown,
        };

        if reason.is_terminal() {
            info!(session_key = %key, reason = reason.reason_kind(), "session logged out, tearing down");
            teardown(&inner, &key, epoch, &snapshot, reason, true);
            return;
        }

        if !schedule_retry(&inner, &key, epoch, &snapshot, &mut attempts, reason).await {
            return;
        }
    }
}

/// Consume transport events in emission order until the connection closes.
async fn dispatch(
    inner: &Arc<RegistryInner>,
    key: &SessionKey,
    snapshot: &watch::Sender<SessionSnapshot>,
    events: &mut mpsc::Receiver<TransportEvent>,
    attempts: &mut u32,
) -> CloseOutcome {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::QrIssued { raw } => {
                let rendered = inner.qr.render(&raw);
                let _ = snapshot.send(SessionSnapshot {
                    status: SessionStatus::QrReady,
                    qr_code: Some(rendered.clone()),
                    phone_number: None,
                });
                if let Err(e) = inner.session_repo.upsert_qr(key, &rendered) {
                    warn!(session_key = %key, error = %e, "qr challenge not persisted");
                }
                inner.publish(SessionEvent::QrCode {
                    key: key.clone(),
                    qr: rendered,
                });
            }
            TransportEvent::Opened { phone_number } => {
                *attempts = 0;
                let _ = snapshot.send(SessionSnapshot {
                    status: SessionStatus::Connected,
                    qr_code: None,
                    phone_number: phone_number.clone(),
                });
                if let Err(e) = inner.session_repo.upsert_connected(key, phone_number.as_deref()) {
                    warn!(session_key = %key, error = %e, "connected state not persisted");
                }
                info!(session_key = %key, "session connected");
                inner.publish(SessionEvent::Connected {
                    key: key.clone(),
                    phone_number,
                });
            }
            TransportEvent::Closed { reason } => return CloseOutcome::Closed(reason),
            TransportEvent::CredsUpdated { blob } => {
                // Forwarded verbatim; the blob is opaque here.
                if let Err(e) = inner.creds.save(key, &blob) {
                    warn!(session_key = %key, error = %e, "credential save failed");
                }
            }
            TransportEvent::Message(inbound) => {
                inner.relay.on_inbound(key, inbound);
            }
        }
    }
    CloseOutcome::StreamEnded
}

/// Sleep out the fixed reconnect delay, or give up when the retry budget is
/// spent. Returns false when the session was torn down.
async fn schedule_retry(
    inner: &Arc<RegistryInner>,
    key: &SessionKey,
    epoch: u64,
    snapshot: &watch::Sender<SessionSnapshot>,
    attempts: &mut u32,
    reason: DisconnectReason,
) -> bool {
    *attempts += 1;
    let max = inner.config.reconnect.max_attempts;
    if max > 0 && *attempts > max {
        warn!(
            session_key = %key,
            attempts = *attempts - 1,
            reason = reason.reason_kind(),
            "reconnect attempts exhausted, giving up"
        );
        teardown(inner, key, epoch, snapshot, reason, false);
        return false;
    }

    let _ = snapshot.send(SessionSnapshot::connecting());
    info!(
        session_key = %key,
        reason = reason.reason_kind(),
        attempt = *attempts,
        delay_ms = inner.config.reconnect.delay.as_millis() as u64,
        "reconnect scheduled"
    );
    tokio::time::sleep(inner.config.reconnect.delay).await;
    true
}

/// Final teardown: durable update, subscriber notification, registry
/// removal. Store failures are logged, never surfaced.
fn teardown(
    inner: &Arc<RegistryInner>,
    key: &SessionKey,
    epoch: u64,
    snapshot: &watch::Sender<SessionSnapshot>,
    reason: DisconnectReason,
    remove_creds: bool,
) {
    let _ = snapshot.send(SessionSnapshot {
        status: SessionStatus::Disconnected,
        qr_code: None,
        phone_number: None,
    });
    if let Err(e) = inner.session_repo.mark_disconnected(key) {
        warn!(session_key = %key, error = %e, "disconnect not persisted");
    }
    if remove_creds {
        if let Err(e) = inner.creds.remove(key) {
            warn!(session_key = %key, error = %e, "credential removal failed");
        }
    }
    inner.publish(SessionEvent::Disconnected {
        key: key.clone(),
        reason,
    });
    inner.remove_if_epoch(key, epoch);
}
