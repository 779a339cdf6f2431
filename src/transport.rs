//! UDP transport and invoke-id correlation
//!
//! One socket serves every outstanding request. A background reader task
//! decodes incoming datagrams and routes confirmed replies to the waiter
//! registered under their invoke id; unconfirmed services fan out to
//! subscribers over a broadcast channel. Unmatched replies are counted and
//! dropped, never delivered to the wrong waiter.

use crate::codec::{self, Apdu};
use crate::constants::*;
use crate::error::{BacnetError, BacnetResult};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Counters kept by the transport
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub unconfirmed_sent: u64,
    pub unconfirmed_received: u64,
    pub timeouts: u64,
    pub unmatched_replies: u64,
    pub decode_errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// An unconfirmed service (or inbound confirmed COV notification) received
/// from the network
#[derive(Debug, Clone)]
pub struct UnconfirmedEvent {
    pub source: SocketAddr,
    pub service: u8,
    pub payload: Bytes,
}

/// Successful outcome of a confirmed request
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceAck {
    Simple,
    Complex(Vec<u8>),
}

type Pending = HashMap<u8, oneshot::Sender<BacnetResult<ServiceAck>>>;

/// BACnet/IP transport bound to one UDP socket
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    pending: Arc<Mutex<Pending>>,
    next_invoke_id: Mutex<u8>,
    events: broadcast::Sender<UnconfirmedEvent>,
    stats: Arc<RwLock<TransportStats>>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl UdpTransport {
    /// Bind a socket and start the reader task
    pub async fn bind(addr: SocketAddr) -> BacnetResult<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            BacnetError::connection(format!("failed to bind {addr}: {e}"))
        })?;
        socket
            .set_broadcast(true)
            .map_err(|e| BacnetError::connection(format!("failed to enable broadcast: {e}")))?;

        let socket = Arc::new(socket);
        let pending: Arc<Mutex<Pending>> = Arc::new(Mutex::new(HashMap::new()));
        let stats = Arc::new(RwLock::new(TransportStats::default()));
        let (events, _) = broadcast::channel(64);
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(reader_loop(
            Arc::clone(&socket),
            Arc::clone(&pending),
            events.clone(),
            Arc::clone(&stats),
        ));

        debug!(local = %socket.local_addr().map_err(BacnetError::from)?, "transport bound");

        Ok(Self {
            socket,
            pending,
            next_invoke_id: Mutex::new(0),
            events,
            stats,
            closed,
            reader,
        })
    }

    /// Local socket address
    pub fn local_addr(&self) -> BacnetResult<SocketAddr> {
        self.socket.local_addr().map_err(BacnetError::from)
    }

    /// Subscribe to unconfirmed services received by this transport
    pub fn subscribe(&self) -> broadcast::Receiver<UnconfirmedEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the transport counters
    pub async fn stats(&self) -> TransportStats {
        self.stats.read().await.clone()
    }

    fn ensure_open(&self) -> BacnetResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BacnetError::cancelled("transport is closed"));
        }
        Ok(())
    }

    /// Reserve a free invoke id and register the reply waiter
    async fn register_waiter(
        &self,
        tx: oneshot::Sender<BacnetResult<ServiceAck>>,
    ) -> BacnetResult<u8> {
        let mut pending = self.pending.lock().await;
        let mut next = self.next_invoke_id.lock().await;
        for _ in 0..=u8::MAX {
            let candidate = *next;
            *next = next.wrapping_add(1);
            if !pending.contains_key(&candidate) {
                pending.insert(candidate, tx);
                return Ok(candidate);
            }
        }
        Err(BacnetError::connection("all 256 invoke ids are in flight"))
    }

    /// Send a confirmed request and wait for its correlated reply
    pub async fn send_request(
        &self,
        dest: SocketAddr,
        service: u8,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> BacnetResult<ServiceAck> {
        self.ensure_open()?;

        let (tx, rx) = oneshot::channel();
        let invoke_id = self.register_waiter(tx).await?;

        let apdu = Apdu::ConfirmedRequest {
            invoke_id,
            service,
            payload,
        };
        let mut body = codec::encode_npdu(true).to_vec();
        body.extend_from_slice(&apdu.encode());
        let frame = codec::encode_frame(BVLL_ORIGINAL_UNICAST, &body);

        if let Err(e) = self.socket.send_to(&frame, dest).await {
            self.pending.lock().await.remove(&invoke_id);
            return Err(BacnetError::connection(format!("send to {dest} failed: {e}")));
        }

        {
            let mut stats = self.stats.write().await;
            stats.requests_sent += 1;
            stats.bytes_sent += frame.len() as u64;
        }
        trace!(%dest, invoke_id, service, "confirmed request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BacnetError::cancelled("transport closed while waiting")),
            Err(_) => {
                self.pending.lock().await.remove(&invoke_id);
                self.stats.write().await.timeouts += 1;
                Err(BacnetError::timeout(format!(
                    "no reply from {dest} within {}ms (invoke id {invoke_id})",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Send an unconfirmed service with the given BVLL function
    pub async fn send_unconfirmed(
        &self,
        dest: SocketAddr,
        function: u8,
        service: u8,
        payload: Vec<u8>,
    ) -> BacnetResult<()> {
        self.ensure_open()?;

        let apdu = Apdu::UnconfirmedRequest { service, payload };
        let mut body = codec::encode_npdu(false).to_vec();
        body.extend_from_slice(&apdu.encode());
        let frame = codec::encode_frame(function, &body);

        self.socket
            .send_to(&frame, dest)
            .await
            .map_err(|e| BacnetError::connection(format!("send to {dest} failed: {e}")))?;

        let mut stats = self.stats.write().await;
        stats.unconfirmed_sent += 1;
        stats.bytes_sent += frame.len() as u64;
        Ok(())
    }

    /// Register as a foreign device with a BBMD
    pub async fn register_foreign_device(&self, bbmd: SocketAddr, ttl: u16) -> BacnetResult<()> {
        self.ensure_open()?;
        let frame = codec::encode_register_foreign_device(ttl);
        self.socket
            .send_to(&frame, bbmd)
            .await
            .map_err(|e| BacnetError::connection(format!("send to {bbmd} failed: {e}")))?;
        debug!(%bbmd, ttl, "foreign device registration sent");
        Ok(())
    }

    /// Stop the reader and fail every outstanding request with `Cancelled`
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reader.abort();
        let mut pending = self.pending.lock().await;
        for (invoke_id, tx) in pending.drain() {
            trace!(invoke_id, "cancelling outstanding request");
            let _ = tx.send(Err(BacnetError::cancelled("transport closed")));
        }
        debug!("transport closed");
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Map an Error PDU into the library error space
fn error_pdu_to_error(class: u8, code: u8) -> BacnetError {
    let description = error_description(class, code);
    match (class, code) {
        (ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT)
        | (ERROR_CLASS_PROPERTY, ERROR_CODE_UNKNOWN_PROPERTY) => {
            BacnetError::unknown_property(description)
        }
        (ERROR_CLASS_PROPERTY, ERROR_CODE_INVALID_DATA_TYPE) => {
            BacnetError::type_mismatch(description)
        }
        _ => BacnetError::rejected(format!("{description} (class {class}, code {code})")),
    }
}

async fn reader_loop(
    socket: Arc<UdpSocket>,
    pending: Arc<Mutex<Pending>>,
    events: broadcast::Sender<UnconfirmedEvent>,
    stats: Arc<RwLock<TransportStats>>,
) {
    let mut buf = vec![0u8; 1500];
    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "socket receive failed");
                continue;
            }
        };
        stats.write().await.bytes_received += len as u64;

        let datagram = &buf[..len];
        let apdu = match codec::decode_frame(datagram).and_then(|frame| match frame.function {
            BVLL_RESULT => {
                if frame.body.len() >= 2 {
                    let code = u16::from_be_bytes([frame.body[0], frame.body[1]]);
                    if code != 0 {
                        warn!(%source, code, "BVLC result reported failure");
                    }
                }
                Ok(None)
            }
            BVLL_ORIGINAL_UNICAST | BVLL_ORIGINAL_BROADCAST | BVLL_FORWARDED_NPDU => {
                let apdu_octets = codec::strip_npdu(frame.body)?;
                Apdu::decode(apdu_octets).map(Some)
            }
            other => Err(BacnetError::protocol(format!(
                "unsupported BVLL function 0x{other:02X}"
            ))),
        }) {
            Ok(Some(apdu)) => apdu,
            Ok(None) => continue,
            Err(e) => {
                stats.write().await.decode_errors += 1;
                debug!(%source, error = %e, payload = %hex::encode(datagram), "dropping undecodable datagram");
                continue;
            }
        };

        match apdu {
            Apdu::SimpleAck { invoke_id, .. } => {
                deliver(&pending, &stats, invoke_id, Ok(ServiceAck::Simple)).await;
            }
            Apdu::ComplexAck {
                invoke_id, payload, ..
            } => {
                deliver(&pending, &stats, invoke_id, Ok(ServiceAck::Complex(payload))).await;
            }
            Apdu::Error {
                invoke_id,
                class,
                code,
                ..
            } => {
                deliver(&pending, &stats, invoke_id, Err(error_pdu_to_error(class, code))).await;
            }
            Apdu::Reject { invoke_id, reason } => {
                deliver(
                    &pending,
                    &stats,
                    invoke_id,
                    Err(BacnetError::protocol(format!(
                        "request rejected (reason {reason})"
                    ))),
                )
                .await;
            }
            Apdu::UnconfirmedRequest { service, payload } => {
                stats.write().await.unconfirmed_received += 1;
                let _ = events.send(UnconfirmedEvent {
                    source,
                    service,
                    payload: Bytes::from(payload),
                });
            }
            Apdu::ConfirmedRequest {
                invoke_id,
                service,
                payload,
            } => {
                // A client only serves inbound confirmed COV notifications;
                // everything else is refused
                let reply = if service == SERVICE_CONFIRMED_COV_NOTIFICATION {
                    let _ = events.send(UnconfirmedEvent {
                        source,
                        service,
                        payload: Bytes::from(payload),
                    });
                    Apdu::SimpleAck { invoke_id, service }
                } else {
                    debug!(%source, service, "refusing unsupported confirmed service");
                    Apdu::Error {
                        invoke_id,
                        service,
                        class: ERROR_CLASS_SERVICES,
                        code: ERROR_CODE_SERVICE_REQUEST_DENIED,
                    }
                };
                let mut body = codec::encode_npdu(false).to_vec();
                body.extend_from_slice(&reply.encode());
                let frame = codec::encode_frame(BVLL_ORIGINAL_UNICAST, &body);
                if let Err(e) = socket.send_to(&frame, source).await {
                    warn!(%source, error = %e, "failed to answer confirmed request");
                }
            }
        }
    }
}

async fn deliver(
    pending: &Mutex<Pending>,
    stats: &RwLock<TransportStats>,
    invoke_id: u8,
    outcome: BacnetResult<ServiceAck>,
) {
    let waiter = pending.lock().await.remove(&invoke_id);
    match waiter {
        Some(tx) => {
            stats.write().await.responses_received += 1;
            let _ = tx.send(outcome);
        }
        None => {
            stats.write().await.unmatched_replies += 1;
            debug!(invoke_id, "discarding reply with no matching request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WhoIs;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_unconfirmed_delivery() {
        let a = UdpTransport::bind(loopback()).await.unwrap();
        let b = UdpTransport::bind(loopback()).await.unwrap();
        let mut events = b.subscribe();

        a.send_unconfirmed(
            b.local_addr().unwrap(),
            BVLL_ORIGINAL_BROADCAST,
            SERVICE_WHO_IS,
            WhoIs::default().encode(),
        )
        .await
        .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.service, SERVICE_WHO_IS);
        assert!(event.payload.is_empty());

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_request_times_out_without_reply() {
        let a = UdpTransport::bind(loopback()).await.unwrap();
        // A socket that never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let err = a
            .send_request(
                silent.local_addr().unwrap(),
                SERVICE_READ_PROPERTY,
                vec![],
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BacnetError::Timeout(_)));
        assert_eq!(a.stats().await.timeouts, 1);
        a.close().await;
    }

    #[tokio::test]
    async fn test_reply_correlation() {
        let a = UdpTransport::bind(loopback()).await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        // Echo peer: answer each confirmed request with a SimpleAck carrying
        // the request's invoke id
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                let (len, src) = peer.recv_from(&mut buf).await.unwrap();
                let frame = codec::decode_frame(&buf[..len]).unwrap();
                let apdu = Apdu::decode(codec::strip_npdu(frame.body).unwrap()).unwrap();
                if let Apdu::ConfirmedRequest {
                    invoke_id, service, ..
                } = apdu
                {
                    let ack = Apdu::SimpleAck { invoke_id, service };
                    let mut body = codec::encode_npdu(false).to_vec();
                    body.extend_from_slice(&ack.encode());
                    let reply = codec::encode_frame(BVLL_ORIGINAL_UNICAST, &body);
                    peer.send_to(&reply, src).await.unwrap();
                }
            }
        });

        let ack = a
            .send_request(
                peer_addr,
                SERVICE_WRITE_PROPERTY,
                vec![],
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(ack, ServiceAck::Simple);
        assert_eq!(a.stats().await.responses_received, 1);
        a.close().await;
    }

    #[tokio::test]
    async fn test_unmatched_reply_is_discarded() {
        let a = UdpTransport::bind(loopback()).await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // SimpleAck for an invoke id nobody is waiting on
        let ack = Apdu::SimpleAck {
            invoke_id: 42,
            service: SERVICE_WRITE_PROPERTY,
        };
        let mut body = codec::encode_npdu(false).to_vec();
        body.extend_from_slice(&ack.encode());
        let frame = codec::encode_frame(BVLL_ORIGINAL_UNICAST, &body);
        peer.send_to(&frame, a.local_addr().unwrap()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = a.stats().await;
        assert_eq!(stats.unmatched_replies, 1);
        assert_eq!(stats.responses_received, 0);
        a.close().await;
    }

    #[tokio::test]
    async fn test_close_cancels_outstanding_requests() {
        let a = Arc::new(UdpTransport::bind(loopback()).await.unwrap());
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = silent.local_addr().unwrap();

        let transport = Arc::clone(&a);
        let request = tokio::spawn(async move {
            transport
                .send_request(dest, SERVICE_READ_PROPERTY, vec![], Duration::from_secs(30))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        a.close().await;

        let outcome = request.await.unwrap();
        assert!(matches!(outcome, Err(BacnetError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let a = UdpTransport::bind(loopback()).await.unwrap();
        let dest = a.local_addr().unwrap();
        a.close().await;
        assert!(matches!(
            a.send_unconfirmed(dest, BVLL_ORIGINAL_UNICAST, SERVICE_WHO_IS, vec![])
                .await,
            Err(BacnetError::Cancelled(_))
        ));
    }
}
