//! Reliable datagram transport
//!
//! Large messages are split into MTU-sized chunks, each acknowledged and
//! retransmitted independently; the receiver reassembles chunks per
//! `(peer, msg_id)` and deduplicates already-delivered messages within a
//! sliding window. [`UdpTransport`] is the real `tokio::net::UdpSocket`
//! implementation; [`MockTransport`] is an in-memory stand-in used by
//! tests, following the `p2p::mock::NetworkMock` pattern of a shared
//! registry of per-peer inbound channels.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::TransportConfig;
use crate::error::TransportError;

const FLAG_ACK: u8 = 0x01;
const FLAG_PUNCH: u8 = 0x02;
const HEADER_LEN: usize = 12;

#[derive(Clone, Copy, Debug)]
struct Header {
	msg_id: u32,
	chunk_index: u16,
	chunk_count: u16,
	flags: u8,
}

impl Header {
	fn to_bytes(self) -> [u8; HEADER_LEN] {
		let mut b = [0u8; HEADER_LEN];
		b[0..4].copy_from_slice(&self.msg_id.to_be_bytes());
		b[4..6].copy_from_slice(&self.chunk_index.to_be_bytes());
		b[6..8].copy_from_slice(&self.chunk_count.to_be_bytes());
		b[8] = self.flags;
		b
	}

	fn from_bytes(b: &[u8]) -> Option<Header> {
		if b.len() < HEADER_LEN {
			return None;
		}
		Some(Header {
			msg_id: u32::from_be_bytes(b[0..4].try_into().ok()?),
			chunk_index: u16::from_be_bytes(b[4..6].try_into().ok()?),
			chunk_count: u16::from_be_bytes(b[6..8].try_into().ok()?),
			flags: b[8],
		})
	}

	fn is_ack(&self) -> bool {
		self.flags & FLAG_ACK != 0
	}

	fn is_punch(&self) -> bool {
		self.flags & FLAG_PUNCH != 0
	}
}

/// The datagram transport contract both the real and mock implementations
/// satisfy: reliable send with internal chunking/retry, a single inbound
/// queue of fully-reassembled messages, and hole-punching beacons.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send_reliable(&self, peer: SocketAddr, payload: &[u8]) -> Result<(), TransportError>;
	async fn recv(&self) -> Option<(SocketAddr, Vec<u8>)>;
	async fn punch(&self, peer: SocketAddr);
}

struct ReassemblyState {
	chunks: Vec<Option<Vec<u8>>>,
	received: usize,
}

/// Real UDP-backed transport. Spawns a background task that reads datagrams,
/// completes pending ACK waiters, reassembles inbound messages, and feeds
/// completed messages into [`Transport::recv`]'s queue.
pub struct UdpTransport {
	socket: Arc<UdpSocket>,
	config: TransportConfig,
	next_msg_id: AtomicU32,
	ack_waiters: Arc<Mutex<HashMap<(SocketAddr, u32, u16), oneshot::Sender<()>>>>,
	inbound_rx: Mutex<mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>>,
}

impl UdpTransport {
	pub async fn bind(addr: SocketAddr, config: TransportConfig) -> std::io::Result<Self> {
		let socket = Arc::new(UdpSocket::bind(addr).await?);
		let ack_waiters: Arc<Mutex<HashMap<(SocketAddr, u32, u16), oneshot::Sender<()>>>> =
			Arc::new(Mutex::new(HashMap::new()));
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

		let reader_socket = socket.clone();
		let reader_waiters = ack_waiters.clone();
		tokio::spawn(async move {
			let mut reassembly: HashMap<(SocketAddr, u32), ReassemblyState> = HashMap::new();
			let mut seen: HashMap<(SocketAddr, u32), Instant> = HashMap::new();
			let mut buf = vec![0u8; 65536];
			loop {
				let (len, peer) = match reader_socket.recv_from(&mut buf).await {
					Ok(v) => v,
					Err(_) => continue,
				};
				let Some(header) = Header::from_bytes(&buf[..len]) else { continue };
				let body = &buf[HEADER_LEN..len];

				if header.is_punch() {
					continue;
				}

				if header.is_ack() {
					let key = (peer, header.msg_id, header.chunk_index);
					if let Some(waiter) = reader_waiters.lock().await.remove(&key) {
						let _ = waiter.send(());
					}
					continue;
				}

				let ack = Header {
					msg_id: header.msg_id,
					chunk_index: header.chunk_index,
					chunk_count: header.chunk_count,
					flags: FLAG_ACK,
				};
				let _ = reader_socket.send_to(&ack.to_bytes(), peer).await;

				let msg_key = (peer, header.msg_id);
				if let Some(&seen_at) = seen.get(&msg_key) {
					if seen_at.elapsed() < Duration::from_secs(300) {
						continue;
					}
				}

				let entry = reassembly
					.entry(msg_key)
					.or_insert_with(|| ReassemblyState { chunks: vec![None; header.chunk_count as usize], received: 0 });
				let idx = header.chunk_index as usize;
				if idx < entry.chunks.len() && entry.chunks[idx].is_none() {
					entry.chunks[idx] = Some(body.to_vec());
					entry.received += 1;
				}

				if entry.received == entry.chunks.len() {
					let state = reassembly.remove(&msg_key).unwrap();
					let mut full = Vec::new();
					for chunk in state.chunks.into_iter().flatten() {
						full.extend_from_slice(&chunk);
					}
					seen.insert(msg_key, Instant::now());
					let _ = inbound_tx.send((peer, full));
				}
			}
		});

		Ok(Self { socket, config, next_msg_id: AtomicU32::new(1), ack_waiters, inbound_rx: Mutex::new(inbound_rx) })
	}
}

#[async_trait]
impl Transport for UdpTransport {
	async fn send_reliable(&self, peer: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
		let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
		let chunk_len = self.config.chunk_payload_len();
		let chunks: Vec<&[u8]> = if payload.is_empty() { vec![&[]] } else { payload.chunks(chunk_len).collect() };
		let chunk_count = chunks.len() as u16;

		for (index, chunk) in chunks.iter().enumerate() {
			let header = Header { msg_id, chunk_index: index as u16, chunk_count, flags: 0 };
			let mut packet = header.to_bytes().to_vec();
			packet.extend_from_slice(chunk);

			let key = (peer, msg_id, index as u16);
			let mut delivered = false;
			for _ in 0..self.config.max_retries {
				let (tx, rx) = oneshot::channel();
				self.ack_waiters.lock().await.insert(key, tx);
				self.socket.send_to(&packet, peer).await.map_err(|_| TransportError::Encode)?;
				if tokio::time::timeout(self.config.ack_timeout, rx).await.is_ok() {
					delivered = true;
					break;
				}
				self.ack_waiters.lock().await.remove(&key);
			}
			if !delivered {
				return Err(TransportError::PeerLost { msg_id, chunk: index as u32, retries: self.config.max_retries });
			}
		}
		Ok(())
	}

	async fn recv(&self) -> Option<(SocketAddr, Vec<u8>)> {
		self.inbound_rx.lock().await.recv().await
	}

	async fn punch(&self, peer: SocketAddr) {
		let header = Header { msg_id: 0, chunk_index: 0, chunk_count: 0, flags: FLAG_PUNCH };
		for _ in 0..self.config.punch_beacons {
			let _ = self.socket.send_to(&header.to_bytes(), peer).await;
			tokio::time::sleep(self.config.punch_interval).await;
		}
	}
}

/// A process-local registry `MockTransport` instances use to find each
/// other, modeled on `p2p::mock::NetworkInner`'s shared routing table.
#[derive(Default, Clone)]
pub struct MockNetwork {
	inner: Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>>>>,
}

impl MockNetwork {
	pub fn new() -> Self {
		Self::default()
	}
}

/// In-memory transport for tests: reliable and chunk-free by construction
/// (there is no real MTU to respect), but punch beacons still count toward
/// `TransportConfig::punch_beacons` so ceremony-level tests can assert on
/// how many were sent.
pub struct MockTransport {
	addr: SocketAddr,
	network: MockNetwork,
	inbound_rx: Mutex<mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>>,
	pub punches_sent: Arc<AtomicU32>,
}

impl MockTransport {
	pub async fn register(addr: SocketAddr, network: &MockNetwork) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		network.inner.lock().await.insert(addr, tx);
		Self { addr, network: network.clone(), inbound_rx: Mutex::new(rx), punches_sent: Arc::new(AtomicU32::new(0)) }
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn send_reliable(&self, peer: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
		let table = self.network.inner.lock().await;
		match table.get(&peer) {
			Some(sender) => sender.send((self.addr, payload.to_vec())).map_err(|_| TransportError::Encode),
			None => Err(TransportError::PeerLost { msg_id: 0, chunk: 0, retries: 0 }),
		}
	}

	async fn recv(&self) -> Option<(SocketAddr, Vec<u8>)> {
		self.inbound_rx.lock().await.recv().await
	}

	async fn punch(&self, _peer: SocketAddr) {
		self.punches_sent.fetch_add(1, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn addr(port: u16) -> SocketAddr {
		format!("127.0.0.1:{port}").parse().unwrap()
	}

	#[tokio::test]
	async fn mock_transport_delivers_messages_between_registered_peers() {
		let network = MockNetwork::new();
		let a = MockTransport::register(addr(40001), &network).await;
		let b = MockTransport::register(addr(40002), &network).await;

		a.send_reliable(addr(40002), b"hello from a").await.unwrap();
		let (from, payload) = b.recv().await.unwrap();
		assert_eq!(from, addr(40001));
		assert_eq!(payload, b"hello from a");
	}

	#[tokio::test]
	async fn mock_transport_reports_lost_peer_for_unregistered_address() {
		let network = MockNetwork::new();
		let a = MockTransport::register(addr(40003), &network).await;
		let err = a.send_reliable(addr(40099), b"ping").await.unwrap_err();
		assert!(matches!(err, TransportError::PeerLost { .. }));
	}

	#[tokio::test]
	async fn udp_transport_chunks_and_reassembles_a_large_payload() {
		let mut config = TransportConfig::default();
		config.mtu = 64;
		config.ack_timeout = Duration::from_millis(200);

		let server = UdpTransport::bind(addr(41001), config).await.unwrap();
		let client = UdpTransport::bind(addr(41002), config).await.unwrap();

		let payload = vec![0xABu8; 500];
		let payload_clone = payload.clone();
		let send_task = tokio::spawn(async move { client.send_reliable(addr(41001), &payload_clone).await });

		let (from, received) = server.recv().await.unwrap();
		assert_eq!(from, addr(41002));
		assert_eq!(received, payload);
		send_task.await.unwrap().unwrap();
	}
}
