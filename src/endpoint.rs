//! Outbound send, inbound demultiplexing, retransmission scheduling and
//! request lifecycle (`spec.md` §3, §4.B). This is the component every other
//! piece of the stack sits behind: callers only ever talk to `Endpoint`.

use crate::block1::{needs_segmentation, BlockState, BlockwiseOwner, RequestTemplate};
use crate::clock::{Clock, Millis};
use crate::codec;
use crate::config::Config;
use crate::error::SocketError;
use crate::events::{Event, EventEmitter, TerminalReason};
use crate::exchange::{AckOutcome, Exchange, ExchangeOwner, ExchangeStatus};
use crate::message::{option_number, Message, MessageType};
use crate::socket::{Peer, Socket};
use crate::transaction::Transaction;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Endpoint-wide settings not tied to any one request (`SPEC_FULL.md` §10.C).
pub use crate::config::EndpointConfig;

/// An opaque handle to a live request, returned by [`Endpoint::request`].
/// Internally this is the request's CoAP token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Vec<u8>);

impl RequestId {
    pub fn token(&self) -> &[u8] {
        &self.0
    }
}

/// The owner of a non-blockwise exchange: forwards every transport event
/// straight to the request's listener, with one exception (`spec.md` §4.D):
/// a response carrying a Block1/Block2 option is an unexpected shape for a
/// request that never asked to be segmented, so it does not complete the
/// exchange.
struct SimpleOwner {
    events: EventEmitter,
}

impl ExchangeOwner for SimpleOwner {
    fn on_acknowledged(&mut self, ack: Message) -> AckOutcome {
        self.events.emit(Event::Acknowledged(ack.clone()));
        if ack.block1().is_some() || ack.block2().is_some() {
            warn!("response carried an unexpected block option for a non-blockwise request");
            return AckOutcome::KeepOpen;
        }
        AckOutcome::Complete
    }

    fn on_response(&mut self, response: Message) {
        self.events.emit(Event::Response(response));
    }

    fn on_transaction_timeout(&mut self) {
        self.events.emit(Event::Timeout(TerminalReason::TransactionTimeout));
    }

    fn on_exchange_timeout(&mut self) {
        self.events.emit(Event::Timeout(TerminalReason::ExchangeTimeout));
    }

    fn on_reset(&mut self) {
        self.events.emit(Event::Reset);
    }

    fn on_socket_error(&mut self, err: SocketError) {
        self.events.emit(Event::Error(err));
    }
}

/// Either kind of request an [`Exchange`] can belong to. Not a trait object:
/// the set of owner kinds is closed, so a plain enum dispatch is simpler
/// than `Rc<RefCell<dyn ExchangeOwner>>` and keeps `Endpoint` the sole owner
/// of everything (`SPEC_FULL.md` §9's ownership note).
enum OwnerState {
    Simple(SimpleOwner),
    Blockwise(BlockwiseOwner),
}

impl OwnerState {
    fn events_mut(&mut self) -> &mut EventEmitter {
        match self {
            OwnerState::Simple(o) => &mut o.events,
            OwnerState::Blockwise(o) => &mut o.events,
        }
    }

    /// The next block message the Block1 driver wants sent, if the last ack
    /// caused an advance. Always `None` for a non-blockwise owner.
    fn take_pending_send(&mut self) -> Option<Message> {
        match self {
            OwnerState::Simple(_) => None,
            OwnerState::Blockwise(o) => o.state.take_pending_send(),
        }
    }
}

impl ExchangeOwner for OwnerState {
    fn on_acknowledged(&mut self, ack: Message) -> AckOutcome {
        match self {
            OwnerState::Simple(o) => o.on_acknowledged(ack),
            OwnerState::Blockwise(o) => o.on_acknowledged(ack),
        }
    }

    fn on_response(&mut self, response: Message) {
        match self {
            OwnerState::Simple(o) => o.on_response(response),
            OwnerState::Blockwise(o) => o.on_response(response),
        }
    }

    fn on_transaction_timeout(&mut self) {
        match self {
            OwnerState::Simple(o) => o.on_transaction_timeout(),
            OwnerState::Blockwise(o) => o.on_transaction_timeout(),
        }
    }

    fn on_exchange_timeout(&mut self) {
        match self {
            OwnerState::Simple(o) => o.on_exchange_timeout(),
            OwnerState::Blockwise(o) => o.on_exchange_timeout(),
        }
    }

    fn on_reset(&mut self) {
        match self {
            OwnerState::Simple(o) => o.on_reset(),
            OwnerState::Blockwise(o) => o.on_reset(),
        }
    }

    fn on_socket_error(&mut self, err: SocketError) {
        match self {
            OwnerState::Simple(o) => o.on_socket_error(err),
            OwnerState::Blockwise(o) => o.on_socket_error(err),
        }
    }
}

struct ExchangeSlot<P> {
    peer: P,
    exchange: Exchange,
    owner: OwnerState,
    /// The CON transaction currently in flight for this exchange.
    mid: u16,
    config: Config,
}

/// A duplicate-suppression cache entry for separate CON responses
/// (`spec.md` §4.B rule 3, `SPEC_FULL.md` §10.E).
struct DupAckEntry {
    ack_bytes: Vec<u8>,
    cached_at: Millis,
}

enum TimerKind<P> {
    Transaction { peer: P, mid: u16 },
    Exchange { token: Vec<u8> },
}

struct TimerEntry<P> {
    deadline: Millis,
    kind: TimerKind<P>,
}

enum RetransmitOutcome {
    Stale,
    Retransmit { token: Vec<u8>, bytes: Vec<u8>, deadline: Millis },
    TimedOut { token: Vec<u8> },
}

/// Manages outbound datagrams, inbound demultiplexing and request lifecycle
/// for one CoAP client endpoint (`spec.md` §2, §4.B).
///
/// Generic over the peer address type `P`, the socket capability `S` and
/// the clock capability `C`, per the capability-injection design of
/// `SPEC_FULL.md` §9.
pub struct Endpoint<P: Peer, S: Socket<P>, C: Clock> {
    socket: S,
    clock: C,
    rng: SmallRng,
    endpoint_config: EndpointConfig,
    mtu: usize,
    next_mid: u16,
    transactions: FxHashMap<(P, u16), Transaction>,
    exchanges: FxHashMap<Vec<u8>, ExchangeSlot<P>>,
    dup_ack_cache: FxHashMap<(P, u16), DupAckEntry>,
    timers: Vec<TimerEntry<P>>,
}

impl<P: Peer, S: Socket<P>, C: Clock> Endpoint<P, S, C> {
    pub fn new(socket: S, clock: C, endpoint_config: EndpointConfig) -> Self {
        let mut rng = SmallRng::seed_from_u64(endpoint_config.prng_seed);
        let next_mid = rng.gen();
        Self {
            socket,
            clock,
            rng,
            endpoint_config,
            mtu: codec::DEFAULT_MTU,
            next_mid,
            transactions: FxHashMap::default(),
            exchanges: FxHashMap::default(),
            dup_ack_cache: FxHashMap::default(),
            timers: Vec::new(),
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Submits a request, segmenting it into a Block1 sequence first if
    /// `config.block_size` is set and the payload does not fit in one block
    /// (`spec.md` §4.E rule 1). `listener` is registered before anything is
    /// sent, so it observes every event on the request.
    pub fn request(
        &mut self,
        message: Message,
        peer: P,
        config: Config,
        listener: impl FnMut(&Event) + 'static,
    ) -> RequestId {
        let mut events = EventEmitter::new();
        events.on(listener);

        let token = self.fresh_token(self.endpoint_config.token_len);
        let now = self.clock.now();
        let exchange_deadline = now + config.exchange_timeout_ms;

        let payload_len = message.payload.len();
        let segment = config
            .block_size
            .map_or(false, |size| needs_segmentation(payload_len, size.bytes()));

        let (owner, first_message) = if segment {
            let block_size = config.block_size.expect("segment implies block_size is set");
            let template = RequestTemplate {
                method: message.code,
                uri_path: uri_path_of(&message),
                content_format: content_format_of(&message),
            };
            let state = BlockState::new(message.payload.clone(), block_size.szx(), template, config.block_size_policy);
            let first = state.build_in_flight_message();
            (OwnerState::Blockwise(BlockwiseOwner::new(state, events)), first)
        } else {
            (OwnerState::Simple(SimpleOwner { events }), message)
        };

        let slot = ExchangeSlot {
            peer: peer.clone(),
            exchange: Exchange::new(token.clone(), 0, exchange_deadline),
            owner,
            mid: 0,
            config,
        };
        self.exchanges.insert(token.clone(), slot);
        self.timers.push(TimerEntry {
            deadline: exchange_deadline,
            kind: TimerKind::Exchange { token: token.clone() },
        });

        if let Some(mid) = self.send_con(&token, &peer, first_message, &config) {
            if let Some(slot) = self.exchanges.get_mut(&token) {
                slot.mid = mid;
                slot.exchange.mid = mid;
            }
        }

        debug!(token = ?token, "request submitted");
        RequestId(token)
    }

    /// Registers an additional listener on a live request. Like all
    /// listeners, it only observes events emitted after it is added
    /// (`spec.md` §4.F).
    pub fn on_event(&mut self, id: &RequestId, listener: impl FnMut(&Event) + 'static) {
        if let Some(slot) = self.exchanges.get_mut(&id.0) {
            slot.owner.events_mut().on(listener);
        }
    }

    /// Tears down the request: its exchange, its in-flight transaction and
    /// all of its timers. No further events fire (`spec.md` §5).
    pub fn cancel(&mut self, id: &RequestId) {
        if let Some(slot) = self.exchanges.remove(&id.0) {
            self.transactions.remove(&(slot.peer, slot.mid));
        }
    }

    /// Decodes and dispatches one inbound datagram (`spec.md` §4.B).
    /// Malformed datagrams are dropped silently, per `spec.md` §7.
    pub fn receive(&mut self, bytes: &[u8], peer: &P) {
        let message = match codec::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(?err, "dropping malformed datagram");
                return;
            }
        };
        match message.mtype {
            MessageType::Ack | MessageType::Rst => self.handle_ack_or_rst(message, peer),
            MessageType::Con | MessageType::Non => {
                if message.code.is_response() {
                    self.handle_response_datagram(message, peer);
                } else {
                    debug!("dropping inbound request; this core has no server role");
                }
            }
        }
    }

    /// Processes every timer due at or before `now`: retransmits, final
    /// transaction timeouts, and exchange-lifetime timeouts.
    pub fn poll(&mut self, now: Millis) {
        loop {
            let next = self
                .timers
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.deadline <= now)
                .min_by_key(|(_, entry)| entry.deadline)
                .map(|(index, _)| index);
            let Some(index) = next else { break };
            let entry = self.timers.remove(index);
            match entry.kind {
                TimerKind::Transaction { peer, mid } => self.fire_transaction_timer(peer, mid, now),
                TimerKind::Exchange { token } => self.fire_exchange_timer(token, entry.deadline),
            }
        }
    }

    /// The earliest deadline among all live timers, if any; useful for a
    /// caller's event loop to know how long it can safely sleep.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.timers.iter().map(|entry| entry.deadline).min()
    }

    fn handle_ack_or_rst(&mut self, message: Message, peer: &P) {
        let key = (peer.clone(), message.message_id);
        let Some(txn) = self.transactions.get(&key) else {
            debug!(mid = message.message_id, "dropping ack/rst for unknown transaction");
            return;
        };
        let token = txn.token.clone();
        self.transactions.remove(&key);

        let Some(slot) = self.exchanges.get_mut(&token) else {
            return;
        };
        if slot.peer != *peer {
            return;
        }

        match message.mtype {
            MessageType::Rst => {
                slot.exchange.on_reset(&mut slot.owner);
                self.destroy_exchange(&token, peer);
            }
            MessageType::Ack => {
                slot.exchange.on_ack(message, &mut slot.owner);
                if slot.exchange.is_closed() {
                    self.destroy_exchange(&token, peer);
                } else if let Some(next) = slot.owner.take_pending_send() {
                    self.advance_block(&token, peer, next);
                }
            }
            _ => unreachable!("only Ack/Rst dispatch here"),
        }
    }

    fn handle_response_datagram(&mut self, message: Message, peer: &P) {
        let token = message.token.clone();

        if message.mtype == MessageType::Con {
            let key = (peer.clone(), message.message_id);
            if let Some(cached) = self.cached_ack(&key) {
                let _ = self.socket.send(&cached, peer);
                return;
            }
            let ack = Message::empty_ack(message.message_id);
            match codec::encode(&ack, self.mtu) {
                Ok(bytes) => {
                    let _ = self.socket.send(&bytes, peer);
                    let cached_at = self.clock.now();
                    self.dup_ack_cache.insert(key, DupAckEntry { ack_bytes: bytes, cached_at });
                }
                Err(err) => warn!(?err, "failed to encode ack for separate response"),
            }
        }

        let Some(slot) = self.exchanges.get_mut(&token) else {
            return;
        };
        if slot.peer != *peer {
            return;
        }
        slot.exchange.on_separate_response(message, &mut slot.owner);
        if slot.exchange.is_closed() {
            self.destroy_exchange(&token, peer);
        }
    }

    /// Looks up a cached ack for a duplicate separate response, evicting it
    /// first if `EXCHANGE_LIFETIME` has elapsed since it was cached
    /// (`SPEC_FULL.md` §10.E).
    fn cached_ack(&mut self, key: &(P, u16)) -> Option<Vec<u8>> {
        let now = self.clock.now();
        let expired = match self.dup_ack_cache.get(key) {
            Some(entry) => now.saturating_sub(entry.cached_at) > crate::config::DEFAULT_EXCHANGE_TIMEOUT_MS,
            None => return None,
        };
        if expired {
            self.dup_ack_cache.remove(key);
            return None;
        }
        self.dup_ack_cache.get(key).map(|entry| entry.ack_bytes.clone())
    }

    fn advance_block(&mut self, token: &[u8], peer: &P, message: Message) {
        let config = match self.exchanges.get(token) {
            Some(slot) => slot.config,
            None => return,
        };
        let now = self.clock.now();
        let new_deadline = now + config.exchange_timeout_ms;

        if let Some(mid) = self.send_con(token, peer, message, &config) {
            if let Some(slot) = self.exchanges.get_mut(token) {
                slot.mid = mid;
                slot.exchange.mid = mid;
                slot.exchange.exchange_deadline = new_deadline;
                slot.exchange.status = ExchangeStatus::AwaitingAck;
            }
            self.timers.push(TimerEntry {
                deadline: new_deadline,
                kind: TimerKind::Exchange { token: token.to_vec() },
            });
        }
    }

    /// Encodes `message`, assigns it a fresh message ID, starts its
    /// retransmission timer and hands it to the socket. Returns the
    /// assigned message ID, or `None` if encoding failed (surfaced as an
    /// `error` event on the owning request).
    fn send_con(&mut self, token: &[u8], peer: &P, mut message: Message, config: &Config) -> Option<u16> {
        message.token = token.to_vec();
        let mid = self.next_mid();
        message.message_id = mid;

        let bytes = match codec::encode(&message, self.mtu) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(?err, "failed to encode outgoing message");
                self.emit_error(token, SocketError::new(err.to_string()));
                return None;
            }
        };

        let now = self.clock.now();
        let txn = Transaction::new(mid, token.to_vec(), bytes.clone(), now, config, &mut self.rng);
        let deadline = txn.next_fire_at;
        self.transactions.insert((peer.clone(), mid), txn);
        self.timers.push(TimerEntry {
            deadline,
            kind: TimerKind::Transaction { peer: peer.clone(), mid },
        });

        if let Err(err) = self.socket.send(&bytes, peer) {
            self.emit_error(token, err);
        }
        debug!(mid, "sent confirmable datagram");
        Some(mid)
    }

    fn fire_transaction_timer(&mut self, peer: P, mid: u16, now: Millis) {
        let key = (peer.clone(), mid);
        let outcome = match self.transactions.get_mut(&key) {
            Some(txn) if txn.is_pending() => {
                if txn.record_retransmit(now) {
                    RetransmitOutcome::Retransmit {
                        token: txn.token.clone(),
                        bytes: txn.encoded_bytes.clone(),
                        deadline: txn.next_fire_at,
                    }
                } else {
                    RetransmitOutcome::TimedOut { token: txn.token.clone() }
                }
            }
            _ => RetransmitOutcome::Stale,
        };

        match outcome {
            RetransmitOutcome::Stale => {}
            RetransmitOutcome::Retransmit { token, bytes, deadline } => {
                self.timers.push(TimerEntry {
                    deadline,
                    kind: TimerKind::Transaction { peer: peer.clone(), mid },
                });
                if let Err(err) = self.socket.send(&bytes, &peer) {
                    self.emit_error(&token, err);
                }
                debug!(mid, "retransmitted confirmable datagram");
            }
            RetransmitOutcome::TimedOut { token } => {
                self.transactions.remove(&key);
                if let Some(slot) = self.exchanges.get_mut(&token) {
                    slot.exchange.on_transaction_timeout(&mut slot.owner);
                }
                self.destroy_exchange(&token, &peer);
            }
        }
    }

    fn fire_exchange_timer(&mut self, token: Vec<u8>, fired_deadline: Millis) {
        let Some(slot) = self.exchanges.get_mut(&token) else {
            return;
        };
        // A later block may have pushed a fresher deadline; this timer is
        // then stale and must not fire early.
        if slot.exchange.exchange_deadline != fired_deadline || slot.exchange.is_closed() {
            return;
        }
        let peer = slot.peer.clone();
        slot.exchange.on_exchange_timeout(&mut slot.owner);
        self.destroy_exchange(&token, &peer);
    }

    fn destroy_exchange(&mut self, token: &[u8], peer: &P) {
        if let Some(slot) = self.exchanges.remove(token) {
            self.transactions.remove(&(peer.clone(), slot.mid));
        }
    }

    fn emit_error(&mut self, token: &[u8], err: SocketError) {
        if let Some(slot) = self.exchanges.get_mut(token) {
            slot.owner.events_mut().emit(Event::Error(err));
        }
    }

    /// Message-ID allocation: a monotonically increasing counter with a
    /// random start, wrapping freely (`spec.md` §4.B).
    fn next_mid(&mut self) -> u16 {
        let mid = self.next_mid;
        self.next_mid = self.next_mid.wrapping_add(1);
        mid
    }

    /// Generates a token, regenerating on collision with a live exchange
    /// (`spec.md` §5, `SPEC_FULL.md` §10.E).
    fn fresh_token(&mut self, len: usize) -> Vec<u8> {
        loop {
            let candidate: Vec<u8> = (0..len).map(|_| self.rng.gen()).collect();
            if !self.exchanges.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

fn uri_path_of(message: &Message) -> String {
    message
        .options_with(option_number::URI_PATH)
        .map(|option| String::from_utf8_lossy(&option.value).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn content_format_of(message: &Message) -> Option<u16> {
    message.first_option(option_number::CONTENT_FORMAT).map(|option| match option.value.len() {
        0 => 0,
        1 => option.value[0] as u16,
        _ => u16::from_be_bytes([option.value[0], option.value[1]]),
    })
}
