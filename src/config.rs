//! Per-request and per-endpoint configuration (`SPEC_FULL.md` §10.C).

/// RFC 7252 §4.8 default initial retransmit timeout.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 2_000;
/// RFC 7252 §4.8 default jitter multiplier.
pub const DEFAULT_ACK_RANDOM_FACTOR: f64 = 1.5;
/// RFC 7252 §4.8 default retransmission budget.
pub const DEFAULT_MAX_RETRANSMIT: u32 = 4;
/// RFC 7252 §4.8.2 default exchange lifetime, in milliseconds.
pub const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 247_000;

/// A validated block size: a power of two in `{16, 32, ..., 1024}`
/// (`spec.md` §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockSize(u16);

/// Returned by [`BlockSize::new`] when the requested size is not one of the
/// eight sizes RFC 7959's SZX encoding can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("block size {0} is not a power of two in 16..=1024")]
pub struct InvalidBlockSize(pub u16);

impl BlockSize {
    pub fn new(bytes: u16) -> Result<Self, InvalidBlockSize> {
        if !(16..=1024).contains(&bytes) || !bytes.is_power_of_two() {
            return Err(InvalidBlockSize(bytes));
        }
        Ok(Self(bytes))
    }

    /// Builds a [`BlockSize`] from a block-size exponent (`szx`), the form
    /// Block1/Block2 options carry on the wire.
    pub fn from_szx(szx: u8) -> Self {
        debug_assert!(szx < 7);
        Self(1u16 << (szx as u32 + 4))
    }

    pub fn bytes(self) -> usize {
        self.0 as usize
    }

    /// The RFC 7959 SZX encoding of this size: `log2(bytes) - 4`.
    pub fn szx(self) -> u8 {
        (self.0.trailing_zeros() - 4) as u8
    }
}

/// The server-size-growth policy decided for the open question in
/// `spec.md` §9 (see `SPEC_FULL.md` §12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockSizePolicy {
    /// Ignore a server-requested `szx` larger than the client's cap; let
    /// the exchange time out. Matches the reference scenario in `spec.md`
    /// §8 Scenario 1.
    #[default]
    Strict,
    /// Adopt the server's larger `szx` immediately, per RFC 7959 §2.5's
    /// SHOULD.
    RfcCompliant,
}

/// Recognized per-request configuration (`spec.md` §6).
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Segment payloads at this granularity; also the cap on server-
    /// requested growth under [`BlockSizePolicy::Strict`]. `None` means the
    /// request is never segmented regardless of payload length.
    pub block_size: Option<BlockSize>,
    /// Maximum lifetime for a single Exchange, in milliseconds.
    pub exchange_timeout_ms: u64,
    /// Initial retransmit timer, in milliseconds.
    pub ack_timeout_ms: u64,
    /// Multiplier applied to `ack_timeout_ms` to pick the randomized
    /// initial timeout; ignored when a fixed retransmit schedule is set.
    pub ack_random_factor: f64,
    /// Retransmission budget before a transaction times out.
    pub max_retransmit: u32,
    pub block_size_policy: BlockSizePolicy,
    /// When set, replaces the randomized initial timeout and the
    /// doubling schedule with these exact deadlines (relative to the
    /// transaction's creation), for deterministic tests (`spec.md` §4.C).
    pub fixed_retransmit_schedule_ms: Option<[u64; 5]>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: None,
            exchange_timeout_ms: DEFAULT_EXCHANGE_TIMEOUT_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            ack_random_factor: DEFAULT_ACK_RANDOM_FACTOR,
            max_retransmit: DEFAULT_MAX_RETRANSMIT,
            block_size_policy: BlockSizePolicy::default(),
            fixed_retransmit_schedule_ms: None,
        }
    }
}

impl Config {
    pub fn with_block_size(mut self, bytes: u16) -> Result<Self, InvalidBlockSize> {
        self.block_size = Some(BlockSize::new(bytes)?);
        Ok(self)
    }

    pub fn with_exchange_timeout_ms(mut self, ms: u64) -> Self {
        self.exchange_timeout_ms = ms;
        self
    }

    pub fn with_ack_timeout_ms(mut self, ms: u64) -> Self {
        self.ack_timeout_ms = ms;
        self
    }

    pub fn with_ack_random_factor(mut self, factor: f64) -> Self {
        self.ack_random_factor = factor;
        self
    }

    pub fn with_max_retransmit(mut self, count: u32) -> Self {
        self.max_retransmit = count;
        self
    }

    pub fn with_block_size_policy(mut self, policy: BlockSizePolicy) -> Self {
        self.block_size_policy = policy;
        self
    }

    /// Installs the deterministic `{2000, 4000, 8000, 16000, 32000}` ms
    /// schedule the conformance tests in `spec.md` §4.C require.
    pub fn with_fixed_retransmit_schedule(mut self, schedule: [u64; 5]) -> Self {
        self.fixed_retransmit_schedule_ms = Some(schedule);
        self
    }
}

/// Endpoint-wide settings that are not per-request (`SPEC_FULL.md` §10.C).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Seed for the PRNG used for message-ID start and token generation.
    pub prng_seed: u64,
    /// Token length in bytes, generated fresh for each new Exchange.
    pub token_len: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            prng_seed: 0,
            token_len: 4,
        }
    }
}

impl EndpointConfig {
    pub fn with_prng_seed(mut self, seed: u64) -> Self {
        self.prng_seed = seed;
        self
    }

    pub fn with_token_len(mut self, len: usize) -> Self {
        assert!(len <= 8, "token length must be 0-8 bytes");
        self.token_len = len;
        self
    }
}
