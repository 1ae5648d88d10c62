//! Reactor configuration options
//!
//! Capacity and the handshake secret are the only knobs callers normally
//! touch (`setup(max_connections)`, `set_handshake_verify(key)`); the rest
//! tune buffer sizing, sweep cadence and per-tick dispatch budgets.

use bytes::Bytes;
use std::time::Duration;

/// Default receive/send buffer floor (8KB)
///
/// Buffers start at this size and never shrink below it.
pub const DEFAULT_BUFFER_FLOOR: usize = 8192;

/// Small buffer floor (4KB)
///
/// For many mostly-idle connections exchanging small messages.
pub const SMALL_BUFFER_FLOOR: usize = 4096;

/// Large buffer floor (64KB)
///
/// For a few connections streaming large payloads.
pub const LARGE_BUFFER_FLOOR: usize = 65536;

/// Hard ceiling for any single connection buffer (16MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Largest framed message accepted by any protocol (4MB)
pub const DEFAULT_MAX_PACKAGE_SIZE: usize = 4 * 1024 * 1024;

/// Secret sent by the dialing side of every RPC-mode connection.
pub const DEFAULT_HANDSHAKE_KEY: &[u8] = b"hivenet:rpc:1";

/// Reactor configuration options.
///
/// # Examples
///
/// ```
/// use hivenet_core::options::ReactorOptions;
/// use std::time::Duration;
///
/// let opts = ReactorOptions::default()
///     .with_max_connections(1024)
///     .with_handshake_key(b"cluster-secret".as_slice())
///     .with_sweep_interval(Duration::from_millis(500));
/// assert_eq!(opts.max_connections, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct ReactorOptions {
    /// Global cap on live listeners plus streams.
    ///
    /// Both inbound admission and `listen`/`connect` are refused at the cap.
    pub max_connections: usize,

    /// Shared secret for RPC-mode streams.
    ///
    /// Dialers send it right after connecting; acceptors require an exact
    /// match before framing. Empty disables the handshake.
    pub handshake_key: Bytes,

    /// Minimum time between two sweeps over every live object.
    ///
    /// Idle timeouts, connect deadlines and flow-control windows are only
    /// evaluated during a sweep, so this is also their slack.
    pub sweep_interval: Duration,

    /// Backlog passed to `listen(2)`.
    pub listen_backlog: i32,

    /// Upper bound on accepts performed per readiness notification.
    pub accept_per_wakeup: usize,

    /// Floor size for per-stream receive buffers.
    pub recv_buffer_min: usize,

    /// Floor size for per-stream send buffers.
    pub send_buffer_min: usize,

    /// Hard ceiling for either buffer; hitting it closes the stream.
    pub max_buffer_size: usize,

    /// Largest message a framing protocol will accept.
    pub max_package_size: usize,

    /// Connect deadline used when a caller passes `Duration::ZERO`.
    pub connect_timeout: Duration,

    /// Dispatch budget per tick for pack-mode streams.
    pub pack_dispatch_budget: Duration,

    /// Dispatch budget per tick for text-mode streams.
    pub text_dispatch_budget: Duration,

    /// Dispatch budget per tick for rpc and common streams.
    pub dispatch_budget: Duration,

    /// Apply TCP_NODELAY to every accepted and dialed stream.
    pub nodelay: bool,
}

impl Default for ReactorOptions {
    fn default() -> Self {
        Self {
            max_connections: 65536,
            handshake_key: Bytes::from_static(DEFAULT_HANDSHAKE_KEY),
            sweep_interval: Duration::from_secs(2),
            listen_backlog: 512,
            accept_per_wakeup: 16,
            recv_buffer_min: DEFAULT_BUFFER_FLOOR,
            send_buffer_min: DEFAULT_BUFFER_FLOOR,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            connect_timeout: Duration::from_secs(5),
            pack_dispatch_budget: Duration::from_millis(5),
            text_dispatch_budget: Duration::from_millis(100),
            dispatch_budget: Duration::from_millis(50),
            nodelay: true,
        }
    }
}

impl ReactorOptions {
    /// Create new reactor options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global connection cap.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the RPC handshake secret. An empty key disables the handshake.
    pub fn with_handshake_key(mut self, key: impl Into<Bytes>) -> Self {
        self.handshake_key = key.into();
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the listen backlog.
    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// Set how many connections a listener accepts per wakeup.
    pub fn with_accept_per_wakeup(mut self, n: usize) -> Self {
        self.accept_per_wakeup = n.max(1);
        self
    }

    /// Set both buffer floors at once.
    pub fn with_buffer_floor(mut self, floor: usize) -> Self {
        self.recv_buffer_min = floor;
        self.send_buffer_min = floor;
        self
    }

    /// Set the hard per-buffer ceiling.
    pub fn with_max_buffer_size(mut self, max: usize) -> Self {
        self.max_buffer_size = max;
        self
    }

    /// Set the largest accepted message.
    pub fn with_max_package_size(mut self, max: usize) -> Self {
        self.max_package_size = max;
        self
    }

    /// Set the default connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable TCP_NODELAY on new streams.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Buffer preset for many small messages.
    pub fn small_buffers(self) -> Self {
        self.with_buffer_floor(SMALL_BUFFER_FLOOR)
    }

    /// Buffer preset for large payloads.
    pub fn large_buffers(self) -> Self {
        self.with_buffer_floor(LARGE_BUFFER_FLOOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ReactorOptions::default();
        assert_eq!(opts.sweep_interval, Duration::from_secs(2));
        assert_eq!(opts.accept_per_wakeup, 16);
        assert_eq!(&opts.handshake_key[..], DEFAULT_HANDSHAKE_KEY);
        assert_eq!(opts.pack_dispatch_budget, Duration::from_millis(5));
        assert_eq!(opts.text_dispatch_budget, Duration::from_millis(100));
        assert_eq!(opts.dispatch_budget, Duration::from_millis(50));
        assert!(opts.nodelay);
    }

    #[test]
    fn test_builder_chain() {
        let opts = ReactorOptions::new()
            .with_max_connections(1)
            .with_handshake_key(Bytes::new())
            .with_accept_per_wakeup(0)
            .large_buffers();
        assert_eq!(opts.max_connections, 1);
        assert!(opts.handshake_key.is_empty());
        assert_eq!(opts.accept_per_wakeup, 1);
        assert_eq!(opts.recv_buffer_min, LARGE_BUFFER_FLOOR);
        assert_eq!(opts.send_buffer_min, LARGE_BUFFER_FLOOR);
    }
}
