//! Service router
//!
//! Goals:
//! - Map logical service ids to connection tokens, grouped by the id's high byte
//! - Forward RPC bodies by target id, group master, random live node,
//!   broadcast, or hash slot
//! - Never touch sockets: sends go through the `ForwardSink` seam, which the
//!   reactor implements
//! - Unresolvable routes are errors returned to the caller, never panics and
//!   never a reason to close the requesting connection
//!
//! Groups start in map mode (sorted id → token list). The first registration
//! with a non-zero slot count switches the group to hash mode for good: the
//! node list becomes a dense slot array addressed by service index, it only
//! ever grows, and leaving nodes keep their slot with token 0.

use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, trace};

use crate::varint::{decode_u64, encode_u64, MAX_VARINT_LEN};
use crate::Token;

/// Number of addressable service groups (one per high-byte value).
pub const MAX_SERVICE_GROUP: usize = 256;

/// Upper bound on an encoded header plus routing selector.
pub const CALL_PREFIX_MAX: usize = 6 * MAX_VARINT_LEN;

/// Encoded header plus selector, kept inline. smallvec only implements
/// `Array` for a fixed set of lengths, so the inline size rounds up to 64.
pub type CallPrefix = SmallVec<[u8; 64]>;

const _: () = assert!(CALL_PREFIX_MAX <= 64);

const INDEX_MASK: u32 = 0x00FF_FFFF;

/// Group of a service id (its high byte).
#[inline]
pub const fn service_group(service_id: u32) -> u8 {
    (service_id >> 24) as u8
}

/// Index of a service id inside its group (low 24 bits).
#[inline]
pub const fn service_index(service_id: u32) -> u32 {
    service_id & INDEX_MASK
}

#[inline]
pub const fn build_service_id(group: u8, index: u32) -> u32 {
    ((group as u32) << 24) | (index & INDEX_MASK)
}

/// Message kind discriminator, the first varint of every router header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgKind {
    RemoteCall = 0,
    ForwardTarget = 1,
    ForwardMaster = 2,
    ForwardRandom = 3,
    ForwardBroadcast = 4,
    ForwardHash = 5,
}

impl MsgKind {
    #[inline]
    pub const fn is_forward(&self) -> bool {
        !matches!(self, Self::RemoteCall)
    }
}

impl TryFrom<u64> for MsgKind {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::RemoteCall),
            1 => Ok(Self::ForwardTarget),
            2 => Ok(Self::ForwardMaster),
            3 => Ok(Self::ForwardRandom),
            4 => Ok(Self::ForwardBroadcast),
            5 => Ok(Self::ForwardHash),
            other => Err(other),
        }
    }
}

/// Outer header of every RPC message.
///
/// Wire form: `varint(kind) · varint(session_id) · varint(rpc_flag) · varint(source_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterHeader {
    pub kind: MsgKind,
    pub session_id: u64,
    pub rpc_flag: u64,
    pub source_id: u64,
}

impl RouterHeader {
    pub const MAX_LEN: usize = 4 * MAX_VARINT_LEN;

    /// A remote-call header.
    pub const fn new(session_id: u64, rpc_flag: u64, source_id: u64) -> Self {
        Self {
            kind: MsgKind::RemoteCall,
            session_id,
            rpc_flag,
            source_id,
        }
    }

    #[must_use]
    pub const fn with_kind(mut self, kind: MsgKind) -> Self {
        self.kind = kind;
        self
    }

    /// Write the header into `dst`; returns bytes written or 0 if it does not fit.
    pub fn encode(&self, dst: &mut [u8]) -> usize {
        let mut pos = 0;
        for field in [self.kind as u64, self.session_id, self.rpc_flag, self.source_id] {
            let n = encode_u64(&mut dst[pos..], field);
            if n == 0 {
                return 0;
            }
            pos += n;
        }
        pos
    }

    pub fn to_bytes(&self) -> CallPrefix {
        let mut out = SmallVec::new();
        self.append_to(&mut out);
        out
    }

    fn append_to(&self, out: &mut CallPrefix) {
        let mut tmp = [0u8; Self::MAX_LEN];
        let n = self.encode(&mut tmp);
        out.extend_from_slice(&tmp[..n]);
    }

    /// Parse a header; `None` on truncation or an unknown message kind.
    pub fn decode(src: &[u8]) -> Option<(Self, usize)> {
        let mut pos = 0;
        let mut fields = [0u64; 4];
        for field in &mut fields {
            let (value, n) = decode_u64(&src[pos..])?;
            *field = value;
            pos += n;
        }
        let kind = MsgKind::try_from(fields[0]).ok()?;
        Some((
            Self {
                kind,
                session_id: fields[1],
                rpc_flag: fields[2],
                source_id: fields[3],
            },
            pos,
        ))
    }
}

/// Caller-side routing choice for an outgoing RPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Deliver to the peer itself (no forwarding)
    Direct,
    /// Forward to one service id
    Target(u32),
    /// Forward to the group master
    Master(u8),
    /// Forward to any live node of the group
    Random(u8),
    /// Forward to every node of the group except the sender
    Broadcast(u8),
    /// Forward to `slots[key % slot_count]` of the group
    Hash(u8, u64),
}

impl Route {
    pub const fn kind(&self) -> MsgKind {
        match self {
            Self::Direct => MsgKind::RemoteCall,
            Self::Target(_) => MsgKind::ForwardTarget,
            Self::Master(_) => MsgKind::ForwardMaster,
            Self::Random(_) => MsgKind::ForwardRandom,
            Self::Broadcast(_) => MsgKind::ForwardBroadcast,
            Self::Hash(..) => MsgKind::ForwardHash,
        }
    }

    fn append_selector(&self, out: &mut CallPrefix) {
        let mut tmp = [0u8; MAX_VARINT_LEN];
        let mut put = |v: u64, out: &mut CallPrefix| {
            let n = encode_u64(&mut tmp, v);
            out.extend_from_slice(&tmp[..n]);
        };
        match *self {
            Self::Direct => {}
            Self::Target(id) => put(u64::from(id), out),
            Self::Master(g) | Self::Random(g) | Self::Broadcast(g) => put(u64::from(g), out),
            Self::Hash(g, key) => {
                put(u64::from(g), out);
                put(key, out);
            }
        }
    }
}

/// Encode the bytes preceding the payload of an RPC message sent along `route`.
///
/// The header's kind is taken from the route.
pub fn encode_call(header: &RouterHeader, route: Route) -> CallPrefix {
    let mut out = SmallVec::new();
    header.with_kind(route.kind()).append_to(&mut out);
    route.append_selector(&mut out);
    out
}

/// Where forwarded messages go. Implemented by the reactor.
pub trait ForwardSink {
    /// Queue the concatenation of `frags` as one message on `token`.
    ///
    /// Returns `false` if the token is unknown, closed, or the send failed.
    fn sendv(&mut self, token: Token, frags: &[&[u8]]) -> bool;
}

/// Routing failures. Reported upward as forward-error events; the
/// requesting connection stays open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("message kind {0:?} is not a forward")]
    NotForward(MsgKind),

    #[error("truncated routing selector")]
    BadSelector,

    #[error("forward target {0:#x} not found")]
    UnknownTarget(u64),

    #[error("service group {0} has no master")]
    NoMaster(u8),

    #[error("service group {0} has no live node")]
    NoLiveNode(u8),

    #[error("service group {group} hash slot {slot} is empty")]
    EmptySlot { group: u8, slot: usize },

    #[error("send to token {0} failed")]
    SendFailed(Token),
}

/// One registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceNode {
    pub id: u32,
    pub token: Token,
}

#[derive(Debug, Default, Clone)]
struct ServiceGroup {
    nodes: Vec<ServiceNode>,
    hashed: bool,
    master: Token,
}

impl ServiceGroup {
    /// Extend the slot array to `len` slots with synthesized, unmapped ids.
    fn fill_slots(&mut self, group: u8, len: usize) {
        let start = self.nodes.len();
        self.nodes.extend((start..len).map(|slot| ServiceNode {
            id: build_service_id(group, slot as u32),
            token: 0,
        }));
    }

    fn enter_hash_mode(&mut self, group: u8, slots: usize) {
        if self.hashed {
            if slots > self.nodes.len() {
                self.fill_slots(group, slots);
            }
            return;
        }

        let mapped = std::mem::take(&mut self.nodes);
        self.fill_slots(group, slots);
        for node in mapped {
            match self.nodes.get_mut(service_index(node.id) as usize) {
                Some(slot) => slot.token = node.token,
                None => debug!(
                    "[ROUTER] group {} drops {:#x}: outside {} hash slots",
                    group, node.id, slots
                ),
            }
        }
        self.hashed = true;
    }

    fn token_of(&self, service_id: u32) -> Token {
        if self.hashed {
            return self
                .nodes
                .get(service_index(service_id) as usize)
                .map_or(0, |n| n.token);
        }
        self.nodes
            .binary_search_by_key(&service_id, |n| n.id)
            .map_or(0, |pos| self.nodes[pos].token)
    }

    fn has_token(&self, token: Token) -> bool {
        token != 0 && self.nodes.iter().any(|n| n.token == token)
    }
}

/// Logical-id → token routing table plus the forwarding primitives.
#[derive(Debug, Clone)]
pub struct Router {
    groups: Vec<ServiceGroup>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            groups: vec![ServiceGroup::default(); MAX_SERVICE_GROUP],
        }
    }

    /// Register, update or remove `service_id`.
    ///
    /// A `hash_slots` larger than the group's current slot count switches the
    /// group to (or grows it in) hash mode. Token 0 removes a map-mode entry;
    /// in hash mode the slot is kept and its token cleared.
    ///
    /// Only `hash_slots` sizes the slot array, so a group never holds more
    /// than `u16::MAX` slots. In hash mode an id whose index falls outside
    /// the array is ignored; map-mode entries outside it are dropped on
    /// conversion.
    pub fn map_token(&mut self, service_id: u32, token: Token, hash_slots: u16) {
        let group_id = service_group(service_id);
        let group = &mut self.groups[group_id as usize];

        let slots = usize::from(hash_slots);
        if slots > 0 && (!group.hashed || slots > group.nodes.len()) {
            debug!("[ROUTER] group {} hash mode, {} slots", group_id, slots);
            group.enter_hash_mode(group_id, slots);
        }

        if group.hashed {
            let slot = service_index(service_id) as usize;
            let slots = group.nodes.len();
            let Some(node) = group.nodes.get_mut(slot) else {
                debug!(
                    "[ROUTER] group {} ignores {:#x}: slot {} outside {} hash slots",
                    group_id, service_id, slot, slots
                );
                return;
            };
            node.token = token;
            trace!("[ROUTER] slot {}:{} -> token {}", group_id, slot, token);
            return;
        }

        match group.nodes.binary_search_by_key(&service_id, |n| n.id) {
            Ok(pos) if token == 0 => {
                group.nodes.remove(pos);
            }
            Ok(pos) => group.nodes[pos].token = token,
            Err(_) if token == 0 => {}
            Err(pos) => group.nodes.insert(
                pos,
                ServiceNode {
                    id: service_id,
                    token,
                },
            ),
        }
        trace!("[ROUTER] {:#x} -> token {}", service_id, token);
    }

    /// Forget `token` everywhere: map-mode entries are removed, hash-mode
    /// slots keep their id with token 0, and masters pointing at it are cleared.
    pub fn erase_token(&mut self, token: Token) {
        if token == 0 {
            return;
        }
        for group in &mut self.groups {
            if group.hashed {
                for node in group.nodes.iter_mut().filter(|n| n.token == token) {
                    node.token = 0;
                }
            } else {
                group.nodes.retain(|n| n.token != token);
            }
            if group.master == token {
                group.master = 0;
            }
        }
    }

    pub fn set_master(&mut self, group: u8, token: Token) {
        self.groups[group as usize].master = token;
    }

    #[must_use]
    pub fn master(&self, group: u8) -> Token {
        self.groups[group as usize].master
    }

    /// Keep the current master if it is still mapped, otherwise promote the
    /// first live node. Returns the resulting master (0 if none).
    pub fn choose_master(&mut self, group: u8) -> Token {
        let entry = &mut self.groups[group as usize];
        if entry.has_token(entry.master) {
            return entry.master;
        }
        entry.master = entry
            .nodes
            .iter()
            .find(|n| n.token != 0)
            .map_or(0, |n| n.token);
        debug!("[ROUTER] group {} master -> token {}", group, entry.master);
        entry.master
    }

    /// Token currently mapped to `service_id` (0 if none).
    #[must_use]
    pub fn token_of(&self, service_id: u32) -> Token {
        self.groups[service_group(service_id) as usize].token_of(service_id)
    }

    #[must_use]
    pub fn is_hash_mode(&self, group: u8) -> bool {
        self.groups[group as usize].hashed
    }

    /// Slot array length of a hash-mode group (0 in map mode).
    #[must_use]
    pub fn slot_count(&self, group: u8) -> usize {
        let entry = &self.groups[group as usize];
        if entry.hashed {
            entry.nodes.len()
        } else {
            0
        }
    }

    /// Number of entries in the group (mapped ids, or slots in hash mode).
    #[must_use]
    pub fn group_len(&self, group: u8) -> usize {
        self.groups[group as usize].nodes.len()
    }

    pub fn nodes(&self, group: u8) -> &[ServiceNode] {
        &self.groups[group as usize].nodes
    }

    /// Token at `nodes[key % len]` of the group.
    pub fn resolve_hash(&self, group: u8, key: u64) -> Result<Token, RouteError> {
        let nodes = &self.groups[group as usize].nodes;
        if nodes.is_empty() {
            return Err(RouteError::NoLiveNode(group));
        }
        let slot = (key % nodes.len() as u64) as usize;
        match nodes[slot].token {
            0 => Err(RouteError::EmptySlot { group, slot }),
            token => Ok(token),
        }
    }

    /// Forward `body` (routing selector followed by payload) according to
    /// `header.kind`. Returns the number of sends issued.
    pub fn forward<S: ForwardSink>(
        &self,
        sink: &mut S,
        source: Token,
        header: &RouterHeader,
        body: &[u8],
    ) -> Result<usize, RouteError> {
        match header.kind {
            MsgKind::RemoteCall => Err(RouteError::NotForward(header.kind)),
            MsgKind::ForwardTarget => self.do_forward_target(sink, header, body).map(|()| 1),
            MsgKind::ForwardMaster => self.do_forward_master(sink, header, body).map(|()| 1),
            MsgKind::ForwardRandom => self.do_forward_random(sink, header, body).map(|()| 1),
            MsgKind::ForwardBroadcast => self.do_forward_broadcast(sink, source, header, body),
            MsgKind::ForwardHash => self.do_forward_hash(sink, header, body).map(|()| 1),
        }
    }

    pub fn do_forward_target<S: ForwardSink>(
        &self,
        sink: &mut S,
        header: &RouterHeader,
        body: &[u8],
    ) -> Result<(), RouteError> {
        let (target, n) = decode_u64(body).ok_or(RouteError::BadSelector)?;
        let token = u32::try_from(target).map_or(0, |id| self.token_of(id));
        if token == 0 {
            return Err(RouteError::UnknownTarget(target));
        }
        send_remote_call(sink, token, header, &body[n..])
    }

    pub fn do_forward_master<S: ForwardSink>(
        &self,
        sink: &mut S,
        header: &RouterHeader,
        body: &[u8],
    ) -> Result<(), RouteError> {
        let (group, n) = decode_group(body)?;
        match self.groups[group as usize].master {
            0 => Err(RouteError::NoMaster(group)),
            token => send_remote_call(sink, token, header, &body[n..]),
        }
    }

    /// Probe the group from a random offset and use the first live node.
    pub fn do_forward_random<S: ForwardSink>(
        &self,
        sink: &mut S,
        header: &RouterHeader,
        body: &[u8],
    ) -> Result<(), RouteError> {
        use rand::Rng;

        let (group, n) = decode_group(body)?;
        let nodes = &self.groups[group as usize].nodes;
        if nodes.is_empty() {
            return Err(RouteError::NoLiveNode(group));
        }
        let start = rand::thread_rng().gen_range(0..nodes.len());
        let token = (0..nodes.len())
            .map(|i| nodes[(start + i) % nodes.len()].token)
            .find(|&t| t != 0)
            .ok_or(RouteError::NoLiveNode(group))?;
        send_remote_call(sink, token, header, &body[n..])
    }

    /// Send to every live node of the group except `source`.
    ///
    /// Returns how many sends succeeded; zero is reported as an error.
    pub fn do_forward_broadcast<S: ForwardSink>(
        &self,
        sink: &mut S,
        source: Token,
        header: &RouterHeader,
        body: &[u8],
    ) -> Result<usize, RouteError> {
        let (group, n) = decode_group(body)?;
        let outbound = header.with_kind(MsgKind::RemoteCall).to_bytes();
        let payload = &body[n..];

        let mut sent = 0;
        for node in &self.groups[group as usize].nodes {
            if node.token == 0 || node.token == source {
                continue;
            }
            if sink.sendv(node.token, &[&outbound, payload]) {
                sent += 1;
            }
        }
        if sent == 0 {
            return Err(RouteError::NoLiveNode(group));
        }
        Ok(sent)
    }

    pub fn do_forward_hash<S: ForwardSink>(
        &self,
        sink: &mut S,
        header: &RouterHeader,
        body: &[u8],
    ) -> Result<(), RouteError> {
        let (group, n) = decode_group(body)?;
        let (key, m) = decode_u64(&body[n..]).ok_or(RouteError::BadSelector)?;
        let token = self.resolve_hash(group, key)?;
        send_remote_call(sink, token, header, &body[n + m..])
    }
}

fn decode_group(body: &[u8]) -> Result<(u8, usize), RouteError> {
    let (group, n) = decode_u64(body).ok_or(RouteError::BadSelector)?;
    let group = u8::try_from(group).map_err(|_| RouteError::BadSelector)?;
    Ok((group, n))
}

fn send_remote_call<S: ForwardSink>(
    sink: &mut S,
    token: Token,
    header: &RouterHeader,
    payload: &[u8],
) -> Result<(), RouteError> {
    let outbound = header.with_kind(MsgKind::RemoteCall).to_bytes();
    if sink.sendv(token, &[&outbound, payload]) {
        Ok(())
    } else {
        Err(RouteError::SendFailed(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<(Token, Vec<u8>)>,
        refuse: Vec<Token>,
    }

    impl ForwardSink for RecordingSink {
        fn sendv(&mut self, token: Token, frags: &[&[u8]]) -> bool {
            if self.refuse.contains(&token) {
                return false;
            }
            self.sent.push((token, frags.concat()));
            true
        }
    }

    fn forward_body(route: Route, payload: &[u8]) -> (RouterHeader, Vec<u8>) {
        let header = RouterHeader::new(7, 1, 42).with_kind(route.kind());
        let prefix = encode_call(&header, route);
        let (_, n) = RouterHeader::decode(&prefix).unwrap();
        let mut body = prefix[n..].to_vec();
        body.extend_from_slice(payload);
        (header, body)
    }

    #[test]
    fn test_header_round_trip() {
        let header = RouterHeader::new(u64::MAX, 1, 300).with_kind(MsgKind::ForwardHash);
        let bytes = header.to_bytes();
        assert_eq!(RouterHeader::decode(&bytes), Some((header, bytes.len())));
        for cut in 0..bytes.len() {
            assert_eq!(RouterHeader::decode(&bytes[..cut]), None);
        }
    }

    #[test]
    fn test_widest_call_prefix_stays_inline() {
        let header = RouterHeader::new(u64::MAX, u64::MAX, u64::MAX);
        let prefix = encode_call(&header, Route::Hash(u8::MAX, u64::MAX));
        assert!(prefix.len() <= CALL_PREFIX_MAX);
        assert!(!prefix.spilled());
        let (decoded, n) = RouterHeader::decode(&prefix).unwrap();
        assert_eq!(decoded.kind, MsgKind::ForwardHash);
        assert_eq!(decoded.source_id, u64::MAX);
        assert_eq!(decode_u64(&prefix[n..]).map(|(g, _)| g), Some(u64::from(u8::MAX)));
    }

    #[test]
    fn test_header_unknown_kind() {
        assert_eq!(RouterHeader::decode(&[9, 0, 0, 0]), None);
    }

    #[test]
    fn test_service_id_layout() {
        let id = build_service_id(3, 17);
        assert_eq!(service_group(id), 3);
        assert_eq!(service_index(id), 17);
    }

    #[test]
    fn test_map_mode_insert_update_remove() {
        let mut router = Router::new();
        let id = build_service_id(1, 5);
        router.map_token(id, 10, 0);
        assert_eq!(router.token_of(id), 10);
        router.map_token(id, 11, 0);
        assert_eq!(router.token_of(id), 11);
        router.map_token(id, 0, 0);
        assert_eq!(router.token_of(id), 0);
        assert_eq!(router.group_len(1), 0);
        assert!(!router.is_hash_mode(1));
    }

    #[test]
    fn test_hash_mode_is_sticky() {
        let mut router = Router::new();
        router.map_token(build_service_id(2, 1), 5, 0);
        router.map_token(build_service_id(2, 0), 4, 4);
        assert!(router.is_hash_mode(2));
        assert_eq!(router.slot_count(2), 4);
        assert_eq!(router.token_of(build_service_id(2, 1)), 5);

        router.map_token(build_service_id(2, 8), 9, 0);
        assert!(router.is_hash_mode(2));
        assert_eq!(router.slot_count(2), 4);
        assert_eq!(router.token_of(build_service_id(2, 8)), 0);

        router.map_token(build_service_id(2, 1), 0, 2);
        assert_eq!(router.slot_count(2), 4);
        assert_eq!(router.token_of(build_service_id(2, 1)), 0);
        assert_eq!(router.nodes(2)[1].id, build_service_id(2, 1));
    }

    #[test]
    fn test_hash_forward_congruent_keys() {
        let mut router = Router::new();
        router.map_token(build_service_id(3, 1), 21, 4);
        router.map_token(build_service_id(3, 2), 22, 4);
        assert_eq!(router.resolve_hash(3, 10), Ok(22));
        assert_eq!(router.resolve_hash(3, 10), router.resolve_hash(3, 14));
        assert_eq!(
            router.resolve_hash(3, 3),
            Err(RouteError::EmptySlot { group: 3, slot: 3 })
        );
    }

    #[test]
    fn test_out_of_range_index_keeps_hash_stable() {
        let mut router = Router::new();
        router.map_token(build_service_id(3, 1), 21, 4);
        router.map_token(build_service_id(3, 2), 22, 4);
        assert_eq!(router.resolve_hash(3, 10), Ok(22));

        router.map_token(build_service_id(3, 0x00FF_FFFF), 23, 0);
        assert_eq!(router.slot_count(3), 4);
        assert_eq!(router.token_of(build_service_id(3, 0x00FF_FFFF)), 0);
        assert_eq!(router.resolve_hash(3, 10), Ok(22));

        // Growth only through the slot count.
        router.map_token(build_service_id(3, 5), 25, 8);
        assert_eq!(router.slot_count(3), 8);
        assert_eq!(router.resolve_hash(3, 13), Ok(25));
    }

    #[test]
    fn test_forward_target_rewrites_kind() {
        let mut router = Router::new();
        let target = build_service_id(4, 1);
        router.map_token(target, 33, 0);

        let (header, body) = forward_body(Route::Target(target), b"ping");
        let mut sink = RecordingSink::default();
        assert_eq!(router.forward(&mut sink, 1, &header, &body), Ok(1));

        let (token, bytes) = &sink.sent[0];
        assert_eq!(*token, 33);
        let (out, n) = RouterHeader::decode(bytes).unwrap();
        assert_eq!(out, RouterHeader::new(7, 1, 42));
        assert_eq!(&bytes[n..], b"ping");
    }

    #[test]
    fn test_forward_unknown_target() {
        let router = Router::new();
        let (header, body) = forward_body(Route::Target(build_service_id(4, 9)), b"x");
        let mut sink = RecordingSink::default();
        assert!(matches!(
            router.forward(&mut sink, 1, &header, &body),
            Err(RouteError::UnknownTarget(_))
        ));
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn test_forward_master() {
        let mut router = Router::new();
        let (header, body) = forward_body(Route::Master(6), b"m");
        let mut sink = RecordingSink::default();
        assert_eq!(
            router.forward(&mut sink, 1, &header, &body),
            Err(RouteError::NoMaster(6))
        );

        router.map_token(build_service_id(6, 2), 60, 0);
        router.map_token(build_service_id(6, 1), 61, 0);
        assert_eq!(router.choose_master(6), 61);
        assert_eq!(router.forward(&mut sink, 1, &header, &body), Ok(1));
        assert_eq!(sink.sent[0].0, 61);

        router.erase_token(61);
        assert_eq!(router.master(6), 0);
        assert_eq!(router.choose_master(6), 60);
    }

    #[test]
    fn test_forward_broadcast_skips_source() {
        let mut router = Router::new();
        for (i, token) in [(1, 71), (2, 72), (3, 73)] {
            router.map_token(build_service_id(7, i), token, 0);
        }
        let (header, body) = forward_body(Route::Broadcast(7), b"all");
        let mut sink = RecordingSink::default();
        assert_eq!(router.forward(&mut sink, 72, &header, &body), Ok(2));
        let tokens: Vec<Token> = sink.sent.iter().map(|(t, _)| *t).collect();
        assert_eq!(tokens, vec![71, 73]);
    }

    #[test]
    fn test_forward_broadcast_to_nobody_fails() {
        let mut router = Router::new();
        router.map_token(build_service_id(8, 1), 81, 0);
        let (header, body) = forward_body(Route::Broadcast(8), b"");
        let mut sink = RecordingSink::default();
        assert_eq!(
            router.forward(&mut sink, 81, &header, &body),
            Err(RouteError::NoLiveNode(8))
        );
    }

    #[test]
    fn test_forward_random_finds_live_node() {
        let mut router = Router::new();
        router.map_token(build_service_id(9, 0), 0, 8);
        router.map_token(build_service_id(9, 5), 95, 0);
        let (header, body) = forward_body(Route::Random(9), b"r");
        for _ in 0..16 {
            let mut sink = RecordingSink::default();
            assert_eq!(router.forward(&mut sink, 1, &header, &body), Ok(1));
            assert_eq!(sink.sent[0].0, 95);
        }
    }

    #[test]
    fn test_send_failure_is_reported() {
        let mut router = Router::new();
        router.map_token(build_service_id(4, 1), 33, 0);
        let (header, body) = forward_body(Route::Target(build_service_id(4, 1)), b"x");
        let mut sink = RecordingSink {
            refuse: vec![33],
            ..Default::default()
        };
        assert_eq!(
            router.forward(&mut sink, 1, &header, &body),
            Err(RouteError::SendFailed(33))
        );
    }

    #[test]
    fn test_truncated_selector() {
        let router = Router::new();
        let header = RouterHeader::new(1, 0, 0).with_kind(MsgKind::ForwardHash);
        let mut sink = RecordingSink::default();
        assert_eq!(
            router.forward(&mut sink, 1, &header, &[3]),
            Err(RouteError::BadSelector)
        );
        assert_eq!(
            router.forward(&mut sink, 1, &header, &[0x80]),
            Err(RouteError::BadSelector)
        );
    }
}
