//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::io::Read;
use std::net::IpAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Barrier, Mutex};

use serde_json::Value;
use vpnservice::event::EventSink;
use vpnservice::tunnel::{CapabilityError, CapabilityResult, Feature, TunProvider, TunnelBuilder};

/// A capability call as seen by the stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Session(String),
    Blocking(bool),
    Address(IpAddr, u8),
    Mtu(u32),
    Dns(IpAddr),
    Route(IpAddr, u8),
    Disallow(String),
    Metered(bool),
    Establish,
}

impl Call {
    fn kind(&self) -> &'static str {
        match self {
            Call::Session(_) => "session",
            Call::Blocking(_) => "blocking",
            Call::Address(..) => "address",
            Call::Mtu(_) => "mtu",
            Call::Dns(_) => "dns",
            Call::Route(..) => "route",
            Call::Disallow(_) => "disallow",
            Call::Metered(_) => "metered",
            Call::Establish => "establish",
        }
    }
}

#[derive(Default)]
struct StubState {
    calls: Vec<Call>,
    /// Peer ends of every descriptor handed out
    peers: Vec<(RawFd, UnixStream)>,
    builders_dropped: usize,
}

/// In-memory tunnel capability.
///
/// Hands out one end of a socket pair as the tunnel descriptor and keeps the
/// other end, so tests can see when the descriptor gets closed.
#[derive(Clone, Default)]
pub struct StubProvider {
    state: Arc<Mutex<StubState>>,
    fail_on: Option<&'static str>,
    metered_supported: bool,
    unclosable: bool,
    gate: Option<EstablishGate>,
}

/// Holds `establish` until the test lets it continue.
#[derive(Clone)]
pub struct EstablishGate {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl EstablishGate {
    pub fn new() -> Self {
        EstablishGate {
            entered: Arc::new(Barrier::new(2)),
            release: Arc::new(Barrier::new(2)),
        }
    }

    /// Block until a builder is inside `establish`.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    /// Let the waiting `establish` finish.
    pub fn release(&self) {
        self.release.wait();
    }

    fn pass(&self) {
        self.entered.wait();
        self.release.wait();
    }
}

/// Never a valid descriptor: far above any process's open file limit.
pub const UNCLOSABLE_FD: RawFd = RawFd::MAX - 1;

impl StubProvider {
    pub fn new() -> Self {
        StubProvider::default()
    }

    /// Reject the first call of the given kind (e.g. "route", "establish").
    pub fn failing_on(kind: &'static str) -> Self {
        StubProvider {
            fail_on: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_metered_support(mut self) -> Self {
        self.metered_supported = true;
        self
    }

    /// Hand out [`UNCLOSABLE_FD`], so releasing the tunnel fails.
    pub fn with_unclosable_descriptor(mut self) -> Self {
        self.unclosable = true;
        self
    }

    pub fn with_gate(mut self, gate: EstablishGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn established_count(&self) -> usize {
        self.state.lock().unwrap().peers.len()
    }

    pub fn builders_dropped(&self) -> usize {
        self.state.lock().unwrap().builders_dropped
    }

    /// Whether the most recent descriptor handed out as `fd` has been closed.
    pub fn is_closed(&self, fd: RawFd) -> bool {
        let mut state = self.state.lock().unwrap();
        let (_, peer) = state
            .peers
            .iter_mut()
            .rev()
            .find(|(handed_out, _)| *handed_out == fd)
            .expect("descriptor was never handed out");
        peer.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 1];
        matches!(peer.read(&mut buf), Ok(0))
    }
}

impl TunProvider for StubProvider {
    fn new_builder(&self) -> CapabilityResult<Box<dyn TunnelBuilder>> {
        Ok(Box::new(StubBuilder {
            state: self.state.clone(),
            fail_on: self.fail_on,
            unclosable: self.unclosable,
            gate: self.gate.clone(),
        }))
    }

    fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::MeteredHint => self.metered_supported,
        }
    }
}

struct StubBuilder {
    state: Arc<Mutex<StubState>>,
    fail_on: Option<&'static str>,
    unclosable: bool,
    gate: Option<EstablishGate>,
}

impl StubBuilder {
    fn record(&mut self, call: Call) -> CapabilityResult<()> {
        let kind = call.kind();
        self.state.lock().unwrap().calls.push(call);
        if self.fail_on == Some(kind) {
            return Err(CapabilityError::Rejected(format!("stub rejects {}", kind)));
        }
        Ok(())
    }
}

impl TunnelBuilder for StubBuilder {
    fn set_session(&mut self, name: &str) -> CapabilityResult<()> {
        self.record(Call::Session(name.to_string()))
    }

    fn set_blocking(&mut self, blocking: bool) -> CapabilityResult<()> {
        self.record(Call::Blocking(blocking))
    }

    fn add_address(&mut self, address: IpAddr, prefix_len: u8) -> CapabilityResult<()> {
        self.record(Call::Address(address, prefix_len))
    }

    fn set_mtu(&mut self, mtu: u32) -> CapabilityResult<()> {
        self.record(Call::Mtu(mtu))
    }

    fn add_dns_server(&mut self, server: IpAddr) -> CapabilityResult<()> {
        self.record(Call::Dns(server))
    }

    fn add_route(&mut self, address: IpAddr, prefix_len: u8) -> CapabilityResult<()> {
        self.record(Call::Route(address, prefix_len))
    }

    fn add_disallowed_application(&mut self, application: &str) -> CapabilityResult<()> {
        self.record(Call::Disallow(application.to_string()))
    }

    fn set_metered(&mut self, metered: bool) -> CapabilityResult<()> {
        self.record(Call::Metered(metered))
    }

    fn establish(mut self: Box<Self>) -> CapabilityResult<OwnedFd> {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        self.record(Call::Establish)?;
        if self.unclosable {
            // The controller releases this with an explicit close and never drops it.
            return Ok(unsafe { OwnedFd::from_raw_fd(UNCLOSABLE_FD) });
        }
        let (ours, peer) = UnixStream::pair()?;
        let fd = OwnedFd::from(ours);
        self.state
            .lock()
            .unwrap()
            .peers
            .push((fd.as_raw_fd(), peer));
        Ok(fd)
    }
}

impl Drop for StubBuilder {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.builders_dropped += 1;
        }
    }
}

/// Event sink that remembers everything it was given.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _)| event == name)
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &str, payload: Value) {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
    }
}
