use super::clock::{Clock, SystemClock};
use super::record::{TraceRecord, TraceSet};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Details handed over when the transport has a connection ready for a request.
#[derive(Debug, Clone, Copy)]
pub struct AcquiredConn<'a> {
    /// `host:port` the connection serves.
    pub address: &'a str,
    pub reused: bool,
}

/// Lifecycle hooks raised by the transport while it executes one request.
///
/// Hooks for a connection fire in declaration order, except that
/// `on_connection_acquired` may come after the DNS and connect hooks.
/// Every hook defaults to doing nothing.
pub trait ClientTrace: Send {
    fn on_connection_acquire_start(&mut self, _address: &str) {}
    fn on_connection_acquired(&mut self, _info: AcquiredConn<'_>) {}
    fn on_dns_start(&mut self, _host: &str) {}
    fn on_dns_end(&mut self, _addrs: &[SocketAddr]) {}
    fn on_connect_start(&mut self, _addr: SocketAddr) {}
    fn on_connect_end(&mut self, _addr: SocketAddr, _error: Option<&io::Error>) {}
    fn on_request_written(&mut self) {}
    fn on_first_response_byte(&mut self) {}
}

/// Trace that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrace;

impl ClientTrace for NoopTrace {}

#[derive(Debug)]
enum Current {
    Idle,
    /// Acquisition started, not yet visible in the trace set.
    Dialing(TraceRecord),
    /// Index of the record in the trace set.
    Active(usize),
}

/// Records per-connection timestamps for one logical request into a
/// caller-owned [`TraceSet`].
#[derive(Debug)]
pub struct RequestTracer<'a> {
    traces: &'a mut TraceSet,
    current: Current,
    clock: Arc<dyn Clock>,
}

impl<'a> RequestTracer<'a> {
    pub fn new(traces: &'a mut TraceSet) -> Self {
        Self::with_clock(traces, Arc::new(SystemClock))
    }

    pub fn with_clock(traces: &'a mut TraceSet, clock: Arc<dyn Clock>) -> Self {
        Self {
            traces,
            current: Current::Idle,
            clock,
        }
    }

    pub fn traces(&self) -> &TraceSet {
        &*self.traces
    }

    fn current_mut(&mut self) -> Option<&mut TraceRecord> {
        match &mut self.current {
            Current::Idle => None,
            Current::Dialing(record) => Some(record),
            Current::Active(index) => self.traces.get_mut(*index),
        }
    }

    fn stamp(
        &mut self,
        event: &'static str,
        field: fn(&mut TraceRecord) -> &mut Option<Instant>,
    ) {
        let now = self.clock.now();
        match self.current_mut() {
            Some(record) => *field(record) = Some(now),
            None => trace!("Ignoring {} with no connection in progress", event),
        }
    }
}

impl ClientTrace for RequestTracer<'_> {
    fn on_connection_acquire_start(&mut self, address: &str) {
        let record = TraceRecord::new(address, self.clock.now());
        let previous = mem::replace(&mut self.current, Current::Dialing(record));
        if let Current::Dialing(abandoned) = previous {
            debug!("Discarding unacquired trace for {}", abandoned.address());
        }
    }

    fn on_connection_acquired(&mut self, info: AcquiredConn<'_>) {
        let now = self.clock.now();
        let record = match mem::replace(&mut self.current, Current::Idle) {
            Current::Dialing(pending) if !info.reused => pending,
            Current::Dialing(pending) => {
                debug!(
                    "Connection to {} reused, discarding dial trace for {}",
                    info.address,
                    pending.address()
                );
                TraceRecord::new(info.address, now)
            }
            Current::Idle | Current::Active(_) => TraceRecord::new(info.address, now),
        };
        let index = self.traces.push(record);
        self.current = Current::Active(index);
    }

    fn on_dns_start(&mut self, _host: &str) {
        self.stamp("dns start", |r| &mut r.dns_start);
    }

    fn on_dns_end(&mut self, _addrs: &[SocketAddr]) {
        self.stamp("dns end", |r| &mut r.dns_end);
    }

    fn on_connect_start(&mut self, _addr: SocketAddr) {
        self.stamp("connect start", |r| &mut r.connect_start);
    }

    fn on_connect_end(&mut self, _addr: SocketAddr, _error: Option<&io::Error>) {
        self.stamp("connect end", |r| &mut r.connect_end);
    }

    fn on_request_written(&mut self) {
        self.stamp("request written", |r| &mut r.request_written);
    }

    fn on_first_response_byte(&mut self) {
        self.stamp("first response byte", |r| &mut r.first_byte_received);
    }
}

/// A request paired with the tracer that observes its execution.
#[derive(Debug)]
pub struct TracedRequest<'a, B> {
    pub request: http::Request<B>,
    pub tracer: RequestTracer<'a>,
}

impl<'a, B> TracedRequest<'a, B> {
    pub fn into_parts(self) -> (http::Request<B>, RequestTracer<'a>) {
        (self.request, self.tracer)
    }
}

/// Installs a fresh tracer on `request`; records land in `traces` once a
/// transport executes the returned request.
pub fn attach<B>(request: http::Request<B>, traces: &mut TraceSet) -> TracedRequest<'_, B> {
    TracedRequest {
        request,
        tracer: RequestTracer::new(traces),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::clock::manual::ManualClock;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 443)
    }

    fn fresh(address: &str) -> AcquiredConn<'_> {
        AcquiredConn {
            address,
            reused: false,
        }
    }

    fn reused(address: &str) -> AcquiredConn<'_> {
        AcquiredConn {
            address,
            reused: true,
        }
    }

    #[test]
    fn test_fresh_connection_phases() {
        let clock = Arc::new(ManualClock::new());
        let mut traces = TraceSet::new();
        {
            let mut tracer = RequestTracer::with_clock(&mut traces, clock.clone());
            tracer.on_connection_acquire_start("10.0.0.1:443");
            tracer.on_connection_acquired(fresh("10.0.0.1:443"));
            clock.set_ms(1);
            tracer.on_dns_start("10.0.0.1");
            clock.set_ms(5);
            tracer.on_dns_end(&[peer()]);
            tracer.on_connect_start(peer());
            clock.set_ms(15);
            tracer.on_connect_end(peer(), None);
            clock.set_ms(16);
            tracer.on_request_written();
            clock.set_ms(50);
            tracer.on_first_response_byte();
        }

        assert_eq!(traces.len(), 1);
        let record = traces.get(0).unwrap();
        assert_eq!(record.address(), "10.0.0.1:443");
        assert_eq!(record.start(), clock.origin());
        assert_eq!(record.dns_time(), Duration::from_millis(4));
        assert_eq!(record.connect_time(), Duration::from_millis(10));
        assert_eq!(record.wait_time(), Duration::from_millis(34));
    }

    #[test]
    fn test_reused_connection_without_acquire_start() {
        let clock = Arc::new(ManualClock::new());
        let mut traces = TraceSet::new();
        {
            let mut tracer = RequestTracer::with_clock(&mut traces, clock.clone());
            tracer.on_connection_acquired(reused("10.0.0.1:443"));
            clock.set_ms(1);
            tracer.on_request_written();
            clock.set_ms(20);
            tracer.on_first_response_byte();
        }

        assert_eq!(traces.len(), 1);
        let record = traces.get(0).unwrap();
        assert_eq!(record.address(), "10.0.0.1:443");
        assert_eq!(record.dns_time(), Duration::ZERO);
        assert_eq!(record.connect_time(), Duration::ZERO);
        assert_eq!(record.wait_time(), Duration::from_millis(19));
    }

    #[test]
    fn test_reuse_discards_pending_dial_and_restamps_start() {
        let clock = Arc::new(ManualClock::new());
        let mut traces = TraceSet::new();
        {
            let mut tracer = RequestTracer::with_clock(&mut traces, clock.clone());
            tracer.on_connection_acquire_start("a:80");
            tracer.on_connection_acquired(fresh("a:80"));
            tracer.on_request_written();
            clock.set_ms(3);
            tracer.on_first_response_byte();

            clock.set_ms(10);
            tracer.on_connection_acquire_start("a:80");
            clock.set_ms(12);
            tracer.on_connection_acquired(reused("a:80"));
        }

        assert_eq!(traces.len(), 2);
        let first = traces.get(0).unwrap();
        let second = traces.get(1).unwrap();
        assert_ne!(first.start(), second.start());
        assert_eq!(second.start(), clock.origin() + Duration::from_millis(12));
        assert_eq!(second.wait_time(), Duration::ZERO);
    }

    #[test]
    fn test_second_connection_leaves_first_untouched() {
        let clock = Arc::new(ManualClock::new());
        let mut traces = TraceSet::new();
        {
            let mut tracer = RequestTracer::with_clock(&mut traces, clock.clone());
            tracer.on_connection_acquire_start("a:80");
            tracer.on_connection_acquired(fresh("a:80"));
            clock.set_ms(2);
            tracer.on_connect_start(peer());
            clock.set_ms(6);
            tracer.on_connect_end(peer(), None);

            clock.set_ms(30);
            tracer.on_connection_acquire_start("b:80");
            tracer.on_connection_acquired(fresh("b:80"));
            clock.set_ms(31);
            tracer.on_connect_start(peer());
            clock.set_ms(40);
            tracer.on_connect_end(peer(), None);
        }

        assert_eq!(traces.len(), 2);
        let first = traces.get(0).unwrap();
        assert_eq!(first.address(), "a:80");
        assert_eq!(first.connect_time(), Duration::from_millis(4));
        let second = traces.get(1).unwrap();
        assert_eq!(second.address(), "b:80");
        assert_eq!(second.connect_time(), Duration::from_millis(9));
    }

    #[test]
    fn test_events_before_append_land_on_the_appended_record() {
        let clock = Arc::new(ManualClock::new());
        let mut traces = TraceSet::new();
        {
            let mut tracer = RequestTracer::with_clock(&mut traces, clock.clone());
            tracer.on_connection_acquire_start("example.com:80");
            clock.set_ms(1);
            tracer.on_dns_start("example.com");
            clock.set_ms(8);
            tracer.on_dns_end(&[peer()]);
            assert!(tracer.traces().is_empty());
            tracer.on_connection_acquired(fresh("example.com:80"));
        }

        assert_eq!(traces.len(), 1);
        assert_eq!(traces.get(0).unwrap().dns_time(), Duration::from_millis(7));
    }

    #[test]
    fn test_each_acquisition_appends_once() {
        let mut traces = TraceSet::new();
        {
            let mut tracer = RequestTracer::new(&mut traces);
            tracer.on_connection_acquired(fresh("a:80"));
            tracer.on_connection_acquired(fresh("a:80"));
            tracer.on_connection_acquire_start("b:80");
            tracer.on_connection_acquired(fresh("b:80"));
            tracer.on_connection_acquired(reused("b:80"));
        }
        assert_eq!(traces.len(), 4);
    }

    #[test]
    fn test_events_without_connection_are_ignored() {
        let mut traces = TraceSet::new();
        {
            let mut tracer = RequestTracer::new(&mut traces);
            tracer.on_dns_start("example.com");
            tracer.on_request_written();
            tracer.on_first_response_byte();
        }
        assert!(traces.is_empty());
    }

    #[test]
    fn test_attach_keeps_request_and_targets_trace_set() {
        let mut traces = TraceSet::new();
        let request = http::Request::get("http://example.com/").body(()).unwrap();
        {
            let traced = attach(request, &mut traces);
            let (request, mut tracer) = traced.into_parts();
            assert_eq!(request.uri().host(), Some("example.com"));
            tracer.on_connection_acquired(fresh("example.com:80"));
        }
        assert_eq!(traces.len(), 1);
    }
}
