use crate::http::resolver::DnsLoggingResolver;
use crate::http::traced_io::{IoProbe, Reported, TracedBody, TracedIo};
use crate::trace::{AcquiredConn, ClientTrace};
use anyhow::Context as _;
use bytes::Bytes;
use futures::future::poll_fn;
use futures::FutureExt;
use http::header::HOST;
use http::uri::{PathAndQuery, Scheme};
use http::{HeaderValue, Request, Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::{pin, Pin};
use std::sync::Arc;
use std::task::Poll;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

type RequestBody = TracedBody<Full<Bytes>>;
type ConnectionDriver = Pin<Box<http1::Connection<TokioIo<TracedIo>, RequestBody>>>;

/// Where a request goes: scheme, host and effective port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub tls: bool,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn from_uri(uri: &Uri) -> Result<Self, anyhow::Error> {
        let tls = match uri.scheme() {
            Some(scheme) if *scheme == Scheme::HTTPS => true,
            Some(scheme) if *scheme == Scheme::HTTP => false,
            _ => return Err(anyhow!("Unsupported scheme in the uri:{}.", uri)),
        };
        let host = uri
            .host()
            .ok_or_else(|| anyhow!("uri has no host: {}", uri))?
            .to_string();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
        Ok(Self { tls, host, port })
    }

    /// `host:port`, the address recorded in traces.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn pool_key(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.address())
    }

    fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            self.address()
        }
    }
}

/// An HTTP/1 connection whose driver runs on the task that sends requests.
struct PooledConnection {
    sender: http1::SendRequest<RequestBody>,
    driver: ConnectionDriver,
    probe: Arc<IoProbe>,
    closed: bool,
}

impl PooledConnection {
    /// Polls the idle driver once so a connection the peer closed is noticed.
    fn is_usable(&mut self) -> bool {
        if !self.closed && (&mut self.driver).now_or_never().is_some() {
            self.closed = true;
        }
        !self.closed && !self.sender.is_closed()
    }

    async fn exchange(
        &mut self,
        request: Request<RequestBody>,
        trace: &mut dyn ClientTrace,
    ) -> Result<Response<Bytes>, anyhow::Error> {
        let PooledConnection {
            sender,
            driver,
            probe,
            closed,
        } = self;
        let probe: &IoProbe = probe;
        probe.reset();
        let mut reported = Reported::default();

        let mut response = pin!(async move {
            sender.ready().await?;
            let res = sender.send_request(request).await?;
            let (parts, incoming) = res.into_parts();
            let body = incoming.collect().await?.to_bytes();
            Ok::<_, hyper::Error>(Response::from_parts(parts, body))
        });

        let result = poll_fn(|cx| {
            if !*closed {
                if let Poll::Ready(driven) = driver.as_mut().poll(cx) {
                    *closed = true;
                    if let Err(e) = driven {
                        debug!("Connection closed with error: {}", e);
                    }
                }
            }
            reported.report(probe, trace);
            response.as_mut().poll(cx)
        })
        .await;
        reported.report(probe, trace);

        result.context("Failed to execute request")
    }
}

/// Minimal HTTP/1.1 transport raising [`ClientTrace`] hooks at each
/// connection lifecycle boundary. Keeps at most one idle connection per
/// endpoint.
pub struct Transport {
    resolver: DnsLoggingResolver,
    tls: TlsConnector,
    pool: HashMap<String, PooledConnection>,
}

impl Transport {
    pub fn new(tls_config: Arc<ClientConfig>) -> Self {
        Self {
            resolver: DnsLoggingResolver::new(),
            tls: TlsConnector::from(tls_config),
            pool: HashMap::new(),
        }
    }

    /// Sends one request over a pooled or freshly dialed connection and
    /// collects the whole response body.
    pub async fn round_trip(
        &mut self,
        mut request: Request<Full<Bytes>>,
        trace: &mut dyn ClientTrace,
    ) -> Result<Response<Bytes>, anyhow::Error> {
        let endpoint = Endpoint::from_uri(request.uri())?;
        prepare_origin_form(&mut request, &endpoint)?;

        let address = endpoint.address();
        trace.on_connection_acquire_start(&address);
        let mut conn = match self.take_idle(&endpoint) {
            Some(conn) => {
                debug!("Reusing connection to {}", address);
                trace.on_connection_acquired(AcquiredConn {
                    address: &address,
                    reused: true,
                });
                conn
            }
            None => {
                let conn = self.dial(&endpoint, trace).await?;
                trace.on_connection_acquired(AcquiredConn {
                    address: &address,
                    reused: false,
                });
                conn
            }
        };

        let request = request.map(|body| TracedBody::new(body, conn.probe.clone()));
        let response = conn.exchange(request, trace).await?;
        if conn.is_usable() {
            self.pool.insert(endpoint.pool_key(), conn);
        }
        Ok(response)
    }

    fn take_idle(&mut self, endpoint: &Endpoint) -> Option<PooledConnection> {
        let mut conn = self.pool.remove(&endpoint.pool_key())?;
        if conn.is_usable() {
            Some(conn)
        } else {
            trace!("Dropping closed connection to {}", endpoint.address());
            None
        }
    }

    async fn dial(
        &self,
        endpoint: &Endpoint,
        trace: &mut dyn ClientTrace,
    ) -> Result<PooledConnection, anyhow::Error> {
        let addrs = self
            .resolver
            .resolve(&endpoint.host, endpoint.port, trace)
            .await?;
        let (stream, peer) = connect_any(&addrs, trace).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {} ({})", endpoint.address(), peer);

        let probe = IoProbe::new();
        let io = if endpoint.tls {
            let name = endpoint.host.trim_start_matches('[').trim_end_matches(']');
            let domain = pki_types::ServerName::try_from(name.to_string())
                .map_err(|e| anyhow!("{}", e))?;
            let tls_stream = self
                .tls
                .connect(domain, stream)
                .await
                .with_context(|| format!("TLS handshake with {} failed", endpoint.address()))?;
            TracedIo::new(Box::new(tls_stream), probe.clone())
        } else {
            TracedIo::new(Box::new(stream), probe.clone())
        };

        let (sender, driver) = http1::handshake(TokioIo::new(io)).await?;
        Ok(PooledConnection {
            sender,
            driver: Box::pin(driver),
            probe,
            closed: false,
        })
    }
}

async fn connect_any(
    addrs: &[SocketAddr],
    trace: &mut dyn ClientTrace,
) -> Result<(TcpStream, SocketAddr), anyhow::Error> {
    let mut last_error = None;
    for addr in addrs {
        trace.on_connect_start(*addr);
        match TcpStream::connect(*addr).await {
            Ok(stream) => {
                trace.on_connect_end(*addr, None);
                return Ok((stream, *addr));
            }
            Err(e) => {
                trace.on_connect_end(*addr, Some(&e));
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(anyhow!("Failed to connect: {}", e)),
        None => Err(anyhow!("No addresses to connect to")),
    }
}

/// Rewrites the request target to origin-form and fills in `Host`.
fn prepare_origin_form<B>(
    request: &mut Request<B>,
    endpoint: &Endpoint,
) -> Result<(), anyhow::Error> {
    if !request.headers().contains_key(HOST) {
        let host = HeaderValue::from_str(&endpoint.host_header())?;
        request.headers_mut().insert(HOST, host);
    }
    let path = request
        .uri()
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    *request.uri_mut() = Uri::from(path);
    Ok(())
}
