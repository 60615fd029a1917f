use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::{Method, Request, header};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_native_tls::{TlsConnector as TokioTlsConnector, TlsStream};
use trust_dns_resolver::TokioAsyncResolver;
use url::{Host, Position, Url};
use x509_parser::parse_x509_certificate;

use super::prelude::*;
use super::timed_io::TimedIo;
use super::trace::{TraceClock, Tracer};
use crate::task::ProbeTask;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Body bytes kept on a result. Anything past this is counted, not stored.
pub const MAX_RETAINED_BODY: usize = 64 * 1024;

const USER_AGENT: &str = "tracebox-probe/1.0";

/// Anything that can turn a task into a probe result.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, task: &ProbeTask) -> Result<ProbeResult, ProbeError>;
}

/// Raw outcome of one traced exchange.
#[derive(Debug)]
pub struct Exchange {
    pub start_time: i64,
    pub finish_time: i64,
    pub status_code: u16,
    /// Body bytes received, including any not retained in `body`.
    pub content_length: u64,
    pub body: Bytes,
}

/// Executes HTTP probes and records every network milestone on the way.
#[derive(Clone)]
pub struct TraceCollector {
    resolver: TokioAsyncResolver,
    connector: TokioTlsConnector,
    timeout: Duration,
}

impl TraceCollector {
    pub fn new(resolver: TokioAsyncResolver, connector: TokioTlsConnector) -> Self {
        Self {
            resolver,
            connector,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe a task, collecting its trace into a fresh [`TraceLog`].
    pub async fn probe(&self, task: &ProbeTask) -> Result<ProbeResult, ProbeError> {
        let url = task.url();
        let mut log = TraceLog::default();
        let exchange = self.probe_into(&url, &task.method, &mut log).await;

        match exchange {
            Ok(exchange) => Ok(ProbeResult {
                target: task.target.clone(),
                url,
                method: task.method.to_string(),
                start_time: exchange.start_time,
                finish_time: exchange.finish_time,
                status_code: exchange.status_code,
                content_length: exchange.content_length,
                body: exchange.body,
                events: log.into_events(),
            }),
            Err(e) => Err(ProbeError {
                phase: e.phase,
                target: task.target.clone(),
                url,
                source: e.source,
                trace: log.into_events(),
            }),
        }
    }

    /// Probe `url`, appending every milestone to `sink`. The whole exchange
    /// runs under one deadline; events recorded before a failure or timeout
    /// stay in the sink.
    pub async fn probe_into<S>(
        &self,
        url: &str,
        method: &Method,
        sink: &mut S,
    ) -> Result<Exchange, PhaseError>
    where
        S: TraceSink + Send + ?Sized,
    {
        let clock = TraceClock::start();
        let deadline = Instant::now() + self.timeout;
        let start_time = clock.now();

        let mut tracer = Tracer::new(clock, sink);
        let exchanged = timeout_at(deadline, self.exchange(url, method, &mut tracer)).await;
        tracer.drain();

        match exchanged {
            Ok(Ok(exchange)) => Ok(Exchange {
                start_time,
                ..exchange
            }),
            Ok(Err(e)) => Err(e),
            Err(elapsed) => Err(PhaseError::new(ProbePhase::Timeout, elapsed)),
        }
    }

    async fn exchange<S>(
        &self,
        url: &str,
        method: &Method,
        tracer: &mut Tracer<'_, S>,
    ) -> Result<Exchange, PhaseError>
    where
        S: TraceSink + Send + ?Sized,
    {
        let url = Url::parse(url).map_err(|e| PhaseError::new(ProbePhase::Other, e))?;
        let https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(PhaseError::new(
                    ProbePhase::Other,
                    format!("unsupported scheme '{other}'"),
                ));
            }
        };
        let host = url
            .host()
            .ok_or_else(|| PhaseError::new(ProbePhase::Other, "url has no host"))?;
        let port = url
            .port_or_known_default()
            .unwrap_or(if https { 443 } else { 80 });

        tracer.mark(TraceEventKind::GetConn {
            host_port: format!("{host}:{port}"),
        });

        let addrs = self.resolve(&host, tracer).await?;
        let stream = connect(&addrs, port, tracer).await?;
        let remote_addr = stream.peer_addr().ok();

        if https {
            let server_name = match &host {
                Host::Domain(domain) => domain.to_string(),
                Host::Ipv4(ip) => ip.to_string(),
                Host::Ipv6(ip) => ip.to_string(),
            };
            let stream = self.handshake(&server_name, stream, tracer).await?;
            tracer.mark(TraceEventKind::GotConn {
                remote_addr,
                reused: false,
            });
            send_request(stream, &url, method, tracer).await
        } else {
            tracer.mark(TraceEventKind::GotConn {
                remote_addr,
                reused: false,
            });
            send_request(stream, &url, method, tracer).await
        }
    }

    async fn resolve<S>(
        &self,
        host: &Host<&str>,
        tracer: &mut Tracer<'_, S>,
    ) -> Result<Vec<IpAddr>, PhaseError>
    where
        S: TraceSink + Send + ?Sized,
    {
        let domain = match host {
            Host::Ipv4(ip) => return Ok(vec![IpAddr::V4(*ip)]),
            Host::Ipv6(ip) => return Ok(vec![IpAddr::V6(*ip)]),
            Host::Domain(domain) => *domain,
        };

        tracer.mark(TraceEventKind::DnsStart {
            host: domain.to_string(),
        });
        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) => {
                let addrs: Vec<IpAddr> = lookup.iter().collect();
                tracer.mark(TraceEventKind::DnsDone {
                    addrs: addrs.clone(),
                    error: None,
                });
                if addrs.is_empty() {
                    return Err(PhaseError::new(
                        ProbePhase::Dns,
                        format!("no addresses found for {domain}"),
                    ));
                }
                Ok(addrs)
            }
            Err(e) => {
                tracer.mark(TraceEventKind::DnsDone {
                    addrs: Vec::new(),
                    error: Some(e.to_string()),
                });
                Err(PhaseError::new(ProbePhase::Dns, e))
            }
        }
    }

    async fn handshake<S>(
        &self,
        server_name: &str,
        stream: TcpStream,
        tracer: &mut Tracer<'_, S>,
    ) -> Result<TlsStream<TcpStream>, PhaseError>
    where
        S: TraceSink + Send + ?Sized,
    {
        tracer.mark(TraceEventKind::TlsHandshakeStart);
        match self.connector.connect(server_name, stream).await {
            Ok(tls) => {
                let done_at = tracer.now();
                let cert_expires_at = cert_expiry(&tls);
                tracer.mark_at(
                    done_at,
                    TraceEventKind::TlsHandshakeDone {
                        cert_expires_at,
                        error: None,
                    },
                );
                Ok(tls)
            }
            Err(e) => {
                tracer.mark(TraceEventKind::TlsHandshakeDone {
                    cert_expires_at: None,
                    error: Some(e.to_string()),
                });
                Err(PhaseError::new(ProbePhase::Tls, e))
            }
        }
    }
}

#[async_trait]
impl Prober for TraceCollector {
    async fn probe(&self, task: &ProbeTask) -> Result<ProbeResult, ProbeError> {
        TraceCollector::probe(self, task).await
    }
}

/// Try each address in order; the first successful connect wins.
async fn connect<S>(
    addrs: &[IpAddr],
    port: u16,
    tracer: &mut Tracer<'_, S>,
) -> Result<TcpStream, PhaseError>
where
    S: TraceSink + Send + ?Sized,
{
    let mut last_error = None;
    for ip in addrs {
        let addr = SocketAddr::new(*ip, port);
        tracer.mark(TraceEventKind::ConnectStart {
            network: "tcp",
            addr,
        });
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracer.mark(TraceEventKind::ConnectDone {
                    network: "tcp",
                    addr,
                    error: None,
                });
                return Ok(stream);
            }
            Err(e) => {
                tracer.mark(TraceEventKind::ConnectDone {
                    network: "tcp",
                    addr,
                    error: Some(e.to_string()),
                });
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => PhaseError::new(ProbePhase::Connect, e),
        None => PhaseError::new(ProbePhase::Connect, "no addresses to connect to"),
    })
}

/// Not-after of the peer certificate, in unix seconds.
fn cert_expiry(stream: &TlsStream<TcpStream>) -> Option<i64> {
    let cert = stream.get_ref().peer_certificate().ok().flatten()?;
    let der = cert.to_der().ok()?;
    let (_, parsed) = parse_x509_certificate(&der).ok()?;
    Some(parsed.validity().not_after.timestamp())
}

/// Aborts the spawned connection task when the probe is done with it.
struct ConnectionDriver(JoinHandle<()>);

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn send_request<IO, S>(
    io: IO,
    url: &Url,
    method: &Method,
    tracer: &mut Tracer<'_, S>,
) -> Result<Exchange, PhaseError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: TraceSink + Send + ?Sized,
{
    let io = TimedIo::new(io, tracer.tap());
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| PhaseError::new(ProbePhase::Other, e))?;
    let _driver = ConnectionDriver(tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::debug!("Probe connection closed with error: {e}");
        }
    }));

    let request = build_request(url, method, tracer)?;
    for (name, value) in request.headers() {
        tracer.mark(TraceEventKind::WroteHeaderField {
            name: name.as_str().to_string(),
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        });
    }

    let response = sender.send_request(request).await;
    tracer.drain();
    let response = response.map_err(|e| PhaseError::new(ProbePhase::Other, e))?;
    let finish_time = tracer.now();
    let status_code = response.status().as_u16();

    let body = read_body(response.into_body(), MAX_RETAINED_BODY).await;
    tracer.drain();
    let (content_length, body) = body.map_err(|e| PhaseError::new(ProbePhase::Other, e))?;

    Ok(Exchange {
        // Stamped by `probe_into`.
        start_time: 0,
        finish_time,
        status_code,
        content_length,
        body,
    })
}

/// Drain `body`, counting every data byte and keeping at most `limit` of them.
async fn read_body(mut body: Incoming, limit: usize) -> Result<(u64, Bytes), hyper::Error> {
    let mut received = 0u64;
    let mut kept = BytesMut::new();
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            received += data.len() as u64;
            let room = limit.saturating_sub(kept.len());
            kept.extend_from_slice(&data[..data.len().min(room)]);
        }
    }
    Ok((received, kept.freeze()))
}

fn build_request<S>(
    url: &Url,
    method: &Method,
    tracer: &Tracer<'_, S>,
) -> Result<Request<Empty<Bytes>>, PhaseError>
where
    S: TraceSink + Send + ?Sized,
{
    let authority = &url[Position::BeforeHost..Position::AfterPort];
    let path_and_query = &url[Position::BeforePath..Position::AfterQuery];

    let mut request = Request::builder()
        .method(method.clone())
        .uri(path_and_query)
        .header(header::HOST, authority)
        .header(header::USER_AGENT, USER_AGENT)
        .header(header::ACCEPT, "*/*")
        .body(Empty::<Bytes>::new())
        .map_err(|e| PhaseError::new(ProbePhase::Other, e))?;

    let tap = tracer.tap();
    hyper::ext::on_informational(&mut request, move |response| {
        tap.emit(TraceEventKind::Got1xxResponse {
            code: response.status().as_u16(),
        });
    });

    Ok(request)
}
