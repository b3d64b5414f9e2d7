use std::convert::Infallible;

use hyper::header::{CONNECTION, UPGRADE};
use hyper::upgrade::Upgraded;
use hyper::{Body, Client, Request, Response, StatusCode};
use tokio::io::AsyncWriteExt;

pub const PROXY_PREFIX: &str = "/docker.proxy";

fn wants_upgrade(req: &Request<Body>) -> bool {
    req.headers().get(UPGRADE).is_some()
        || req
            .headers()
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_lowercase().contains("upgrade"))
            .unwrap_or(false)
}

fn strip_prefix(path: &str) -> String {
    let stripped = path.strip_prefix(PROXY_PREFIX).unwrap_or(path);
    if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    }
}

/// Reverse-proxies requests under `/docker.proxy/*` to the local
/// container runtime's Unix socket. Upgrade requests (exec/attach) are
/// hijacked: the client connection is bridged directly to the runtime
/// socket with a raw bidirectional byte copy instead of being decoded at
/// the HTTP layer.
pub async fn handle(req: Request<Body>, docker_socket: String) -> Result<Response<Body>, Infallible> {
    let path = strip_prefix(req.uri().path());
    let path_and_query = match req.uri().query() {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };
    let is_upgrade = wants_upgrade(&req);

    let (parts, body) = req.into_parts();

    let forward = Request::builder()
        .method(parts.method.clone())
        .uri(path_and_query);
    let mut forward = forward.body(body).unwrap();
    *forward.headers_mut() = parts.headers.clone();

    let client = Client::builder().build::<_, Body>(UnixConnector::new(docker_socket.clone()));
    let response = match client.request(forward).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "proxying to container runtime socket failed");
            return Ok(bad_gateway());
        }
    };

    if !is_upgrade || response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Ok(response);
    }

    let client_req = Request::from_parts(parts, Body::empty());
    let docker_socket = docker_socket.clone();
    tokio::spawn(async move {
        match (hyper::upgrade::on(client_req).await, connect_socket(&docker_socket).await) {
            (Ok(client_upgraded), Ok(upstream)) => {
                if let Err(e) = bridge(client_upgraded, upstream).await {
                    tracing::debug!(error = %e, "hijacked stream ended");
                }
            }
            (Err(e), _) => tracing::warn!(error = %e, "client upgrade negotiation failed"),
            (_, Err(e)) => tracing::warn!(error = %e, "could not dial runtime socket for hijack"),
        }
    });

    Ok(response)
}

async fn connect_socket(path: &str) -> std::io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(path).await
}

fn bad_gateway() -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Body::empty())
        .unwrap()
}

/// Bidirectional byte copy between the hijacked client connection and the
/// runtime socket, half-closing the opposite direction on EOF so neither
/// side hangs once the other is done.
async fn bridge(mut client: Upgraded, mut upstream: tokio::net::UnixStream) -> std::io::Result<()> {
    let (mut cr, mut cw) = tokio::io::split(&mut client);
    let (mut ur, mut uw) = upstream.split();

    let client_to_upstream = async {
        let result = tokio::io::copy(&mut cr, &mut uw).await;
        let _ = uw.shutdown().await;
        result
    };
    let upstream_to_client = async {
        let result = tokio::io::copy(&mut ur, &mut cw).await;
        let _ = cw.shutdown().await;
        result
    };

    match tokio::try_join!(client_to_upstream, upstream_to_client) {
        Ok(_) => Ok(()),
        Err(e) if is_benign_close(&e) => Ok(()),
        Err(e) => Err(e),
    }
}

fn is_benign_close(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::UnexpectedEof
    )
}

/// A `hyper::client::connect::Connect` that always dials the one runtime
/// Unix socket path it was built with, ignoring the URI's authority.
#[derive(Clone)]
struct UnixConnector {
    socket_path: String,
}

impl UnixConnector {
    fn new(socket_path: String) -> Self {
        Self { socket_path }
    }
}

/// Wraps the raw Unix stream so it satisfies `hyper::client::connect::Connection`,
/// which the blanket `Connect` impl requires of a `Service<Uri>::Response`.
struct UnixStreamConnection(tokio::net::UnixStream);

impl hyper::client::connect::Connection for UnixStreamConnection {
    fn connected(&self) -> hyper::client::connect::Connected {
        hyper::client::connect::Connected::new()
    }
}

impl tokio::io::AsyncRead for UnixStreamConnection {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        tokio::io::AsyncRead::poll_read(std::pin::Pin::new(&mut self.get_mut().0), cx, buf)
    }
}

impl tokio::io::AsyncWrite for UnixStreamConnection {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        tokio::io::AsyncWrite::poll_write(std::pin::Pin::new(&mut self.get_mut().0), cx, buf)
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        tokio::io::AsyncWrite::poll_flush(std::pin::Pin::new(&mut self.get_mut().0), cx)
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        tokio::io::AsyncWrite::poll_shutdown(std::pin::Pin::new(&mut self.get_mut().0), cx)
    }
}

impl hyper::service::Service<hyper::Uri> for UnixConnector {
    type Response = UnixStreamConnection;
    type Error = std::io::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: hyper::Uri) -> Self::Future {
        let path = self.socket_path.clone();
        Box::pin(async move { tokio::net::UnixStream::connect(path).await.map(UnixStreamConnection) })
    }
}
