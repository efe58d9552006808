use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use prometheus_client::registry::Registry;
use rudder_proxy_core::SharedSidecarConfig;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};

/// The proxy is ready once a sidecar configuration is loaded and the gRPC server is accepting
/// calls.
#[derive(Clone, Debug)]
pub(crate) struct Readiness {
    config: SharedSidecarConfig,
    serving: Arc<AtomicBool>,
}

// === impl Readiness ===

impl Readiness {
    pub(crate) fn new(config: SharedSidecarConfig) -> Self {
        Self {
            config,
            serving: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::Release);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.serving.load(Ordering::Acquire) && self.config.is_loaded()
    }
}

#[instrument(skip_all, fields(%addr))]
pub(crate) async fn serve(
    addr: SocketAddr,
    readiness: Readiness,
    registry: Arc<Registry>,
    drain: kubert::shutdown::Watch,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|error| {
        tracing::error!(%error, "Failed to bind admin server");
        error
    })?;
    info!("HTTP admin server listening");

    let accept = async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "Failed to accept admin connection");
                    continue;
                }
            };

            let readiness = readiness.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let rsp = handle(&readiness, &registry, &req);
                    async move { Ok::<_, std::convert::Infallible>(rsp) }
                });
                if let Err(error) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(%peer, %error, "Admin connection failed");
                }
            });
        }
    };

    tokio::select! {
        _ = accept => {}
        _ = drain.signaled() => debug!("Admin server shutting down"),
    }
    Ok(())
}

fn handle<B>(
    readiness: &Readiness,
    registry: &Registry,
    req: &Request<B>,
) -> Response<Full<Bytes>> {
    if !matches!(*req.method(), Method::GET | Method::HEAD) {
        return respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new());
    }

    match req.uri().path() {
        "/live" => respond(StatusCode::OK, Bytes::from_static(b"live\n")),
        "/ready" if readiness.is_ready() => {
            respond(StatusCode::OK, Bytes::from_static(b"ready\n"))
        }
        "/ready" => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            Bytes::from_static(b"not ready\n"),
        ),
        "/metrics" => {
            let mut text = String::new();
            if let Err(error) = prometheus_client::encoding::text::encode(&mut text, registry) {
                warn!(%error, "Failed to encode metrics");
                return respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new());
            }
            respond(StatusCode::OK, Bytes::from(text))
        }
        _ => respond(StatusCode::NOT_FOUND, Bytes::new()),
    }
}

fn respond(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut rsp = Response::new(Full::new(body));
    *rsp.status_mut() = status;
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain"),
    );
    rsp
}
