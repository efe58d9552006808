use crate::{
    metrics::{GrpcServerMetricsFamily, GrpcServerRPCMetrics},
    release, Method, RawCodec, SERVICE,
};
use bytes::Bytes;
use rudder_proxy_core::MutateManifest;
use std::{
    convert::Infallible,
    sync::Arc,
    task::{Context, Poll},
};
use tonic::{
    codegen::{http, Body, BoxFuture, StdError},
    server::{NamedService, UnaryService},
    transport::Channel,
    Request, Response, Status,
};
use tracing::{debug, info_span, Instrument};

/// Helm's release module accepts messages up to 20MiB, so the proxy does too.
const MAX_MESSAGE_SIZE: usize = 20 * 1024 * 1024;

/// Serves the release module API by forwarding every call to Rudder.
///
/// `InstallRelease` requests have their manifest rewritten by `M` on the way through; all
/// other calls are forwarded untouched.
#[derive(Debug)]
pub struct ReleaseModuleProxy<M> {
    client: Channel,
    mutator: Arc<M>,
    metrics: GrpcServerMetricsFamily,
}

/// A single proxied RPC.
struct Forward<M> {
    method: Method,
    client: Channel,
    mutator: Arc<M>,
    metrics: GrpcServerMetricsFamily,
    rpc: GrpcServerRPCMetrics,
}

/// Rewrites the manifest carried by an encoded `InstallReleaseRequest`.
pub fn mutate_install<M>(mutator: &M, message: &[u8]) -> Result<Bytes, Status>
where
    M: MutateManifest + ?Sized,
{
    release::map_manifest(message, |manifest| mutator.mutate_manifest(manifest)).map_err(
        |error| {
            tracing::warn!(%error, "Failed to mutate release manifest");
            Status::from(error)
        },
    )
}

// === impl ReleaseModuleProxy ===

impl<M> ReleaseModuleProxy<M> {
    pub fn new(client: Channel, mutator: Arc<M>, metrics: GrpcServerMetricsFamily) -> Self {
        Self {
            client,
            mutator,
            metrics,
        }
    }
}

impl<M> Clone for ReleaseModuleProxy<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            mutator: self.mutator.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<M> NamedService for ReleaseModuleProxy<M> {
    const NAME: &'static str = SERVICE;
}

impl<M, B> tower::Service<http::Request<B>> for ReleaseModuleProxy<M>
where
    M: MutateManifest + Send + Sync + 'static,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let method = match Method::from_path(req.uri().path()) {
            Some(method) => method,
            None => {
                debug!(path = %req.uri().path(), "Unknown method");
                return Box::pin(async move { Ok(unimplemented()) });
            }
        };

        let forward = Forward {
            method,
            client: self.client.clone(),
            mutator: self.mutator.clone(),
            metrics: self.metrics.clone(),
            rpc: self.metrics.unary_rpc(method),
        };
        Box::pin(
            async move {
                let mut grpc = tonic::server::Grpc::new(RawCodec)
                    .max_decoding_message_size(MAX_MESSAGE_SIZE)
                    .max_encoding_message_size(MAX_MESSAGE_SIZE);
                Ok(grpc.unary(forward, req).await)
            }
            .instrument(info_span!("rpc", %method)),
        )
    }
}

fn unimplemented() -> http::Response<tonic::body::Body> {
    let mut rsp = http::Response::new(tonic::body::Body::empty());
    let headers = rsp.headers_mut();
    headers.insert(
        Status::GRPC_STATUS,
        (tonic::Code::Unimplemented as i32).into(),
    );
    headers.insert(
        http::header::CONTENT_TYPE,
        tonic::metadata::GRPC_CONTENT_TYPE,
    );
    rsp
}

// === impl Forward ===

impl<M> UnaryService<Bytes> for Forward<M>
where
    M: MutateManifest + Send + Sync + 'static,
{
    type Response = Bytes;
    type Future = BoxFuture<Response<Bytes>, Status>;

    fn call(&mut self, req: Request<Bytes>) -> Self::Future {
        let method = self.method;
        let client = self.client.clone();
        let mutator = self.mutator.clone();
        let metrics = self.metrics.clone();
        let rpc = self.rpc.clone();

        Box::pin(async move {
            let rsp = rpc.start();
            let (metadata, extensions, mut message) = req.into_parts();

            if method == Method::InstallRelease {
                match mutate_install(&*mutator, &message) {
                    Ok(mutated) => {
                        metrics.manifest_mutated(true);
                        message = mutated;
                    }
                    Err(status) => {
                        metrics.manifest_mutated(false);
                        rsp.end(status.code());
                        return Err(status);
                    }
                }
            }

            let mut grpc = tonic::client::Grpc::new(client)
                .max_decoding_message_size(MAX_MESSAGE_SIZE)
                .max_encoding_message_size(MAX_MESSAGE_SIZE);
            let result = async {
                grpc.ready()
                    .await
                    .map_err(|e| Status::unavailable(format!("Rudder is not ready: {e}")))?;
                grpc.unary(
                    Request::from_parts(metadata, extensions, message),
                    method.path(),
                    RawCodec,
                )
                .await
            }
            .await;

            match result {
                Ok(reply) => {
                    rsp.msg_sent();
                    rsp.end(tonic::Code::Ok);
                    Ok(reply)
                }
                Err(status) => {
                    debug!(code = ?status.code(), message = %status.message(), "Rudder failed");
                    rsp.end(status.code());
                    Err(status)
                }
            }
        })
    }
}
