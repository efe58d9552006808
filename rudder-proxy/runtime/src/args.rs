use crate::admin::{self, Readiness};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use rudder_proxy_core::{
    ManifestMutator, SharedSidecarConfig, SidecarSource, DEFAULT_SKIP_ANNOTATION,
};
use rudder_proxy_grpc::{metrics::GrpcServerMetricsFamily, ReleaseModuleProxy};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    signal::unix::{signal, SignalKind},
    time::Duration,
};
use tonic::transport::{Channel, Endpoint, Server};
use tracing::{info, info_span, instrument, warn, Instrument};

const RUDDER_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[clap(
    name = "rudder-proxy",
    about = "Injects a sidecar into Helm releases on their way to Rudder",
    version
)]
pub struct Args {
    #[clap(long, default_value = "rudder_proxy=info,warn", env = "RUDDER_PROXY_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain", env = "RUDDER_PROXY_LOG_FORMAT")]
    log_format: kubert::LogFormat,

    /// Address on which the release module API is served.
    #[clap(long, default_value = "0.0.0.0:8989", env = "RUDDER_PROXY_LISTEN")]
    listen: SocketAddr,

    /// Address on which readiness, liveness and metrics are served.
    #[clap(long, default_value = "0.0.0.0:9990", env = "RUDDER_PROXY_ADMIN_ADDR")]
    admin_addr: SocketAddr,

    /// URL of the Rudder release module that calls are forwarded to.
    #[clap(long, default_value = "http://localhost:8788", env = "RUDDER_PROXY_RUDDER")]
    rudder: String,

    /// Documents carrying this annotation are passed through untouched.
    #[clap(
        long,
        default_value = DEFAULT_SKIP_ANNOTATION,
        env = "RUDDER_PROXY_SKIP_ANNOTATION"
    )]
    skip_annotation: String,

    /// YAML file holding the sidecar container definition.
    #[clap(long, env = "RUDDER_PROXY_SIDECAR_CONTAINER")]
    sidecar_container: PathBuf,

    /// YAML file holding the annotations added to each mutated pod template.
    #[clap(long, env = "RUDDER_PROXY_SIDECAR_ANNOTATIONS")]
    sidecar_annotations: PathBuf,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            listen,
            admin_addr,
            rudder,
            skip_annotation,
            sidecar_container,
            sidecar_annotations,
        } = self;

        log_format.try_init(log_level)?;

        let source = SidecarSource::new(sidecar_container, sidecar_annotations);
        let config = SharedSidecarConfig::default();
        config
            .load(&source)
            .context("failed to load sidecar configuration")?;

        let (shutdown, drain) = kubert::shutdown::sigint_or_sigterm()?;
        spawn_reload(config.clone(), source)?;

        let client = connect(&rudder).await?;

        let mut prom = <Registry>::default();
        let metrics =
            GrpcServerMetricsFamily::register(prom.sub_registry_with_prefix("grpc_server"));

        let readiness = Readiness::new(config.clone());
        tokio::spawn(admin::serve(
            admin_addr,
            readiness.clone(),
            Arc::new(prom),
            drain.clone(),
        ));

        let mutator = Arc::new(ManifestMutator::new(skip_annotation, config));
        let proxy = ReleaseModuleProxy::new(client, mutator, metrics);
        tokio::spawn(grpc(listen, proxy, readiness, drain));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if shutdown.signaled().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Connects to Rudder eagerly so that a misconfigured address fails startup.
#[instrument(skip_all, fields(%rudder))]
async fn connect(rudder: &str) -> Result<Channel> {
    let endpoint = Endpoint::from_shared(rudder.to_string())
        .with_context(|| format!("invalid Rudder address: {rudder}"))?
        .connect_timeout(RUDDER_CONNECT_TIMEOUT);
    let channel = endpoint
        .connect()
        .await
        .with_context(|| format!("failed to connect to Rudder at {rudder}"))?;
    info!("Connected to Rudder");
    Ok(channel)
}

/// Re-reads the sidecar configuration whenever the process receives SIGHUP.
///
/// A failed reload leaves the previous configuration in force.
fn spawn_reload(config: SharedSidecarConfig, source: SidecarSource) -> Result<()> {
    let mut hangups =
        signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?;

    tokio::spawn(
        async move {
            while hangups.recv().await.is_some() {
                reload(&config, &source).await;
            }
        }
        .instrument(info_span!("reload")),
    );

    Ok(())
}

/// Re-reads the sidecar files off the runtime's worker threads.
async fn reload(config: &SharedSidecarConfig, source: &SidecarSource) {
    let (config, source) = (config.clone(), source.clone());
    match tokio::task::spawn_blocking(move || config.load(&source)).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(%error, "Keeping previous sidecar configuration"),
        Err(error) => warn!(%error, "Sidecar configuration reload panicked"),
    }
}

#[instrument(skip_all, fields(port = %addr.port()))]
async fn grpc(
    addr: SocketAddr,
    proxy: ReleaseModuleProxy<ManifestMutator>,
    readiness: Readiness,
    drain: kubert::shutdown::Watch,
) -> Result<()> {
    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::pin! {
        let srv = Server::builder().add_service(proxy).serve_with_shutdown(addr, async move {
            let _ = close_rx.await;
        });
    }

    info!(%addr, "release module gRPC server listening");
    readiness.set_serving(true);
    let res = tokio::select! {
        res = (&mut srv) => res.map_err(Into::into),
        handle = drain.signaled() => {
            readiness.set_serving(false);
            let _ = close_tx.send(());
            handle.release_after(srv).await.map_err(Into::into)
        }
    };
    if let Err(error) = &res {
        tracing::error!(%error, "gRPC server failed");
    }
    res
}
