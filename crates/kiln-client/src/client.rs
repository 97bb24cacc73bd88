//! Engine client construction and control-plane calls

use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use kiln_proto::engine_client::EngineClient;
use kiln_proto::{InfoRequest, InfoResponse, ListWorkersRequest, Worker};
use opentelemetry::global::{BoxedTracer, GlobalTracerProvider};
use opentelemetry::trace::TracerProvider as _;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::debug;

use crate::addr::EngineAddr;
use crate::error::ClientError;
use crate::trace::{CallSpan, TraceDelegate};

/// Placeholder authority for unix socket channels; the connector ignores it.
const UNIX_AUTHORITY: &str = "http://kilnd.sock";

/// Tracer instrumentation scope for client spans.
const TRACER_NAME: &str = "kiln-client";

/// Options applied when constructing a [`KilnClient`].
#[derive(Clone)]
pub struct ClientOpts {
    fail_fast: bool,
    connect_timeout: Duration,
    tracer_provider: Option<GlobalTracerProvider>,
    trace_delegate: Option<Arc<dyn TraceDelegate>>,
}

impl ClientOpts {
    pub fn new() -> Self {
        Self {
            fail_fast: false,
            connect_timeout: Duration::from_secs(10),
            tracer_provider: None,
            trace_delegate: None,
        }
    }

    /// Establish the transport eagerly so connection failures surface at
    /// construction instead of on the first call.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Cap on transport establishment time.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Tracer provider client spans are created from.
    pub fn tracer_provider(mut self, provider: GlobalTracerProvider) -> Self {
        self.tracer_provider = Some(provider);
        self
    }

    /// Sink for completed RPC spans.
    pub fn trace_delegate(mut self, delegate: Arc<dyn TraceDelegate>) -> Self {
        self.trace_delegate = Some(delegate);
        self
    }
}

impl Default for ClientOpts {
    fn default() -> Self {
        Self::new()
    }
}

/// Client handle for a kilnd build engine.
///
/// Cloning is cheap; clones share the underlying channel.
#[derive(Clone)]
pub struct KilnClient {
    inner: EngineClient<Channel>,
    tracer: Option<Arc<BoxedTracer>>,
    delegate: Option<Arc<dyn TraceDelegate>>,
}

impl KilnClient {
    /// Connect to an engine address with no options.
    ///
    /// The channel is lazy: no I/O happens until the first call, and only
    /// an unparseable address fails here. The channel still spawns its
    /// background task at construction, so call this inside a runtime.
    pub fn connect(addr: &str) -> Result<Self, ClientError> {
        let parsed = EngineAddr::parse(addr)?;
        debug!(addr = %parsed, "creating lazy engine channel");
        Ok(Self {
            inner: EngineClient::new(lazy_channel(&parsed, None)),
            tracer: None,
            delegate: None,
        })
    }

    /// Connect to an engine address with explicit options.
    pub async fn connect_with(addr: &str, opts: ClientOpts) -> Result<Self, ClientError> {
        let parsed = EngineAddr::parse(addr)?;
        let channel = if opts.fail_fast {
            debug!(addr = %parsed, "establishing engine channel");
            eager_channel(&parsed, opts.connect_timeout).await?
        } else {
            debug!(addr = %parsed, "creating lazy engine channel");
            lazy_channel(&parsed, Some(opts.connect_timeout))
        };
        let tracer = opts
            .tracer_provider
            .map(|provider| Arc::new(provider.tracer(TRACER_NAME)));
        Ok(Self {
            inner: EngineClient::new(channel),
            tracer,
            delegate: opts.trace_delegate,
        })
    }

    /// List the workers the engine can schedule builds onto.
    pub async fn list_workers(&self) -> Result<Vec<Worker>, ClientError> {
        let call = CallSpan::start(self.tracer.as_deref(), "kilnd.Engine/ListWorkers");
        let mut request = tonic::Request::new(ListWorkersRequest { filter: vec![] });
        call.annotate(request.metadata_mut());

        let result = self.inner.clone().list_workers(request).await;
        call.finish(self.delegate.as_deref(), result.is_ok());
        Ok(result?.into_inner().workers)
    }

    /// Report the engine's build information.
    pub async fn info(&self) -> Result<InfoResponse, ClientError> {
        let call = CallSpan::start(self.tracer.as_deref(), "kilnd.Engine/Info");
        let mut request = tonic::Request::new(InfoRequest {});
        call.annotate(request.metadata_mut());

        let result = self.inner.clone().info(request).await;
        call.finish(self.delegate.as_deref(), result.is_ok());
        Ok(result?.into_inner())
    }

    /// Whether a trace delegate was attached at construction.
    pub fn has_trace_delegate(&self) -> bool {
        self.delegate.is_some()
    }
}

// The channel and tracer types have no Debug impls of their own
impl std::fmt::Debug for KilnClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KilnClient")
            .field("tracer", &self.tracer.is_some())
            .field("delegate", &self.delegate.is_some())
            .finish_non_exhaustive()
    }
}

fn lazy_channel(addr: &EngineAddr, connect_timeout: Option<Duration>) -> Channel {
    match addr {
        EngineAddr::Http(uri) => {
            let mut endpoint = Endpoint::from(uri.clone());
            if let Some(timeout) = connect_timeout {
                endpoint = endpoint.connect_timeout(timeout);
            }
            endpoint.connect_lazy()
        }
        EngineAddr::Unix(path) => {
            let mut endpoint = Endpoint::from_static(UNIX_AUTHORITY);
            if let Some(timeout) = connect_timeout {
                endpoint = endpoint.connect_timeout(timeout);
            }
            let path = path.clone();
            endpoint.connect_with_connector_lazy(service_fn(move |_: Uri| {
                let path = path.clone();
                async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
            }))
        }
    }
}

async fn eager_channel(addr: &EngineAddr, connect_timeout: Duration) -> Result<Channel, ClientError> {
    let channel = match addr {
        EngineAddr::Http(uri) => {
            Endpoint::from(uri.clone())
                .connect_timeout(connect_timeout)
                .connect()
                .await?
        }
        EngineAddr::Unix(path) => {
            let path = path.clone();
            Endpoint::from_static(UNIX_AUTHORITY)
                .connect_timeout(connect_timeout)
                .connect_with_connector(service_fn(move |_: Uri| {
                    let path = path.clone();
                    async move {
                        Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?))
                    }
                }))
                .await?
        }
    };
    Ok(channel)
}
