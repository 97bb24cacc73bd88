//! Trace exporter detection and span export
//!
//! Engine connections always run with the ambient tracer provider; what
//! else happens to spans depends on the environment. `KILN_TRACE` selects
//! an exporter, and exporters that can ingest client-side spans expose a
//! [`TraceDelegate`] that gets attached to the engine client. Detection
//! problems abort the connection rather than silently running untraced.

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use opentelemetry::trace::{Span, SpanKind, Status, TracerProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use kiln_client::{SpanRecord, TraceDelegate};

/// Environment variable selecting the trace exporter.
pub const TRACE_ENV: &str = "KILN_TRACE";

/// Standard OTLP endpoint override, honored when `KILN_TRACE=otlp`.
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

const DEFAULT_OTLP_ENDPOINT: &str = "http://127.0.0.1:4317";

/// Span records queued towards the OTLP pipeline before new ones drop.
const DELEGATE_QUEUE: usize = 256;

/// Failure while detecting or constructing a trace exporter.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("unknown trace exporter {name:?} (expected \"console\", \"otlp\" or an endpoint URL)")]
    UnknownExporter { name: String },

    #[error("invalid trace endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to initialize trace exporter: {0}")]
    ExporterInit(String),
}

/// Detects the configured trace exporter, if any.
///
/// Consulted once per connection attempt, after the engine is ready.
/// Finding nothing configured is the normal quiet outcome; an actual
/// detection failure is fatal to the connection.
pub trait ExporterDetect: Send + Sync {
    /// The configured exporter, `None` when tracing is not configured.
    fn exporter(&self) -> Result<Option<Arc<dyn TraceExporter>>, TelemetryError>;
}

/// A detected trace exporter.
///
/// Exporters able to ingest spans handed over by an engine client also
/// expose a [`TraceDelegate`]; plain exporters leave the default `None`.
pub trait TraceExporter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// The span hand-off capability, when this exporter has one.
    fn tracer_delegate(self: Arc<Self>) -> Option<Arc<dyn TraceDelegate>> {
        None
    }
}

/// Resolve the optional tracer delegate for the current environment.
///
/// Detection errors propagate. An exporter without the hand-off
/// capability is not an error, just an absent delegate.
pub fn detect_tracer_delegate(
    detect: &dyn ExporterDetect,
) -> Result<Option<Arc<dyn TraceDelegate>>, TelemetryError> {
    match detect.exporter()? {
        Some(exporter) => {
            debug!(exporter = exporter.name(), "trace exporter detected");
            Ok(exporter.tracer_delegate())
        }
        None => Ok(None),
    }
}

/// [`ExporterDetect`] driven by process environment.
///
/// `KILN_TRACE` unset or empty disables tracing. `console` keeps spans in
/// local log output. `otlp` exports over OTLP to `OTEL_EXPORTER_OTLP_ENDPOINT`
/// (default `http://127.0.0.1:4317`), and a literal `http(s)://` value
/// exports straight to that endpoint. Anything else is a configuration
/// error.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvDetect;

impl ExporterDetect for EnvDetect {
    fn exporter(&self) -> Result<Option<Arc<dyn TraceExporter>>, TelemetryError> {
        let selected = match env::var(TRACE_ENV) {
            Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => return Ok(None),
        };

        match selected.as_str() {
            "console" => Ok(Some(Arc::new(ConsoleExporter))),
            "otlp" => {
                let endpoint = env::var(OTLP_ENDPOINT_ENV)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());
                Ok(Some(Arc::new(OtlpExporter::new(&endpoint)?)))
            }
            other if other.contains("://") => Ok(Some(Arc::new(OtlpExporter::new(other)?))),
            other => Err(TelemetryError::UnknownExporter {
                name: other.to_string(),
            }),
        }
    }
}

/// Exporter that keeps spans in local log output.
///
/// Spans already reach the console through the fmt subscriber, so there
/// is nothing to hand over and no delegate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleExporter;

impl TraceExporter for ConsoleExporter {
    fn name(&self) -> &'static str {
        "console"
    }
}

/// OTLP exporter wired through the tokio batch pipeline.
///
/// Carries the hand-off capability: spans offered by an engine client are
/// queued and re-emitted through an OTLP tracer.
pub struct OtlpExporter {
    endpoint: String,
    delegate: Arc<OtlpDelegate>,
}

impl OtlpExporter {
    /// Build the OTLP pipeline for `endpoint`.
    ///
    /// Must run inside a tokio runtime; the batch exporter spawns its
    /// worker task there.
    pub fn new(endpoint: &str) -> Result<Self, TelemetryError> {
        let parsed = url::Url::parse(endpoint).map_err(|e| TelemetryError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TelemetryError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::ExporterInit(e.to_string()))?;

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(Resource::new([KeyValue::new("service.name", "kiln")]))
            .build();

        Ok(Self {
            endpoint: endpoint.to_string(),
            delegate: Arc::new(OtlpDelegate::spawn(provider)),
        })
    }

    /// Endpoint spans are exported to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Records dropped because the hand-off queue was full.
    pub fn dropped_spans(&self) -> u64 {
        self.delegate.dropped()
    }
}

impl TraceExporter for OtlpExporter {
    fn name(&self) -> &'static str {
        "otlp"
    }

    fn tracer_delegate(self: Arc<Self>) -> Option<Arc<dyn TraceDelegate>> {
        Some(self.delegate.clone() as Arc<dyn TraceDelegate>)
    }
}

/// Bounded hand-off between client span records and the OTLP pipeline.
/// `offer_span` never blocks the RPC path; overflow drops the record and
/// counts it.
struct OtlpDelegate {
    tx: mpsc::Sender<SpanRecord>,
    dropped: AtomicU64,
}

impl OtlpDelegate {
    fn spawn(provider: TracerProvider) -> Self {
        let (tx, rx) = mpsc::channel(DELEGATE_QUEUE);
        tokio::spawn(forward_spans(provider, rx));
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    fn with_sender(tx: mpsc::Sender<SpanRecord>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TraceDelegate for OtlpDelegate {
    fn offer_span(&self, span: SpanRecord) {
        if self.tx.try_send(span).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, "trace hand-off queue is full, span dropped");
        }
    }
}

async fn forward_spans(provider: TracerProvider, mut rx: mpsc::Receiver<SpanRecord>) {
    let tracer = provider.tracer("kiln");
    while let Some(record) = rx.recv().await {
        emit_span(&tracer, record);
    }
    for result in provider.force_flush() {
        if let Err(err) = result {
            debug!(error = %err, "trace flush on shutdown failed");
        }
    }
}

/// Re-emit one client span record through the OTLP tracer, preserving
/// its original timing.
fn emit_span(tracer: &opentelemetry_sdk::trace::Tracer, record: SpanRecord) {
    use opentelemetry::trace::Tracer as _;

    let mut span = tracer
        .span_builder(record.name.clone())
        .with_kind(SpanKind::Client)
        .with_start_time(record.started_at)
        .start(tracer);
    span.set_attribute(KeyValue::new("rpc.system", "grpc"));
    if !record.trace_id.is_empty() {
        span.set_attribute(KeyValue::new("kiln.client.trace_id", record.trace_id));
        span.set_attribute(KeyValue::new("kiln.client.span_id", record.span_id));
    }
    if !record.ok {
        span.set_status(Status::error("rpc failed"));
    }
    span.end_with_timestamp(record.started_at + record.duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    // Env-var tests share process state; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct FixedDetect(Option<Arc<dyn TraceExporter>>);

    impl ExporterDetect for FixedDetect {
        fn exporter(&self) -> Result<Option<Arc<dyn TraceExporter>>, TelemetryError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetect;

    impl ExporterDetect for FailingDetect {
        fn exporter(&self) -> Result<Option<Arc<dyn TraceExporter>>, TelemetryError> {
            Err(TelemetryError::UnknownExporter {
                name: "broken".to_string(),
            })
        }
    }

    struct NullDelegate;

    impl TraceDelegate for NullDelegate {
        fn offer_span(&self, _span: SpanRecord) {}
    }

    struct DelegatingExporter;

    impl TraceExporter for DelegatingExporter {
        fn name(&self) -> &'static str {
            "delegating"
        }

        fn tracer_delegate(self: Arc<Self>) -> Option<Arc<dyn TraceDelegate>> {
            Some(Arc::new(NullDelegate))
        }
    }

    fn record() -> SpanRecord {
        SpanRecord {
            trace_id: String::new(),
            span_id: String::new(),
            name: "kilnd.Engine/ListWorkers".to_string(),
            started_at: SystemTime::now(),
            duration: Duration::from_millis(2),
            ok: true,
        }
    }

    #[test]
    fn no_exporter_means_no_delegate() {
        let delegate = detect_tracer_delegate(&FixedDetect(None)).unwrap();
        assert!(delegate.is_none());
    }

    #[test]
    fn plain_exporter_yields_no_delegate() {
        let detect = FixedDetect(Some(Arc::new(ConsoleExporter)));
        assert!(detect_tracer_delegate(&detect).unwrap().is_none());
    }

    #[test]
    fn capable_exporter_yields_a_delegate() {
        let detect = FixedDetect(Some(Arc::new(DelegatingExporter)));
        assert!(detect_tracer_delegate(&detect).unwrap().is_some());
    }

    #[test]
    fn detection_failure_propagates() {
        assert!(matches!(
            detect_tracer_delegate(&FailingDetect),
            Err(TelemetryError::UnknownExporter { .. })
        ));
    }

    #[test]
    fn env_unset_detects_nothing() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var(TRACE_ENV);
        assert!(EnvDetect.exporter().unwrap().is_none());
    }

    #[test]
    fn env_blank_detects_nothing() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(TRACE_ENV, "   ");
        assert!(EnvDetect.exporter().unwrap().is_none());
        env::remove_var(TRACE_ENV);
    }

    #[test]
    fn env_console_selects_the_console_exporter() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(TRACE_ENV, "console");
        let exporter = EnvDetect.exporter().unwrap().unwrap();
        assert_eq!(exporter.name(), "console");
        assert!(exporter.tracer_delegate().is_none());
        env::remove_var(TRACE_ENV);
    }

    #[test]
    fn env_unknown_exporter_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(TRACE_ENV, "jaeger-classic");
        assert!(matches!(
            EnvDetect.exporter(),
            Err(TelemetryError::UnknownExporter { .. })
        ));
        env::remove_var(TRACE_ENV);
    }

    #[tokio::test]
    async fn env_otlp_selects_the_otlp_exporter() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(TRACE_ENV, "otlp");
        env::remove_var(OTLP_ENDPOINT_ENV);
        let exporter = EnvDetect.exporter().unwrap().unwrap();
        assert_eq!(exporter.name(), "otlp");
        assert!(exporter.tracer_delegate().is_some());
        env::remove_var(TRACE_ENV);
    }

    #[tokio::test]
    async fn env_endpoint_url_selects_otlp_directly() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var(TRACE_ENV, "http://collector.internal:4317");
        let exporter = EnvDetect.exporter().unwrap().unwrap();
        assert_eq!(exporter.name(), "otlp");
        env::remove_var(TRACE_ENV);
    }

    #[tokio::test]
    async fn otlp_exporter_reports_its_endpoint() {
        let exporter = OtlpExporter::new("http://collector.internal:4317").unwrap();
        assert_eq!(exporter.endpoint(), "http://collector.internal:4317");
        assert_eq!(exporter.dropped_spans(), 0);
    }

    #[test]
    fn otlp_exporter_rejects_malformed_endpoints() {
        assert!(matches!(
            OtlpExporter::new("not a url"),
            Err(TelemetryError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            OtlpExporter::new("ftp://collector:4317"),
            Err(TelemetryError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn full_hand_off_queue_drops_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let delegate = OtlpDelegate::with_sender(tx);

        delegate.offer_span(record());
        delegate.offer_span(record());
        delegate.offer_span(record());

        assert_eq!(delegate.dropped(), 2);
    }
}
