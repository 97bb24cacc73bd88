//! Trace hand-off surface for engine clients
//!
//! Every control RPC runs under a client span from the ambient tracer
//! provider. When the client carries a [`TraceDelegate`], the completed
//! span is additionally offered to it as a [`SpanRecord`], which is how
//! detected exporters ingest client-side build telemetry.

use std::time::{Duration, Instant, SystemTime};

use opentelemetry::global::{BoxedSpan, BoxedTracer};
use opentelemetry::trace::{Span, SpanKind, Status, Tracer};
use serde::Serialize;
use tonic::metadata::MetadataMap;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Metadata key carrying W3C trace context to the engine.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Receives completed RPC spans from an engine client.
///
/// Implementations must not block; when a sink cannot keep up it drops
/// records rather than stalling the RPC path.
pub trait TraceDelegate: Send + Sync {
    /// Offer one completed span.
    fn offer_span(&self, span: SpanRecord);
}

/// A completed client-side RPC span.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    /// Trace id in lowercase hex, empty when the span was not sampled.
    pub trace_id: String,
    /// Span id in lowercase hex, empty when the span was not sampled.
    pub span_id: String,
    /// Fully qualified RPC name, e.g. `kilnd.Engine/ListWorkers`.
    pub name: String,
    /// Wall-clock start of the call.
    pub started_at: SystemTime,
    /// Elapsed call time.
    pub duration: Duration,
    /// Whether the call returned a successful response.
    pub ok: bool,
}

/// In-flight span for a single RPC. Starts under the current tracing
/// context so engine calls nest beneath whatever the caller has open.
pub(crate) struct CallSpan {
    name: &'static str,
    started_at: SystemTime,
    begun: Instant,
    span: Option<BoxedSpan>,
}

impl CallSpan {
    pub(crate) fn start(tracer: Option<&BoxedTracer>, name: &'static str) -> Self {
        let span = tracer.map(|tracer| {
            let parent = tracing::Span::current().context();
            tracer
                .span_builder(name)
                .with_kind(SpanKind::Client)
                .start_with_context(tracer, &parent)
        });
        Self {
            name,
            started_at: SystemTime::now(),
            begun: Instant::now(),
            span,
        }
    }

    /// Inject trace context metadata for the outgoing request.
    pub(crate) fn annotate(&self, metadata: &mut MetadataMap) {
        let Some(span) = &self.span else { return };
        let cx = span.span_context();
        if !cx.is_valid() {
            return;
        }
        let sampled = cx.trace_flags().to_u8() & 0x01;
        let header = format!("00-{}-{}-0{sampled}", cx.trace_id(), cx.span_id());
        if let Ok(value) = header.parse() {
            metadata.insert(TRACEPARENT_HEADER, value);
        }
    }

    /// Close the span and offer the completed record to `delegate`.
    pub(crate) fn finish(mut self, delegate: Option<&dyn TraceDelegate>, ok: bool) {
        let (trace_id, span_id) = match &self.span {
            Some(span) if span.span_context().is_valid() => {
                let cx = span.span_context();
                (cx.trace_id().to_string(), cx.span_id().to_string())
            }
            _ => (String::new(), String::new()),
        };
        if let Some(span) = &mut self.span {
            if !ok {
                span.set_status(Status::error("rpc failed"));
            }
            span.end();
        }
        if let Some(delegate) = delegate {
            delegate.offer_span(SpanRecord {
                trace_id,
                span_id,
                name: self.name.to_string(),
                started_at: self.started_at,
                duration: self.begun.elapsed(),
                ok,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<SpanRecord>>);

    impl TraceDelegate for Capture {
        fn offer_span(&self, span: SpanRecord) {
            self.0.lock().unwrap().push(span);
        }
    }

    #[test]
    fn untraced_call_still_produces_a_record() {
        let capture = Capture::default();
        let call = CallSpan::start(None, "kilnd.Engine/Info");
        call.finish(Some(&capture), true);

        let records = capture.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "kilnd.Engine/Info");
        assert!(records[0].ok);
        assert!(records[0].trace_id.is_empty());
    }

    #[test]
    fn failed_call_is_marked_in_the_record() {
        let capture = Capture::default();
        let call = CallSpan::start(None, "kilnd.Engine/ListWorkers");
        call.finish(Some(&capture), false);

        let records = capture.0.lock().unwrap();
        assert!(!records[0].ok);
    }

    #[test]
    fn untraced_call_injects_no_metadata() {
        let call = CallSpan::start(None, "kilnd.Engine/ListWorkers");
        let mut metadata = MetadataMap::new();
        call.annotate(&mut metadata);
        assert!(metadata.get(TRACEPARENT_HEADER).is_none());
        call.finish(None, true);
    }
}
