//! Tracing layers and formatters for Confab
//!
//! [`PeerContextLayer`] tags spans with the active [`PeerContextGuard`] so
//! events from several local sessions can be told apart. The formatter
//! helpers build the console and JSONL output layers from configuration.

use tracing::{Event, Subscriber, span};
use tracing_subscriber::{
    Layer,
    fmt::MakeWriter,
    layer::Context,
    registry::LookupSpan,
};

use crate::config::{ConsoleConfig, JsonlConfig};
use crate::context::{PeerContextData, PeerContextGuard};

/// A boxed layer over subscriber `S`
pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Layer that attaches the current peer context to new spans
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerContextLayer;

impl PeerContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct PeerContextExtension {
    pub data: PeerContextData,
}

impl<S> Layer<S> for PeerContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(peer_ctx) = PeerContextGuard::current()
        {
            span.extensions_mut()
                .insert(PeerContextExtension { data: peer_ctx });
        }
    }
}

/// Peer context of the innermost span enclosing `event` that carries one
pub fn event_peer_context<S>(ctx: &Context<'_, S>, event: &Event<'_>) -> Option<PeerContextData>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    ctx.event_scope(event)?.find_map(|span| {
        span.extensions()
            .get::<PeerContextExtension>()
            .map(|ext| ext.data.clone())
    })
}

/// JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(writer: W, config: &JsonlConfig) -> BoxedLayer<S>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
        .boxed()
}

/// Console layer: pretty text or JSONL on stdout
pub fn console_layer<S>(console: &ConsoleConfig, jsonl: &JsonlConfig) -> BoxedLayer<S>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    if console.pretty {
        tracing_subscriber::fmt::layer()
            .with_ansi(console.ansi)
            .with_target(true)
            .boxed()
    } else {
        jsonl_layer(std::io::stdout, jsonl)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use confab_core::PeerIdentity;
    use parking_lot::Mutex;
    use tracing_subscriber::{Registry, layer::SubscriberExt};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Records the peer id seen for every event
    #[derive(Clone, Default)]
    struct PeerRecorder(Arc<Mutex<Vec<Option<String>>>>);

    impl<S> Layer<S> for PeerRecorder
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
            let peer = event_peer_context(&ctx, event).map(|data| data.display_name);
            self.0.lock().push(peer);
        }
    }

    #[test]
    fn test_spans_carry_peer_context() {
        let recorder = PeerRecorder::default();
        let subscriber = Registry::default()
            .with(PeerContextLayer::new())
            .with(recorder.clone());

        let alice = PeerIdentity::new("Alice").unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("outside any span");

            let span = {
                let _guard = PeerContextGuard::new(&alice);
                tracing::info_span!("session")
            };
            // The span keeps the context it was created under
            span.in_scope(|| tracing::info!("inside"));
        });

        assert_eq!(*recorder.0.lock(), vec![None, Some("Alice".to_string())]);
    }

    #[test]
    fn test_jsonl_layer_writes_lines() {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = Registry::default().with(jsonl_layer(
            move || writer.clone(),
            &JsonlConfig::default(),
        ));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(entries = 4, "Transcript updated");
        });

        let output = String::from_utf8(buf.0.lock().clone()).unwrap();
        let line: serde_json::Value = serde_json::from_str(output.lines().next().unwrap()).unwrap();
        assert_eq!(line["message"], "Transcript updated");
        assert_eq!(line["entries"], 4);
        assert_eq!(line["level"], "INFO");
    }
}
