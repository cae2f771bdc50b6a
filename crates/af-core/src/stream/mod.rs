mod emitter;
mod sink;

pub use emitter::Emitter;
pub use sink::{ProcessedStream, SinkHandle};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use af_config::StreamConfig;

use crate::element::Element;

/// Future returned by an emit routine.
pub type EmitFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Per-element emit routine. Each invocation runs as an independent task and
/// reports through the sink handle: `done` for the finished element, `emit`
/// to inject further work. A routine that returns without calling `done`
/// forfeits its element.
pub type EmitFn = Arc<dyn Fn(SinkHandle, Element) -> EmitFuture + Send + Sync>;

/// Launch a pipeline run over `source` and return the consumer-facing lazy
/// sequence. The source may be finite or infinite; it is pulled on demand,
/// at most `chunk_size` element tasks per `next_chunk` call.
pub fn start<I>(source: I, emit_fn: EmitFn, config: &StreamConfig) -> ProcessedStream
where
    I: IntoIterator<Item = Element>,
    I::IntoIter: Send + 'static,
{
    ProcessedStream::spawn(Emitter::new(source), emit_fn, config)
}
