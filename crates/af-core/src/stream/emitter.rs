use std::fmt;

use crate::element::Element;

use super::sink::SinkHandle;
use super::EmitFn;

/// A lazy producer bound to a source sequence.
///
/// `produce` drives the source synchronously in the caller's context but
/// launches each emit routine as an independent task, decoupling source
/// pacing from work completion. Completions may arrive in any order.
pub struct Emitter {
    source: Box<dyn Iterator<Item = Element> + Send>,
}

impl Emitter {
    pub fn new<I>(source: I) -> Self
    where
        I: IntoIterator<Item = Element>,
        I::IntoIter: Send + 'static,
    {
        Self {
            source: Box::new(source.into_iter()),
        }
    }

    /// Pull up to `n` items, spawning one task per item. Returns the number
    /// actually launched; a short count means the source is exhausted and
    /// the emitter must not be asked again.
    pub(crate) fn produce(&mut self, n: usize, emit_fn: &EmitFn, sink: &SinkHandle) -> usize {
        for launched in 0..n {
            let Some(elem) = self.source.next() else {
                return launched;
            };
            sink.spawn_task(emit_fn, elem);
        }
        n
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}
