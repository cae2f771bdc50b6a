use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use af_config::StreamConfig;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;

use crate::element::Element;

use super::{EmitFn, Emitter};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

enum SinkMsg {
    Next { reply: oneshot::Sender<Reply> },
    Emit(Vec<Element>),
    EmitEmitter(Emitter),
    Done(Element),
    TaskFinished,
    Shutdown,
}

enum Reply {
    Chunk(Vec<Element>),
    Halt,
}

// ---------------------------------------------------------------------------
// SinkHandle
// ---------------------------------------------------------------------------

/// Handle to a running sink. Cheap to clone; callable from any task. Sends
/// into a sink that has already shut down are dropped silently.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkMsg>,
}

impl SinkHandle {
    /// Inject additional elements; the sink wraps them into a new emitter.
    pub fn emit(&self, elems: Vec<Element>) {
        if !elems.is_empty() {
            let _ = self.tx.send(SinkMsg::Emit(elems));
        }
    }

    /// Register an externally-constructed emitter as-is.
    pub fn emit_emitter(&self, emitter: Emitter) {
        let _ = self.tx.send(SinkMsg::EmitEmitter(emitter));
    }

    /// Deliver one completed element.
    pub fn done(&self, elem: Element) {
        let _ = self.tx.send(SinkMsg::Done(elem));
    }

    /// Spawn one element task. The guard reports task termination to the
    /// sink even when the emit routine panics or forgets `done`.
    pub(crate) fn spawn_task(&self, emit_fn: &EmitFn, elem: Element) {
        let guard = TaskGuard {
            tx: self.tx.clone(),
        };
        let fut = emit_fn(self.clone(), elem);
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }
}

struct TaskGuard {
    tx: mpsc::UnboundedSender<SinkMsg>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(SinkMsg::TaskFinished);
    }
}

// ---------------------------------------------------------------------------
// ProcessedStream — consumer-facing lazy sequence
// ---------------------------------------------------------------------------

/// The output side of a pipeline run: pull completed elements in bounded
/// chunks. Dropping the stream tears the sink down best-effort.
pub struct ProcessedStream {
    handle: SinkHandle,
    halted: bool,
}

impl ProcessedStream {
    pub(crate) fn spawn(initial: Emitter, emit_fn: EmitFn, config: &StreamConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SinkHandle { tx };
        let actor = SinkActor {
            emitters: VecDeque::from([initial]),
            buffer: Vec::new(),
            chunk_size: config.chunk_size.max(1),
            done_timeout: config.done_timeout.as_duration(),
            in_flight: 0,
            pending: None,
            completions_since_arm: 0,
            quiesce: Box::pin(tokio::time::sleep(Duration::ZERO)),
            armed: false,
            halted: false,
            emit_fn,
            handle: handle.clone(),
        };
        tokio::spawn(actor.run(rx));
        Self {
            handle,
            halted: false,
        }
    }

    /// A handle for injecting work or completions from outside the stream's
    /// own emit routines.
    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Pull the next chunk. Blocks until `chunk_size` elements completed or
    /// the stream drained; returns `None` once the stream has halted.
    pub async fn next_chunk(&mut self) -> Option<Vec<Element>> {
        while !self.halted {
            let (reply_tx, reply_rx) = oneshot::channel();
            if self
                .handle
                .tx
                .send(SinkMsg::Next { reply: reply_tx })
                .is_err()
            {
                break;
            }
            match reply_rx.await {
                // Quiescence flushes may be empty; they are not chunks the
                // consumer needs to see.
                Ok(Reply::Chunk(chunk)) if chunk.is_empty() => continue,
                Ok(Reply::Chunk(chunk)) => return Some(chunk),
                Ok(Reply::Halt) | Err(_) => break,
            }
        }
        self.halted = true;
        None
    }

    /// Drain the stream to completion, returning every completed element.
    pub async fn collect(mut self) -> Vec<Element> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend(chunk);
        }
        out
    }
}

impl Drop for ProcessedStream {
    fn drop(&mut self) {
        let _ = self.handle.tx.send(SinkMsg::Shutdown);
    }
}

// ---------------------------------------------------------------------------
// SinkActor
// ---------------------------------------------------------------------------

/// The sink actor: multiplexes active emitters, buffers completions, and
/// serves one parked consumer request at a time.
///
/// Launch accounting keeps `buffered + in_flight <= chunk_size` at all
/// times; a task that finishes without delivering (crash) reopens its slot
/// so the remaining emitters can fill it.
struct SinkActor {
    emitters: VecDeque<Emitter>,
    buffer: Vec<Element>,
    chunk_size: usize,
    done_timeout: Duration,
    in_flight: usize,
    pending: Option<oneshot::Sender<Reply>>,
    /// Completions observed since the quiescence window was armed.
    completions_since_arm: u64,
    /// Quiescence timer; polled only while `armed`.
    quiesce: Pin<Box<Sleep>>,
    armed: bool,
    halted: bool,
    emit_fn: EmitFn,
    handle: SinkHandle,
}

impl SinkActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SinkMsg>) {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => {
                    // The actor holds its own handle, so recv() cannot yield
                    // None; Shutdown is the only external exit.
                    let Some(msg) = msg else { break };
                    match msg {
                        SinkMsg::Next { reply } => self.on_next(reply),
                        SinkMsg::Emit(elems) => self.on_new_emitter(Emitter::new(elems)),
                        SinkMsg::EmitEmitter(emitter) => self.on_new_emitter(emitter),
                        SinkMsg::Done(elem) => self.on_done(elem),
                        SinkMsg::TaskFinished => self.on_task_finished(),
                        SinkMsg::Shutdown => break,
                    }
                }
                () = self.quiesce.as_mut(), if self.armed => {
                    self.on_quiesce_timeout();
                }
            }
            if self.halted {
                break;
            }
        }
        log::debug!("sink stopped");
    }

    fn on_next(&mut self, reply: oneshot::Sender<Reply>) {
        if self.pending.is_some() {
            // At most one outstanding request; a second one is a protocol
            // violation by the consumer.
            log::warn!("sink: overlapping next request, replacing the parked one");
        }
        self.pending = Some(reply);
        self.pump();
    }

    fn on_new_emitter(&mut self, emitter: Emitter) {
        self.emitters.push_back(emitter);
        // A late emit revives the stream; the quiescence window no longer
        // applies.
        self.armed = false;
        self.pump();
    }

    fn on_done(&mut self, elem: Element) {
        self.buffer.push(elem);
        self.completions_since_arm += 1;
        self.pump();
    }

    fn on_task_finished(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        // A crashed task reopens its slot; pump pulls a replacement if any
        // emitter still has items.
        self.pump();
    }

    fn on_quiesce_timeout(&mut self) {
        self.armed = false;
        if self.completions_since_arm > 0 {
            // Late completions arrived inside the window: hand over whatever
            // buffered and let the consumer pull again.
            let chunk = std::mem::take(&mut self.buffer);
            self.reply(Reply::Chunk(chunk));
        } else if self.in_flight > 0 {
            // Launched tasks are still running; halting now would drop their
            // results. Keep waiting.
            self.arm();
        } else {
            self.reply(Reply::Halt);
            self.halted = true;
        }
    }

    /// Drive the parked request: deliver a full chunk if buffered, otherwise
    /// launch element tasks up to the in-flight bound, then arm or clear the
    /// quiescence window.
    fn pump(&mut self) {
        if self.pending.is_none() {
            return;
        }
        if self.try_deliver() {
            self.armed = false;
            return;
        }

        loop {
            let outstanding = self.buffer.len() + self.in_flight;
            if outstanding >= self.chunk_size {
                break;
            }
            let deficit = self.chunk_size - outstanding;
            let Some(head) = self.emitters.front_mut() else {
                break;
            };
            let launched = head.produce(deficit, &self.emit_fn, &self.handle);
            self.in_flight += launched;
            if launched < deficit {
                // Short count: this emitter is exhausted.
                self.emitters.pop_front();
            }
        }

        if self.try_deliver() {
            self.armed = false;
            return;
        }
        if self.emitters.is_empty() {
            if !self.armed {
                self.arm();
            }
        } else {
            self.armed = false;
        }
    }

    fn arm(&mut self) {
        self.completions_since_arm = 0;
        self.quiesce
            .as_mut()
            .reset(tokio::time::Instant::now() + self.done_timeout);
        self.armed = true;
    }

    fn try_deliver(&mut self) -> bool {
        if self.pending.is_none() || self.buffer.len() < self.chunk_size {
            return false;
        }
        let chunk = std::mem::take(&mut self.buffer);
        self.reply(Reply::Chunk(chunk));
        true
    }

    fn reply(&mut self, reply: Reply) {
        if let Some(tx) = self.pending.take() {
            if tx.send(reply).is_err() {
                log::debug!("sink: consumer dropped its pending request");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream;
    use std::sync::Arc;
    use std::time::Instant;

    fn config(chunk_size: usize, timeout_ms: u64) -> StreamConfig {
        StreamConfig {
            chunk_size,
            done_timeout: Duration::from_millis(timeout_ms).into(),
        }
    }

    fn numbered(tag: &str, range: std::ops::Range<i64>) -> Vec<Element> {
        range.map(|n| Element::new(tag).with("n", n)).collect()
    }

    fn sorted_keys(elems: &[Element]) -> Vec<String> {
        let mut keys: Vec<String> = elems
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect();
        keys.sort();
        keys
    }

    /// Emit routine that completes each element untouched.
    fn identity_emit() -> EmitFn {
        Arc::new(|sink, elem| {
            Box::pin(async move {
                sink.done(elem);
            })
        })
    }

    #[tokio::test]
    async fn chunks_are_a_permutation_of_the_source() {
        let source = numbered("t", 0..23);
        let expected = sorted_keys(&source);

        let mut out = Vec::new();
        let mut stream = stream::start(source, identity_emit(), &config(5, 100));
        let mut full_chunks = 0;
        while let Some(chunk) = stream.next_chunk().await {
            if chunk.len() == 5 {
                full_chunks += 1;
            }
            out.extend(chunk);
        }

        assert_eq!(sorted_keys(&out), expected);
        assert_eq!(full_chunks, 4, "23 elements at chunk 5 give four full chunks");
    }

    #[tokio::test]
    async fn empty_source_halts() {
        let mut stream = stream::start(Vec::new(), identity_emit(), &config(4, 50));
        assert!(stream.next_chunk().await.is_none());
        // Halt is sticky.
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn emitted_children_are_processed() {
        let emit_fn: EmitFn = Arc::new(|sink, elem| {
            Box::pin(async move {
                if elem.tag == "parent" {
                    sink.emit(vec![Element::new("child").with("of", elem.get("n").cloned())]);
                }
                sink.done(elem);
            })
        });

        let out = stream::start(numbered("parent", 0..3), emit_fn, &config(10, 100))
            .collect()
            .await;

        assert_eq!(out.len(), 6);
        assert_eq!(out.iter().filter(|e| e.tag == "child").count(), 3);
    }

    #[tokio::test]
    async fn external_emitter_is_registered_as_is() {
        let emit_fn: EmitFn = Arc::new(|sink, elem| {
            Box::pin(async move {
                if elem.tag == "seed" {
                    sink.emit_emitter(Emitter::new(numbered("extra", 0..4)));
                }
                sink.done(elem);
            })
        });

        let out = stream::start(numbered("seed", 0..1), emit_fn, &config(3, 100))
            .collect()
            .await;

        assert_eq!(out.len(), 5);
    }

    #[tokio::test]
    async fn crashed_tasks_do_not_wedge_the_pull() {
        // Every third element forgets `done`; its slot must be reclaimed and
        // the rest of the source still flows out.
        let emit_fn: EmitFn = Arc::new(|sink, elem| {
            Box::pin(async move {
                let n = elem.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
                if n % 3 == 0 {
                    return; // task crash: no done
                }
                sink.done(elem);
            })
        });

        let out = stream::start(numbered("t", 0..9), emit_fn, &config(2, 50))
            .collect()
            .await;

        let mut ns: Vec<i64> = out
            .iter()
            .filter_map(|e| e.get("n").and_then(|v| v.as_i64()))
            .collect();
        ns.sort();
        assert_eq!(ns, vec![1, 2, 4, 5, 7, 8]);
    }

    #[tokio::test]
    async fn infinite_source_is_pulled_on_demand() {
        let source = (0..).map(|n| Element::new("t").with("n", n));
        let mut stream = stream::start(source, identity_emit(), &config(4, 100));

        for _ in 0..3 {
            let chunk = stream.next_chunk().await.expect("infinite stream");
            assert_eq!(chunk.len(), 4);
        }
        // Dropping the stream shuts the sink down without draining the
        // infinite source.
    }

    #[tokio::test]
    async fn slow_tasks_block_the_chunk_not_the_sink() {
        // Tasks sleeping past the quiescence window must not trigger HALT
        // while still in flight.
        let emit_fn: EmitFn = Arc::new(|sink, elem| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                sink.done(elem);
            })
        });

        let start = Instant::now();
        let out = stream::start(numbered("t", 0..4), emit_fn, &config(4, 50))
            .collect()
            .await;

        assert_eq!(out.len(), 4);
        assert!(start.elapsed() >= Duration::from_millis(120));
    }
}
