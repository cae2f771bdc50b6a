use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CoreResult;

use super::{NodeId, UnitKind, WorkerHandle, WorkerState, WorkerTask};

/// Reference worker kind: a single-threaded actor holding `state =
/// init(arg)`, executing delivered tasks in arrival order, and terminating
/// normally after `ttl` of idleness. A `ttl` of zero disables idle expiry.
///
/// The idle timer resets on every delivery; expiry destroys the state, and
/// the next cast observes a fresh worker.
pub struct SimpleUnit<H, I> {
    home: H,
    init: I,
    ttl: Duration,
}

impl<H, I> SimpleUnit<H, I>
where
    H: Fn(&str) -> NodeId + Send + Sync,
    I: Fn(&str) -> CoreResult<WorkerState> + Send + Sync,
{
    pub fn new(home: H, init: I) -> Self {
        Self {
            home,
            init,
            ttl: Duration::from_secs(30),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl<H, I> UnitKind for SimpleUnit<H, I>
where
    H: Fn(&str) -> NodeId + Send + Sync,
    I: Fn(&str) -> CoreResult<WorkerState> + Send + Sync,
{
    fn home_node(&self, arg: &str) -> NodeId {
        (self.home)(arg)
    }

    async fn start(&self, arg: &str) -> CoreResult<WorkerHandle> {
        let mut state = (self.init)(arg)?;
        let ttl = self.ttl;
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerTask>();
        let join = tokio::spawn(async move {
            loop {
                let task = if ttl.is_zero() {
                    rx.recv().await
                } else {
                    tokio::select! {
                        biased;
                        task = rx.recv() => task,
                        _ = tokio::time::sleep(ttl) => {
                            log::debug!("simple worker idle for {ttl:?}, expiring");
                            break;
                        }
                    }
                };
                match task {
                    Some(task) => task(&mut state),
                    None => break,
                }
            }
        });
        Ok(WorkerHandle::new(tx, join))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::state_of;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn counter_unit(
        starts: Arc<AtomicUsize>,
    ) -> SimpleUnit<
        impl Fn(&str) -> NodeId + Send + Sync,
        impl Fn(&str) -> CoreResult<WorkerState> + Send + Sync,
    > {
        SimpleUnit::new(
            |_arg| NodeId::from("local"),
            move |_arg| {
                starts.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(0u64) as WorkerState)
            },
        )
    }

    #[tokio::test]
    async fn tasks_run_in_order_with_state() {
        let starts = Arc::new(AtomicUsize::new(0));
        let unit = counter_unit(Arc::clone(&starts));
        let worker = unit.start("a").await.unwrap();

        for _ in 0..3 {
            unit.deliver(
                &worker,
                Box::new(|state| {
                    if let Some(n) = state_of::<u64>(state) {
                        *n += 1;
                    }
                }),
            )
            .unwrap();
        }

        let (tx, rx) = oneshot::channel();
        unit.deliver(
            &worker,
            Box::new(move |state| {
                let n = state_of::<u64>(state).copied().unwrap_or(0);
                let _ = tx.send(n);
            }),
        )
        .unwrap();

        assert_eq!(rx.await.unwrap(), 3);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn idle_ttl_expires_worker() {
        let starts = Arc::new(AtomicUsize::new(0));
        let unit = counter_unit(Arc::clone(&starts)).with_ttl(Duration::from_millis(50));
        let mut worker = unit.start("a").await.unwrap();

        let join = worker.take_join().unwrap();
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .expect("worker should expire within the TTL")
            .unwrap();

        // Channel is closed after expiry.
        assert!(!worker.send(Box::new(|_| {})));
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let starts = Arc::new(AtomicUsize::new(0));
        let unit = counter_unit(Arc::clone(&starts)).with_ttl(Duration::ZERO);
        let worker = unit.start("a").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let (tx, rx) = oneshot::channel();
        unit.deliver(
            &worker,
            Box::new(move |_| {
                let _ = tx.send(());
            }),
        )
        .unwrap();
        rx.await.unwrap();
    }
}
