//! Gate state machine with generation-guarded auto-close
//!
//! CLOSED --trigger()--> OPEN --(open_for elapsed since latest trigger)--> CLOSED
//!
//! Every `trigger()` bumps a generation counter and arms a fresh timer task,
//! aborting the previous one. A timer only closes the gate if its captured
//! generation is still current when it fires, so overlapping triggers extend
//! the window instead of closing early. The open flag is mirrored on a watch
//! channel: that channel is the actuator signal, and `status()` reads it
//! without taking the state lock.

use crate::infra::metrics::Metrics;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct GateInner {
    generation: u64,
    /// Handle of the single live auto-close timer, if armed
    timer: Option<JoinHandle<()>>,
}

struct GateShared {
    inner: Mutex<GateInner>,
    open_tx: watch::Sender<bool>,
    open_for: Duration,
    metrics: Arc<Metrics>,
}

impl GateShared {
    fn expire(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!(
                timer_generation = %generation,
                current_generation = %inner.generation,
                "gate_timer_superseded"
            );
            return false;
        }

        inner.timer = None;
        let was_open = self.open_tx.send_replace(false);
        if was_open {
            self.metrics.set_gate_open(false);
            self.metrics.record_gate_auto_close();
            info!(generation = %generation, "gate_auto_closed");
        }
        was_open
    }
}

/// Process-wide gate state. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct GateStateMachine {
    shared: Arc<GateShared>,
}

impl GateStateMachine {
    pub fn new(open_for: Duration, metrics: Arc<Metrics>) -> Self {
        let (open_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(GateShared {
                inner: Mutex::new(GateInner { generation: 0, timer: None }),
                open_tx,
                open_for,
                metrics,
            }),
        }
    }

    /// Open the gate and (re)arm the auto-close timer. Latest trigger wins.
    ///
    /// Must be called from within a Tokio runtime. Returns the generation
    /// armed by this call.
    pub fn trigger(&self) -> u64 {
        let mut inner = self.shared.inner.lock();
        inner.generation += 1;
        let generation = inner.generation;

        if let Some(previous) = inner.timer.take() {
            previous.abort();
        }

        let was_open = self.shared.open_tx.send_replace(true);
        self.shared.metrics.set_gate_open(true);
        self.shared.metrics.record_gate_trigger();

        let weak: Weak<GateShared> = Arc::downgrade(&self.shared);
        let open_for = self.shared.open_for;
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(open_for).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(generation);
            }
        }));

        info!(
            generation = %generation,
            was_open = %was_open,
            open_for_ms = %open_for.as_millis(),
            "gate_opened"
        );
        generation
    }

    /// Close the gate if `generation` is still the latest armed one.
    /// Returns true if this call closed the gate.
    pub fn on_timer_expire(&self, generation: u64) -> bool {
        self.shared.expire(generation)
    }

    /// Current open flag. Never blocks on the state lock.
    #[inline]
    pub fn status(&self) -> bool {
        *self.shared.open_tx.borrow()
    }

    /// Watch the open flag (actuator signal)
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.open_tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.shared.inner.lock().generation
    }

    pub fn open_for(&self) -> Duration {
        self.shared.open_for
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn gate(open_for_secs: u64) -> (GateStateMachine, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (GateStateMachine::new(Duration::from_secs(open_for_secs), metrics.clone()), metrics)
    }

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initially_closed() {
        let (gate, _) = gate(10);
        assert!(!gate.status());
        assert_eq!(gate.generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_after_window_not_before() {
        let (gate, metrics) = gate(10);
        gate.trigger();
        assert!(gate.status());

        sleep(millis(9_999)).await;
        assert!(gate.status());

        sleep(millis(2)).await;
        assert!(!gate.status());
        assert_eq!(metrics.gate_auto_closes_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrigger_extends_window() {
        let (gate, metrics) = gate(10);
        gate.trigger();
        sleep(millis(6_000)).await;
        gate.trigger();

        // First window would have ended at 10s
        sleep(millis(4_500)).await;
        assert!(gate.status(), "closed by a superseded timer");

        // Latest window ends at 16s
        sleep(millis(5_400)).await;
        assert!(gate.status());
        sleep(millis(200)).await;
        assert!(!gate.status());

        assert_eq!(metrics.gate_triggers_total(), 2);
        assert_eq!(metrics.gate_auto_closes_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_overlapping_triggers() {
        let (gate, _) = gate(10);
        for _ in 0..5 {
            gate.trigger();
            sleep(millis(2_000)).await;
        }
        // Last trigger at 8s, now at 10s
        assert!(gate.status());
        sleep(millis(7_900)).await; // 17.9s
        assert!(gate.status());
        sleep(millis(200)).await; // 18.1s
        assert!(!gate.status());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_is_noop() {
        let (gate, _) = gate(10);
        let first = gate.trigger();
        let second = gate.trigger();
        assert_ne!(first, second);

        assert!(!gate.on_timer_expire(first));
        assert!(gate.status());

        assert!(gate.on_timer_expire(second));
        assert!(!gate.status());

        // Already closed
        assert!(!gate.on_timer_expire(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_after_close() {
        let (gate, metrics) = gate(1);
        gate.trigger();
        sleep(millis(1_100)).await;
        assert!(!gate.status());

        gate.trigger();
        assert!(gate.status());
        sleep(millis(1_100)).await;
        assert!(!gate.status());
        assert_eq!(metrics.gate_auto_closes_total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_transitions() {
        let (gate, _) = gate(1);
        let mut rx = gate.subscribe();
        assert!(!*rx.borrow_and_update());

        gate.trigger();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_single_close() {
        let (gate, metrics) = gate(10);
        let mut handles = Vec::new();
        for _ in 0..50 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.trigger();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(gate.generation(), 50);
        assert!(gate.status());

        sleep(millis(10_100)).await;
        assert!(!gate.status());
        assert_eq!(metrics.gate_auto_closes_total(), 1);
    }
}
