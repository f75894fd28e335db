//! Heartbeat timer
//!
//! One recurring tick per open socket. Each tick asks the owning connection to
//! send a heartbeat; a tick that finds the previous heartbeat still unacknowledged
//! reports a miss instead and the timer stops. Acks answer heartbeats in the
//! order they were sent, so each ack settles the oldest outstanding beat.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Signal from the timer to its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// Send a heartbeat now
    Beat,
    /// The previous heartbeat was never acknowledged
    Missed,
}

#[derive(Debug, Default)]
struct HeartbeatClock {
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    /// Heartbeats sent and not yet acknowledged
    outstanding: u32,
    /// Acks still due before the last scheduled beat is answered
    scheduled_ahead: Option<u32>,
    latency: Option<Duration>,
}

impl HeartbeatClock {
    fn settle_oldest(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.scheduled_ahead = match self.scheduled_ahead {
            Some(0) | None => None,
            Some(ahead) => Some(ahead - 1),
        };
    }
}

/// Recurring heartbeat tick bound to one socket
///
/// Dropping the timer cancels it.
#[derive(Debug)]
pub struct HeartbeatTimer {
    interval: Duration,
    clock: Arc<Mutex<HeartbeatClock>>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatTimer {
    /// Start ticking with the first beat delayed by a random fraction of `interval`
    pub fn start(interval: Duration, signals: mpsc::UnboundedSender<HeartbeatSignal>) -> Self {
        let initial_delay = interval.mul_f64(rand::thread_rng().gen::<f64>());
        Self::start_with_delay(interval, initial_delay, signals)
    }

    /// Start ticking with an explicit delay before the first beat
    pub fn start_with_delay(
        interval: Duration,
        initial_delay: Duration,
        signals: mpsc::UnboundedSender<HeartbeatSignal>,
    ) -> Self {
        let clock = Arc::new(Mutex::new(HeartbeatClock::default()));
        let task_clock = Arc::clone(&clock);

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let first = start.checked_add(initial_delay).unwrap_or(start);
            let mut ticker = interval_at(first, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let signal = {
                    let mut clock = task_clock.lock();
                    if clock.scheduled_ahead.is_some() {
                        HeartbeatSignal::Missed
                    } else {
                        clock.scheduled_ahead = Some(clock.outstanding);
                        clock.outstanding += 1;
                        clock.last_sent = Some(Instant::now());
                        HeartbeatSignal::Beat
                    }
                };

                if signals.send(signal).is_err() || signal == HeartbeatSignal::Missed {
                    return;
                }
            }
        });

        Self {
            interval,
            clock,
            task: Some(task),
        }
    }

    /// Record an acknowledgment and return the measured latency
    pub fn acknowledge(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut clock = self.clock.lock();
        clock.settle_oldest();
        clock.last_ack = Some(now);
        if let Some(sent) = clock.last_sent {
            clock.latency = Some(now.saturating_duration_since(sent));
        }
        clock.latency
    }

    /// Record an out-of-schedule heartbeat (server request)
    ///
    /// Updates the latency reference point without arming the missed check.
    /// The beat still takes its place in the ack order.
    pub fn record_sent(&self) {
        let mut clock = self.clock.lock();
        clock.outstanding += 1;
        clock.last_sent = Some(Instant::now());
    }

    /// Last measured round trip
    pub fn latency(&self) -> Option<Duration> {
        self.clock.lock().latency
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.clock.lock().last_sent
    }

    pub fn last_ack(&self) -> Option<Instant> {
        self.clock.lock().last_ack
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the timer; no signal is sent afterwards
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
