//! Fixed-rate control loop driver.
//!
//! Deadlines are laid out on a fixed grid (`origin + n * period`) so the rate
//! does not drift with callback cost. A late wake-up skips the deadlines it
//! already missed instead of firing a burst.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::debug;

/// 50 Hz.
pub const TICK_INTERVAL: Duration = Duration::from_millis(20);

pub struct Ticker {
    period: Duration,
    /// Dropping the sender disconnects the channel, which stops the thread.
    stop_tx: Option<Sender<()>>,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            stop_tx: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Spawn the tick thread. Does nothing if already running.
    pub fn start<F>(&mut self, on_tick: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        if self.is_running() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let period = self.period;
        thread::Builder::new()
            .name("keymouse-ticker".to_string())
            .spawn(move || run(period, stop_rx, on_tick))?;
        self.stop_tx = Some(stop_tx);
        debug!("Ticker started ({period:?})");
        Ok(())
    }

    /// Signal the tick thread to exit. Never blocks: a tick already in
    /// progress runs to completion on its own thread.
    pub fn stop(&mut self) {
        if self.stop_tx.take().is_some() {
            debug!("Ticker stopped");
        }
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new(TICK_INTERVAL)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F: FnMut()>(period: Duration, stop_rx: Receiver<()>, mut on_tick: F) {
    let origin = Instant::now();
    let period_nanos = period.as_nanos().max(1);
    let mut n: u32 = 1;
    loop {
        match stop_rx.recv_deadline(origin + period * n) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        on_tick();

        let due = (origin.elapsed().as_nanos() / period_nanos) as u32 + 1;
        n = (n + 1).max(due);
    }
}
