//! Timer backed by a dedicated thread.

use super::{Timer, TimerFire, TimerToken};
use crate::error::{RealtimeError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum TimerCmd {
    Schedule {
        token: TimerToken,
        deadline: Instant,
        fire: TimerFire,
    },
    Cancel(TimerToken),
    Shutdown,
}

/// Fires timers from a background thread.
///
/// The thread sleeps until the earliest deadline or the next command,
/// whichever comes first. Cancelled timers are dropped from the pending map
/// and their heap slots are skipped lazily.
pub struct ThreadTimer {
    cmd_tx: Sender<TimerCmd>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTimer {
    /// Start the timer thread.
    pub fn start() -> Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("realtime-timer".to_string())
            .spawn(move || timer_loop(cmd_rx))
            .map_err(|e| RealtimeError::Thread(e.to_string()))?;

        Ok(Self {
            cmd_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the thread. Pending timers are discarded.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(TimerCmd::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("timer thread panicked");
            }
        }
    }
}

impl Timer for ThreadTimer {
    fn schedule(&self, token: TimerToken, delay: Duration, fire: TimerFire) {
        let deadline = Instant::now() + delay;
        if self
            .cmd_tx
            .send(TimerCmd::Schedule {
                token,
                deadline,
                fire,
            })
            .is_err()
        {
            tracing::warn!(?token, "timer thread is not running; dropping timer");
        }
    }

    fn cancel(&self, token: TimerToken) {
        let _ = self.cmd_tx.send(TimerCmd::Cancel(token));
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(cmd_rx: Receiver<TimerCmd>) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, TimerToken)>> = BinaryHeap::new();
    let mut pending: HashMap<TimerToken, TimerFire> = HashMap::new();

    loop {
        let now = Instant::now();
        while let Some(&Reverse((deadline, token))) = deadlines.peek() {
            if deadline > now {
                break;
            }
            deadlines.pop();
            if let Some(fire) = pending.remove(&token) {
                if !fire.fire() {
                    tracing::debug!(?token, "timer fired after client shut down");
                }
            }
        }

        let cmd = match deadlines.peek() {
            Some(&Reverse((deadline, _))) => match cmd_rx.recv_deadline(deadline) {
                Ok(cmd) => cmd,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match cmd_rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };

        match cmd {
            TimerCmd::Schedule {
                token,
                deadline,
                fire,
            } => {
                deadlines.push(Reverse((deadline, token)));
                pending.insert(token, fire);
            }
            TimerCmd::Cancel(token) => {
                pending.remove(&token);
            }
            TimerCmd::Shutdown => break,
        }
    }
}
