//! Deadline enforcement for running scripts.
//!
//! Each call moves through `Idle -> Armed -> {Completed | Interrupted} -> Idle`.
//! The state lives in one atomic word shared between three parties:
//!
//! - the calling thread arms it before running script and disarms it after;
//! - the watchdog thread flips `Armed -> Interrupted` when the deadline passes;
//! - the engine's interrupt handler polls it at its own safe points and
//!   aborts execution once it reads `Interrupted`.
//!
//! The watchdog thread never touches engine memory. Every arm bumps a
//! generation counter stored in the same word, so a timer that fires for a
//! call that already finished fails its compare-and-swap and is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::millis;
use crate::engine::EngineError;

const STATE_BITS: u64 = 2;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

const IDLE: u64 = 0;
const ARMED: u64 = 1;
const INTERRUPTED: u64 = 2;

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Idle,
    Armed,
    Interrupted,
}

/// How an armed call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call returned before the deadline.
    Completed,
    /// The deadline elapsed and an interrupt was requested.
    Interrupted,
}

/// Shared interrupt flag, polled by the engine's interrupt handler.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone, Default)]
pub struct InterruptSignal {
    /// `generation << STATE_BITS | state`
    word: Arc<AtomicU64>,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the engine should abort the script it is running.
    pub fn is_interrupted(&self) -> bool {
        self.word.load(Ordering::Acquire) & STATE_MASK == INTERRUPTED
    }

    pub fn state(&self) -> WatchdogState {
        match self.word.load(Ordering::Acquire) & STATE_MASK {
            ARMED => WatchdogState::Armed,
            INTERRUPTED => WatchdogState::Interrupted,
            _ => WatchdogState::Idle,
        }
    }

    /// Enter `Armed` under a fresh generation.
    pub(crate) fn arm(&self) -> u64 {
        let previous = self.word.load(Ordering::Acquire);
        let generation = (previous >> STATE_BITS).wrapping_add(1);
        self.word
            .store(pack(generation, ARMED), Ordering::Release);
        generation
    }

    /// `Armed -> Interrupted`, only if `generation` is still the armed one.
    pub(crate) fn fire(&self, generation: u64) -> bool {
        self.word
            .compare_exchange(
                pack(generation, ARMED),
                pack(generation, INTERRUPTED),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Return to `Idle`, reporting how the call ended.
    pub(crate) fn disarm(&self, generation: u64) -> Outcome {
        let previous = self.word.swap(pack(generation, IDLE), Ordering::AcqRel);
        if previous == pack(generation, INTERRUPTED) {
            Outcome::Interrupted
        } else {
            Outcome::Completed
        }
    }
}

fn pack(generation: u64, state: u64) -> u64 {
    (generation << STATE_BITS) | state
}

enum Command {
    Arm { generation: u64, deadline: Instant },
    Disarm { generation: u64 },
    Shutdown,
}

/// Timer thread plus its command channel.
struct TimerThread {
    sender: Sender<Command>,
    handle: JoinHandle<()>,
}

impl TimerThread {
    fn spawn(signal: InterruptSignal) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("kiln-watchdog".to_string())
            .spawn(move || timer_loop(signal, receiver))?;
        Ok(Self { sender, handle })
    }
}

fn timer_loop(signal: InterruptSignal, receiver: mpsc::Receiver<Command>) {
    let mut pending: Option<(u64, Instant)> = None;

    loop {
        let command = match pending {
            Some((generation, deadline)) => {
                let now = Instant::now();
                let received = if now >= deadline {
                    Err(RecvTimeoutError::Timeout)
                } else {
                    receiver.recv_timeout(deadline - now)
                };
                match received {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        if signal.fire(generation) {
                            tracing::warn!(generation, "deadline elapsed, interrupting script");
                        }
                        pending = None;
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Arm { generation, deadline } => pending = Some((generation, deadline)),
            Command::Disarm { generation } => {
                if pending.is_some_and(|(armed, _)| armed == generation) {
                    pending = None;
                }
            }
            Command::Shutdown => break,
        }
    }

    tracing::debug!("watchdog thread stopped");
}

/// Cancellation controller: one per runtime.
///
/// The timer thread is spawned on the first call that carries a deadline and
/// stopped when the watchdog is dropped.
pub struct Watchdog {
    signal: InterruptSignal,
    thread: Mutex<Option<TimerThread>>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            signal: InterruptSignal::new(),
            thread: Mutex::new(None),
        }
    }

    /// Signal to install as the engine's interrupt handler.
    pub fn signal(&self) -> &InterruptSignal {
        &self.signal
    }

    pub fn state(&self) -> WatchdogState {
        self.signal.state()
    }

    /// Arm for one call. Disarms when the returned guard finishes or drops.
    pub fn arm(&self, timeout: Option<Duration>) -> Result<PendingExecution<'_>, EngineError> {
        // A deadline past the end of the clock never fires.
        let Some((timeout, deadline)) =
            timeout.and_then(|t| Instant::now().checked_add(t).map(|d| (t, d)))
        else {
            return Ok(PendingExecution {
                watchdog: self,
                generation: None,
                deadline: None,
            });
        };

        let generation = self.signal.arm();
        let pending = PendingExecution {
            watchdog: self,
            generation: Some(generation),
            deadline: Some(deadline),
        };
        self.send(Command::Arm { generation, deadline })?;
        tracing::debug!(generation, timeout_ms = millis(timeout), "watchdog armed");
        Ok(pending)
    }

    /// Run `f` under a deadline. An interrupted call that failed becomes
    /// [`EngineError::TimedOut`]; a call that completed keeps its result even
    /// if the timer fired just after.
    pub fn run<T>(
        &self,
        timeout: Option<Duration>,
        f: impl FnOnce() -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let pending = self.arm(timeout)?;
        let result = f();
        match (pending.finish(), result) {
            (Outcome::Interrupted, Err(_)) => Err(EngineError::TimedOut),
            (Outcome::Interrupted, Ok(value)) => {
                tracing::debug!("timer fired after completion, ignoring");
                Ok(value)
            }
            (Outcome::Completed, result) => result,
        }
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        let mut guard = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let thread = TimerThread::spawn(self.signal.clone())
                .map_err(|e| EngineError::Engine(format!("failed to spawn watchdog thread: {}", e)))?;
            *guard = Some(thread);
        }
        match guard.as_ref() {
            Some(thread) => thread
                .sender
                .send(command)
                .map_err(|_| EngineError::Engine("watchdog thread is gone".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        let thread = self
            .thread
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            let _ = thread.sender.send(Command::Shutdown);
            if thread.handle.join().is_err() {
                tracing::error!("watchdog thread panicked");
            }
        }
    }
}

/// One in-flight evaluate/call and its deadline.
pub struct PendingExecution<'a> {
    watchdog: &'a Watchdog,
    generation: Option<u64>,
    deadline: Option<Instant>,
}

impl PendingExecution<'_> {
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and report how the call ended.
    pub fn finish(mut self) -> Outcome {
        self.disarm()
    }

    fn disarm(&mut self) -> Outcome {
        let Some(generation) = self.generation.take() else {
            return Outcome::Completed;
        };
        let outcome = self.watchdog.signal.disarm(generation);
        let _ = self.watchdog.send(Command::Disarm { generation });
        outcome
    }
}

impl Drop for PendingExecution<'_> {
    fn drop(&mut self) {
        self.disarm();
    }
}
