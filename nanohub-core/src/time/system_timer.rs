//! ## nanohub-core::time::system_timer
//! **One-shot hardware timer abstraction**
//!
//! The timer pool arms a single [`SystemTimer`] for its earliest deadline. Implementations may
//! call the expiry callback from any thread; the pool only uses it to defer work onto the loop.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

pub type ExpiryCallback = Arc<dyn Fn() + Send + Sync>;

pub trait SystemTimer: Send + Sync {
    /// Arms the timer, replacing any previous deadline.
    fn set(&self, delay: Duration, on_expiry: ExpiryCallback);

    /// Disarms the timer. A no-op if nothing is armed.
    fn cancel(&self);

    fn is_active(&self) -> bool;
}

#[derive(Default)]
struct TimerState {
    armed: Option<(Instant, ExpiryCallback)>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// [`SystemTimer`] backed by a dedicated thread sleeping on a condition variable.
pub struct StdSystemTimer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl StdSystemTimer {
    pub fn new() -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("nanohub-timer".into())
            .spawn(move || Self::run(&worker_shared))?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    fn run(shared: &Shared) {
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            match state.armed.as_ref().map(|(deadline, _)| *deadline) {
                None => shared.wakeup.wait(&mut state),
                Some(deadline) if Instant::now() >= deadline => {
                    if let Some((_, on_expiry)) = state.armed.take() {
                        MutexGuard::unlocked(&mut state, || on_expiry());
                    }
                }
                Some(deadline) => {
                    shared.wakeup.wait_until(&mut state, deadline);
                }
            }
        }
    }
}

impl SystemTimer for StdSystemTimer {
    fn set(&self, delay: Duration, on_expiry: ExpiryCallback) {
        let deadline = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(u32::MAX as u64));
        self.shared.state.lock().armed = Some((deadline, on_expiry));
        self.shared.wakeup.notify_one();
    }

    fn cancel(&self) {
        self.shared.state.lock().armed = None;
        self.shared.wakeup.notify_one();
    }

    fn is_active(&self) -> bool {
        self.shared.state.lock().armed.is_some()
    }
}

impl Drop for StdSystemTimer {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
