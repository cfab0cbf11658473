//! Worker thread lifecycle shared by the FIC runner and every subchannel.
//!
//! start() signals the worker to process the staged frame, join() waits for
//! it to finish the current frame, stop() is cooperative: it closes the
//! barriers, wakes the worker and waits for the thread to exit. A pending
//! frame completes; nothing new is accepted afterwards.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::barrier::Barrier;

pub struct BasicThreadedChannel {
    start_barrier: Arc<Barrier<bool>>,
    join_barrier: Arc<Barrier<bool>>,
    runner_thread: Option<JoinHandle<()>>,
}

impl BasicThreadedChannel {
    /// Spawns the worker. The closure runs once per start() signal.
    pub fn new(name: String, mut on_run: impl FnMut() + Send + 'static) -> Self {
        let start_barrier = Arc::new(Barrier::new(false));
        let join_barrier = Arc::new(Barrier::new(true));

        let runner_thread = std::thread::Builder::new()
            .name(name)
            .spawn({
                let start_barrier = start_barrier.clone();
                let join_barrier = join_barrier.clone();
                move || loop {
                    if start_barrier.wait(|is_start| *is_start).is_err() {
                        break;
                    }
                    let _ = start_barrier.set(false);
                    on_run();
                    if join_barrier.set(true).is_err() {
                        break;
                    }
                }
            })
            .expect("Worker threads must spawn");

        Self {
            start_barrier,
            join_barrier,
            runner_thread: Some(runner_thread),
        }
    }

    /// True when the worker has finished its most recent frame.
    pub fn is_idle(&self) -> bool {
        self.join_timeout(Duration::ZERO)
    }

    /// Signals the worker to process the currently staged frame.
    pub fn start(&self) {
        let _ = self.join_barrier.set(false);
        let _ = self.start_barrier.set(true);
    }

    /// Waits for the worker to finish the current frame.
    pub fn join(&self) {
        let _ = self.join_barrier.wait(|is_join| *is_join);
    }

    /// Waits up to the timeout; returns false when the worker is still busy.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        match self.join_barrier.wait_timeout(|is_join| *is_join, timeout) {
            Ok(satisfied) => satisfied,
            Err(_) => true,
        }
    }

    /// Cooperative shutdown: close the barriers and wait for the thread.
    pub fn stop(&mut self) {
        self.start_barrier.close();
        self.join_barrier.close();
        if let Some(runner_thread) = self.runner_thread.take() {
            let _ = runner_thread.join();
        }
    }
}

impl Drop for BasicThreadedChannel {
    fn drop(&mut self) {
        self.stop();
    }
}
