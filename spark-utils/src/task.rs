//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// A handle to an asynchronous task created by [`Task::spawn`].
///
/// Dropping the handle cancels the task unless [`Task::detach`] was called
/// first.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle to a one-shot timer task created by [`TimeoutTask::new`].
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimeoutTask {
    _task: Task<()>,
    control: UnboundedSender<TimerSignal>,
}

/// A handle to a periodic timer task created by [`IntervalTask::new`].
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct IntervalTask {
    _task: Task<()>,
    control: UnboundedSender<TimerSignal>,
}

#[derive(Debug)]
enum TimerSignal {
    // Restart the timer, optionally with a new duration.
    Restart(Option<Duration>),
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future.in_current_span()),
            detached: false,
        }
    }

    /// Spawns a task that is restarted whenever it panics.
    ///
    /// Long-running receive loops exposed to network input should not bring
    /// down the whole instance on a single bad packet; the worker is
    /// respawned and the offending input is lost.
    pub fn spawn_supervised<F, Fut>(spawn_fn: F) -> Task<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let join_handle = task::spawn(
            async move {
                loop {
                    let worker = Task::spawn(spawn_fn());
                    match worker.await {
                        Ok(_) => break,
                        Err(error) if error.is_panic() => {
                            error!("task panicked, restarting...");
                            continue;
                        }
                        Err(error) => {
                            error!(%error, "task failed");
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        );
        Task {
            join_handle,
            detached: false,
        }
    }

    /// Detaches the task so it keeps running after the handle is dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a task that invokes the provided async closure once the given
    /// timeout expires.
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let task = Task::spawn(async move {
            let sleep = time::sleep(timeout);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    // Timeout has expired.
                    _ = &mut sleep => {
                        (cb)().await;
                        break;
                    }
                    signal = control_rx.recv() => {
                        match signal {
                            // Timeout has been refreshed.
                            Some(TimerSignal::Restart(new_timeout)) => {
                                let timeout = new_timeout.unwrap_or(timeout);
                                sleep.as_mut().reset(Instant::now() + timeout);
                            }
                            // Timeout has been aborted.
                            None => break,
                        }
                    }
                }
            }
        });

        TimeoutTask {
            _task: task,
            control: control_tx,
        }
    }

    /// Restarts the timeout, regardless of whether it has already expired.
    ///
    /// When no new duration is given, the previous one is reused.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        if self.control.send(TimerSignal::Restart(timeout)).is_err() {
            error!("failed to reset timeout");
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a task that invokes the provided async closure on every tick of
    /// the given interval.
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let task = Task::spawn(async move {
            let mut ticker = if tick_on_start {
                time::interval(interval)
            } else {
                time::interval_at(Instant::now() + interval, interval)
            };

            loop {
                tokio::select! {
                    // Interval timer has ticked.
                    _ = ticker.tick() => {
                        (cb)().await;
                    }
                    signal = control_rx.recv() => {
                        match signal {
                            // Interval has been updated.
                            Some(TimerSignal::Restart(new_interval)) => {
                                let interval = new_interval.unwrap_or(interval);
                                ticker = time::interval_at(
                                    Instant::now() + interval,
                                    interval,
                                );
                            }
                            // Interval has been aborted.
                            None => break,
                        }
                    }
                }
            }
        });

        IntervalTask {
            _task: task,
            control: control_tx,
        }
    }

    /// Restarts the interval timer.
    ///
    /// When no new duration is given, the previous one is reused.
    pub fn reset(&mut self, interval: Option<Duration>) {
        if self.control.send(TimerSignal::Restart(interval)).is_err() {
            error!("failed to reset interval");
        }
    }
}
