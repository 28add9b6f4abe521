//! Continuous detection loop feeding the live overlay.
//!
//! Each tick asks the engine for one detection and hands the result to a
//! [`Renderer`]. Detection goes through the engine mailbox, so the loop
//! never overlaps with an enroll or authenticate call.

use crate::engine::{EngineError, EngineHandle};
use meshid_core::LandmarkSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Interval, MissedTickBehavior};

/// Paces the loop, one tick per display refresh.
pub trait TickSource: Send {
    /// Wait for the next tick. Returns `false` once no more ticks will come.
    fn tick(&mut self) -> impl Future<Output = bool> + Send;
}

/// Wall-clock ticks at a fixed refresh rate. Late ticks are skipped, not
/// bunched up.
pub struct IntervalTicks(Interval);

impl IntervalTicks {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self(interval)
    }
}

impl TickSource for IntervalTicks {
    async fn tick(&mut self) -> bool {
        self.0.tick().await;
        true
    }
}

/// Manually driven ticks: one per message, exhausted when all senders drop.
impl TickSource for mpsc::Receiver<()> {
    async fn tick(&mut self) -> bool {
        self.recv().await.is_some()
    }
}

/// Receives the landmarks of every tick, or `None` when no face was found.
pub trait Renderer: Send {
    fn render(&mut self, landmarks: Option<&LandmarkSet>);
}

/// Overlay stand-in that reports face presence through tracing.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    frames: u64,
    face_visible: bool,
}

impl Renderer for TracingRenderer {
    fn render(&mut self, landmarks: Option<&LandmarkSet>) {
        self.frames += 1;
        match landmarks {
            Some(set) => {
                if !self.face_visible {
                    tracing::info!(frame = self.frames, points = set.len(), "face in view");
                }
                tracing::trace!(frame = self.frames, points = set.len(), "overlay");
            }
            None if self.face_visible => {
                tracing::info!(frame = self.frames, "face lost");
            }
            None => {}
        }
        self.face_visible = landmarks.is_some();
    }
}

#[derive(Default)]
struct Cancellation {
    cancelled: AtomicBool,
    wake: Notify,
}

impl Cancellation {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Handle to a running detection loop.
pub struct SchedulerHandle<R> {
    cancel: Arc<Cancellation>,
    task: JoinHandle<R>,
}

impl<R> SchedulerHandle<R> {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop to stop. An in-flight detection still completes,
    /// but its result is not rendered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the loop to exit, returning its renderer.
    pub async fn stop(self) -> Result<R, JoinError> {
        self.cancel();
        self.task.await
    }

    /// Wait for the loop to exit on its own.
    #[cfg(test)]
    pub async fn join(self) -> Result<R, JoinError> {
        self.task.await
    }
}

pub struct DetectionScheduler;

impl DetectionScheduler {
    /// Spawn the loop. It runs until cancelled, until the tick source is
    /// exhausted, or until the engine reports the session is gone.
    pub fn start<T, R>(engine: EngineHandle, ticks: T, renderer: R) -> SchedulerHandle<R>
    where
        T: TickSource + 'static,
        R: Renderer + 'static,
    {
        let cancel = Arc::new(Cancellation::default());
        let task = tokio::spawn(run(engine, ticks, renderer, Arc::clone(&cancel)));
        SchedulerHandle { cancel, task }
    }
}

async fn run<T, R>(
    engine: EngineHandle,
    mut ticks: T,
    mut renderer: R,
    cancel: Arc<Cancellation>,
) -> R
where
    T: TickSource,
    R: Renderer,
{
    tracing::info!("detection loop running");
    let mut ticks_seen = 0u64;

    loop {
        let more = tokio::select! {
            more = ticks.tick() => more,
            _ = cancel.wake.notified() => false,
        };
        if !more {
            tracing::debug!("tick source exhausted");
            break;
        }
        if cancel.is_cancelled() {
            break;
        }
        ticks_seen += 1;

        match engine.detect().await {
            Ok(landmarks) => {
                if cancel.is_cancelled() {
                    tracing::debug!("cancelled during detection; result discarded");
                    break;
                }
                renderer.render(landmarks.as_ref());
            }
            Err(EngineError::SessionNotReady(state)) => {
                tracing::info!(%state, "session no longer active");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "engine unavailable");
                break;
            }
        }
    }

    tracing::info!(ticks = ticks_seen, "detection loop stopped");
    renderer
}
