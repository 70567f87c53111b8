use std::time::{Duration, Instant};

use super::{
    camera::{CaptureStream, VideoSurface},
    compositor::DrawReport,
};
use crate::types::Frame;

/// Receiver of accepted ticks. Inference and drawing happen here, inside the
/// tick, so one tick never overlaps another.
pub trait FrameSink {
    /// Called before `render` whenever the video's native size changes.
    fn resize(&mut self, width: u32, height: u32);

    fn render(&mut self, frame: &Frame, timestamp_ms: u64) -> DrawReport;
}

/// Identifies the next pending tick. Each re-schedule issues a new handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickHandle(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled(TickHandle),
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    NotScheduled,
    /// The surface has no displayable frame yet.
    NoFrame,
    /// Too soon after the last accepted tick; nothing was done.
    Throttled,
    Rendered(DrawReport),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub no_frame: u64,
    pub throttled: u64,
    pub rendered: u64,
}

/// Per-refresh tick driver that throttles accepted ticks to a fixed interval.
#[derive(Debug)]
pub struct FrameScheduler {
    interval: Duration,
    state: SchedulerState,
    next_handle: u64,
    origin: Option<Instant>,
    last_accepted: Option<Instant>,
    surface_size: Option<(u32, u32)>,
    stats: TickStats,
}

impl FrameScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: SchedulerState::Idle,
            next_handle: 0,
            origin: None,
            last_accepted: None,
            surface_size: None,
            stats: TickStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self.state, SchedulerState::Scheduled(_))
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Requests the first tick of a new run.
    pub fn schedule(&mut self, now: Instant) -> TickHandle {
        if let SchedulerState::Scheduled(handle) = self.state {
            return handle;
        }
        self.origin = Some(now);
        self.last_accepted = None;
        self.surface_size = None;
        self.stats = TickStats::default();
        self.reschedule()
    }

    /// Cancels the pending tick. Returns `true` only for the call that
    /// actually cancelled something.
    pub(super) fn cancel(&mut self) -> bool {
        match self.state {
            SchedulerState::Scheduled(handle) => {
                log::debug!("cancelled frame tick {}", handle.0);
                self.state = SchedulerState::Cancelled;
                true
            }
            SchedulerState::Idle | SchedulerState::Cancelled => false,
        }
    }

    fn reschedule(&mut self) -> TickHandle {
        self.next_handle += 1;
        let handle = TickHandle(self.next_handle);
        self.state = SchedulerState::Scheduled(handle);
        handle
    }

    /// Runs the pending tick. Every branch re-schedules until cancelled.
    pub fn tick(
        &mut self,
        now: Instant,
        surface: &mut VideoSurface,
        stream: &mut dyn CaptureStream,
        sink: &mut dyn FrameSink,
    ) -> TickOutcome {
        if !self.is_scheduled() {
            return TickOutcome::NotScheduled;
        }
        self.stats.ticks += 1;

        let outcome = self.run_tick(now, surface, stream, sink);
        self.reschedule();
        outcome
    }

    fn run_tick(
        &mut self,
        now: Instant,
        surface: &mut VideoSurface,
        stream: &mut dyn CaptureStream,
        sink: &mut dyn FrameSink,
    ) -> TickOutcome {
        surface.refresh(stream);
        let Some(frame) = surface.current() else {
            self.stats.no_frame += 1;
            return TickOutcome::NoFrame;
        };

        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.interval {
                self.stats.throttled += 1;
                return TickOutcome::Throttled;
            }
        }
        self.last_accepted = Some(now);

        let size = (frame.width, frame.height);
        if self.surface_size != Some(size) {
            log::debug!("output surface resized to {}x{}", size.0, size.1);
            sink.resize(size.0, size.1);
            self.surface_size = Some(size);
        }

        let origin = *self.origin.get_or_insert(now);
        let timestamp_ms = now.saturating_duration_since(origin).as_millis() as u64;
        let report = sink.render(frame, timestamp_ms);
        self.stats.rendered += 1;
        TickOutcome::Rendered(report)
    }
}
