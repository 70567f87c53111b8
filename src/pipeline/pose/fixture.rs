use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::{Result, anyhow};

use super::PoseModel;
use crate::types::{Frame, Landmark, PoseFrameResult};

/// Call counters shared between a [`FixturePoseModel`] and whoever handed it
/// to a session.
#[derive(Clone, Debug, Default)]
pub struct FixtureProbe {
    inits: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl FixtureProbe {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Deterministic stand-in for the real network. Replays a canned landmark
/// sequence in a loop, one entry per `infer` call.
#[derive(Debug)]
pub struct FixturePoseModel {
    script: Vec<Option<Vec<Landmark>>>,
    cursor: usize,
    fail_every: Option<usize>,
    init_error: Option<String>,
    probe: FixtureProbe,
}

impl FixturePoseModel {
    pub fn new(script: Vec<Option<Vec<Landmark>>>) -> Self {
        Self {
            script,
            cursor: 0,
            fail_every: None,
            init_error: None,
            probe: FixtureProbe::default(),
        }
    }

    /// A person standing square to the camera, filling the middle of frame.
    pub fn standing() -> Self {
        Self::new(vec![Some(standing_landmarks())])
    }

    /// Every `n`th inference call fails.
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    pub fn failing_init(mut self, message: impl Into<String>) -> Self {
        self.init_error = Some(message.into());
        self
    }

    pub fn probe(&self) -> FixtureProbe {
        self.probe.clone()
    }
}

impl PoseModel for FixturePoseModel {
    fn label(&self) -> &'static str {
        "fixture"
    }

    fn initialize(&mut self) -> Result<()> {
        self.probe.inits.fetch_add(1, Ordering::SeqCst);
        match &self.init_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    fn infer(&mut self, _frame: &Frame, timestamp_ms: u64) -> Result<Option<PoseFrameResult>> {
        let call = self.probe.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every.is_some_and(|n| call % n == 0) {
            return Err(anyhow!("fixture inference failure on call {call}"));
        }
        if self.script.is_empty() {
            return Ok(None);
        }

        let entry = self.script[self.cursor % self.script.len()].clone();
        self.cursor += 1;
        Ok(entry.map(|landmarks| PoseFrameResult {
            landmarks,
            timestamp_ms,
        }))
    }

    fn release(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// 33 normalized points for an upright, front-facing body. The torso spans
/// shoulders at y 0.3 and hips at y 0.6.
pub fn standing_landmarks() -> Vec<Landmark> {
    const POINTS: [(f32, f32, f32); 33] = [
        (0.50, 0.14, -0.10), // nose
        (0.48, 0.12, -0.09),
        (0.47, 0.12, -0.09),
        (0.46, 0.12, -0.09),
        (0.52, 0.12, -0.09),
        (0.53, 0.12, -0.09),
        (0.54, 0.12, -0.09),
        (0.44, 0.13, -0.05),
        (0.56, 0.13, -0.05),
        (0.48, 0.17, -0.08),
        (0.52, 0.17, -0.08),
        (0.40, 0.30, 0.00), // left shoulder
        (0.60, 0.30, 0.00), // right shoulder
        (0.36, 0.44, 0.02),
        (0.64, 0.44, 0.02),
        (0.35, 0.57, 0.00),
        (0.65, 0.57, 0.00),
        (0.34, 0.60, 0.00),
        (0.66, 0.60, 0.00),
        (0.35, 0.61, 0.00),
        (0.65, 0.61, 0.00),
        (0.35, 0.60, 0.00),
        (0.65, 0.60, 0.00),
        (0.42, 0.60, 0.00), // left hip
        (0.58, 0.60, 0.00), // right hip
        (0.43, 0.76, 0.03),
        (0.57, 0.76, 0.03),
        (0.43, 0.92, 0.06),
        (0.57, 0.92, 0.06),
        (0.42, 0.94, 0.07),
        (0.58, 0.94, 0.07),
        (0.45, 0.97, 0.05),
        (0.55, 0.97, 0.05),
    ];
    POINTS
        .iter()
        .map(|&(x, y, z)| Landmark::new(x, y, z, 0.99))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn frame() -> Frame {
        Frame {
            rgba: vec![0; 16],
            width: 2,
            height: 2,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn standing_pose_is_usable() {
        let pose = PoseFrameResult {
            landmarks: standing_landmarks(),
            timestamp_ms: 0,
        };
        assert!(pose.is_usable());
        assert!(pose.torso().is_some());
    }

    #[test]
    fn replays_script_in_order() {
        let mut model = FixturePoseModel::new(vec![Some(standing_landmarks()), None]);
        assert!(model.infer(&frame(), 0).unwrap().is_some());
        assert!(model.infer(&frame(), 1).unwrap().is_none());
        let again = model.infer(&frame(), 2).unwrap().unwrap();
        assert_eq!(again.timestamp_ms, 2);
    }

    #[test]
    fn failure_cadence_counts_every_call() {
        let mut model = FixturePoseModel::standing().failing_every(3);
        let failures = (0..9)
            .filter(|i| model.infer(&frame(), *i).is_err())
            .count();
        assert_eq!(failures, 3);
        assert_eq!(model.probe().calls(), 9);
    }
}
