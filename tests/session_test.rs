use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use image::{Rgba, RgbaImage};
use tryon_mirror::{
    Product, Session, SessionDeps, SessionError, SessionState, TryOnConfig,
    pipeline::{
        CameraError, CaptureConstraints, CaptureDevice, CaptureStream, DefaultFetcher,
        FixturePoseModel, TickOutcome,
    },
    types::Frame,
};

/// Camera that always shows the same grey picture.
struct StillCamera {
    size: (u32, u32),
    live: Arc<AtomicUsize>,
}

struct StillStream {
    size: (u32, u32),
    live: Arc<AtomicUsize>,
    stopped: bool,
}

impl CaptureDevice for StillCamera {
    fn label(&self) -> String {
        "still camera".to_string()
    }

    fn open(&self, _constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>, CameraError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StillStream {
            size: self.size,
            live: Arc::clone(&self.live),
            stopped: false,
        }))
    }
}

impl CaptureStream for StillStream {
    fn wait_for_metadata(
        &mut self,
        _timeout: Duration,
        _cancel: &AtomicBool,
    ) -> Result<(u32, u32), CameraError> {
        Ok(self.size)
    }

    fn latest_frame(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        let (width, height) = self.size;
        let image = RgbaImage::from_pixel(width, height, Rgba([90, 90, 90, 255]));
        Some(Frame {
            rgba: image.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
        })
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        if !self.stopped {
            self.stopped = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn garment_file(dir: &tempfile::TempDir) -> String {
    let path = dir.path().join("garment.png");
    RgbaImage::from_pixel(16, 20, Rgba([20, 60, 200, 255]))
        .save(&path)
        .unwrap();
    format!("file://{}", path.display())
}

fn build_session(image: String, live: Arc<AtomicUsize>) -> Session {
    let product = Product {
        image,
        ..Product::default()
    };
    Session::new(product, &TryOnConfig::default(), SessionDeps {
        pose_model: Box::new(FixturePoseModel::standing()),
        capture_device: Arc::new(StillCamera {
            size: (320, 240),
            live,
        }),
        fetcher: Arc::new(DefaultFetcher::new().unwrap()),
    })
}

#[test]
fn mount_start_draw_stop() {
    let dir = tempfile::tempdir().unwrap();
    let live = Arc::new(AtomicUsize::new(0));
    let mut session = build_session(garment_file(&dir), Arc::clone(&live));
    let updates = session.subscribe();

    session.mount();
    assert!(session.settle(Duration::from_secs(5)));
    assert_eq!(session.snapshot().start_label(), "Start Camera");

    session.start_camera().unwrap();
    assert_eq!(session.snapshot().start_label(), "Starting Camera...");
    assert!(session.settle(Duration::from_secs(5)));
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.snapshot().start_label(), "Stop Camera");

    let report = match session.tick(Instant::now()) {
        TickOutcome::Rendered(report) => report,
        other => panic!("expected a draw, got {other:?}"),
    };
    assert!(report.background && report.skeleton);
    let placement = report.garment.unwrap();
    assert!((placement.center_x - 160.0).abs() < 1e-3);
    assert!((placement.center_y - 72.0).abs() < 1e-3);
    assert!((placement.width - 128.0).abs() < 1e-3);
    assert!((placement.height - 144.0).abs() < 1e-3);

    let output = session.output();
    assert_eq!((output.width(), output.height()), (320, 240));
    assert_eq!(output.rgba().len(), 320 * 240 * 4);

    assert_eq!(session.stop_camera().len(), 3);
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert_eq!(session.state(), SessionState::Ready);

    let states: Vec<SessionState> = updates.try_iter().map(|s| s.state).collect();
    for expected in [
        SessionState::Idle,
        SessionState::Initializing,
        SessionState::Ready,
        SessionState::Starting,
        SessionState::Active,
    ] {
        assert!(states.contains(&expected), "missing {expected} in {states:?}");
    }
    assert_eq!(states.last(), Some(&SessionState::Ready));
}

#[test]
fn unreadable_garment_keeps_start_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let missing = format!("file://{}", dir.path().join("nope.png").display());
    let live = Arc::new(AtomicUsize::new(0));
    let mut session = build_session(missing, Arc::clone(&live));

    session.mount();
    assert!(session.settle(Duration::from_secs(5)));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert!(!snapshot.garment_ready);
    assert!(!snapshot.can_start);
    assert!(snapshot.garment_error.unwrap().contains("nope.png"));
    assert!(matches!(
        session.start_camera(),
        Err(SessionError::GarmentNotReady)
    ));
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn dropping_an_active_session_releases_the_camera() {
    let dir = tempfile::tempdir().unwrap();
    let live = Arc::new(AtomicUsize::new(0));
    let mut session = build_session(garment_file(&dir), Arc::clone(&live));
    session.mount();
    assert!(session.settle(Duration::from_secs(5)));
    session.start_camera().unwrap();
    assert!(session.settle(Duration::from_secs(5)));
    assert_eq!(live.load(Ordering::SeqCst), 1);

    drop(session);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}
