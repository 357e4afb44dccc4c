//! Lifecycle and behavior scenarios every backend must satisfy.
//!
//! These run against the synthetic backend and small hand-written cameras,
//! so they need no hardware.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cam_interface::factory::{self, TEST_PATTERN};
use cam_interface::validation::{validate_color_bars, validate_frame_sequence};
use cam_interface::{
    BackendProfile, Camera, CameraConfig, CameraDriver, CameraError, CameraExt, Capabilities,
    Control, DeviceCamera, DeviceHandle, Frame, PixelFormat, RawFrame, Resolution, Result,
    TestPatternCamera, TestPatternDriver,
};

fn synthetic(driver: TestPatternDriver) -> TestPatternCamera {
    TestPatternCamera::new(driver, 0, CameraConfig::default())
}

/// A camera whose stream never starts and which counts `close` calls.
#[derive(Default)]
struct BrokenStream {
    open: AtomicBool,
    closes: AtomicUsize,
}

impl Camera for BrokenStream {
    fn name(&self) -> &str {
        "broken-stream"
    }
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
    fn is_streaming(&self) -> bool {
        false
    }
    fn current_config(&self) -> Option<CameraConfig> {
        self.is_open().then(CameraConfig::default)
    }
    fn open(&self, _config: Option<&CameraConfig>) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
    fn start_stream(&self) -> Result<()> {
        Err(CameraError::Open("sensor disconnected".to_owned()))
    }
    fn stop_stream(&self) {}
    fn read(&self, _timeout: Option<Duration>) -> Result<Frame> {
        Err(CameraError::State("camera is not streaming".to_owned()))
    }
    fn flush(&self) {}
    fn capture(&self, _path: Option<&Path>) -> Result<Frame> {
        Err(CameraError::Timeout("failed to capture frame".to_owned()))
    }
    fn set_config(&self, config: &CameraConfig) -> Result<CameraConfig> {
        Ok(config.clone())
    }
    fn capabilities(&self) -> Result<Capabilities> {
        Ok(Capabilities::default())
    }
}

/// A driver whose handles count `release` calls and can panic mid-read.
#[derive(Clone, Default)]
struct CountingDriver {
    releases: Arc<AtomicUsize>,
    panic_on_read: Arc<AtomicBool>,
}

struct CountingHandle {
    driver: CountingDriver,
}

impl CameraDriver for CountingDriver {
    type Handle = CountingHandle;

    fn name(&self, index: u32) -> String {
        format!("counting[{index}]")
    }

    fn open(&self, _index: u32) -> Result<CountingHandle> {
        Ok(CountingHandle {
            driver: self.clone(),
        })
    }
}

impl DeviceHandle for CountingHandle {
    #[allow(clippy::panic)]
    fn read_frame(&mut self, _wait: Duration) -> Option<RawFrame> {
        if self.driver.panic_on_read.load(Ordering::SeqCst) {
            panic!("driver fault while reading");
        }
        Some(RawFrame {
            data: vec![0; 4],
            resolution: Resolution::new(2, 2),
            pixel_format: PixelFormat::Gray8,
        })
    }

    fn grab(&mut self) -> bool {
        true
    }

    fn set_property(&mut self, _control: Control, _value: f64) -> bool {
        false
    }

    fn property(&self, _control: Control) -> Option<f64> {
        None
    }

    fn set_pixel_format(&mut self, _format: PixelFormat) -> bool {
        false
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Gray8
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn release(&mut self) {
        self.driver.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_read_while_idle_fails_fast() {
    let camera = synthetic(TestPatternDriver::new().stalled());
    camera.open(None).expect("open failed");

    let started = Instant::now();
    let result = camera.read(Some(Duration::from_secs(5)));

    assert!(matches!(result, Err(CameraError::State(_))));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_read_while_closed_fails() {
    let camera = synthetic(TestPatternDriver::new());
    assert!(matches!(camera.read(None), Err(CameraError::State(_))));
    assert!(matches!(camera.start_stream(), Err(CameraError::State(_))));
    assert!(matches!(
        camera.set_config(&CameraConfig::default()),
        Err(CameraError::State(_))
    ));
    assert!(matches!(camera.capture(None), Err(CameraError::State(_))));
}

#[test]
fn test_close_is_idempotent() {
    let camera = synthetic(TestPatternDriver::new());
    camera.close();

    camera.open(None).expect("open failed");
    camera.start_stream().expect("start_stream failed");
    camera.close();
    camera.close();

    assert!(!camera.is_open());
    assert!(!camera.is_streaming());
    assert!(camera.current_config().is_none());
}

#[test]
fn test_open_twice_keeps_config() {
    let camera = synthetic(TestPatternDriver::new());
    let small = CameraConfig::default().with_resolution(Resolution::new(320, 240));
    camera.open(Some(&small)).expect("open failed");
    camera.open(None).expect("second open failed");

    let config = camera.current_config().expect("camera should be open");
    assert_eq!(config.resolution, Resolution::new(320, 240));
}

#[test]
fn test_reopen_after_close() {
    let camera = synthetic(TestPatternDriver::new());
    camera.open(None).expect("open failed");
    camera.close();
    camera.open(None).expect("reopen failed");
    camera.start_stream().expect("start_stream failed");

    let frame = camera.read(None).expect("read failed");
    assert_eq!(frame.sequence, 0);
}

#[test]
fn test_open_failure_leaves_camera_closed() {
    let camera = synthetic(TestPatternDriver::new().unavailable());

    assert!(matches!(camera.open(None), Err(CameraError::Open(_))));
    assert!(!camera.is_open());
    assert!(camera.current_config().is_none());
}

#[test]
fn test_set_config_reaches_fixed_point() {
    let camera = synthetic(TestPatternDriver::new());
    camera.open(None).expect("open failed");

    let request = CameraConfig {
        resolution: Resolution::new(1000, 700),
        framerate: 24.0,
        pixel_format: PixelFormat::Yuv420,
        hflip: true,
        auto_white_balance: false,
        wb_gain_r: Some(9.0),
        wb_gain_b: Some(1.5),
        ..CameraConfig::default()
    };

    let applied = camera.set_config(&request).expect("set_config failed");
    assert_eq!(applied.resolution, Resolution::new(1280, 720));
    assert!((applied.framerate - 30.0).abs() < f64::EPSILON);
    assert_eq!(applied.wb_gain_r, Some(4.0));
    assert_eq!(camera.current_config().as_ref(), Some(&applied));

    let again = camera.set_config(&applied).expect("set_config failed");
    assert_eq!(again, applied);
}

#[test]
fn test_config_helpers() {
    let camera = synthetic(TestPatternDriver::new());
    camera.open(None).expect("open failed");

    let config = camera.set_resolution(640, 480).expect("set_resolution failed");
    assert_eq!(config.resolution, Resolution::new(640, 480));

    let config = camera
        .set_exposure(false, Some(20_000), Some(400))
        .expect("set_exposure failed");
    assert!(!config.auto_exposure);
    assert_eq!(config.exposure_time_us, Some(20_000));
    assert_eq!(config.iso, Some(400));

    let config = camera.set_focus(false, Some(2.5)).expect("set_focus failed");
    assert_eq!(config.focus_distance_m, Some(2.5));
    assert_eq!(config.resolution, Resolution::new(640, 480));

    let config = camera.set_roi(0.25, 0.25, 0.5, 0.5).expect("set_roi failed");
    assert!(config.roi.is_some());
    let config = camera.clear_roi().expect("clear_roi failed");
    assert!(config.roi.is_none());

    camera.close();
    assert!(matches!(camera.set_framerate(60.0), Err(CameraError::State(_))));
}

#[test]
fn test_stalled_read_times_out_within_bounds() {
    let camera = synthetic(TestPatternDriver::new().stalled());
    camera.open(None).expect("open failed");
    camera.start_stream().expect("start_stream failed");

    let timeout = Duration::from_millis(350);
    let started = Instant::now();
    let result = camera.read(Some(timeout));
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(CameraError::Timeout(_))));
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(
        elapsed < timeout + Duration::from_millis(250),
        "overran timeout: {elapsed:?}"
    );
    assert!(camera.is_streaming());
}

#[test]
fn test_session_closes_once_when_start_fails() {
    let camera = BrokenStream::default();

    let result = camera.session().and_then(|session| session.start_stream());

    assert!(matches!(result, Err(CameraError::Open(_))));
    assert_eq!(camera.closes.load(Ordering::SeqCst), 1);
    assert!(!camera.is_open());
}

#[test]
fn test_session_stops_and_closes() {
    let camera = synthetic(TestPatternDriver::new());
    {
        let session = camera.session().expect("session failed");
        session.start_stream().expect("start_stream failed");
        session.read(None).expect("read failed");
    }
    assert!(!camera.is_streaming());
    assert!(!camera.is_open());
}

#[test]
fn test_streaming_scenario_640x480() {
    let camera = synthetic(TestPatternDriver::new());
    let config = CameraConfig::default().with_resolution(Resolution::new(640, 480));
    camera.open(Some(&config)).expect("open failed");
    camera.start_stream().expect("start_stream failed");
    camera.flush();

    let frames: Vec<Frame> = (0..30)
        .map(|_| {
            camera
                .read(Some(Duration::from_secs_f64(2.0)))
                .expect("read failed")
        })
        .collect();
    for frame in &frames {
        assert_eq!(frame.resolution(), Resolution::new(640, 480));
        assert_eq!(frame.pixel_format, PixelFormat::Bgr);
        assert_eq!(frame.channels, 3);
        assert_eq!(frame.data.len(), 640 * 480 * 3);
    }
    validate_frame_sequence(&frames).expect("frames should be consecutive");
    validate_color_bars(&frames[0]).expect("frame should show color bars");

    let path = std::env::temp_dir()
        .join(format!("cam-interface-contract-{}.jpg", std::process::id()));
    let still = camera.capture(Some(&path)).expect("capture failed");
    assert_eq!(still.resolution(), Resolution::new(640, 480));
    assert!(path.exists());
    std::fs::remove_file(&path).expect("cleanup failed");

    camera.stop_stream();
    camera.close();
    assert!(matches!(camera.capabilities(), Err(CameraError::State(_))));
}

#[test]
fn test_capture_without_streaming() {
    let camera = synthetic(TestPatternDriver::new());
    camera.open(None).expect("open failed");

    let frame = camera.capture(None).expect("capture failed");
    assert!(!camera.is_streaming());
    assert_eq!(frame.resolution(), CameraConfig::default().resolution);
}

#[test]
fn test_capture_from_stalled_source_times_out() {
    let camera = synthetic(TestPatternDriver::new().stalled());
    camera.open(None).expect("open failed");
    assert!(matches!(camera.capture(None), Err(CameraError::Timeout(_))));
}

#[test]
fn test_frames_end_when_stream_stops() {
    let camera = synthetic(TestPatternDriver::new().stalled());
    camera.open(None).expect("open failed");
    camera.start_stream().expect("start_stream failed");

    let started = Instant::now();
    let yielded = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(150));
            camera.stop_stream();
        });
        camera.frames(None).count()
    });

    assert_eq!(yielded, 0);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(camera.is_open());
}

#[test]
fn test_concurrent_readers_get_distinct_frames() {
    let camera = synthetic(TestPatternDriver::fixed(Resolution::new(64, 48), 30.0));
    camera.open(None).expect("open failed");
    camera.start_stream().expect("start_stream failed");

    let sequences: Vec<u64> = thread::scope(|scope| {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    (0..10)
                        .map(|_| camera.read(None).expect("read failed").sequence)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        readers
            .into_iter()
            .flat_map(|reader| reader.join().expect("reader panicked"))
            .collect()
    });

    let unique: HashSet<u64> = sequences.iter().copied().collect();
    assert_eq!(unique.len(), 40);
}

#[test]
fn test_capabilities_while_open() {
    let camera = synthetic(TestPatternDriver::new());
    assert!(matches!(camera.capabilities(), Err(CameraError::State(_))));

    camera.open(None).expect("open failed");
    let caps = camera.capabilities().expect("capabilities failed");
    assert!(caps.resolutions.contains(&Resolution::new(640, 480)));
    assert!(caps.pixel_formats.contains(&PixelFormat::Gray8));
    assert!(caps.roi_supported);
}

#[test]
fn test_factory_unknown_backend() {
    let result = factory::create(&BackendProfile::new("picamera2"));
    assert!(matches!(result, Err(CameraError::Config(_))));
}

#[test]
fn test_factory_applies_profile_defaults() {
    let mut profile = BackendProfile::new(TEST_PATTERN);
    profile.hardware.device_index = 1;
    profile.hardware.default_resolution = Resolution::new(320, 240);
    profile.hardware.default_framerate = 15.0;

    let camera = factory::create(&profile).expect("create failed");
    assert_eq!(camera.name(), "TestPattern[1]");

    camera.open(None).expect("open failed");
    let config = camera.current_config().expect("camera should be open");
    assert_eq!(config.resolution, Resolution::new(320, 240));
    assert!((config.framerate - 15.0).abs() < f64::EPSILON);
}

#[test]
fn test_capture_save_failure_is_persist_error() {
    let camera = synthetic(TestPatternDriver::new());
    camera.open(None).expect("open failed");
    camera.start_stream().expect("start_stream failed");

    let path = std::env::temp_dir().join("cam-interface-contract.unknownext");
    let result = camera.capture(Some(&path));

    assert!(matches!(result, Err(CameraError::Persist(_))));
    assert!(camera.is_open());
    assert!(camera.is_streaming());
    camera.read(None).expect("stream should keep delivering frames");
}

#[test]
fn test_frames_end_after_read_timeout() {
    let camera = synthetic(TestPatternDriver::new().stalled());
    camera.open(None).expect("open failed");
    camera.start_stream().expect("start_stream failed");

    let results: Vec<_> = camera.frames(Some(Duration::from_millis(10))).take(3).collect();

    assert_eq!(results.len(), 1);
    assert!(matches!(results.first(), Some(Err(CameraError::Timeout(_)))));
    assert!(camera.is_streaming());
}

#[test]
fn test_full_frame_roi_reads_back_as_none() {
    let camera = synthetic(TestPatternDriver::new());
    let config = CameraConfig::default().with_resolution(Resolution::new(1920, 1080));
    camera.open(Some(&config)).expect("open failed");

    let applied = camera.set_roi(0.0, 0.0, 1.0, 1.0).expect("set_roi failed");
    assert!(applied.roi.is_none());

    let applied = camera.set_roi(0.0, 0.5, 1.0, 0.5).expect("set_roi failed");
    let roi = applied.roi.expect("bottom half should be kept");
    assert!((roi.y + roi.height - 1.0).abs() < 1e-9);
    assert!([roi.x, roi.y, roi.width, roi.height]
        .iter()
        .all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_drop_releases_device_once() {
    let driver = CountingDriver::default();
    let releases = Arc::clone(&driver.releases);

    let camera = DeviceCamera::new(driver, 0, CameraConfig::default());
    camera.open(None).expect("open failed");
    camera.start_stream().expect("start_stream failed");
    camera.read(None).expect("read failed");
    drop(camera);

    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_recovers_after_driver_panic() {
    let driver = CountingDriver::default();
    let releases = Arc::clone(&driver.releases);
    let panic_on_read = Arc::clone(&driver.panic_on_read);

    let camera = DeviceCamera::new(driver, 0, CameraConfig::default());
    camera.open(None).expect("open failed");
    camera.start_stream().expect("start_stream failed");

    panic_on_read.store(true, Ordering::SeqCst);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| camera.read(None)));
    assert!(outcome.is_err());
    panic_on_read.store(false, Ordering::SeqCst);

    camera.close();
    assert!(!camera.is_open());
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    camera.open(None).expect("reopen after panic failed");
    camera.start_stream().expect("start_stream failed");
    let frame = camera.read(None).expect("read failed");
    assert_eq!(frame.sequence, 0);
}
