use std::{fs, time::Duration};

use tryon_mirror::{TryOnConfig, config::PoseBackendKind};

#[test]
fn reads_every_section_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tryon.toml");
    fs::write(
        &path,
        r#"
[camera]
device_index = 2
width = 640
height = 480
metadata_timeout_ms = 2500

[pose]
backend = "fixture"
target_fps = 10.0
min_pose_presence = 0.7

[overlay]
garment_opacity = 0.6
draw_skeleton = false

[product]
id = 7
name = "Linen Shirt"
price = "39.00"
image = "file:///tmp/linen.png"
"#,
    )
    .unwrap();

    let config = TryOnConfig::from_file(&path).unwrap();
    assert_eq!(config.camera.device_index, 2);
    assert_eq!((config.camera.width, config.camera.height), (640, 480));
    assert_eq!(config.camera.metadata_timeout(), Duration::from_millis(2500));
    assert_eq!(config.pose.backend, PoseBackendKind::Fixture);
    assert_eq!(config.pose.frame_interval(), Duration::from_millis(100));
    assert_eq!(config.pose.min_pose_presence, 0.7);
    assert_eq!(config.overlay.garment_opacity, 0.6);
    assert_eq!(config.overlay.garment_scale, 2.0);
    assert!(!config.overlay.draw_skeleton);
    assert_eq!(config.product.id, 7);
    assert_eq!(config.product.display_price(), "$39.00");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    assert!(TryOnConfig::from_file(&path).is_err());
    let config = TryOnConfig::load_from_path(&path);
    assert_eq!(config.camera.width, 1280);
    assert_eq!(config.camera.height, 720);
    assert_eq!(config.camera.metadata_timeout(), Duration::from_secs(10));
    assert_eq!(config.pose.backend, PoseBackendKind::Ort);
    assert_eq!(config.overlay.garment_opacity, 0.8);
    assert_eq!(config.product.name, "Classic Cotton T-Shirt");
}

#[test]
fn malformed_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[pose\ntarget_fps = ").unwrap();

    let err = TryOnConfig::from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.toml"));
    assert_eq!(TryOnConfig::load_from_path(&path).pose.target_fps, 15.0);
}
