#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::sync::Arc;

use anyhow::Result;
use gpui::Application;
use tryon_mirror::{
    Session, SessionDeps, TryOnConfig,
    pipeline::{self, DefaultFetcher},
    ui,
};

fn main() -> Result<()> {
    env_logger::init();

    let config = TryOnConfig::load();
    let product = config.product.clone();
    log::info!(
        "try-on for '{}' ({}) at {:.0} fps inference",
        product.name,
        product.display_price(),
        config.pose.target_fps
    );

    match pipeline::available_cameras() {
        Ok(cameras) if cameras.is_empty() => log::warn!("no cameras detected"),
        Ok(cameras) => {
            for camera in &cameras {
                log::info!("camera {}: {}", camera.index, camera.label);
            }
        }
        Err(err) => log::warn!("failed to enumerate cameras: {err:?}"),
    }

    let deps = SessionDeps {
        pose_model: pipeline::model_from_config(&config.pose),
        capture_device: Arc::new(pipeline::NokhwaDevice::new(config.camera.device_index)),
        fetcher: Arc::new(DefaultFetcher::new()?),
    };
    let session = Session::new(product, &config, deps);

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, session) {
                log::error!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}
