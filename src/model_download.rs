use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

use crate::config::PoseConfig;

/// A model file that lives at `url` and is cached on disk at `path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSource {
    pub label: &'static str,
    pub url: String,
    pub path: PathBuf,
}

impl ModelSource {
    pub fn pose_landmarker(config: &PoseConfig) -> Self {
        Self {
            label: "pose landmarker",
            url: config.model_url.clone(),
            path: config.model_path.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelDownloadEvent {
    AlreadyPresent,
    Started { total: Option<u64> },
    Progress { downloaded: u64, total: Option<u64> },
    Finished,
}

/// Makes sure the model file exists locally, downloading it when needed.
pub fn ensure_model_ready<F>(source: &ModelSource, mut on_event: F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    if source.path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent);
        on_event(ModelDownloadEvent::Finished);
        return Ok(());
    }

    if let Some(parent) = source.path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    let mut progress: Option<ProgressBar> = None;
    download_to_path(source, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message(format!("{} model ready", source.label));
                }
            }
            ModelDownloadEvent::AlreadyPresent => {}
        }
        on_event(event);
    })
    .with_context(|| format!("failed to download {} model from {}", source.label, source.url))
}

fn download_to_path<F>(source: &ModelSource, on_event: &mut F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    let dest = source.path.as_path();
    log::info!(
        "downloading {} model from {} to {}",
        source.label,
        source.url,
        dest.display()
    );

    let client = Client::new();
    let mut response = client
        .get(&source.url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    on_event(ModelDownloadEvent::Started { total: total_size });

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        on_event(ModelDownloadEvent::Progress {
            downloaded,
            total: total_size,
        });
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    move_into_place(&tmp_path, dest)?;

    on_event(ModelDownloadEvent::Finished);
    Ok(())
}

fn move_into_place(tmp_path: &Path, dest: &Path) -> anyhow::Result<()> {
    fs::rename(tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}
