//! Player without a screen.
//!
//! [`HeadlessPlayer`] reads an item the way a platform player does: a small
//! info+data probe first, then sequential range requests until the content
//! length is reached. Received bytes can be written to a file. It backs the
//! `fetch` command and exercises the interception path end to end in tests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use reelcache_common::VideoGravity;
use reqwest::Url;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::config::PlaybackConfig;
use crate::streaming::{Completion, LoadingRequest, Player, PlayerSource, ResourceLoader};

/// What the headless player did with the last loaded item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackReport {
    pub source: ReportSource,
    pub content_type: Option<String>,
    pub bytes: u64,
    /// Loading requests issued (0 for local files).
    pub requests: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum ReportSource {
    Local(PathBuf),
    Streamed(String),
}

/// Reads every byte of the loaded item through the player seam.
pub struct HeadlessPlayer {
    probe_bytes: u64,
    chunk_size: u64,
    output: Option<PathBuf>,
    looping: bool,
    playing: bool,
    gravity: Option<VideoGravity>,
    task: Option<JoinHandle<Result<PlaybackReport>>>,
}

impl HeadlessPlayer {
    pub fn new(probe_bytes: u64, chunk_size: u64) -> Self {
        Self {
            probe_bytes: probe_bytes.max(1),
            chunk_size: chunk_size.max(1),
            output: None,
            looping: false,
            playing: false,
            gravity: None,
            task: None,
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(config.probe_bytes, config.chunk_size)
    }

    /// Write the bytes of every loaded item to `path`.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn gravity(&self) -> Option<VideoGravity> {
        self.gravity
    }

    /// Wait until the loaded item has been read completely.
    pub async fn finished(&mut self) -> Result<PlaybackReport> {
        let task = self.task.take().context("No item loaded")?;
        task.await.context("Headless reader task failed")?
    }
}

impl Player for HeadlessPlayer {
    fn load(&mut self, source: PlayerSource, gravity: VideoGravity) {
        self.unload();
        self.gravity = Some(gravity);

        let output = self.output.clone();
        let task = match source {
            PlayerSource::Local(path) => tokio::spawn(read_local(path, output)),
            PlayerSource::Intercepted { url, loader } => tokio::spawn(read_intercepted(
                url,
                loader,
                self.probe_bytes,
                self.chunk_size,
                output,
            )),
        };
        self.task = Some(task);
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn unload(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.playing = false;
    }

    fn seek_to_start(&mut self) {
        tracing::trace!("Headless player seek to start");
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }
}

impl Drop for HeadlessPlayer {
    fn drop(&mut self) {
        self.unload();
    }
}

async fn open_output(output: Option<PathBuf>) -> Result<Option<tokio::fs::File>> {
    match output {
        Some(path) => {
            let file = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("Failed to create output file: {:?}", path))?;
            Ok(Some(file))
        }
        None => Ok(None),
    }
}

async fn read_local(path: PathBuf, output: Option<PathBuf>) -> Result<PlaybackReport> {
    let metadata = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("Failed to read cached file: {:?}", path))?;

    if let Some(output) = output {
        tokio::fs::copy(&path, &output)
            .await
            .with_context(|| format!("Failed to copy {:?} to {:?}", path, output))?;
    }

    Ok(PlaybackReport {
        source: ReportSource::Local(path),
        content_type: None,
        bytes: metadata.len(),
        requests: 0,
    })
}

async fn read_intercepted(
    url: Url,
    loader: Arc<dyn ResourceLoader>,
    probe_bytes: u64,
    chunk_size: u64,
    output: Option<PathBuf>,
) -> Result<PlaybackReport> {
    let mut sink = open_output(output).await?;

    let (probe, events) = LoadingRequest::info_and_data(url.clone(), 0, Some(probe_bytes));
    if !loader.on_schedule(probe) {
        anyhow::bail!("Loader declined {}", url);
    }
    let first = events.collect().await;
    let info = first
        .info
        .clone()
        .with_context(|| format!("No content information for {}", url))?;
    let total = info.content_length;

    let mut offset = first.data.len() as u64;
    let mut requests = 1;
    if let Some(sink) = sink.as_mut() {
        sink.write_all(&first.data).await?;
    }
    let mut ended = first.completion == Some(Completion::Aborted);

    while !ended && total.map_or(true, |total| offset < total) {
        let length = match total {
            Some(total) => chunk_size.min(total - offset),
            None => chunk_size,
        };
        let (request, events) = LoadingRequest::data(url.clone(), offset, Some(length));
        if !loader.on_schedule(request) {
            anyhow::bail!("Loader declined {}", url);
        }
        requests += 1;

        let outcome = events.collect().await;
        if let Some(sink) = sink.as_mut() {
            sink.write_all(&outcome.data).await?;
        }
        offset += outcome.data.len() as u64;
        ended = outcome.completion != Some(Completion::Satisfied);
    }

    if let Some(total) = total {
        if offset < total {
            anyhow::bail!("Stream of {} ended at {} of {} bytes", url, offset, total);
        }
    }
    if let Some(sink) = sink.as_mut() {
        sink.flush().await?;
    }

    tracing::debug!(url = %url, bytes = offset, requests, "Headless player read item");

    Ok(PlaybackReport {
        source: ReportSource::Streamed(url.to_string()),
        content_type: info.content_type,
        bytes: offset,
        requests,
    })
}
