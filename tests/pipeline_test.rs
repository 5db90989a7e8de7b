//! Integration tests for the cache-and-playback pipeline.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{video_bytes, TestHarness};
use reelcache::headless::{HeadlessPlayer, ReportSource};
use reelcache::streaming::testing::{PlayerCall, SilentTransport};
use reelcache::streaming::{
    cache_key, Completion, FetchOutcome, LoadingRequest, PlaybackController, PlaybackOptions,
    PlaybackState,
};
use reelcache_common::{Dimensions, FetchError, VideoGravity};
use reqwest::Url;

const URL: &str = "https://x/video.mp4";

// ---------------------------------------------------------------------------
// Cache miss and hit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn miss_streams_with_single_fetch() {
    let body = video_bytes(10_000);
    let h = TestHarness::scripted();
    let mut controller = h.controller();

    let state = controller
        .configure(URL, Some("mp4"), Dimensions::new(1080, 1920))
        .await
        .unwrap();
    assert_eq!(state, PlaybackState::RemoteStreaming);

    // The player's reads join the fetch the controller already started
    let first = h.read(0, 2);
    let second = h.read(5000, 3000);
    h.transport.wait_for_fetches(1).await;
    let script = h.transport.script(0).unwrap();
    script.headers("video/mp4", Some(body.len() as u64));
    for chunk in body.chunks(1500) {
        script.chunk(chunk);
    }
    script.complete();

    let first = first.collect().await;
    assert_eq!(first.data, &body[..2]);
    assert_eq!(first.completion, Some(Completion::Satisfied));

    let second = second.collect().await;
    assert_eq!(second.data, &body[5000..8000]);
    assert_eq!(second.completion, Some(Completion::Satisfied));

    let outcome = controller.wait_for_download().await.unwrap();
    assert!(outcome.is_cached());
    assert_eq!(h.transport.fetch_count(), 1);
    assert_eq!(h.transport.fetched_urls()[0].as_str(), URL);
    assert!(h.is_cached(URL));
}

#[tokio::test]
async fn second_configure_hits_cache() {
    let body = video_bytes(4096);
    let h = TestHarness::canned(&body, 1024);
    let mut controller = h.controller();

    controller
        .configure(URL, Some("mp4"), Dimensions::new(1080, 1920))
        .await
        .unwrap();
    assert!(controller.wait_for_download().await.unwrap().is_cached());
    assert_eq!(h.transport.fetch_count(), 1);

    let state = controller
        .configure(URL, Some("mp4"), Dimensions::new(1080, 1920))
        .await
        .unwrap();
    assert_eq!(state, PlaybackState::LocalPlayback);
    assert_eq!(h.transport.fetch_count(), 1);
    assert!(controller.wait_for_download().await.is_none());

    let calls = h.player.calls();
    let path = h.store.path_for(&cache_key(&Url::parse(URL).unwrap()), "mp4");
    assert!(calls.contains(&PlayerCall::LoadLocal(path.clone(), VideoGravity::ResizeAspectFill)));
    assert_eq!(std::fs::read(path).unwrap(), body);
}

#[tokio::test]
async fn differently_spelled_url_shares_one_entry() {
    let body = video_bytes(4096);
    let h = TestHarness::canned(&body, 1024);
    let mut controller = h.controller();

    controller
        .configure("HTTPS://X:443/video.mp4", Some("mp4"), Dimensions::new(1, 1))
        .await
        .unwrap();
    assert!(controller.wait_for_download().await.unwrap().is_cached());
    assert!(h.is_cached("HTTPS://X/video.mp4"));
    assert!(h.is_cached(URL));

    let state = controller
        .configure(URL, Some("mp4"), Dimensions::new(1, 1))
        .await
        .unwrap();
    assert_eq!(state, PlaybackState::LocalPlayback);
    assert_eq!(h.transport.fetch_count(), 1);
}

#[tokio::test]
async fn missing_extension_uses_default() {
    let body = video_bytes(100);
    let h = TestHarness::canned(&body, 100);
    let mut controller = h.controller();

    controller.configure(URL, None, Dimensions::new(1, 1)).await.unwrap();
    let entry = assert_matches!(
        controller.wait_for_download().await,
        Some(FetchOutcome::Cached(entry)) => entry
    );
    assert_eq!(entry.extension, "mp4");
}

// ---------------------------------------------------------------------------
// Failure and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_failure_aborts_pending_reads_and_skips_cache() {
    let body = video_bytes(8192);
    let h = TestHarness::scripted();
    let mut controller = h.controller();
    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();

    h.transport.wait_for_fetches(1).await;
    let script = h.transport.script(0).unwrap();
    script.headers("video/mp4", Some(8192));
    script.chunk(&body[..4096]);

    let beyond_a = h.read(5000, 1000);
    let beyond_b = h.read(7000, 1192);
    script.fail(FetchError::network("connection reset"));

    for events in [beyond_a, beyond_b] {
        let outcome = events.collect().await;
        assert!(outcome.data.is_empty());
        assert_eq!(outcome.completion, Some(Completion::Aborted));
        assert_eq!(outcome.finish_count, 1);
    }

    assert_matches!(
        controller.wait_for_download().await,
        Some(FetchOutcome::Failed(FetchError::Network(_)))
    );
    assert!(!h.is_cached(URL));
    assert!(h.store.entries().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_finishes_every_pending_read_exactly_once() {
    let h = TestHarness::scripted();
    let mut controller = h.controller_with(Arc::new(SilentTransport));
    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();

    let reads: Vec<_> = (0..16).map(|i| h.read(i * 512, 512)).collect();
    controller.cancel();
    controller.cancel();
    assert_eq!(controller.state(), PlaybackState::Disposed);

    for events in reads {
        let outcome = events.collect().await;
        assert_eq!(outcome.finish_count, 1);
        assert_eq!(outcome.completion, Some(Completion::Aborted));
        assert!(outcome.data.is_empty());
    }
    assert!(h.store.entries().unwrap().is_empty());
}

#[tokio::test]
async fn dropping_controller_tears_down_fetch() {
    let h = TestHarness::scripted();
    let mut controller = h.controller();
    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();
    let pending = h.read(0, 100);

    h.transport.wait_for_fetches(1).await;
    let script = h.transport.script(0).unwrap();
    drop(controller);

    assert_eq!(pending.collect().await.completion, Some(Completion::Aborted));
    while !script.is_closed() {
        tokio::task::yield_now().await;
    }
    assert!(h.player.calls().contains(&PlayerCall::Unload));
}

#[tokio::test]
async fn player_cancelled_read_gets_no_completion() {
    let h = TestHarness::scripted();
    let mut controller = h.controller();
    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();

    let (url, loader) = h.intercepted();
    let (request, mut events) = LoadingRequest::data(url, 1000, Some(10));
    let id = request.id();
    assert!(loader.on_schedule(request));
    loader.on_cancel(id);
    // Cancelling twice is harmless
    loader.on_cancel(id);

    controller.cancel();
    let outcome = events.drain_now();
    assert_eq!(outcome.finish_count, 0);
}

// ---------------------------------------------------------------------------
// Edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_after_completion_is_served_from_memory() {
    let body = video_bytes(6000);
    let h = TestHarness::canned(&body, 2048);
    let mut controller = h.controller();
    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();
    assert!(controller.wait_for_download().await.unwrap().is_cached());

    let outcome = h.read(4000, 2000).collect().await;
    assert_eq!(outcome.data, &body[4000..]);
    assert_eq!(outcome.completion, Some(Completion::Satisfied));
    assert_eq!(h.transport.fetch_count(), 1);
}

#[tokio::test]
async fn truncated_download_is_not_cached() {
    let h = TestHarness::scripted();
    let mut controller = h.controller();
    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();

    h.transport.wait_for_fetches(1).await;
    let script = h.transport.script(0).unwrap();
    script.headers("video/mp4", Some(10_000));
    script.chunk(&video_bytes(7000));
    script.complete();

    assert_matches!(
        controller.wait_for_download().await,
        Some(FetchOutcome::Uncached { bytes: 7000, .. })
    );
    assert!(!h.is_cached(URL));
}

#[tokio::test]
async fn foreign_scheme_is_declined() {
    let h = TestHarness::scripted();
    let mut controller = h.controller();
    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();

    let (_, loader) = h.intercepted();
    let (request, mut events) = LoadingRequest::data(Url::parse(URL).unwrap(), 0, Some(10));
    assert!(!loader.on_schedule(request));
    assert_eq!(events.drain_now().finish_count, 0);
}

#[tokio::test]
async fn concurrent_reads_each_complete_once() {
    let body = video_bytes(64 * 1024);
    let h = TestHarness::scripted();
    let mut controller = h.controller();
    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();
    h.transport.wait_for_fetches(1).await;
    let script = h.transport.script(0).unwrap();
    script.headers("video/mp4", Some(body.len() as u64));

    let (url, loader) = h.intercepted();
    let mut readers = Vec::new();
    for i in 0..8u64 {
        let url = url.clone();
        let loader = loader.clone();
        readers.push(std::thread::spawn(move || {
            (0..8u64)
                .map(|j| {
                    let offset = (i * 8 + j) * 1024;
                    let (request, events) = LoadingRequest::data(url.clone(), offset, Some(1024));
                    assert!(loader.on_schedule(request));
                    (offset, events)
                })
                .collect::<Vec<_>>()
        }));
    }

    for chunk in body.chunks(3000) {
        script.chunk(chunk);
    }
    script.complete();

    for reader in readers {
        for (offset, events) in reader.join().unwrap() {
            let outcome = events.collect().await;
            let start = offset as usize;
            assert_eq!(outcome.data, &body[start..start + 1024]);
            assert_eq!(outcome.finish_count, 1);
            assert_eq!(outcome.completion, Some(Completion::Satisfied));
        }
    }
}

// ---------------------------------------------------------------------------
// Headless player
// ---------------------------------------------------------------------------

#[tokio::test]
async fn headless_player_reads_through_interceptor_and_fills_cache() {
    let body = video_bytes(50_000);
    let h = TestHarness::canned(&body, 4096);
    let out = h.dir.path().join("played.bin");
    let player = HeadlessPlayer::new(2, 8192).with_output(&out);
    let mut controller = PlaybackController::new(
        player,
        h.store.clone(),
        h.transport.clone(),
        PlaybackOptions::default(),
    );

    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();
    controller.play();
    let report = controller.player_mut().finished().await.unwrap();

    assert_eq!(report.bytes, 50_000);
    assert_eq!(report.source, ReportSource::Streamed("streaming://x/video.mp4".into()));
    assert_eq!(std::fs::read(&out).unwrap(), body);
    assert!(controller.player().is_looping());
    assert!(controller.wait_for_download().await.unwrap().is_cached());

    // Second play comes from disk
    controller.configure(URL, None, Dimensions::new(1, 2)).await.unwrap();
    let report = controller.player_mut().finished().await.unwrap();
    assert_matches!(report.source, ReportSource::Local(_));
    assert_eq!(report.bytes, 50_000);
    assert_eq!(h.transport.fetch_count(), 1);
}
