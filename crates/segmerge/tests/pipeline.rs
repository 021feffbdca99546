use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aes::Aes128;
use async_trait::async_trait;
use bytes::Bytes;
use cipher::block_padding::NoPadding;
use cipher::{BlockEncryptMut, KeyIvInit};
use parking_lot::Mutex;
use tempfile::TempDir;

use tokio_util::sync::CancellationToken;

use segmerge_engine::hls::merger::{Merger, Remuxer};
use segmerge_engine::hls::playlist::SegmentState;
use segmerge_engine::hls::progress::{ProgressAggregator, ProgressCallback};
use segmerge_engine::hls::task::{PlaylistTask, TaskContext};
use segmerge_engine::hls::DedupRegistry;
use segmerge_engine::{
    DownloadRequest, HlsConfig, HlsDownloader, HlsDownloaderError, OutputFormat, TaskOutcome,
    Transport,
};

const FIXTURE_KEY: [u8; 16] = *b"segmerge-key-016";
const FIXTURE_IV: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
];

/// In-memory origin: per-URL bodies, scripted failures and delays.
#[derive(Default)]
struct MockServer {
    bodies: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<String, u32>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl MockServer {
    fn serve(&self, url: &str, body: impl Into<Bytes>) {
        self.bodies.lock().insert(url.to_string(), body.into());
    }

    fn fail(&self, url: &str, times: u32) {
        self.failures.lock().insert(url.to_string(), times);
    }

    fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().insert(url.to_string(), delay);
    }

    fn calls(&self, url: &str) -> u32 {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    async fn respond(&self, url: &str) -> Result<Bytes, HlsDownloaderError> {
        *self.calls.lock().entry(url.to_string()).or_default() += 1;
        let delay = self.delays.lock().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = {
            let mut failures = self.failures.lock();
            match failures.get_mut(url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining = remaining.saturating_sub(1);
                    true
                }
                _ => false,
            }
        };
        if failing {
            return Err(HlsDownloaderError::StatusError {
                url: url.to_string(),
                status: 503,
            });
        }

        self.bodies
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| HlsDownloaderError::StatusError {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[async_trait]
impl Transport for MockServer {
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, HlsDownloaderError> {
        self.respond(url).await
    }

    async fn fetch_to_file(&self, url: &str, path: &Path) -> Result<u64, HlsDownloaderError> {
        match self.respond(url).await {
            Ok(body) => {
                tokio::fs::write(path, &body).await?;
                Ok(body.len() as u64)
            }
            Err(e) => {
                // Leave a truncated body behind, like a dropped connection.
                let _ = tokio::fs::write(path, b"partial").await;
                Err(e)
            }
        }
    }
}

/// Copies the input, standing in for ffmpeg.
struct CopyRemuxer;

#[async_trait]
impl Remuxer for CopyRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), HlsDownloaderError> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn test_config(cleanup: bool) -> HlsConfig {
    HlsConfig::builder()
        .download_workers(4)
        .decrypt_workers(2)
        .segment_retry_delay(Duration::from_millis(1))
        .key_retry_delay(Duration::from_millis(1))
        .playlist_retry_delay(Duration::from_millis(1))
        .cleanup_intermediates(cleanup)
        .build()
}

fn downloader(server: &Arc<MockServer>, config: HlsConfig) -> HlsDownloader {
    HlsDownloader::with_transport(config, Arc::clone(server) as Arc<dyn Transport>)
        .with_remuxer(Arc::new(CopyRemuxer))
}

/// A single task wired the way the downloader wires one playlist attempt.
fn playlist_task(
    server: &Arc<MockServer>,
    registry: &Arc<DedupRegistry>,
    url: &str,
    dir: PathBuf,
) -> Arc<PlaylistTask> {
    let config = Arc::new(test_config(true));
    let merger = Arc::new(Merger::new(
        config.merge_config.clone(),
        Arc::new(CopyRemuxer),
    ));
    let progress = Arc::new(ProgressAggregator::new(
        None,
        config.progress_config.batch_size,
    ));
    let context = Arc::new(TaskContext {
        config,
        transport: Arc::clone(server) as Arc<dyn Transport>,
        registry: Arc::clone(registry),
        merger,
    });
    Arc::new(PlaylistTask::new(
        url,
        dir,
        context,
        progress,
        CancellationToken::new(),
    ))
}

fn delay_fingerprint(server: &MockServer, host: &str, delay: Duration) {
    for i in 0..3 {
        server.delay(&format!("https://{host}/media/seg{i}.ts"), delay);
    }
}

fn dir_entries(path: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    entries
}

fn segment_body(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_mul(31).wrapping_add((i % 251) as u8))
        .collect()
}

fn encrypt(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    let aligned = plain.len() - plain.len() % 16;
    let mut out = cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
        .unwrap()
        .encrypt_padded_vec_mut::<NoPadding>(&plain[..aligned]);
    out.extend_from_slice(&plain[aligned..]);
    out
}

/// Serves a playlist at `https://<host>/media/index.m3u8` with relative
/// segment references, returning the playlist URL.
fn publish(
    server: &MockServer,
    host: &str,
    bodies: &[Vec<u8>],
    key: Option<(&[u8; 16], &[u8; 16])>,
) -> String {
    let origin = format!("https://{host}");
    let mut manifest = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n");
    if let Some((key, iv)) = key {
        manifest.push_str(&format!(
            "#EXT-X-KEY:METHOD=AES-128,URI=\"keys/k.bin\",IV=0x{}\n",
            hex::encode(iv)
        ));
        server.serve(&format!("{origin}/keys/k.bin"), key.to_vec());
    }
    for (i, body) in bodies.iter().enumerate() {
        manifest.push_str("#EXTINF:10.0,\n");
        manifest.push_str(&format!("media/seg{i}.ts\n"));
        let payload = match key {
            Some((key, iv)) => encrypt(body, key, iv),
            None => body.clone(),
        };
        server.serve(&format!("{origin}/media/seg{i}.ts"), payload);
    }
    manifest.push_str("#EXT-X-ENDLIST\n");

    let url = format!("{origin}/media/index.m3u8");
    server.serve(&url, manifest);
    url
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (Arc::new(move |p| sink.lock().push(p)), seen)
}

fn assert_non_decreasing(values: &[u8]) {
    assert!(
        values.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {values:?}"
    );
}

#[tokio::test]
async fn every_segment_is_downloaded_and_merged_in_order() {
    init_tracing();
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..7).map(|i| segment_body(i, 100 + i as usize * 37)).collect();
    let url = publish(&server, "plain.test", &bodies, None);

    let request = DownloadRequest::new(vec![url], out.path()).with_title("Plain Clip");
    let outcome = downloader(&server, test_config(false))
        .download(request, None)
        .await
        .unwrap();

    let dir = out.path().join("Plain Clip");
    assert_eq!(outcome, TaskOutcome::Produced(dir.join("Plain Clip.ts")));
    for (i, body) in bodies.iter().enumerate() {
        let raw = std::fs::metadata(dir.join(format!("segment_{i}.ts"))).unwrap();
        assert_eq!(raw.len(), body.len() as u64);
    }
    assert_eq!(std::fs::read(outcome.path()).unwrap(), bodies.concat());
}

#[tokio::test]
async fn encrypted_fixture_merges_to_expected_bytes() {
    init_tracing();
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    // The last segment ends with a 5-byte remainder that stays plaintext.
    let bodies = vec![
        segment_body(1, 188 * 4),
        segment_body(2, 188 * 3),
        segment_body(3, 1024),
        segment_body(4, 16 * 10 + 5),
    ];
    let url = publish(
        &server,
        "fixture.test",
        &bodies,
        Some((&FIXTURE_KEY, &FIXTURE_IV)),
    );

    let request = DownloadRequest::new(vec![url], out.path()).with_title("fixture");
    let outcome = downloader(&server, test_config(true))
        .download(request, None)
        .await
        .unwrap();

    let merged = std::fs::read(outcome.path()).unwrap();
    assert_eq!(merged, bodies.concat());
    assert_eq!(&merged[merged.len() - 5..], &bodies[3][16 * 10..]);
    assert_eq!(server.calls("https://fixture.test/keys/k.bin"), 1);

    let dir = out.path().join("fixture");
    for i in 0..4 {
        assert!(!dir.join(format!("segment_{i}.ts")).exists());
        assert!(!dir.join(format!("decrypt_{i}.ts")).exists());
    }
}

#[tokio::test]
async fn known_answer_block_decrypts() {
    // NIST SP 800-38A, F.2.1 CBC-AES128, first block.
    let key: [u8; 16] = hex::decode("2b7e151628aed2a6abf7158809cf4f3c")
        .unwrap()
        .try_into()
        .unwrap();
    let iv: [u8; 16] = hex::decode("000102030405060708090a0b0c0d0e0f")
        .unwrap()
        .try_into()
        .unwrap();
    let cipher_block = hex::decode("7649abac8119b246cee98e9b12e9197d").unwrap();
    let plain_block = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let url = publish(&server, "nist.test", &[plain_block.clone()], Some((&key, &iv)));
    assert_eq!(
        server.respond("https://nist.test/media/seg0.ts").await.unwrap(),
        Bytes::from(cipher_block)
    );

    let outcome = downloader(&server, test_config(true))
        .download(DownloadRequest::new(vec![url], out.path()), None)
        .await
        .unwrap();
    assert_eq!(outcome.path(), out.path().join("video").join("video.ts"));
    assert_eq!(std::fs::read(outcome.path()).unwrap(), plain_block);
}

#[tokio::test]
async fn merge_order_ignores_completion_order() {
    init_tracing();
    let bodies: Vec<_> = (0..6).map(|i| segment_body(i + 10, 16 * 8 + 3)).collect();

    let mut merged = Vec::new();
    for reverse in [false, true] {
        let out = TempDir::new().unwrap();
        let server = Arc::new(MockServer::default());
        let url = publish(
            &server,
            "order.test",
            &bodies,
            Some((&FIXTURE_KEY, &FIXTURE_IV)),
        );
        if reverse {
            // Later segments finish first.
            for i in 0..bodies.len() {
                let delay = Duration::from_millis(10 * (bodies.len() - i) as u64);
                server.delay(&format!("https://order.test/media/seg{i}.ts"), delay);
            }
        }

        let outcome = downloader(&server, test_config(true))
            .download(DownloadRequest::new(vec![url], out.path()), None)
            .await
            .unwrap();
        merged.push(std::fs::read(outcome.path()).unwrap());
    }

    assert_eq!(merged[0], merged[1]);
    assert_eq!(merged[0], bodies.concat());
}

#[tokio::test]
async fn exhausted_segment_fails_task_and_leaves_no_file() {
    init_tracing();
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..5).map(|i| segment_body(i, 64)).collect();
    let url = publish(&server, "broken.test", &bodies, None);
    let broken = "https://broken.test/media/seg3.ts";
    server.fail(broken, u32::MAX);

    let result = downloader(&server, test_config(false))
        .download(
            DownloadRequest::new(vec![url], out.path()).with_title("broken"),
            None,
        )
        .await;

    assert!(matches!(
        result,
        Err(HlsDownloaderError::SegmentExhausted {
            index: 3,
            attempts: 6
        })
    ));
    assert_eq!(server.calls(broken), 6);
    let dir = out.path().join("broken");
    assert!(!dir.join("segment_3.ts").exists());
    assert!(dir.join("segment_0.ts").exists());
    assert!(!dir.join("broken.ts").exists());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..3).map(|i| segment_body(i, 48)).collect();
    let url = publish(&server, "flaky.test", &bodies, None);
    server.fail("https://flaky.test/media/seg1.ts", 5);
    server.fail(&url, 2);

    let outcome = downloader(&server, test_config(true))
        .download(DownloadRequest::new(vec![url], out.path()), None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(outcome.path()).unwrap(), bodies.concat());
    assert_eq!(server.calls("https://flaky.test/media/seg1.ts"), 6);
}

#[tokio::test]
async fn progress_is_monotonic_and_finishes_once() {
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..12).map(|i| segment_body(i, 16 * 4)).collect();
    let url = publish(
        &server,
        "progress.test",
        &bodies,
        Some((&FIXTURE_KEY, &FIXTURE_IV)),
    );
    let (callback, seen) = recorder();

    downloader(&server, test_config(true))
        .download(DownloadRequest::new(vec![url], out.path()), Some(callback))
        .await
        .unwrap();

    let values = seen.lock().clone();
    assert_non_decreasing(&values);
    assert_eq!(values.first(), Some(&20));
    assert_eq!(values.last(), Some(&100));
    assert_eq!(values.iter().filter(|&&p| p == 100).count(), 1);
    assert!(values.contains(&60) && values.contains(&90));
    // Batched: far fewer reports than completed units.
    assert!(values.len() < 12);
}

#[tokio::test]
async fn remux_produces_requested_container() {
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..2).map(|i| segment_body(i, 32)).collect();
    let url = publish(&server, "remux.test", &bodies, None);
    let config = HlsConfig::builder()
        .output_format(OutputFormat::Mp4)
        .segment_retry_delay(Duration::from_millis(1))
        .build();
    let (callback, seen) = recorder();

    let outcome = downloader(&server, config)
        .download(
            DownloadRequest::new(vec![url], out.path()).with_title("clip"),
            Some(callback),
        )
        .await
        .unwrap();

    let dir = out.path().join("clip");
    assert_eq!(outcome, TaskOutcome::Produced(dir.join("clip.mp4")));
    assert!(!dir.join("clip.ts").exists());
    assert!(seen.lock().contains(&95));
}

#[tokio::test]
async fn fallback_url_is_tried_after_failure() {
    init_tracing();
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..4).map(|i| segment_body(i, 80)).collect();
    let primary = publish(&server, "primary.test", &bodies, None);
    server.fail("https://primary.test/media/seg2.ts", u32::MAX);
    let mirror = publish(&server, "mirror.test", &bodies, None);
    let (callback, seen) = recorder();

    let outcome = downloader(&server, test_config(true))
        .download(
            DownloadRequest::new(vec![primary, mirror], out.path()).with_title("fallback"),
            Some(callback),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(outcome.path()).unwrap(), bodies.concat());
    let values = seen.lock().clone();
    let restart = values.iter().rposition(|&p| p == 0).unwrap();
    assert!(values[..restart].iter().all(|&p| p < 100));
    assert_non_decreasing(&values[restart..]);
    assert_eq!(values.last(), Some(&100));
}

#[tokio::test]
async fn empty_playlist_is_fatal() {
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let url = "https://empty.test/index.m3u8";
    server.serve(url, "#EXTM3U\n#EXT-X-ENDLIST\n");

    let result = downloader(&server, test_config(true))
        .download(DownloadRequest::new(vec![url.to_string()], out.path()), None)
        .await;

    assert!(matches!(result, Err(HlsDownloaderError::EmptyPlaylist(_))));
    assert_eq!(server.calls(url), 1);
}

#[tokio::test]
async fn duplicate_pair_keeps_one_output_under_the_longer_name() {
    init_tracing();
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..8).map(|i| segment_body(i + 40, 16 * 6 + 7)).collect();
    let short_url = publish(
        &server,
        "short.test",
        &bodies,
        Some((&FIXTURE_KEY, &FIXTURE_IV)),
    );
    let long_url = publish(
        &server,
        "long.test",
        &bodies,
        Some((&FIXTURE_KEY, &FIXTURE_IV)),
    );

    let requests = vec![
        DownloadRequest::new(vec![short_url], out.path()).with_title("clip"),
        DownloadRequest::new(vec![long_url], out.path()).with_title("clip extended"),
    ];
    let results = downloader(&server, test_config(true))
        .download_batch(requests, None)
        .await;

    let outcomes: Vec<TaskOutcome> = results.into_iter().map(|r| r.unwrap()).collect();
    let produced = outcomes
        .iter()
        .filter(|o| matches!(o, TaskOutcome::Produced(_)))
        .count();
    assert_eq!(produced, 1, "{outcomes:?}");

    let survivor = out.path().join("clip extended");
    assert!(!out.path().join("clip").exists());
    let media = survivor.join("clip extended.ts");
    assert_eq!(std::fs::read(&media).unwrap(), bodies.concat());

    let entries: Vec<PathBuf> = std::fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries, vec![survivor]);
}

#[tokio::test]
async fn distinct_content_is_not_deduplicated() {
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let first: Vec<_> = (0..4).map(|i| segment_body(i, 40)).collect();
    let second: Vec<_> = (0..4).map(|i| segment_body(i + 100, 40)).collect();
    let a = publish(&server, "a.test", &first, None);
    let b = publish(&server, "b.test", &second, None);

    let requests = vec![
        DownloadRequest::new(vec![a], out.path()),
        DownloadRequest::new(vec![b], out.path()),
    ];
    let results = downloader(&server, test_config(true))
        .download_batch(requests, None)
        .await;

    assert_eq!(
        results[0].as_ref().unwrap(),
        &TaskOutcome::Produced(out.path().join("video").join("video.ts"))
    );
    assert_eq!(
        results[1].as_ref().unwrap(),
        &TaskOutcome::Produced(out.path().join("video (2)").join("video (2).ts"))
    );
}

#[tokio::test]
async fn segment_states_follow_each_phase() {
    init_tracing();
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..5).map(|i| segment_body(i, 16 * 3 + 1)).collect();
    let url = publish(&server, "states.test", &bodies, Some((&FIXTURE_KEY, &FIXTURE_IV)));
    let registry = Arc::new(DedupRegistry::new());

    let task = playlist_task(&server, &registry, &url, out.path().join("states"));
    assert!(task.segment_states().is_empty());

    let outcome = Arc::clone(&task).run().await.unwrap();
    assert!(!outcome.is_removed());
    assert_eq!(task.segment_states(), vec![SegmentState::Decrypted; 5]);
}

#[tokio::test]
async fn exhausted_segment_is_the_only_failed_state() {
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..4).map(|i| segment_body(i, 40)).collect();
    let url = publish(&server, "gap.test", &bodies, None);
    server.fail("https://gap.test/media/seg2.ts", u32::MAX);
    let registry = Arc::new(DedupRegistry::new());

    let task = playlist_task(&server, &registry, &url, out.path().join("gap"));
    let result = Arc::clone(&task).run().await;

    assert!(matches!(
        result,
        Err(HlsDownloaderError::SegmentExhausted { index: 2, .. })
    ));
    assert_eq!(
        task.segment_states(),
        vec![
            SegmentState::Downloaded,
            SegmentState::Downloaded,
            SegmentState::DownloadFailed,
            SegmentState::Downloaded,
        ]
    );
}

#[tokio::test]
async fn yielding_task_marks_every_segment_removed() {
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..4).map(|i| segment_body(i + 7, 40)).collect();
    let first = publish(&server, "first.test", &bodies, None);
    let second = publish(&server, "second.test", &bodies, None);
    let registry = Arc::new(DedupRegistry::new());

    let owner = playlist_task(&server, &registry, &first, out.path().join("longer title"));
    let owned = Arc::clone(&owner).run().await.unwrap();
    let media = out.path().join("longer title").join("longer title.ts");
    assert_eq!(owned, TaskOutcome::Produced(media.clone()));

    let duplicate = playlist_task(&server, &registry, &second, out.path().join("short"));
    let outcome = Arc::clone(&duplicate).run().await.unwrap();

    assert!(outcome.is_removed());
    assert_eq!(outcome.path(), out.path().join("longer title"));
    assert_eq!(duplicate.segment_states(), vec![SegmentState::Removed; 4]);
    assert!(!out.path().join("short").exists());
    assert_eq!(std::fs::read(media).unwrap(), bodies.concat());
}

#[tokio::test]
async fn shorter_duplicate_arriving_later_yields() {
    init_tracing();
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..6).map(|i| segment_body(i + 60, 16 * 5 + 2)).collect();
    let short_url = publish(&server, "late.test", &bodies, Some((&FIXTURE_KEY, &FIXTURE_IV)));
    let long_url = publish(&server, "early.test", &bodies, Some((&FIXTURE_KEY, &FIXTURE_IV)));
    delay_fingerprint(&server, "late.test", Duration::from_millis(100));

    let requests = vec![
        DownloadRequest::new(vec![short_url], out.path()).with_title("clip"),
        DownloadRequest::new(vec![long_url], out.path()).with_title("clip extended"),
    ];
    let results = downloader(&server, test_config(true))
        .download_batch(requests, None)
        .await;

    let survivor = out.path().join("clip extended");
    let media = survivor.join("clip extended.ts");
    assert_eq!(
        results[0].as_ref().unwrap(),
        &TaskOutcome::Removed {
            owner: survivor.clone()
        }
    );
    assert_eq!(results[1].as_ref().unwrap(), &TaskOutcome::Produced(media.clone()));
    assert_eq!(std::fs::read(&media).unwrap(), bodies.concat());
    assert_eq!(dir_entries(out.path()), vec![survivor]);
}

#[tokio::test]
async fn longer_duplicate_takes_over_a_running_output() {
    init_tracing();
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..8).map(|i| segment_body(i + 80, 16 * 4 + 9)).collect();
    let short_url = publish(&server, "owner.test", &bodies, Some((&FIXTURE_KEY, &FIXTURE_IV)));
    let long_url = publish(&server, "promoter.test", &bodies, Some((&FIXTURE_KEY, &FIXTURE_IV)));
    // The owner registers at once but is still downloading when the
    // longer-named duplicate arrives.
    for i in 3..bodies.len() {
        server.delay(
            &format!("https://owner.test/media/seg{i}.ts"),
            Duration::from_millis(200),
        );
    }
    delay_fingerprint(&server, "promoter.test", Duration::from_millis(50));

    let requests = vec![
        DownloadRequest::new(vec![short_url], out.path()).with_title("clip"),
        DownloadRequest::new(vec![long_url], out.path()).with_title("clip extended"),
    ];
    let results = downloader(&server, test_config(true))
        .download_batch(requests, None)
        .await;

    let survivor = out.path().join("clip extended");
    let media = survivor.join("clip extended.ts");
    assert!(matches!(results[0], Ok(TaskOutcome::Produced(_))));
    assert_eq!(results[1].as_ref().unwrap(), &TaskOutcome::Promoted(media.clone()));
    // The move happened only after the owner merged.
    assert_eq!(std::fs::read(&media).unwrap(), bodies.concat());
    assert!(!survivor.join("clip.ts").exists());
    assert_eq!(dir_entries(out.path()), vec![survivor]);
}

#[tokio::test]
async fn failed_owner_fails_its_promoted_duplicate() {
    init_tracing();
    let out = TempDir::new().unwrap();
    let server = Arc::new(MockServer::default());
    let bodies: Vec<_> = (0..5).map(|i| segment_body(i + 120, 48)).collect();
    let owner_url = publish(&server, "doomed.test", &bodies, None);
    let promoter_url = publish(&server, "hopeful.test", &bodies, None);
    let doomed = "https://doomed.test/media/seg3.ts";
    server.fail(doomed, u32::MAX);
    server.delay(doomed, Duration::from_millis(100));
    delay_fingerprint(&server, "hopeful.test", Duration::from_millis(50));

    let requests = vec![
        DownloadRequest::new(vec![owner_url], out.path()).with_title("a"),
        DownloadRequest::new(vec![promoter_url], out.path()).with_title("abc longer"),
    ];
    let results = downloader(&server, test_config(true))
        .download_batch(requests, None)
        .await;

    assert!(matches!(
        results[0],
        Err(HlsDownloaderError::SegmentExhausted {
            index: 3,
            attempts: 6
        })
    ));
    assert!(matches!(
        results[1],
        Err(HlsDownloaderError::DuplicateOwnerFailed(_))
    ));
    assert!(!out.path().join("abc longer").exists());
    assert!(!out.path().join("a").join("a.ts").exists());
}
