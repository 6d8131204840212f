use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use kiosk_frame::Error;
use kiosk_frame::events::PreloadEvent;
use kiosk_frame::media::{MediaId, MediaItem};
use kiosk_frame::tasks::fetch::{FetchedImage, Fetcher};
use kiosk_frame::tasks::preload::{self, PreloadCache, PreloadOptions, ScheduleOutcome, TaskState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn item(id: &str) -> MediaItem {
    MediaItem {
        id: id.into(),
        url: format!("http://gallery.local/{id}.jpg"),
        width: 1920,
        height: 1080,
        original_filename: format!("{id}.jpg"),
        captured_at: None,
    }
}

fn image() -> FetchedImage {
    FetchedImage {
        width: 4,
        height: 4,
        pixels: vec![0; 64],
        palette: vec![[10, 20, 30]],
    }
}

/// Sleeps a per-url delay, counts calls, and tracks peak concurrency.
#[derive(Clone, Default)]
struct SlowFetcher {
    delays: Arc<HashMap<String, Duration>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    failures_left: Arc<Mutex<HashMap<String, usize>>>,
}

impl SlowFetcher {
    fn calls(&self, id: &str) -> usize {
        let url = item(id).url;
        self.calls.lock().unwrap().get(&url).copied().unwrap_or(0)
    }
}

impl Fetcher for SlowFetcher {
    fn fetch(&self, item: MediaItem) -> BoxFuture<'static, kiosk_frame::Result<FetchedImage>> {
        let this = self.clone();
        Box::pin(async move {
            *this.calls.lock().unwrap().entry(item.url.clone()).or_default() += 1;
            let now = this.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            this.peak.fetch_max(now, Ordering::SeqCst);
            let delay = this
                .delays
                .get(&item.url)
                .copied()
                .unwrap_or(Duration::from_millis(100));
            tokio::time::sleep(delay).await;
            this.in_flight.fetch_sub(1, Ordering::SeqCst);
            let fail = {
                let mut left = this.failures_left.lock().unwrap();
                match left.get_mut(&item.url) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if fail {
                Err(Error::HttpStatus {
                    url: item.url,
                    status: 503,
                })
            } else {
                Ok(image())
            }
        })
    }
}

async fn wait_for(cache: &PreloadCache, mut done: impl FnMut(&PreloadCache) -> bool) {
    for _ in 0..10_000 {
        if done(cache) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached; stats = {:?}", cache.stats());
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_the_bound() {
    let mut rng = StdRng::seed_from_u64(1234);
    let ids: Vec<String> = (0..40).map(|i| format!("img{i}")).collect();
    let delays: HashMap<String, Duration> = ids
        .iter()
        .map(|id| (item(id).url, Duration::from_millis(rng.random_range(10..900))))
        .collect();
    let fetcher = SlowFetcher {
        delays: Arc::new(delays),
        ..SlowFetcher::default()
    };
    let cache = PreloadCache::new(PreloadOptions {
        max_concurrent: 3,
        ..PreloadOptions::default()
    });
    let handle = tokio::spawn(preload::run(cache.clone(), fetcher.clone()));

    for id in &ids {
        cache.schedule(&item(id), rng.random_range(0..5));
        if rng.random_bool(0.4) {
            tokio::time::sleep(Duration::from_millis(rng.random_range(0..200))).await;
        }
        assert!(cache.stats().active <= 3);
    }
    wait_for(&cache, |c| c.stats().completed == ids.len() as u64).await;

    assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(fetcher.peak.load(Ordering::SeqCst), 3);
    let stats = cache.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.queue_size, 0);
    assert_eq!(stats.resident_bytes, 64 * ids.len());

    cache.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn double_schedule_fetches_once() {
    let fetcher = SlowFetcher::default();
    let cache = PreloadCache::new(PreloadOptions::default());
    let handle = tokio::spawn(preload::run(cache.clone(), fetcher.clone()));

    assert_eq!(cache.schedule(&item("a"), 1), ScheduleOutcome::Queued);
    assert_eq!(cache.schedule(&item("a"), 0), ScheduleOutcome::AlreadyPending);
    wait_for(&cache, |c| c.is_ready(&MediaId::from("a"))).await;
    assert_eq!(cache.schedule(&item("a"), 0), ScheduleOutcome::AlreadyLoaded);

    assert_eq!(fetcher.calls("a"), 1);
    let stats = cache.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.resident_bytes, 64);

    let entry = cache.entry(&MediaId::from("a")).unwrap();
    assert_eq!(entry.url, item("a").url);
    assert_eq!((entry.width, entry.height), (4, 4));
    assert_eq!(entry.palette, vec![[10, 20, 30]]);
    assert!(cache.entry(&MediaId::from("b")).is_none());

    cache.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let fetcher = SlowFetcher::default();
    fetcher
        .failures_left
        .lock()
        .unwrap()
        .insert(item("flaky").url, 2);
    let cache = PreloadCache::new(PreloadOptions::default());
    let mut events = cache.subscribe();
    let handle = tokio::spawn(preload::run(cache.clone(), fetcher.clone()));

    let started = tokio::time::Instant::now();
    cache.schedule(&item("flaky"), 0);
    let event = events.recv().await.unwrap();
    assert_eq!(event, PreloadEvent::Loaded(MediaId::from("flaky")));
    // three 100ms attempts plus 500ms and 1s of backoff
    assert!(started.elapsed() >= Duration::from_millis(1800));
    assert_eq!(fetcher.calls("flaky"), 3);
    assert_eq!(cache.stats().retries, 2);

    cache.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_mark_failed() {
    let fetcher = SlowFetcher::default();
    fetcher
        .failures_left
        .lock()
        .unwrap()
        .insert(item("dead").url, usize::MAX);
    let cache = PreloadCache::new(PreloadOptions {
        max_attempts: 3,
        ..PreloadOptions::default()
    });
    let mut events = cache.subscribe();
    let handle = tokio::spawn(preload::run(cache.clone(), fetcher.clone()));

    cache.schedule(&item("dead"), 0);
    let event = events.recv().await.unwrap();
    assert_eq!(event, PreloadEvent::Failed(MediaId::from("dead")));
    assert_eq!(cache.task_state(&MediaId::from("dead")), Some(TaskState::Failed));
    assert_eq!(fetcher.calls("dead"), 3);
    assert_eq!(cache.stats().failed, 1);

    cache.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_in_flight_results() {
    let delays = HashMap::from([(item("slow").url, Duration::from_secs(5))]);
    let fetcher = SlowFetcher {
        delays: Arc::new(delays),
        ..SlowFetcher::default()
    };
    let cache = PreloadCache::new(PreloadOptions::default());
    let handle = tokio::spawn(preload::run(cache.clone(), fetcher.clone()));

    cache.schedule(&item("slow"), 0);
    wait_for(&cache, |c| c.stats().active == 1).await;
    cache.shutdown();
    handle.await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!cache.is_ready(&MediaId::from("slow")));
    assert_eq!(cache.schedule(&item("other"), 0), ScheduleOutcome::Rejected);
    assert_eq!(cache.stats().completed, 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_request_never_lands() {
    let delays = HashMap::from([(item("gone").url, Duration::from_secs(1))]);
    let fetcher = SlowFetcher {
        delays: Arc::new(delays),
        ..SlowFetcher::default()
    };
    let cache = PreloadCache::new(PreloadOptions::default());
    let mut events = cache.subscribe();
    let handle = tokio::spawn(preload::run(cache.clone(), fetcher.clone()));

    cache.schedule(&item("gone"), 2);
    wait_for(&cache, |c| c.stats().active == 1).await;
    cache.retain_window(std::iter::empty());
    assert_eq!(
        events.recv().await.unwrap(),
        PreloadEvent::Discarded(MediaId::from("gone"))
    );
    assert!(!cache.is_ready(&MediaId::from("gone")));

    cache.shutdown();
    handle.await.unwrap().unwrap();
}
