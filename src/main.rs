use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use kiosk_frame::catalog::{self, FileCatalog, HttpCatalog, MediaCatalog};
use kiosk_frame::config::{CatalogSource, Configuration};
use kiosk_frame::effects::EffectKind;
use kiosk_frame::events::{HostEvent, PlaybackCommand};
use kiosk_frame::media::MediaItem;
use kiosk_frame::processing::layout::plan_sequence;
use kiosk_frame::tasks::fetch::HttpFetcher;
use kiosk_frame::tasks::memory::{self, SystemMemoryProbe};
use kiosk_frame::tasks::playback::{self, DisplayView, Orchestrator, PlaybackSettings};
use kiosk_frame::tasks::preload::{self, PreloadCache};

#[derive(Debug, Parser)]
#[command(name = "kiosk-frame", version, about = "kiosk picture frame playback engine")]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Print the first N planned layouts without fetching any images
    #[arg(long = "dry-run", value_name = "STEPS")]
    dry_run: Option<usize>,
    /// Deterministic RNG seed for shuffling and effect parameters (overrides playback.shuffle-seed)
    #[arg(long = "seed", value_name = "SEED")]
    seed: Option<u64>,
    /// Log preload statistics at this interval (e.g. 30s)
    #[arg(long = "stats-every", value_name = "DURATION", value_parser = humantime::parse_duration)]
    stats_every: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing (RUST_LOG controls level, default = info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let Args {
        config,
        dry_run,
        seed,
        stats_every,
    } = Args::parse();

    let cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::info!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let catalog: Box<dyn MediaCatalog> = match cfg.catalog.source()? {
        CatalogSource::File(path) => Box::new(
            FileCatalog::open(&path)
                .with_context(|| format!("failed to open catalog {}", path.display()))?,
        ),
        CatalogSource::Http(url) => Box::new(HttpCatalog::new(url, cfg.preload.fetch_timeout)?),
    };
    let (playlist, mut items) = catalog::load_sequence(catalog.as_ref(), &cfg.playlist_id)
        .await
        .with_context(|| format!("failed to load playlist {:?}", cfg.playlist_id))?;

    let seed = seed.or(cfg.playback.shuffle_seed);
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    if cfg.playback.shuffle {
        items.shuffle(&mut rng);
    }
    let settings = cfg.playback_settings(&playlist);

    if let Some(steps) = dry_run {
        print_dry_run(&playlist.id, &items, &settings, steps, seed);
        return Ok(());
    }

    let (control_tx, control_rx) = mpsc::channel::<PlaybackCommand>(16); // External -> Playback
    let (host_tx, mut host_rx) = mpsc::channel::<HostEvent>(64); // Playback -> Host
    let (view_tx, view_rx) = watch::channel(DisplayView::idle(Instant::now())); // Playback -> Renderer

    let cancel = CancellationToken::new();
    let cache = PreloadCache::new(cfg.preload_options());

    // Ctrl-D/Ctrl-C cancel the engine
    if io::stdin().is_terminal() {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let mut sink = Vec::new();
            match io::stdin().read_to_end(&mut sink) {
                Ok(_) => tracing::info!("stdin closed; initiating shutdown"),
                Err(err) => tracing::warn!("stdin watcher failed: {err}"),
            }
            cancel.cancel();
        });
    } else {
        tracing::debug!("stdin is not a terminal; skipping shutdown watcher");
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        let control = control_tx.clone();
        tokio::spawn(async move {
            let (mut sigusr1, mut sigusr2) = match (
                signal(SignalKind::user_defined1()),
                signal(SignalKind::user_defined2()),
            ) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(err), _) | (_, Err(err)) => {
                    tracing::warn!("failed to register playback signal handlers: {err}");
                    return;
                }
            };
            loop {
                let cmd = tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(()) = sigusr1.recv() => PlaybackCommand::TogglePlay,
                    Some(()) = sigusr2.recv() => PlaybackCommand::Next,
                    else => break,
                };
                tracing::info!(?cmd, "signal received; forwarding playback command");
                if let Err(err) = control.send(cmd).await {
                    tracing::warn!("failed to forward playback command: {err}");
                    break;
                }
            }
        });
    }

    let mut tasks = JoinSet::new();

    // Preload dispatcher
    tasks.spawn({
        let cache = cache.clone();
        let fetcher = HttpFetcher::new(cfg.preload.fetch_timeout)?;
        async move {
            preload::run(cache, fetcher)
                .await
                .context("preload task failed")
        }
    });

    // Memory pressure monitor
    tasks.spawn({
        let cache = cache.clone();
        let every = cfg.memory.monitor_interval;
        async move {
            memory::run(cache, SystemMemoryProbe::new(), every)
                .await
                .context("memory monitor failed")
        }
    });

    if let Some(every) = stats_every {
        let cache = cache.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            log_stats(cache, every, cancel).await;
            Ok(())
        });
    }

    // Host: log what the frame shows; the renderer would read `view_rx`
    tasks.spawn({
        let view_rx = view_rx;
        let cache = cache.clone();
        async move {
            while let Some(event) = host_rx.recv().await {
                let caption = view_rx.borrow().caption.clone();
                match event {
                    HostEvent::ImageChanged {
                        item,
                        secondary,
                        index,
                        layout,
                        degraded,
                        sequence,
                    } => {
                        let decoded = cache
                            .entry(&item.id)
                            .map(|entry| format!("{}x{}", entry.width, entry.height));
                        tracing::info!(
                            index,
                            sequence,
                            media = %item.id,
                            secondary = secondary.as_ref().map(|s| s.id.as_str()),
                            layout = ?layout,
                            degraded,
                            decoded = decoded.as_deref(),
                            caption = caption.as_deref(),
                            "now showing"
                        )
                    }
                    HostEvent::EmptyPlaylist => {
                        tracing::warn!("playlist has nothing to show; holding placeholder")
                    }
                    HostEvent::Closed => tracing::info!("playback closed"),
                }
            }
            Ok(())
        }
    });

    let orchestrator = Orchestrator::new(items, settings, cache.clone(), rng, Instant::now());
    let outcome = playback::run(orchestrator, control_rx, host_tx, view_tx, cancel.clone())
        .await
        .context("playback task failed");
    if let Err(e) = &outcome {
        tracing::error!("{e:?}");
    }
    drop(control_tx);
    // Ensure other tasks are asked to stop
    cancel.cancel();
    cache.shutdown();

    // Drain JoinSet (wait for other tasks to complete)
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    tracing::info!(stats = ?cache.stats(), "final preload stats");
    Ok(())
}

async fn log_stats(cache: PreloadCache, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let stats = cache.stats();
                tracing::info!(
                    queue = stats.queue_size,
                    active = stats.active,
                    completed = stats.completed,
                    failed = stats.failed,
                    hits = stats.cache_hits,
                    misses = stats.cache_misses,
                    retries = stats.retries,
                    pressure_events = stats.memory_pressure_events,
                    resident_bytes = stats.resident_bytes,
                    horizon = stats.horizon,
                    "preload stats"
                );
            }
        }
    }
}

fn print_dry_run(
    playlist_id: &str,
    items: &[MediaItem],
    settings: &PlaybackSettings,
    steps: usize,
    seed: Option<u64>,
) {
    println!(
        "# layout dry run\n# playlist: {}\n# items: {}\n# mode: {}\n# effect: {}\n# interval: {}\n# loop: {}\n# seed: {}\n",
        playlist_id,
        items.len(),
        settings.display_mode,
        EffectKind::for_mode(settings.display_mode),
        humantime::format_duration(settings.interval),
        settings.looping,
        seed.map_or_else(|| "(random)".to_string(), |s| s.to_string())
    );

    let plan = plan_sequence(items, settings.display_mode, settings.looping, steps);
    println!("# planned layouts:");
    if plan.is_empty() {
        println!("(playlist empty)");
        return;
    }
    for (step, (index, decision)) in plan.iter().enumerate() {
        let ids: Vec<&str> = decision.items().map(|item| item.id.as_str()).collect();
        println!(
            "  {:>4}: [{:>3}] {:<6} {}",
            step + 1,
            index,
            format!("{:?}", decision.mode).to_lowercase(),
            ids.join(" + ")
        );
    }
}
