use std::time::Duration;

use anyhow::Result;
use sysinfo::System;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument};

use crate::tasks::preload::PreloadCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySample {
    pub fn used_fraction(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let available = self.available_bytes.min(self.total_bytes);
        1.0 - (available as f64 / self.total_bytes as f64) as f32
    }
}

/// Source of memory readings for the pressure monitor.
pub trait MemoryProbe: Send + 'static {
    fn sample(&mut self) -> MemorySample;
}

/// Reads system-wide memory through `sysinfo`.
pub struct SystemMemoryProbe {
    sys: System,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&mut self) -> MemorySample {
        self.sys.refresh_memory();
        MemorySample {
            total_bytes: self.sys.total_memory(),
            available_bytes: self.sys.available_memory(),
        }
    }
}

/// Samples memory every `every` until the cache shuts down.
#[instrument(skip(cache, probe))]
pub async fn run<P: MemoryProbe>(cache: PreloadCache, mut probe: P, every: Duration) -> Result<()> {
    let mut ticker = interval(every.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let cancel = cache.cancel_token();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let sample = probe.sample();
                debug!(
                    total_mb = sample.total_bytes / 1024 / 1024,
                    available_mb = sample.available_bytes / 1024 / 1024,
                    "memory sample"
                );
                cache.apply_memory_sample(sample);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::preload::PreloadOptions;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<MemorySample>);

    impl MemoryProbe for Scripted {
        fn sample(&mut self) -> MemorySample {
            if self.0.len() > 1 {
                self.0.pop_front().unwrap()
            } else {
                self.0[0]
            }
        }
    }

    #[test]
    fn used_fraction_handles_odd_readings() {
        let zero = MemorySample {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(zero.used_fraction(), 0.0);
        let overreport = MemorySample {
            total_bytes: 100,
            available_bytes: 200,
        };
        assert_eq!(overreport.used_fraction(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_feeds_cache_until_shutdown() {
        let cache = PreloadCache::new(PreloadOptions {
            horizon: 3,
            ..PreloadOptions::default()
        });
        let probe = Scripted(VecDeque::from(vec![
            MemorySample {
                total_bytes: 100,
                available_bytes: 5,
            },
            MemorySample {
                total_bytes: 100,
                available_bytes: 5,
            },
            MemorySample {
                total_bytes: 100,
                available_bytes: 90,
            },
        ]));
        let handle = tokio::spawn(run(cache.clone(), probe, Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(cache.is_under_pressure());
        assert_eq!(cache.horizon(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!cache.is_under_pressure());
        assert_eq!(cache.horizon(), 3);

        cache.shutdown();
        handle.await.unwrap().unwrap();
    }
}
