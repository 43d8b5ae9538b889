//! Periodic loudness sampling of a live audio track

use crate::analyser::{AnalyserConfig, FrequencyAnalyser};
use crate::error::AudioError;
use crate::track::AudioTrack;
use mien_core::LoudnessConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Publishes whether the attached track is currently loud
pub struct LoudnessMonitor {
    config: LoudnessConfig,
    is_loud: Arc<watch::Sender<bool>>,
    sampler: Option<JoinHandle<()>>,
    track_id: Option<String>,
}

impl LoudnessMonitor {
    pub fn new(config: LoudnessConfig) -> Self {
        let (is_loud, _) = watch::channel(false);
        Self {
            config,
            is_loud: Arc::new(is_loud),
            sampler: None,
            track_id: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.is_loud.subscribe()
    }

    pub fn is_loud(&self) -> bool {
        *self.is_loud.borrow()
    }

    /// Id of the track currently being sampled
    pub fn track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Swap the sampled track. The previous sampler is always stopped and
    /// `false` published before the new track is looked at. A track that
    /// cannot be analysed leaves the monitor at `false`.
    pub fn attach(&mut self, track: Option<Arc<dyn AudioTrack>>) {
        self.stop();

        let Some(track) = track else {
            return;
        };

        let analyser = match self.open_analyser(track.as_ref()) {
            Ok(analyser) => analyser,
            Err(e) => {
                warn!("Failed to set up audio analysis for track {}: {}", track.id(), e);
                return;
            }
        };

        info!("Sampling loudness of track {}", track.id());
        self.track_id = Some(track.id().to_string());
        let mut ticker = tokio::time::interval(self.config.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.sampler = Some(tokio::spawn(sample_loop(
            track,
            analyser,
            ticker,
            self.config.threshold as f32,
            Arc::clone(&self.is_loud),
        )));
    }

    /// Stop sampling and reset to quiet
    pub fn stop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
            debug!("Stopped loudness sampling of {:?}", self.track_id);
        }
        self.track_id = None;
        self.is_loud.send_if_modified(|loud| std::mem::replace(loud, false));
    }

    fn open_analyser(&self, track: &dyn AudioTrack) -> Result<FrequencyAnalyser, AudioError> {
        if !track.is_live() {
            return Err(AudioError::TrackUnavailable(format!(
                "track {} has ended",
                track.id()
            )));
        }
        FrequencyAnalyser::new(AnalyserConfig::from(&self.config))
    }
}

impl Drop for LoudnessMonitor {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
    }
}

async fn sample_loop(
    track: Arc<dyn AudioTrack>,
    mut analyser: FrequencyAnalyser,
    mut ticker: Interval,
    threshold: f32,
    is_loud: Arc<watch::Sender<bool>>,
) {
    let mut samples = vec![0.0f32; analyser.fft_size()];

    loop {
        ticker.tick().await;

        let loud = if track.is_live() {
            let n = track.snapshot(&mut samples);
            analyser.analyse(&samples[..n]);
            analyser.average() > threshold
        } else {
            false
        };

        is_loud.send_if_modified(|current| {
            if *current != loud {
                *current = loud;
                true
            } else {
                false
            }
        });
    }
}
