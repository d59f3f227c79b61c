//! Playback state machine.
//!
//! [`PlaybackEngine`] is the only owner of the live audio resource. It moves
//! between `Idle` and `Playing`, keeps the volume, and starts/stops metadata
//! resolution alongside playback.

use std::sync::Arc;
use std::time::Duration;

use crate::error::PlaybackError;
use crate::metadata::{MetadataResolver, NowPlayingBoard, Session};
use crate::player::{AudioBackend, AudioHandle};
use crate::schedule::Periodic;
use crate::station::{StationCatalog, StationId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Playing,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Playing => "playing",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackState {
    pub station: StationId,
    pub is_playing: bool,
    pub volume: u8,
}

pub fn clamp_volume(v: i32) -> u8 {
    v.clamp(0, 100) as u8
}

fn gain(volume: u8) -> f32 {
    volume as f32 / 100.0
}

pub struct PlaybackEngine<B: AudioBackend> {
    backend: B,
    catalog: StationCatalog,
    station: StationId,
    volume: u8,
    phase: Phase,
    handle: Option<B::Handle>,
    resolver: Arc<MetadataResolver>,
    board: NowPlayingBoard,
    metadata_interval: Duration,
    metadata_task: Option<Periodic>,
}

impl<B: AudioBackend> PlaybackEngine<B> {
    pub fn new(
        backend: B,
        catalog: StationCatalog,
        resolver: Arc<MetadataResolver>,
        board: NowPlayingBoard,
        station: StationId,
        volume: i32,
        metadata_interval: Duration,
    ) -> Self {
        Self {
            backend,
            catalog,
            station,
            volume: clamp_volume(volume),
            phase: Phase::Idle,
            handle: None,
            resolver,
            board,
            metadata_interval,
            metadata_task: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            station: self.station,
            is_playing: self.phase == Phase::Playing,
            volume: self.volume,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn catalog(&self) -> &StationCatalog {
        &self.catalog
    }

    /// Stops whatever is open, switches station, and stays idle.
    pub fn select_station(&mut self, id: StationId) {
        self.stop_metadata();
        self.release();
        self.phase = Phase::Idle;
        if self.station != id {
            tracing::info!(from = %self.station, to = %id, "station changed");
        }
        self.station = id;
    }

    pub async fn play(&mut self) -> Result<(), PlaybackError> {
        if self.phase != Phase::Idle {
            return Err(PlaybackError::InvalidTransition {
                op: "play",
                state: self.phase.as_str(),
            });
        }

        // a resource must never outlive its Playing phase
        self.release();

        let id = self.station;
        tracing::info!(station = %id, url = %self.catalog.stream_url(id), "opening stream");

        let handle = match self.backend.open(self.catalog.get(id), gain(self.volume)).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(station = %id, error = %e, "playback failed");
                return Err(e);
            }
        };

        let session = Session {
            station: id,
            now_playing_url: self.catalog.now_playing_url(id).map(str::to_string),
            stream_title: handle.stream_title(),
        };
        self.handle = Some(handle);
        self.phase = Phase::Playing;
        self.start_metadata(session);
        tracing::info!(station = %id, "playing");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        if self.phase != Phase::Playing {
            return Err(PlaybackError::InvalidTransition {
                op: "pause",
                state: self.phase.as_str(),
            });
        }

        self.stop_metadata();
        self.release();
        self.phase = Phase::Idle;
        tracing::info!(station = %self.station, "stopped");
        Ok(())
    }

    /// Clamps to 0..=100 and applies to the live resource, if any.
    pub fn set_volume(&mut self, v: i32) -> u8 {
        self.volume = clamp_volume(v);
        if let Some(handle) = &self.handle {
            handle.set_gain(gain(self.volume));
        }
        tracing::debug!(volume = self.volume, "volume set");
        self.volume
    }

    pub fn shutdown(&mut self) {
        self.stop_metadata();
        self.release();
        self.phase = Phase::Idle;
    }

    fn start_metadata(&mut self, session: Session) {
        let epoch = self.board.begin();
        self.metadata_task = Some(self.resolver.spawn(
            session,
            self.board.clone(),
            epoch,
            self.metadata_interval,
        ));
    }

    fn stop_metadata(&mut self) {
        if let Some(task) = self.metadata_task.take() {
            task.cancel();
        }
        self.board.clear();
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }
}

impl<B: AudioBackend> Drop for PlaybackEngine<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
