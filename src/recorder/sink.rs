//! Per-camera recording sink
//!
//! Wraps one encoder pipeline producing one (possibly segmented) video
//! file. The sink owns its output target; sessions only borrow it, and the
//! target it exposes is valid only while the sink is Prepared or Recording.

use crate::capture::{EncoderBackend, OutputTarget};
use crate::error::CameraError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle of a recording sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Prepared,
    Recording,
    Released,
}

/// Encoder/writer pipeline for one camera key.
pub struct RecordingSink {
    key: String,
    state: SinkState,
    segment_index: u32,
    output_dir: PathBuf,
    timestamp: String,
    width: u32,
    height: u32,
    target: Option<OutputTarget>,
    encoder: Arc<dyn EncoderBackend>,
}

impl RecordingSink {
    pub(crate) fn new(key: String, width: u32, height: u32, encoder: Arc<dyn EncoderBackend>) -> Self {
        Self {
            key,
            state: SinkState::Idle,
            segment_index: 0,
            output_dir: PathBuf::new(),
            timestamp: String::new(),
            width,
            height,
            target: None,
            encoder,
        }
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn segment_index(&self) -> u32 {
        self.segment_index
    }

    /// The output target a session may bind. `None` unless the sink is
    /// Prepared or Recording.
    pub fn target(&self) -> Option<OutputTarget> {
        match self.state {
            SinkState::Prepared | SinkState::Recording => self.target,
            SinkState::Idle | SinkState::Released => None,
        }
    }

    // <timestamp>_<key>.mp4, later segments <timestamp>_<key>_segNNN.mp4
    fn segment_path(&self) -> PathBuf {
        let name = if self.segment_index == 0 {
            format!("{}_{}.mp4", self.timestamp, self.key)
        } else {
            format!("{}_{}_seg{:03}.mp4", self.timestamp, self.key, self.segment_index)
        };
        self.output_dir.join(name)
    }

    /// Allocate encoder resources and an output target for the first
    /// segment. Does not start encoding. Failure releases partial state.
    pub fn prepare(
        &mut self,
        output_dir: &Path,
        timestamp: &str,
    ) -> Result<OutputTarget, CameraError> {
        if matches!(self.state, SinkState::Prepared | SinkState::Recording) {
            tracing::warn!("sink {}: prepare while already active, releasing first", self.key);
            self.release();
        }
        self.output_dir = output_dir.to_path_buf();
        self.timestamp = timestamp.to_string();
        self.segment_index = 0;

        let path = self.segment_path();
        match self.encoder.prepare(&path, self.width, self.height) {
            Ok(target) => {
                tracing::debug!("sink {}: prepared {}", self.key, path.display());
                self.target = Some(target);
                self.state = SinkState::Prepared;
                Ok(target)
            }
            Err(error) => {
                tracing::error!("sink {}: failed to prepare {}: {}", self.key, path.display(), error);
                self.target = None;
                self.state = SinkState::Released;
                Err(error)
            }
        }
    }

    /// Begin encoding into the prepared target. On failure the sink is
    /// released; the caller must detach the dead target from the owning
    /// session.
    pub fn start(&mut self) -> Result<(), CameraError> {
        if self.state != SinkState::Prepared {
            tracing::warn!("sink {}: start in state {:?} ignored", self.key, self.state);
            return Err(CameraError::DriverServiceFault);
        }
        let Some(target) = self.target else {
            return Err(CameraError::DriverServiceFault);
        };
        match self.encoder.start(target) {
            Ok(()) => {
                self.state = SinkState::Recording;
                tracing::debug!("sink {}: recording segment {}", self.key, self.segment_index);
                Ok(())
            }
            Err(error) => {
                tracing::error!("sink {}: failed to start encoder: {}", self.key, error);
                self.release();
                Err(error)
            }
        }
    }

    /// Finalize the current segment's output. Safe to call even if never
    /// started; the sink stays reusable.
    pub fn stop(&mut self) {
        if let Some(target) = self.target.take() {
            if self.state == SinkState::Recording {
                self.encoder.stop(target);
            }
            self.encoder.release(target);
        }
        if self.state != SinkState::Released {
            self.state = SinkState::Idle;
        }
    }

    /// Finalize and release everything for this recording cycle. Idempotent.
    pub fn release(&mut self) {
        if let Some(target) = self.target.take() {
            if self.state == SinkState::Recording {
                self.encoder.stop(target);
            }
            self.encoder.release(target);
        }
        self.segment_index = 0;
        self.state = SinkState::Released;
    }

    /// Segment limit reached: finalize the current file and prepare the
    /// next one. The sink lands in Prepared; the coordinator restarts it
    /// once the owning session has been reconfigured onto the new target.
    pub fn rotate_segment(&mut self) -> Option<OutputTarget> {
        if self.state != SinkState::Recording {
            tracing::warn!("sink {}: segment rotation in state {:?} ignored", self.key, self.state);
            return None;
        }
        if let Some(target) = self.target.take() {
            self.encoder.stop(target);
            self.encoder.release(target);
        }
        self.segment_index += 1;

        let path = self.segment_path();
        match self.encoder.prepare(&path, self.width, self.height) {
            Ok(target) => {
                tracing::debug!(
                    "sink {}: rotated to segment {} ({})",
                    self.key,
                    self.segment_index,
                    path.display()
                );
                self.target = Some(target);
                self.state = SinkState::Prepared;
                Some(target)
            }
            Err(error) => {
                tracing::error!("sink {}: failed to open next segment: {}", self.key, error);
                self.target = None;
                self.state = SinkState::Released;
                None
            }
        }
    }
}
