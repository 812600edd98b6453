//! # Callbridge Recorder
//!
//! Records a bridged call as two mono WAV tracks, one for the local
//! microphone (`<uuid>_input.wav`) and one for the remote party
//! (`<uuid>_output.wav`), under a `records` folder.
//!
//! ```rust,no_run
//! use callbridge_recorder::CallRecorder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = CallRecorder::new("/var/lib/callbridge")?;
//! recorder.start(1001)?;
//! recorder.write_input(&[0i16; 480])?;
//! recorder.write_output(&[0i16; 480])?;
//! if let Some(done) = recorder.stop()? {
//!     println!("input track at {}", done.input_path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{RecorderError, RecorderResult};

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

const RECORDS_FOLDER: &str = "records";
const CHUNK_SUFFIX: &str = "put.wav";

/// PCM format of both tracks
pub fn recording_spec() -> WavSpec {
    WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    }
}

type TrackWriter = WavWriter<BufWriter<File>>;

struct Track {
    path: PathBuf,
    writer: TrackWriter,
    samples: u64,
}

impl Track {
    fn create(path: PathBuf) -> RecorderResult<Self> {
        let writer = WavWriter::create(&path, recording_spec())?;
        Ok(Self {
            path,
            writer,
            samples: 0,
        })
    }

    fn write(&mut self, samples: &[i16]) -> RecorderResult<()> {
        for &sample in samples {
            self.writer.write_sample(sample)?;
        }
        self.samples += samples.len() as u64;
        Ok(())
    }

    fn finalize(self) -> RecorderResult<(PathBuf, u64)> {
        self.writer.finalize()?;
        Ok((self.path, self.samples))
    }
}

struct Session {
    call_id: i64,
    recording_id: Uuid,
    input: Track,
    output: Track,
}

/// Files produced by a completed recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedRecording {
    /// Signaling-layer id of the recorded call
    pub call_id: i64,
    pub recording_id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub input_samples: u64,
    pub output_samples: u64,
}

/// Sequential recorder: at most one call at a time
pub struct CallRecorder {
    folder: PathBuf,
    session: Option<Session>,
}

impl CallRecorder {
    /// Prepare `<base_dir>/records`
    ///
    /// Creates the folder if needed and removes track files left behind by
    /// an earlier run.
    pub fn new(base_dir: impl AsRef<Path>) -> RecorderResult<Self> {
        let folder = base_dir.as_ref().join(RECORDS_FOLDER);
        if !folder.is_dir() {
            fs::create_dir_all(&folder).map_err(|e| RecorderError::io(&folder, e))?;
            debug!("Created records folder {}", folder.display());
        }

        let recorder = Self { folder, session: None };
        recorder.remove_chunks()?;
        Ok(recorder)
    }

    fn remove_chunks(&self) -> RecorderResult<()> {
        let entries = fs::read_dir(&self.folder).map_err(|e| RecorderError::io(&self.folder, e))?;
        for entry in entries {
            let path = entry.map_err(|e| RecorderError::io(&self.folder, e))?.path();
            let is_chunk = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(CHUNK_SUFFIX));
            if is_chunk && path.is_file() {
                fs::remove_file(&path).map_err(|e| RecorderError::io(&path, e))?;
                debug!("Removed leftover track {}", path.display());
            }
        }
        Ok(())
    }

    pub fn records_dir(&self) -> &Path {
        &self.folder
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Call being recorded, if any
    pub fn current_call(&self) -> Option<i64> {
        self.session.as_ref().map(|session| session.call_id)
    }

    /// Begin recording `call_id`; does nothing if a recording is running
    pub fn start(&mut self, call_id: i64) -> RecorderResult<()> {
        if let Some(session) = &self.session {
            debug!(
                "Already recording call {}, ignoring start for {}",
                session.call_id, call_id
            );
            return Ok(());
        }

        let recording_id = Uuid::new_v4();
        let input = Track::create(self.track_path(&recording_id, "input"))?;
        let output = match Track::create(self.track_path(&recording_id, "output")) {
            Ok(track) => track,
            Err(e) => {
                let path = input.path.clone();
                drop(input);
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!("Could not remove partial track {}: {}", path.display(), remove_err);
                }
                return Err(e);
            }
        };

        info!("Recording call {} as {}", call_id, recording_id);
        self.session = Some(Session {
            call_id,
            recording_id,
            input,
            output,
        });
        Ok(())
    }

    fn track_path(&self, recording_id: &Uuid, track: &str) -> PathBuf {
        self.folder.join(format!("{}_{}.wav", recording_id, track))
    }

    /// Append local microphone samples
    pub fn write_input(&mut self, samples: &[i16]) -> RecorderResult<()> {
        let session = self.session.as_mut().ok_or(RecorderError::NotRecording)?;
        session.input.write(samples)
    }

    /// Append remote party samples
    pub fn write_output(&mut self, samples: &[i16]) -> RecorderResult<()> {
        let session = self.session.as_mut().ok_or(RecorderError::NotRecording)?;
        session.output.write(samples)
    }

    /// Finalize both tracks; `None` if nothing was being recorded
    pub fn stop(&mut self) -> RecorderResult<Option<FinishedRecording>> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };

        let (input_path, input_samples) = session.input.finalize()?;
        let (output_path, output_samples) = session.output.finalize()?;
        info!(
            "Finished recording call {} ({} input / {} output samples)",
            session.call_id, input_samples, output_samples
        );

        Ok(Some(FinishedRecording {
            call_id: session.call_id,
            recording_id: session.recording_id,
            input_path,
            output_path,
            input_samples,
            output_samples,
        }))
    }
}
