//! Audio sinks draining an [`AudioTap`]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::nodes::AudioTap;

const POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("failed to spawn sink thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("sink thread panicked")]
    Panicked,
}

/// Writes everything arriving on a tap to a 16-bit WAV file, on its own
/// thread, until [`WavSink::finish`] or until the output unit goes away.
pub struct WavSink {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<u64, SinkError>>>,
}

impl WavSink {
    pub fn spawn(mut tap: AudioTap, path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: tap.channels(),
            sample_rate: tap.sample_rate(),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("carillon-wav".to_string())
            .spawn(move || {
                let mut buf = vec![0.0f32; 4096];
                let mut samples = 0u64;
                loop {
                    let read = tap.read(&mut buf);
                    for &sample in &buf[..read] {
                        let int_sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        writer.write_sample(int_sample)?;
                    }
                    samples += read as u64;

                    if read == 0 {
                        if thread_stop.load(Ordering::Acquire) || tap.is_abandoned() {
                            break;
                        }
                        thread::sleep(POLL);
                    }
                }
                writer.finalize()?;
                Ok(samples / tap.channels().max(1) as u64)
            })
            .map_err(SinkError::Spawn)?;

        debug!(path = %path.display(), "wav sink started");
        Ok(Self {
            path,
            stop,
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drain what is buffered, close the file and return the frames written
    pub fn finish(mut self) -> Result<u64, SinkError> {
        self.stop.store(true, Ordering::Release);
        let frames = match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| SinkError::Panicked)??,
            None => 0,
        };
        info!(path = %self.path.display(), frames, "wav written");
        Ok(frames)
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_buffered_audio() {
        let (mut producer, consumer) = rtrb::RingBuffer::new(1024);
        for i in 0..200 {
            producer.push(if i % 2 == 0 { 0.5 } else { -0.5 }).unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tap.wav");
        let sink = WavSink::spawn(AudioTap::new(consumer, 22050), &path).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.finish().unwrap(), 100);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 200);
        assert_eq!(samples[0], 16383);
        assert_eq!(samples[1], -16383);
        drop(producer);
    }

    #[test]
    fn test_stops_when_producer_goes_away() {
        let (producer, consumer) = rtrb::RingBuffer::<f32>::new(16);
        let dir = tempfile::tempdir().unwrap();
        let sink = WavSink::spawn(AudioTap::new(consumer, 44100), dir.path().join("x.wav")).unwrap();

        drop(producer);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.finish().unwrap(), 0);
    }
}
