//! PCM audio frames exchanged between the room, speech sessions and sinks.

use thiserror::Error;

/// Errors raised when constructing an [`AudioFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioFrameError {
    #[error("audio frame must have at least one channel")]
    NoChannels,

    #[error("audio frame sample rate must be non-zero")]
    ZeroSampleRate,

    #[error("sample count {samples} is not a multiple of channel count {channels}")]
    UnevenChannels { samples: usize, channels: u32 },
}

/// A chunk of interleaved signed 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<i16>,
    sample_rate: u32,
    num_channels: u32,
    samples_per_channel: u32,
}

impl AudioFrame {
    /// Builds a frame from interleaved samples.
    ///
    /// # Errors
    ///
    /// Returns `AudioFrameError` if the channel count or sample rate is zero,
    /// or if the samples cannot be split evenly across channels.
    pub fn new(data: Vec<i16>, sample_rate: u32, num_channels: u32) -> Result<Self, AudioFrameError> {
        if num_channels == 0 {
            return Err(AudioFrameError::NoChannels);
        }
        if sample_rate == 0 {
            return Err(AudioFrameError::ZeroSampleRate);
        }
        if data.len() % num_channels as usize != 0 {
            return Err(AudioFrameError::UnevenChannels {
                samples: data.len(),
                channels: num_channels,
            });
        }
        let samples_per_channel = (data.len() / num_channels as usize) as u32;
        Ok(Self {
            data,
            sample_rate,
            num_channels,
            samples_per_channel,
        })
    }

    /// A frame of silence lasting `samples_per_channel` samples.
    pub fn silence(sample_rate: u32, num_channels: u32, samples_per_channel: u32) -> Self {
        let channels = num_channels.max(1);
        Self {
            data: vec![0; (samples_per_channel * channels) as usize],
            sample_rate: sample_rate.max(1),
            num_channels: channels,
            samples_per_channel,
        }
    }

    pub fn data(&self) -> &[i16] {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    pub fn samples_per_channel(&self) -> u32 {
        self.samples_per_channel
    }

    /// Playback duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        u64::from(self.samples_per_channel) * 1000 / u64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_channels() {
        assert_eq!(
            AudioFrame::new(vec![0; 4], 24_000, 0),
            Err(AudioFrameError::NoChannels)
        );
    }

    #[test]
    fn rejects_uneven_interleaving() {
        let err = AudioFrame::new(vec![0; 3], 48_000, 2).unwrap_err();
        assert_eq!(
            err,
            AudioFrameError::UnevenChannels {
                samples: 3,
                channels: 2
            }
        );
    }

    #[test]
    fn computes_samples_per_channel_and_duration() {
        let frame = AudioFrame::new(vec![1; 960], 48_000, 2).unwrap();
        assert_eq!(frame.samples_per_channel(), 480);
        assert_eq!(frame.duration_ms(), 10);
    }

    #[test]
    fn silence_is_all_zero() {
        let frame = AudioFrame::silence(24_000, 1, 240);
        assert_eq!(frame.data().len(), 240);
        assert!(frame.data().iter().all(|s| *s == 0));
        assert_eq!(frame.duration_ms(), 10);
    }
}
