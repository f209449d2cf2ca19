//! Audio format descriptor and sample-encoding mapping.

/// Signed-integer PCM encoding used for the device stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleEncoding {
    Int8,
    Int16,
    Int24,
    Int32,
}

impl SampleEncoding {
    /// Map a sample width in bytes to a device encoding.
    ///
    /// Unrecognized widths fall back to 16-bit signed, the documented
    /// default rather than silent corruption downstream.
    pub fn from_sample_width(width_bytes: u16) -> Self {
        match width_bytes {
            1 => SampleEncoding::Int8,
            2 => SampleEncoding::Int16,
            3 => SampleEncoding::Int24,
            4 => SampleEncoding::Int32,
            _ => SampleEncoding::Int16,
        }
    }

    /// Size of one encoded sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleEncoding::Int8 => 1,
            SampleEncoding::Int16 => 2,
            SampleEncoding::Int24 => 3,
            SampleEncoding::Int32 => 4,
        }
    }
}

/// Format triple handed over by an external container-header reader.
///
/// Producing this from a WAV (or any other container) header is the
/// reader's job; the player only consumes the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub sample_width_bytes: u16,
    pub channels: u16,
    pub sample_rate_hz: u32,
}

/// Immutable descriptor of the PCM stream being played.
///
/// Constructed once per playback session, before `start()`. The device
/// encoding is derived from the sample width and never stored separately
/// by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    sample_width_bytes: u16,
    channels: u16,
    sample_rate_hz: u32,
    encoding: SampleEncoding,
}

impl AudioFormat {
    /// Build a format from its raw triple.
    ///
    /// Values are trusted from the caller; no plausibility checks beyond
    /// the width-to-encoding mapping are performed.
    pub fn new(sample_width_bytes: u16, channels: u16, sample_rate_hz: u32) -> Self {
        Self {
            sample_width_bytes,
            channels,
            sample_rate_hz,
            encoding: SampleEncoding::from_sample_width(sample_width_bytes),
        }
    }

    /// Build a format from externally parsed header info.
    ///
    /// Produces state identical to [`AudioFormat::new`] with the same triple.
    pub fn from_header(info: &HeaderInfo) -> Self {
        Self::new(info.sample_width_bytes, info.channels, info.sample_rate_hz)
    }

    pub fn sample_width_bytes(&self) -> u16 {
        self.sample_width_bytes
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Size of one frame (one sample for every channel) in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }
}
