//! Output device session seam and the CPAL implementation.
//!
//! The worker only ever talks to [`DeviceSession`]: open a session, start
//! it, write PCM bytes (blocking until the device accepts them), stop it.
//! [`CpalBackend`] realizes that contract on top of CPAL's callback model
//! by feeding a bounded [`ByteRing`]: the worker-side `write` blocks on
//! the ring (the real-time throttle), the callback drains it without ever
//! blocking and fills underruns with silence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::format::{AudioFormat, SampleEncoding};
use crate::queue::ByteRing;

/// How long a closing session waits for buffered audio to play out.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One open output-device session.
///
/// Owned by exactly one playback worker from open to drop; never shared.
pub trait DeviceSession {
    /// Human-readable device label for status/logging.
    fn label(&self) -> &str;

    /// Begin rendering.
    fn start(&mut self) -> Result<()>;

    /// Write PCM bytes, blocking until the device has accepted them.
    ///
    /// Bytes are passed through as-is; no size or alignment validation
    /// against the configured format is performed.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Stop rendering. Buffered audio is given a bounded chance to play
    /// out. The underlying device handle is released on drop.
    fn stop(&mut self);
}

/// Factory for device sessions, called on the worker thread.
///
/// A seam rather than a concrete type so tests can substitute a fake
/// session that records writes.
pub trait DeviceBackend: Send + Sync {
    fn open(&self, format: &AudioFormat, buffer_frames: u32) -> Result<Box<dyn DeviceSession>>;
}

/// CPAL-based backend targeting the host's output devices.
pub struct CpalBackend {
    device_needle: Option<String>,
}

impl CpalBackend {
    /// `device_needle` selects an output device by case-insensitive
    /// substring match; `None` uses the host default.
    pub fn new(device_needle: Option<String>) -> Self {
        Self { device_needle }
    }
}

impl DeviceBackend for CpalBackend {
    fn open(&self, format: &AudioFormat, buffer_frames: u32) -> Result<Box<dyn DeviceSession>> {
        let host = cpal::default_host();
        let device = pick_device(&host, self.device_needle.as_deref())?;
        let label = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "output".to_string());

        let default_config = device
            .default_output_config()
            .context("No default output config")?;
        let sample_format = default_config.sample_format();

        let config = cpal::StreamConfig {
            channels: format.channels(),
            sample_rate: format.sample_rate_hz(),
            buffer_size: pick_buffer_size(default_config.buffer_size(), buffer_frames),
        };

        let frame_bytes = format.frame_bytes().max(1);
        let ring_capacity = ring_capacity_bytes(frame_bytes, buffer_frames);

        tracing::debug!(
            device = %label,
            rate_hz = format.sample_rate_hz(),
            channels = format.channels(),
            output_sample_format = ?sample_format,
            ring_capacity_bytes = ring_capacity,
            "opening output session"
        );

        let session = match sample_format {
            cpal::SampleFormat::F32 => build_session::<f32>(
                &device,
                &config,
                label,
                format.encoding(),
                frame_bytes,
                ring_capacity,
            ),
            cpal::SampleFormat::I16 => build_session::<i16>(
                &device,
                &config,
                label,
                format.encoding(),
                frame_bytes,
                ring_capacity,
            ),
            cpal::SampleFormat::I32 => build_session::<i32>(
                &device,
                &config,
                label,
                format.encoding(),
                frame_bytes,
                ring_capacity,
            ),
            cpal::SampleFormat::U16 => build_session::<u16>(
                &device,
                &config,
                label,
                format.encoding(),
                frame_bytes,
                ring_capacity,
            ),
            other => Err(anyhow!("Unsupported sample format: {other:?}")),
        }?;

        Ok(Box::new(session))
    }
}

/// Pick the first output device matching `needle` (case-insensitive), or
/// the default device.
///
/// Returns an error if no suitable device is found.
fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// Clamp the requested buffer size to what the device advertises.
///
/// Returns `BufferSize::Default` when the device does not report a range.
fn pick_buffer_size(supported: &cpal::SupportedBufferSize, target_frames: u32) -> cpal::BufferSize {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } => {
            cpal::BufferSize::Fixed(target_frames.clamp(*min, *max))
        }
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    }
}

/// Ring sized for a few callbacks' worth of audio: enough to decouple the
/// worker from callback timing without adding noticeable latency.
fn ring_capacity_bytes(frame_bytes: usize, buffer_frames: u32) -> usize {
    (frame_bytes * buffer_frames.max(1) as usize * 4).max(frame_bytes * 64)
}

/// Type-specialized session builder for CPAL sample formats.
///
/// The callback pops frame-aligned bytes from the ring, decodes them to
/// `f32` per the configured encoding, and converts to the device sample
/// type. Underruns are filled with silence. A stream error closes the
/// ring so a blocked writer wakes up and observes the failure.
fn build_session<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    label: String,
    encoding: SampleEncoding,
    frame_bytes: usize,
    ring_capacity: usize,
) -> Result<CpalSession>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let ring = Arc::new(ByteRing::new(ring_capacity));
    let failed = Arc::new(AtomicBool::new(false));

    let ring_cb = ring.clone();
    let ring_err = ring.clone();
    let failed_err = failed.clone();
    let err_fn = move |err| {
        tracing::warn!("output stream error: {err}");
        failed_err.store(true, Ordering::Relaxed);
        // Unblock a writer stuck waiting for callback progress.
        ring_err.close();
    };

    let bytes_per_sample = encoding.bytes_per_sample();
    let mut pending: Vec<f32> = Vec::new();
    let mut pos = 0usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let mut i = 0;
            while i < data.len() {
                if pos >= pending.len() {
                    pending.clear();
                    pos = 0;
                    let want_bytes = (data.len() - i) * bytes_per_sample;
                    match ring_cb.pop_bytes(want_bytes, frame_bytes) {
                        Some(bytes) => decode_samples(encoding, &bytes, &mut pending),
                        None => break,
                    }
                    if pending.is_empty() {
                        break;
                    }
                }
                data[i] = <T as cpal::Sample>::from_sample::<f32>(pending[pos]);
                pos += 1;
                i += 1;
            }
            for slot in &mut data[i..] {
                *slot = <T as cpal::Sample>::from_sample::<f32>(0.0);
            }
        },
        err_fn,
        None,
    )?;

    Ok(CpalSession {
        label,
        ring,
        stream,
        failed,
    })
}

/// Decode little-endian signed PCM bytes into `f32` samples in [-1, 1).
///
/// `bytes` must be a multiple of the sample width; the ring's aligned pop
/// guarantees that for callback input.
fn decode_samples(encoding: SampleEncoding, bytes: &[u8], out: &mut Vec<f32>) {
    match encoding {
        SampleEncoding::Int8 => {
            out.extend(bytes.iter().map(|&b| (b as i8) as f32 / 128.0));
        }
        SampleEncoding::Int16 => {
            out.extend(
                bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0),
            );
        }
        SampleEncoding::Int24 => {
            out.extend(bytes.chunks_exact(3).map(|b| {
                let raw = (b[0] as u32) | ((b[1] as u32) << 8) | ((b[2] as u32) << 16);
                let v = ((raw << 8) as i32) >> 8;
                v as f32 / 8_388_608.0
            }));
        }
        SampleEncoding::Int32 => {
            out.extend(
                bytes
                    .chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0),
            );
        }
    }
}

/// CPAL-backed device session: a stream plus the ring feeding it.
struct CpalSession {
    label: String,
    ring: Arc<ByteRing>,
    stream: cpal::Stream,
    failed: Arc<AtomicBool>,
}

impl DeviceSession for CpalSession {
    fn label(&self) -> &str {
        &self.label
    }

    fn start(&mut self) -> Result<()> {
        self.stream.play().context("start output stream")
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(anyhow!("output stream reported an error"));
        }
        if !self.ring.push_blocking(bytes) {
            if self.failed.load(Ordering::Relaxed) {
                return Err(anyhow!("output stream reported an error"));
            }
            return Err(anyhow!("output session closed"));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.ring.close();
        if !self.failed.load(Ordering::Relaxed) && !self.ring.wait_empty(DRAIN_TIMEOUT) {
            tracing::warn!("output buffer did not drain before stop");
        }
        if let Err(e) = self.stream.pause() {
            tracing::debug!("pause on stop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_buffer_size_clamps_to_supported_range() {
        let range = cpal::SupportedBufferSize::Range { min: 256, max: 4096 };
        assert_eq!(pick_buffer_size(&range, 1024), cpal::BufferSize::Fixed(1024));
        assert_eq!(pick_buffer_size(&range, 16), cpal::BufferSize::Fixed(256));
        assert_eq!(pick_buffer_size(&range, 1 << 20), cpal::BufferSize::Fixed(4096));
    }

    #[test]
    fn pick_buffer_size_defaults_when_unknown() {
        assert_eq!(
            pick_buffer_size(&cpal::SupportedBufferSize::Unknown, 1024),
            cpal::BufferSize::Default
        );
    }

    #[test]
    fn ring_capacity_has_a_floor() {
        assert_eq!(ring_capacity_bytes(4, 1024), 4 * 1024 * 4);
        // Tiny buffer requests still get a usable ring.
        assert_eq!(ring_capacity_bytes(4, 1), 4 * 64);
    }

    #[test]
    fn decode_int8_scales_to_unit_range() {
        let mut out = Vec::new();
        decode_samples(SampleEncoding::Int8, &[0x80, 0x00, 0x7f], &mut out);
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn decode_int16_little_endian() {
        let mut out = Vec::new();
        decode_samples(
            SampleEncoding::Int16,
            &[0x00, 0x80, 0x00, 0x00, 0xff, 0x7f],
            &mut out,
        );
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 32_767.0 / 32_768.0).abs() < 1e-6);
    }

    #[test]
    fn decode_int24_sign_extends() {
        let mut out = Vec::new();
        // -1 and +1 as 24-bit little-endian.
        decode_samples(
            SampleEncoding::Int24,
            &[0xff, 0xff, 0xff, 0x01, 0x00, 0x00],
            &mut out,
        );
        assert!((out[0] - (-1.0 / 8_388_608.0)).abs() < 1e-9);
        assert!((out[1] - (1.0 / 8_388_608.0)).abs() < 1e-9);
    }

    #[test]
    fn decode_int32_full_scale() {
        let mut out = Vec::new();
        decode_samples(
            SampleEncoding::Int32,
            &i32::MIN.to_le_bytes().into_iter().chain(i32::MAX.to_le_bytes()).collect::<Vec<_>>(),
            &mut out,
        );
        assert_eq!(out[0], -1.0);
        assert!((out[1] - 1.0).abs() < 1e-6);
    }
}
