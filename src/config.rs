//! Stream formats, hardware capabilities, and driver configuration

use crate::error::{Error, Result};

/// Sample encoding
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SampleFormat {
    U8,
    S16Le,
    S16Be,
    S24Le,
    S32Le,
}

impl SampleFormat {
    /// Bytes occupied by one sample of one channel
    pub const fn bytes(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le | SampleFormat::S16Be => 2,
            SampleFormat::S24Le | SampleFormat::S32Le => 4,
        }
    }
}

/// A sample format, channel count, and rate
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Format {
    pub sample: SampleFormat,
    pub channels: u16,
    pub rate: u32,
}

impl Format {
    /// The only format the microphone produces: mono, S16_LE, 44.1 kHz
    pub const MONO_S16LE_44100: Format = Format {
        sample: SampleFormat::S16Le,
        channels: 1,
        rate: 44_100,
    };

    /// Bytes per frame (one sample for every channel)
    pub const fn frame_bytes(&self) -> usize {
        self.sample.bytes() * self.channels as usize
    }
}

/// Capability descriptor exposed to the host audio subsystem
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Hardware {
    pub format: Format,
    pub buffer_bytes_max: usize,
    pub period_bytes_min: usize,
    pub period_bytes_max: usize,
    pub periods_min: usize,
    pub periods_max: usize,
}

/// One second of mono S16_LE at 44.1 kHz
const BUFFER_BYTES_MAX: usize = 44_100 * 2;

/// The microphone's capabilities
pub const HARDWARE: Hardware = Hardware {
    format: Format::MONO_S16LE_44100,
    buffer_bytes_max: BUFFER_BYTES_MAX,
    period_bytes_min: 1024,
    period_bytes_max: BUFFER_BYTES_MAX / 4,
    periods_min: 2,
    periods_max: 4,
};

/// Negotiated hardware parameters
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HwParams {
    pub format: Format,
    pub buffer_bytes: usize,
    pub period_bytes: usize,
}

impl HwParams {
    pub fn new(format: Format, buffer_bytes: usize, period_bytes: usize) -> Self {
        HwParams {
            format,
            buffer_bytes,
            period_bytes,
        }
    }

    /// Check these parameters against the hardware
    ///
    /// The format must match exactly. Buffer and period sizes must be whole
    /// frames, and the buffer must fit the preallocated storage. A period
    /// must lie within `period_bytes_min..=period_bytes_max`, and the buffer
    /// must hold at least `periods_min` periods. `periods_max` isn't
    /// enforced; smaller periods in a full-size buffer are fine.
    pub fn validate(&self, hw: &Hardware) -> Result<()> {
        if self.format != hw.format {
            return Err(Error::UnsupportedFormat);
        }
        let frame = self.format.frame_bytes();
        let geometry_ok = self.buffer_bytes > 0
            && self.buffer_bytes <= hw.buffer_bytes_max
            && self.period_bytes >= hw.period_bytes_min
            && self.period_bytes <= hw.period_bytes_max
            && self.buffer_bytes >= self.period_bytes.saturating_mul(hw.periods_min)
            && self.buffer_bytes % frame == 0
            && self.period_bytes % frame == 0;
        if geometry_ok {
            Ok(())
        } else {
            Err(Error::InvalidParams {
                buffer_bytes: self.buffer_bytes,
                period_bytes: self.period_bytes,
            })
        }
    }
}

/// What to do when a completion would overwrite unread capture data
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum OverrunPolicy {
    /// Drop the incoming chunk and count an overrun.
    ///
    /// The consumer is too slow; data already in the ring is kept.
    #[default]
    Drop,
    /// Always write, overwriting the oldest data.
    ///
    /// Use this for consumers that only follow the hardware pointer and
    /// never call `read()`.
    Overwrite,
}

/// Which IN transfer type endpoint discovery accepts
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum EndpointPreference {
    /// Bulk IN only
    #[default]
    Bulk,
    /// Isochronous IN only
    Isochronous,
    /// The first bulk or isochronous IN endpoint
    Any,
}

/// Default transfer scratch buffer size
pub const DEFAULT_SCRATCH_LEN: usize = 1024;

/// Per-device driver configuration
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Config {
    scratch_len: usize,
    overrun: OverrunPolicy,
    prefer: EndpointPreference,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scratch_len: DEFAULT_SCRATCH_LEN,
            overrun: OverrunPolicy::default(),
            prefer: EndpointPreference::default(),
        }
    }
}

impl Config {
    /// Set the transfer scratch buffer size
    ///
    /// Zero is replaced with the default.
    pub fn with_scratch_len(mut self, scratch_len: usize) -> Self {
        self.scratch_len = if scratch_len == 0 {
            DEFAULT_SCRATCH_LEN
        } else {
            scratch_len
        };
        self
    }

    pub fn with_overrun(mut self, overrun: OverrunPolicy) -> Self {
        self.overrun = overrun;
        self
    }

    pub fn with_endpoint_preference(mut self, prefer: EndpointPreference) -> Self {
        self.prefer = prefer;
        self
    }

    pub fn scratch_len(&self) -> usize {
        self.scratch_len
    }

    pub fn overrun(&self) -> OverrunPolicy {
        self.overrun
    }

    pub fn endpoint_preference(&self) -> EndpointPreference {
        self.prefer
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Format, HwParams, OverrunPolicy, SampleFormat, DEFAULT_SCRATCH_LEN, HARDWARE};
    use crate::error::Error;

    #[test]
    fn hardware_bounds() {
        assert_eq!(HARDWARE.buffer_bytes_max, 88_200);
        assert_eq!(HARDWARE.period_bytes_max, 22_050);
        assert_eq!(HARDWARE.format.frame_bytes(), 2);
    }

    #[test]
    fn accept_fixed_format() {
        let params = HwParams::new(Format::MONO_S16LE_44100, 88_200, 1024);
        assert_eq!(params.validate(&HARDWARE), Ok(()));
    }

    #[test]
    fn accept_period_bounds() {
        let fmt = Format::MONO_S16LE_44100;
        for (buffer, period) in [(88_200, 22_050), (2048, 1024), (44_100, 1024)] {
            assert_eq!(HwParams::new(fmt, buffer, period).validate(&HARDWARE), Ok(()));
        }
    }

    #[test]
    fn reject_stereo() {
        let stereo = Format {
            channels: 2,
            ..Format::MONO_S16LE_44100
        };
        let params = HwParams::new(stereo, 88_200, 1024);
        assert_eq!(params.validate(&HARDWARE), Err(Error::UnsupportedFormat));
    }

    #[test]
    fn reject_other_rates_and_encodings() {
        let rate = Format {
            rate: 48_000,
            ..Format::MONO_S16LE_44100
        };
        assert_eq!(
            HwParams::new(rate, 4096, 1024).validate(&HARDWARE),
            Err(Error::UnsupportedFormat)
        );
        let encoding = Format {
            sample: SampleFormat::S24Le,
            ..Format::MONO_S16LE_44100
        };
        assert_eq!(
            HwParams::new(encoding, 4096, 1024).validate(&HARDWARE),
            Err(Error::UnsupportedFormat)
        );
    }

    #[test]
    fn reject_bad_geometry() {
        let fmt = Format::MONO_S16LE_44100;
        let cases = [
            (0, 1024),
            (88_202, 1024),
            (4096, 512),
            (2048, 4096),
            (4097, 1024),
            // One period covering the whole buffer
            (88_200, 88_200),
            (1024, 1024),
            // Period above buffer / 4
            (88_200, 22_052),
            // Fewer than two periods
            (3072, 2048),
        ];
        for (buffer, period) in cases {
            assert_eq!(
                HwParams::new(fmt, buffer, period).validate(&HARDWARE),
                Err(Error::InvalidParams {
                    buffer_bytes: buffer,
                    period_bytes: period
                })
            );
        }
    }

    #[test]
    fn config_builder() {
        let config = Config::default();
        assert_eq!(config.scratch_len(), DEFAULT_SCRATCH_LEN);
        assert_eq!(config.overrun(), OverrunPolicy::Drop);

        let config = config
            .with_scratch_len(0)
            .with_overrun(OverrunPolicy::Overwrite);
        assert_eq!(config.scratch_len(), DEFAULT_SCRATCH_LEN);
        assert_eq!(config.overrun(), OverrunPolicy::Overwrite);
    }
}
