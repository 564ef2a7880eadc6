use std::fmt::Debug;

use v4l::{
    buffer::Type,
    frameinterval::FrameIntervalEnum,
    framesize::FrameSizeEnum,
    io::traits::CaptureStream,
    prelude::MmapStream,
    video::{capture::Parameters, Capture},
    Device, Format, FourCC, Fraction,
};
use zune_jpeg::JpegDecoder;

use crate::{config::CameraConfig, devices::Sensor, reading::Frame, Error, Result};

/// MJPEG USB camera, decoded to RGB on the capture thread.
pub struct Camera {
    stream: MmapStream<'static>,
    fps: u32,
    width: u32,
    height: u32,
    format: FourCC,
}

impl Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("fps", &self.fps)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format.to_string())
            .finish()
    }
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let device = Device::new(config.index)
            .map_err(|e| Error::device(format!("camera{}", config.index), e.to_string()))?;
        Self::from_device(device, config.width, config.height, config.fps)
    }

    fn from_device(device: Device, width: u32, height: u32, fps: u32) -> Result<Self> {
        let fourcc = Self::find_format(&device, width, height, fps)?.ok_or_else(|| {
            Error::device(
                "camera",
                format!("no MJPEG mode {width}x{height}@{fps}"),
            )
        })?;

        let real_format = device.set_format(&Format::new(width, height, fourcc))?;
        let real_params = device.set_params(&Parameters::new(Fraction::new(1, fps)))?;
        let stream = MmapStream::new(&device, Type::VideoCapture)?;

        let cam = Camera {
            stream,
            fps: real_params.interval.denominator,
            format: real_format.fourcc,
            width: real_format.width,
            height: real_format.height,
        };
        log::info!("{cam:?}");
        Ok(cam)
    }

    fn find_format(device: &Device, width: u32, height: u32, fps: u32) -> Result<Option<FourCC>> {
        let mjpg = FourCC::new(b"MJPG");
        for format in device.enum_formats()? {
            if format.fourcc != mjpg {
                continue;
            }
            for frame_size in device.enum_framesizes(format.fourcc)? {
                let FrameSizeEnum::Discrete(size) = frame_size.size else {
                    continue;
                };
                if size.width != width || size.height != height {
                    continue;
                }
                for fi in device.enum_frameintervals(format.fourcc, size.width, size.height)? {
                    if let FrameIntervalEnum::Discrete(fraction) = fi.interval {
                        if fraction.denominator == fps {
                            return Ok(Some(format.fourcc));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    pub fn capture(&mut self) -> Result<Frame> {
        let (raw_mjpeg, _) = self.stream.next()?;
        let mut decoder = JpegDecoder::new(raw_mjpeg);
        let rgb = decoder.decode()?;
        Ok(Frame {
            width: self.width,
            height: self.height,
            rgb,
        })
    }
}

impl Sensor for Camera {
    type Reading = Frame;

    fn read(&mut self) -> Result<Frame> {
        self.capture()
    }
}
