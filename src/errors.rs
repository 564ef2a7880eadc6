use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("i2c: {0}")]
    I2c(String),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[cfg(feature = "usb-camera")]
    #[error("jpeg decode: {0:?}")]
    JPEGDecoder(zune_jpeg::errors::DecodeErrors),

    #[error("config: {0}")]
    Config(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed reply from a device speaking a framed protocol.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Device missing or refusing to initialize.
    #[error("device {device}: {reason}")]
    Device { device: String, reason: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("end of stream")]
    EndOfStream,

    #[error("channel recv")]
    ChannelRecv,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn device(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Device {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "usb-camera")]
impl From<zune_jpeg::errors::DecodeErrors> for Error {
    fn from(value: zune_jpeg::errors::DecodeErrors) -> Self {
        Error::JPEGDecoder(value)
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Error::Config(value.to_string())
    }
}

