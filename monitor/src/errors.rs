use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown bin: {0}")]
    MissingBin(String),

    #[error("Malformed reading: {0}")]
    MalformedReading(String),

    #[error("Bin already exists: {0}")]
    DuplicateBin(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel send error")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;
