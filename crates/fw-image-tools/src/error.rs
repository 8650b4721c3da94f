use std::fmt;

#[derive(Debug)]
pub enum Error {
    InputFormat(String),
    InvalidUnit(String),
    MissingPartitions(String),
    MalformedPartitionEntry { index: usize, reason: String },
    SizeParse { name: String, value: String },
    BadImage(String),
    Config(String),
    Io(String),
    Msg(String),
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::Msg(msg.into())
    }

    pub fn io<M: Into<String>>(msg: M) -> Self {
        Self::Io(msg.into())
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::Config(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InputFormat(m) => write!(f, "invalid layout document: {m}"),
            Error::InvalidUnit(m) => write!(f, "invalid unit: {m}"),
            Error::MissingPartitions(m) => write!(f, "missing partitions: {m}"),
            Error::MalformedPartitionEntry { index, reason } => {
                write!(f, "malformed partition entry #{index}: {reason}")
            }
            Error::SizeParse { name, value } => {
                write!(f, "invalid size '{value}' for partition '{name}'")
            }
            Error::BadImage(m) => write!(f, "bad partition image: {m}"),
            Error::Config(m) => write!(f, "config error: {m}"),
            Error::Io(m) | Error::Msg(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InputFormat(err.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
