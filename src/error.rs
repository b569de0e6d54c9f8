use crate::controller::ControllerState;
use std::path::PathBuf;
use tokio_util::codec::LinesCodecError;

#[derive(Debug)]
pub enum TorError {
    /// Dial, read or write failure on the control connection
    ConnectionError(std::io::Error),
    ProtocolError(String),
    CommandRejected {
        command: String,
        status_code: u16,
        reply: String,
    },
    MalformedReply(String),
    MissingField(&'static str),
    UnsupportedAuthMethod(Vec<String>),
    CookieReadFailed {
        path: PathBuf,
        error: std::io::Error,
    },
    InvalidCookieLength(usize),
    RandomSourceFailed(String),
    MalformedChallengeReply(String),
    /// The server could not prove knowledge of the cookie. Treat as an active attack.
    ServerProofInvalid,
    AuthenticationRejected {
        status_code: u16,
        reply: String,
    },
    MalformedVersion(String),
    UnsupportedServiceVersion {
        version: String,
        minimum: &'static str,
    },
    ServiceIDMissing,
    KeyReadFailed(std::io::Error),
    InvalidPrivateKey(String),
    KeyPersistFailed(std::io::Error),
    NotReady(ControllerState),
    SessionUnusable(ControllerState),
}

impl std::fmt::Display for TorError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::ConnectionError(error) => write!(f, "Connection Error: {}", error),
            Self::ProtocolError(error) => write!(f, "Protocol Error: {}", error),
            Self::CommandRejected {
                command,
                status_code,
                reply,
            } => write!(
                f,
                "Command {} rejected with status {}: {}",
                command, status_code, reply
            ),
            Self::MalformedReply(error) => write!(f, "Malformed reply: {}", error),
            Self::MissingField(field) => write!(f, "Field {} not found in reply", field),
            Self::UnsupportedAuthMethod(methods) => write!(
                f,
                "SAFECOOKIE authentication not offered by server (offered: {})",
                methods.join(",")
            ),
            Self::CookieReadFailed { path, error } => write!(
                f,
                "Error reading cookie file {}: {}",
                path.display(),
                error
            ),
            Self::InvalidCookieLength(length) => {
                write!(f, "Invalid authentication cookie length {}", length)
            }
            Self::RandomSourceFailed(error) => {
                write!(f, "Unable to generate client nonce: {}", error)
            }
            Self::MalformedChallengeReply(error) => {
                write!(f, "Malformed AUTHCHALLENGE reply: {}", error)
            }
            Self::ServerProofInvalid => write!(f, "Server hash didn't validate"),
            Self::AuthenticationRejected { status_code, reply } => write!(
                f,
                "Authentication rejected with status {}: {}",
                status_code, reply
            ),
            Self::MalformedVersion(version) => write!(
                f,
                "Version string {:?} is not of the format major.minor.revision.build",
                version
            ),
            Self::UnsupportedServiceVersion { version, minimum } => write!(
                f,
                "Tor version {} below minimum version {} required for v3 onion services",
                version, minimum
            ),
            Self::ServiceIDMissing => write!(f, "ServiceID not found in ADD_ONION reply"),
            Self::KeyReadFailed(error) => write!(f, "Unable to read private key file: {}", error),
            Self::InvalidPrivateKey(error) => write!(f, "Invalid private key: {}", error),
            Self::KeyPersistFailed(error) => {
                write!(f, "Unable to write private key to file: {}", error)
            }
            Self::NotReady(state) => write!(f, "Controller is not ready (state: {})", state),
            Self::SessionUnusable(state) => write!(
                f,
                "Controller cannot be started again (state: {})",
                state
            ),
        }
    }
}

impl std::error::Error for TorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectionError(error)
            | Self::CookieReadFailed { error, .. }
            | Self::KeyReadFailed(error)
            | Self::KeyPersistFailed(error) => Some(error),
            _ => None,
        }
    }
}

impl TorError {
    pub fn protocol_error(msg: &str) -> TorError {
        TorError::ProtocolError(msg.to_string())
    }

    pub fn malformed_reply(msg: &str) -> TorError {
        TorError::MalformedReply(msg.to_string())
    }

    pub fn malformed_challenge(msg: &str) -> TorError {
        TorError::MalformedChallengeReply(msg.to_string())
    }
}

impl From<std::io::Error> for TorError {
    fn from(error: std::io::Error) -> TorError {
        TorError::ConnectionError(error)
    }
}

impl From<LinesCodecError> for TorError {
    fn from(error: LinesCodecError) -> TorError {
        match error {
            LinesCodecError::MaxLineLengthExceeded => TorError::ProtocolError(error.to_string()),
            LinesCodecError::Io(error) => error.into(),
        }
    }
}
