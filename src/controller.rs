use crate::{
    control_connection::TorControlConnection,
    error::TorError,
    fs::{FileSystem, OsFileSystem},
    onion::{OnionAddress, OnionServiceRequest},
    protocol_info::ProtocolInfo,
};
use log::debug;
use std::sync::atomic::{AtomicU8, Ordering};
use strum::Display;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`TorController`].
///
/// `Unstarted -> Starting -> Ready | Failed`, and from any of those to `Stopped`. A controller
/// never leaves `Failed` or `Stopped` except by being stopped.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ControllerState {
    Unstarted = 0,
    Starting = 1,
    Ready = 2,
    Failed = 3,
    Stopped = 4,
}

impl ControllerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ControllerState::Unstarted,
            1 => ControllerState::Starting,
            2 => ControllerState::Ready,
            3 => ControllerState::Failed,
            _ => ControllerState::Stopped,
        }
    }
}

struct ControlSession {
    connection: TorControlConnection,
    tor_version: String,
}

/// An authenticated session with a Tor server's control port.
///
/// [`start`](Self::start) dials the control port and performs SAFECOOKIE authentication;
/// [`stop`](Self::stop) closes the connection. Both are idempotent and may be called concurrently:
/// exactly one caller does the work. A controller whose start failed cannot be restarted; stop it
/// and create a new one.
///
/// Commands are serialized on the single connection. None of them time out; stopping the
/// controller makes any command in flight fail with a connection error.
pub struct TorController<F: FileSystem = OsFileSystem> {
    control_addr: String,
    state: AtomicU8,
    session: Mutex<Option<ControlSession>>,
    shutdown: CancellationToken,
    file_system: F,
}

impl TorController<OsFileSystem> {
    pub fn new<A: Into<String>>(control_addr: A) -> Self {
        Self::with_file_system(control_addr, OsFileSystem)
    }
}

impl<F: FileSystem> TorController<F> {
    pub fn with_file_system<A: Into<String>>(control_addr: A, file_system: F) -> Self {
        Self {
            control_addr: control_addr.into(),
            state: AtomicU8::new(ControllerState::Unstarted as u8),
            session: Mutex::new(None),
            shutdown: CancellationToken::new(),
            file_system,
        }
    }

    pub fn control_addr(&self) -> &str {
        &self.control_addr
    }

    pub fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn file_system(&self) -> &F {
        &self.file_system
    }

    fn transition(&self, from: ControllerState, to: ControllerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Connect to the control port and authenticate.
    ///
    /// Only the first call does anything. Calls made while that one is in progress, or after it
    /// succeeded, return `Ok(())`; calls after a failure or a stop return
    /// [`TorError::SessionUnusable`].
    pub async fn start(&self) -> Result<(), TorError> {
        if !self.transition(ControllerState::Unstarted, ControllerState::Starting) {
            return match self.state() {
                ControllerState::Starting | ControllerState::Ready => Ok(()),
                state => Err(TorError::SessionUnusable(state)),
            };
        }

        match self.connect_and_authenticate().await {
            Ok(()) => {
                if self.transition(ControllerState::Starting, ControllerState::Ready) {
                    debug!("Authenticated to Tor control port {}", self.control_addr);
                    Ok(())
                } else {
                    Err(TorError::SessionUnusable(self.state()))
                }
            }
            Err(error) => {
                self.transition(ControllerState::Starting, ControllerState::Failed);
                Err(error)
            }
        }
    }

    async fn connect_and_authenticate(&self) -> Result<(), TorError> {
        // Held throughout, so a concurrent stop waits for the connection to be recorded
        let mut session = self.session.lock().await;

        debug!("Connecting to Tor control port {}", self.control_addr);
        let connection = TorControlConnection::connect_with_shutdown(
            self.control_addr.as_str(),
            self.shutdown.child_token(),
        )
        .await?;
        let session = session.insert(ControlSession {
            connection,
            tor_version: String::new(),
        });

        let protocol_info = session.connection.authenticate(&self.file_system).await?;
        session.tor_version = protocol_info.tor_version().to_string();
        Ok(())
    }

    /// Close the connection to the control port.
    ///
    /// Only the first call does anything; it also aborts any command in flight. Stopping a
    /// controller that failed to start closes whatever connection it had opened.
    pub async fn stop(&self) -> Result<(), TorError> {
        let previous =
            ControllerState::from_u8(self.state.swap(ControllerState::Stopped as u8, Ordering::AcqRel));
        if previous == ControllerState::Stopped {
            return Ok(());
        }

        self.shutdown.cancel();
        let session = self.session.lock().await.take();
        match session {
            Some(session) => {
                if let Err(error) = session.connection.close().await {
                    debug!("Error shutting down control connection: {}", error);
                }
                debug!("Closed Tor control connection to {}", self.control_addr);
            }
            None => debug!("Stopped controller for {} before it connected", self.control_addr),
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), TorError> {
        match self.state() {
            ControllerState::Ready => Ok(()),
            state => Err(TorError::NotReady(state)),
        }
    }

    /// The Tor version learned while authenticating
    pub async fn tor_version(&self) -> Option<String> {
        self.ensure_ready().ok()?;
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.tor_version.clone())
    }

    /// Re-issue `PROTOCOLINFO`, refreshing the cached Tor version.
    pub async fn protocol_info(&self) -> Result<ProtocolInfo, TorError> {
        self.ensure_ready()?;
        let mut session = self.session.lock().await;
        let session = session
            .as_mut()
            .ok_or_else(|| TorError::NotReady(self.state()))?;

        let protocol_info = session.connection.get_protocol_info().await?;
        session.tor_version = protocol_info.tor_version().to_string();
        Ok(protocol_info)
    }

    /// Create an onion service, or restore one from its saved private key.
    ///
    /// See [`TorControlConnection::create_onion_service`].
    pub async fn add_onion(&self, request: &OnionServiceRequest) -> Result<OnionAddress, TorError> {
        self.ensure_ready()?;
        let mut session = self.session.lock().await;
        let session = session
            .as_mut()
            .ok_or_else(|| TorError::NotReady(self.state()))?;

        session
            .connection
            .create_onion_service(&session.tor_version, request, &self.file_system)
            .await
    }
}
