//! SAFECOOKIE authentication.
//!
//! The handshake proves both ways that each side can read the daemon's cookie file:
//!
//! 1. `PROTOCOLINFO` tells us the cookie path; we read the 32-byte cookie.
//! 2. `AUTHCHALLENGE SAFECOOKIE <client nonce>` returns `SERVERHASH` and `SERVERNONCE`.
//! 3. We check `SERVERHASH == HMAC-SHA256(server key, cookie | client nonce | server nonce)`.
//! 4. `AUTHENTICATE <HMAC-SHA256(controller key, same message)>`.
//!
//! Plain `COOKIE` authentication is not supported.

use crate::{
    control_connection::TorControlConnection, error::TorError, fs::FileSystem,
    protocol_info::ProtocolInfo, reply::parse_reply,
};
use hmac::{Hmac, Mac};
use log::{debug, warn};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use std::{collections::HashMap, path::Path};
use strum::Display;
use zeroize::Zeroizing;

// Create alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

pub const SAFE_COOKIE_METHOD: &str = "SAFECOOKIE";
pub const COOKIE_LEN: usize = 32;
pub const NONCE_LEN: usize = 32;
pub const HASH_LEN: usize = 32;

/// HMAC key for the proof sent by the server
pub const SERVER_TO_CONTROLLER_KEY: &[u8] =
    b"Tor safe cookie authentication server-to-controller hash";

/// HMAC key for the proof sent by us
pub const CONTROLLER_TO_SERVER_KEY: &[u8] =
    b"Tor safe cookie authentication controller-to-server hash";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum AuthState {
    Idle,
    CookieLoaded,
    ChallengeSent,
    ServerVerified,
    Authenticated,
    Failed,
}

struct ServerChallenge {
    server_hash: [u8; HASH_LEN],
    server_nonce: [u8; NONCE_LEN],
}

fn keyed_mac(key: &[u8], message: &[u8]) -> HmacSha256 {
    let mut hmac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    hmac.update(message);
    hmac
}

pub fn compute_hmac(key: &[u8], message: &[u8]) -> [u8; HASH_LEN] {
    keyed_mac(key, message).finalize().into_bytes().into()
}

fn generate_nonce() -> Result<[u8; NONCE_LEN], TorError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|error| TorError::RandomSourceFailed(error.to_string()))?;
    Ok(nonce)
}

fn read_cookie<F: FileSystem + ?Sized>(
    file_system: &F,
    path: &Path,
) -> Result<Zeroizing<[u8; COOKIE_LEN]>, TorError> {
    let contents = Zeroizing::new(file_system.read_file(path).map_err(|error| {
        TorError::CookieReadFailed {
            path: path.to_path_buf(),
            error,
        }
    })?);
    if contents.len() != COOKIE_LEN {
        return Err(TorError::InvalidCookieLength(contents.len()));
    }
    let mut cookie = Zeroizing::new([0u8; COOKIE_LEN]);
    cookie.copy_from_slice(&contents);
    Ok(cookie)
}

fn decode_challenge_field<const N: usize>(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<[u8; N], TorError> {
    let value = params
        .get(name)
        .ok_or_else(|| TorError::MalformedChallengeReply(format!("{} not found in reply", name)))?;
    let decoded = hex::decode(value).map_err(|error| {
        TorError::MalformedChallengeReply(format!("unable to decode {}: {}", name, error))
    })?;
    decoded.as_slice().try_into().map_err(|_| {
        TorError::MalformedChallengeReply(format!("invalid {} length {}", name, decoded.len()))
    })
}

fn parse_authchallenge_response(reply: &str) -> Result<ServerChallenge, TorError> {
    // AUTHCHALLENGE SERVERHASH=<64 hex> SERVERNONCE=<64 hex>
    let params =
        parse_reply(reply).map_err(|error| TorError::malformed_challenge(&error.to_string()))?;
    Ok(ServerChallenge {
        server_hash: decode_challenge_field(&params, "SERVERHASH")?,
        server_nonce: decode_challenge_field(&params, "SERVERNONCE")?,
    })
}

/// Drives one SAFECOOKIE handshake over a connection.
///
/// An authenticator makes a single attempt. After a failure the connection is in an unknown
/// state and must be closed; it is never retried.
pub struct SafeCookieAuthenticator<'a, F: FileSystem + ?Sized> {
    connection: &'a mut TorControlConnection,
    file_system: &'a F,
    state: AuthState,
}

impl<'a, F: FileSystem + ?Sized> SafeCookieAuthenticator<'a, F> {
    pub fn new(connection: &'a mut TorControlConnection, file_system: &'a F) -> Self {
        Self {
            connection,
            file_system,
            state: AuthState::Idle,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Run the handshake, returning the server's protocol info on success.
    pub async fn authenticate(&mut self) -> Result<ProtocolInfo, TorError> {
        if self.state != AuthState::Idle {
            return Err(TorError::ProtocolError(format!(
                "SAFECOOKIE handshake already attempted (state: {})",
                self.state
            )));
        }

        let result = self.run().await;
        if let Err(error) = &result {
            debug!("SAFECOOKIE authentication failed in state {}: {}", self.state, error);
            self.state = AuthState::Failed;
        }
        result
    }

    async fn run(&mut self) -> Result<ProtocolInfo, TorError> {
        let (protocol_info, cookie) = self.load_cookie().await?;
        let client_nonce = generate_nonce()?;
        let challenge = self.send_challenge(&client_nonce).await?;
        let message = self.verify_server(&cookie, &client_nonce, &challenge)?;
        self.send_proof(&message).await?;
        Ok(protocol_info)
    }

    async fn load_cookie(
        &mut self,
    ) -> Result<(ProtocolInfo, Zeroizing<[u8; COOKIE_LEN]>), TorError> {
        let protocol_info = self.connection.get_protocol_info().await?;
        if !protocol_info.supports(SAFE_COOKIE_METHOD) {
            return Err(TorError::UnsupportedAuthMethod(
                protocol_info.auth_methods().to_vec(),
            ));
        }
        let cookie = read_cookie(self.file_system, protocol_info.cookie_file())?;
        self.state = AuthState::CookieLoaded;
        Ok((protocol_info, cookie))
    }

    async fn send_challenge(
        &mut self,
        client_nonce: &[u8; NONCE_LEN],
    ) -> Result<ServerChallenge, TorError> {
        let control_response = self
            .connection
            .send_command(
                "AUTHCHALLENGE",
                Some(&format!("{} {}", SAFE_COOKIE_METHOD, hex::encode(client_nonce))),
            )
            .await?;
        self.state = AuthState::ChallengeSent;
        parse_authchallenge_response(&control_response.reply)
    }

    fn verify_server(
        &mut self,
        cookie: &[u8; COOKIE_LEN],
        client_nonce: &[u8; NONCE_LEN],
        challenge: &ServerChallenge,
    ) -> Result<Zeroizing<Vec<u8>>, TorError> {
        let mut message = Zeroizing::new(Vec::with_capacity(COOKIE_LEN + 2 * NONCE_LEN));
        message.extend_from_slice(cookie);
        message.extend_from_slice(client_nonce);
        message.extend_from_slice(&challenge.server_nonce);

        // Constant time comparison
        if keyed_mac(SERVER_TO_CONTROLLER_KEY, &message)
            .verify_slice(&challenge.server_hash)
            .is_err()
        {
            warn!("Tor server failed to prove knowledge of the authentication cookie");
            return Err(TorError::ServerProofInvalid);
        }
        self.state = AuthState::ServerVerified;
        Ok(message)
    }

    async fn send_proof(&mut self, message: &[u8]) -> Result<(), TorError> {
        let client_hash = Zeroizing::new(compute_hmac(CONTROLLER_TO_SERVER_KEY, message));
        match self
            .connection
            .send_command("AUTHENTICATE", Some(&hex::encode(&*client_hash)))
            .await
        {
            Ok(_) => {
                self.state = AuthState::Authenticated;
                Ok(())
            }
            Err(TorError::CommandRejected {
                status_code, reply, ..
            }) => Err(TorError::AuthenticationRejected { status_code, reply }),
            Err(error) => Err(error),
        }
    }
}

impl TorControlConnection {
    /// Authenticate this connection with SAFECOOKIE, reading the cookie through `file_system`.
    pub async fn authenticate<F: FileSystem + ?Sized>(
        &mut self,
        file_system: &F,
    ) -> Result<ProtocolInfo, TorError> {
        SafeCookieAuthenticator::new(self, file_system)
            .authenticate()
            .await
    }
}
