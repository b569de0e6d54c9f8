use crate::{control_connection::TorControlConnection, error::TorError, reply::parse_reply};
use log::debug;
use std::path::{Path, PathBuf};

/// Version of the `PROTOCOLINFO` reply format we ask for
pub const PROTOCOL_INFO_VERSION: u32 = 1;

/// What the server tells us about itself before authentication
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolInfo {
    auth_methods: Vec<String>,
    cookie_file: PathBuf,
    tor_version: String,
}

impl ProtocolInfo {
    pub fn auth_methods(&self) -> &[String] {
        &self.auth_methods
    }

    pub fn cookie_file(&self) -> &Path {
        &self.cookie_file
    }

    pub fn tor_version(&self) -> &str {
        &self.tor_version
    }

    pub fn supports(&self, method: &str) -> bool {
        self.auth_methods.iter().any(|m| m == method)
    }

    fn from_reply(reply: &str) -> Result<Self, TorError> {
        // METHODS=COOKIE,SAFECOOKIE
        // COOKIEFILE="/home/user/.tor/control_auth_cookie"
        // VERSION Tor="0.3.2.10"
        let mut params = parse_reply(reply)?;
        let methods = params
            .remove("METHODS")
            .ok_or(TorError::MissingField("METHODS"))?;
        let cookie_file = params
            .remove("COOKIEFILE")
            .ok_or(TorError::MissingField("COOKIEFILE"))?;
        let tor_version = params.remove("Tor").ok_or(TorError::MissingField("Tor"))?;

        Ok(Self {
            auth_methods: methods
                .split(',')
                .filter(|method| !method.is_empty())
                .map(|method| method.to_string())
                .collect(),
            cookie_file: PathBuf::from(cookie_file.trim_matches('"')),
            tor_version: tor_version.trim_matches('"').to_string(),
        })
    }
}

impl TorControlConnection {
    /// Issue `PROTOCOLINFO` and decode the auth methods, cookie path and version.
    pub async fn get_protocol_info(&mut self) -> Result<ProtocolInfo, TorError> {
        let control_response = self
            .send_command("PROTOCOLINFO", Some(&PROTOCOL_INFO_VERSION.to_string()))
            .await?;
        let protocol_info = ProtocolInfo::from_reply(&control_response.reply)?;
        debug!(
            "Tor {} offers auth methods {}",
            protocol_info.tor_version,
            protocol_info.auth_methods.join(",")
        );
        Ok(protocol_info)
    }
}
