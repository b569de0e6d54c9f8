use crate::{
    control_connection::TorControlConnection,
    error::TorError,
    fs::FileSystem,
    key::{OnionKeyAlgorithm, OnionPrivateKey},
    reply::parse_reply,
    version::meets_minimum,
};
use log::{debug, warn};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use strum::{Display, EnumString};
use zeroize::Zeroizing;

/// Oldest Tor that can create v3 onion services over the control port
pub const MIN_V3_VERSION: &str = "0.3.3.6";

pub const ONION_SUFFIX: &str = ".onion";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum OnionServiceVersion {
    V2,
    V3,
}

impl OnionServiceVersion {
    /// Algorithm to ask for when Tor has to generate a fresh key
    pub fn new_key_algorithm(&self) -> OnionKeyAlgorithm {
        match self {
            OnionServiceVersion::V2 => OnionKeyAlgorithm::Rsa1024,
            OnionServiceVersion::V3 => OnionKeyAlgorithm::Ed25519V3,
        }
    }
}

/// Everything needed to create a new onion service, or restore one from its saved key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnionServiceRequest {
    pub version: OnionServiceVersion,

    /// Externally reachable port of the onion address
    pub virtual_port: u16,

    /// Local ports Tor forwards the virtual port to. Empty means the virtual port itself.
    pub target_ports: Vec<u16>,

    /// Where the private key is read from when restoring, and written to when Tor generates one
    pub private_key_path: PathBuf,
}

impl OnionServiceRequest {
    pub fn new<P: Into<PathBuf>>(
        version: OnionServiceVersion,
        virtual_port: u16,
        private_key_path: P,
    ) -> Self {
        Self {
            version,
            virtual_port,
            target_ports: Vec::new(),
            private_key_path: private_key_path.into(),
        }
    }

    pub fn with_target_ports<I: IntoIterator<Item = u16>>(mut self, target_ports: I) -> Self {
        self.target_ports = target_ports.into_iter().collect();
        self
    }

    fn port_params(&self) -> Vec<String> {
        if self.target_ports.is_empty() {
            vec![format!("Port={},{}", self.virtual_port, self.virtual_port)]
        } else {
            self.target_ports
                .iter()
                .map(|target_port| format!("Port={},{}", self.virtual_port, target_port))
                .collect()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnionAddress {
    service_id: String,
    onion_service: String,
    port: u16,
}

impl OnionAddress {
    pub fn new(service_id: &str, port: u16) -> Self {
        Self {
            service_id: service_id.to_string(),
            onion_service: format!("{}{}", service_id, ONION_SUFFIX),
            port,
        }
    }

    /// The service id, without the `.onion` suffix
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// The service id with the `.onion` suffix
    pub fn onion_service(&self) -> &str {
        &self.onion_service
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.onion_service, self.port)
    }
}

enum KeyParam {
    New(OnionKeyAlgorithm),
    Existing(Zeroizing<String>),
}

impl fmt::Display for KeyParam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyParam::New(algorithm) => write!(f, "NEW:{}", algorithm),
            KeyParam::Existing(key) => f.write_str(key),
        }
    }
}

fn load_key_param<F: FileSystem + ?Sized>(
    request: &OnionServiceRequest,
    file_system: &F,
) -> Result<KeyParam, TorError> {
    match file_system.read_file(&request.private_key_path) {
        Ok(contents) => {
            let key = Zeroizing::new(String::from_utf8(contents).map_err(|_| {
                TorError::InvalidPrivateKey("private key file is not valid UTF-8".into())
            })?);
            if key.is_empty() {
                return Err(TorError::InvalidPrivateKey(
                    "private key file is empty".into(),
                ));
            }
            // The key goes on the command line as a single token
            if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(TorError::InvalidPrivateKey(
                    "private key file contains whitespace".into(),
                ));
            }
            Ok(KeyParam::Existing(key))
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Ok(KeyParam::New(request.version.new_key_algorithm()))
        }
        Err(error) => Err(TorError::KeyReadFailed(error)),
    }
}

fn check_v3_support(tor_version: &str) -> Result<(), TorError> {
    if meets_minimum(tor_version, MIN_V3_VERSION)? {
        Ok(())
    } else {
        Err(TorError::UnsupportedServiceVersion {
            version: tor_version.to_string(),
            minimum: MIN_V3_VERSION,
        })
    }
}

fn check_restored_service_id(key: &str, service_id: &str, path: &Path) {
    if let Some(expected) = key
        .parse::<OnionPrivateKey>()
        .ok()
        .and_then(|key| key.service_id())
    {
        if expected != service_id {
            warn!(
                "Key in {} belongs to {}{} but Tor restored {}{}",
                path.display(),
                expected,
                ONION_SUFFIX,
                service_id,
                ONION_SUFFIX
            );
        }
    }
}

impl TorControlConnection {
    /// Create an onion service, or restore it from the key at `request.private_key_path`.
    ///
    /// When Tor generates a new key it is written to `request.private_key_path` readable by the
    /// owner only, so the same address can be restored later. `tor_version` is the server version
    /// from `PROTOCOLINFO`, used to check v3 support.
    pub async fn create_onion_service<F: FileSystem + ?Sized>(
        &mut self,
        tor_version: &str,
        request: &OnionServiceRequest,
        file_system: &F,
    ) -> Result<OnionAddress, TorError> {
        if request.version == OnionServiceVersion::V3 {
            check_v3_support(tor_version)?;
        }

        let key_param = load_key_param(request, file_system)?;
        let arguments = Zeroizing::new(format!(
            "{} {}",
            key_param,
            request.port_params().join(" ")
        ));

        // Send command to Tor controller
        let control_response = self
            .send_command("ADD_ONION", Some(arguments.as_str()))
            .await?;

        // 250-ServiceID=<id>
        // 250-PrivateKey=<algorithm>:<blob>   (only for NEW keys)
        // 250 OK
        let mut params = parse_reply(&control_response.reply)?;
        let service_id = params.remove("ServiceID").ok_or(TorError::ServiceIDMissing)?;
        debug!("ADD_ONION created service {}{}", service_id, ONION_SUFFIX);

        if let KeyParam::Existing(key) = &key_param {
            check_restored_service_id(key, &service_id, &request.private_key_path);
        }

        if let Some(private_key) = params.remove("PrivateKey") {
            let private_key = Zeroizing::new(private_key);
            file_system
                .write_file(&request.private_key_path, private_key.as_bytes(), true)
                .map_err(TorError::KeyPersistFailed)?;
            debug!(
                "Saved private key for {}{} to {}",
                service_id,
                ONION_SUFFIX,
                request.private_key_path.display()
            );
        }

        Ok(OnionAddress::new(&service_id, request.virtual_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemoryFile, MemoryFileSystem};
    use crate::test_support::create_daemon_mock;
    use std::io;

    const KEY_PATH: &str = "/var/lib/app/onion_key";

    struct ReadOnlyFileSystem;

    impl FileSystem for ReadOnlyFileSystem {
        fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                path.display().to_string(),
            ))
        }

        fn write_file(&self, _path: &Path, _contents: &[u8], _owner_only: bool) -> io::Result<()> {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "read-only file system",
            ))
        }
    }

    #[test]
    fn test_port_params() {
        let request = OnionServiceRequest::new(OnionServiceVersion::V3, 80, KEY_PATH);
        assert_eq!(vec!["Port=80,80".to_string()], request.port_params());

        let request = request.with_target_ports([8080, 8081]);
        assert_eq!(
            vec!["Port=80,8080".to_string(), "Port=80,8081".to_string()],
            request.port_params()
        );
    }

    #[test]
    fn test_service_version_names() {
        assert_eq!(Some(OnionServiceVersion::V3), "v3".parse().ok());
        assert_eq!(Some(OnionServiceVersion::V2), "V2".parse().ok());
        assert!("v4".parse::<OnionServiceVersion>().is_err());
        assert_eq!(
            OnionKeyAlgorithm::Rsa1024,
            OnionServiceVersion::V2.new_key_algorithm()
        );
    }

    #[test]
    fn test_onion_address() {
        let address = OnionAddress::new("abcdef", 80);
        assert_eq!("abcdef", address.service_id());
        assert_eq!("abcdef.onion", address.onion_service());
        assert_eq!(80, address.port());
        assert_eq!("abcdef.onion:80", address.to_string());
    }

    #[tokio::test]
    async fn test_create_v2_service_with_new_key() -> Result<(), Box<dyn std::error::Error>> {
        let (mut tor, mut daemon) = create_daemon_mock().await?;
        let server = tokio::spawn(async move {
            let command = daemon.expect("ADD_ONION ").await;
            daemon
                .reply(&[
                    "250-ServiceID=testonion1234567",
                    "250-PrivateKey=RSA1024:MIICXAIBAAKBgQC==",
                    "250 OK",
                ])
                .await;
            command
        });

        let fs = MemoryFileSystem::new();
        let request = OnionServiceRequest::new(OnionServiceVersion::V2, 80, KEY_PATH)
            .with_target_ports([8080]);
        let address = tor.create_onion_service("0.2.9.14", &request, &fs).await?;

        assert_eq!("ADD_ONION NEW:RSA1024 Port=80,8080", server.await?);
        assert_eq!("testonion1234567.onion", address.onion_service());
        assert_eq!(80, address.port());
        assert_eq!(
            Some(MemoryFile {
                contents: b"RSA1024:MIICXAIBAAKBgQC==".to_vec(),
                owner_only: true,
            }),
            fs.get(KEY_PATH)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_create_v3_service_with_new_key() -> Result<(), Box<dyn std::error::Error>> {
        let (mut tor, mut daemon) = create_daemon_mock().await?;
        let server = tokio::spawn(async move {
            let command = daemon.expect("ADD_ONION ").await;
            daemon
                .reply(&[
                    "250-ServiceID=647qjf6w3evdbdpy7oidf5vda6rsjzsl5a6ofsaou2v77hj7dmn2spqd",
                    "250-PrivateKey=ED25519-V3:yLSDc8b11PaIHTtNtvi9lNW99IME2mdrO4k381zDkHv//WRUGrkBALBQ9MbHy2SLA/NmfS7YxmcR/FY8ppRfIA==",
                    "250 OK",
                ])
                .await;
            command
        });

        let fs = MemoryFileSystem::new();
        let request = OnionServiceRequest::new(OnionServiceVersion::V3, 9735, KEY_PATH);
        let address = tor.create_onion_service("0.4.8.10", &request, &fs).await?;

        assert_eq!("ADD_ONION NEW:ED25519-V3 Port=9735,9735", server.await?);
        assert_eq!(
            "647qjf6w3evdbdpy7oidf5vda6rsjzsl5a6ofsaou2v77hj7dmn2spqd.onion:9735",
            address.to_string()
        );
        let saved = fs.get(KEY_PATH).ok_or("key not saved")?;
        assert!(saved.owner_only);
        assert!(saved.contents.starts_with(b"ED25519-V3:yLSDc8b11PaIHTtNtvi9"));
        assert!(saved.contents.ends_with(b"ppRfIA=="));

        Ok(())
    }

    #[tokio::test]
    async fn test_restore_service_from_saved_key() -> Result<(), Box<dyn std::error::Error>> {
        let (mut tor, mut daemon) = create_daemon_mock().await?;
        let server = tokio::spawn(async move {
            let command = daemon.expect("ADD_ONION ").await;
            daemon.reply(&["250-ServiceID=restored", "250 OK"]).await;
            command
        });

        let fs = MemoryFileSystem::new().with_file(KEY_PATH, b"ED25519-V3:deadbeef");
        let request = OnionServiceRequest::new(OnionServiceVersion::V3, 80, KEY_PATH);
        let address = tor.create_onion_service("0.4.8.10", &request, &fs).await?;

        assert_eq!("ADD_ONION ED25519-V3:deadbeef Port=80,80", server.await?);
        assert_eq!("restored.onion", address.onion_service());
        // Nothing new to persist; the file is untouched
        assert_eq!(
            Some(MemoryFile {
                contents: b"ED25519-V3:deadbeef".to_vec(),
                owner_only: false,
            }),
            fs.get(KEY_PATH)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_v3_requires_minimum_version() -> Result<(), Box<dyn std::error::Error>> {
        let (mut tor, _daemon) = create_daemon_mock().await?;
        let fs = MemoryFileSystem::new();
        let request = OnionServiceRequest::new(OnionServiceVersion::V3, 80, KEY_PATH);

        match tor.create_onion_service("0.3.3.5", &request, &fs).await {
            Err(TorError::UnsupportedServiceVersion { version, minimum }) => {
                assert_eq!("0.3.3.5", version);
                assert_eq!(MIN_V3_VERSION, minimum);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(matches!(
            tor.create_onion_service("0.3.3", &request, &fs).await,
            Err(TorError::MalformedVersion(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_v2_skips_version_check() -> Result<(), Box<dyn std::error::Error>> {
        let (mut tor, mut daemon) = create_daemon_mock().await?;
        let server = tokio::spawn(async move {
            daemon.expect("ADD_ONION NEW:RSA1024 ").await;
            daemon.reply(&["250-ServiceID=legacy", "250 OK"]).await;
        });

        let fs = MemoryFileSystem::new();
        let request = OnionServiceRequest::new(OnionServiceVersion::V2, 80, KEY_PATH);
        tor.create_onion_service("not a version", &request, &fs)
            .await?;
        server.await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_service_id_missing() -> Result<(), Box<dyn std::error::Error>> {
        let (mut tor, mut daemon) = create_daemon_mock().await?;
        let server = tokio::spawn(async move {
            daemon.expect("ADD_ONION ").await;
            daemon.reply(&["250 OK"]).await;
        });

        let fs = MemoryFileSystem::new();
        let request = OnionServiceRequest::new(OnionServiceVersion::V2, 80, KEY_PATH);
        let result = tor.create_onion_service("0.4.8.10", &request, &fs).await;
        assert!(matches!(result, Err(TorError::ServiceIDMissing)));
        server.await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_key_persist_failure() -> Result<(), Box<dyn std::error::Error>> {
        let (mut tor, mut daemon) = create_daemon_mock().await?;
        let server = tokio::spawn(async move {
            daemon.expect("ADD_ONION ").await;
            daemon
                .reply(&[
                    "250-ServiceID=testonion1234567",
                    "250-PrivateKey=RSA1024:MIICXAIBAAKBgQC==",
                    "250 OK",
                ])
                .await;
        });

        let request = OnionServiceRequest::new(OnionServiceVersion::V2, 80, KEY_PATH);
        let result = tor
            .create_onion_service("0.4.8.10", &request, &ReadOnlyFileSystem)
            .await;
        match result {
            Err(TorError::KeyPersistFailed(error)) => {
                assert_eq!(io::ErrorKind::PermissionDenied, error.kind())
            }
            other => panic!("unexpected result {:?}", other),
        }
        server.await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_saved_key_is_not_sent() -> Result<(), Box<dyn std::error::Error>> {
        let (mut tor, mut daemon) = create_daemon_mock().await?;
        let request = OnionServiceRequest::new(OnionServiceVersion::V2, 80, KEY_PATH);

        for contents in [
            &b"RSA1024:abcd\nSIGNAL SHUTDOWN"[..],
            &b""[..],
            &[0xff, 0xfe][..],
        ] {
            let fs = MemoryFileSystem::new().with_file(KEY_PATH, contents);
            let result = tor.create_onion_service("0.4.8.10", &request, &fs).await;
            assert!(matches!(result, Err(TorError::InvalidPrivateKey(_))));
        }

        drop(tor);
        assert_eq!(None, daemon.next_command().await);

        Ok(())
    }

    #[tokio::test]
    async fn test_create_onion_service_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let (mut tor, mut daemon) = create_daemon_mock().await?;
        let server = tokio::spawn(async move {
            daemon.expect("ADD_ONION ").await;
            daemon.reply(&["512 Bad arguments to ADD_ONION"]).await;
        });

        let fs = MemoryFileSystem::new();
        let request = OnionServiceRequest::new(OnionServiceVersion::V2, 80, KEY_PATH);
        let result = tor.create_onion_service("0.4.8.10", &request, &fs).await;
        assert!(matches!(
            result,
            Err(TorError::CommandRejected {
                status_code: 512,
                ..
            })
        ));
        assert_eq!(None, fs.get(KEY_PATH));
        server.await?;

        Ok(())
    }
}
