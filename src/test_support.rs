//! Mock Tor daemon plumbing shared by the unit tests.

use crate::control_connection::TorControlConnection;
use futures::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};

pub(crate) const TEST_COOKIE: [u8; 32] = [0x42; 32];
pub(crate) const TEST_SERVER_NONCE: [u8; 32] = [0x17; 32];
pub(crate) const TEST_COOKIE_PATH: &str = "/var/lib/tor/control_auth_cookie";

pub(crate) async fn create_mock() -> Result<(TcpStream, TcpStream), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let join_handle = tokio::spawn(async move { listener.accept().await.unwrap() });
    let client = TcpStream::connect(addr).await?;
    let (server_stream, _) = join_handle.await?;

    Ok((client, server_stream))
}

pub(crate) async fn create_framed_mock() -> Result<
    (Framed<TcpStream, LinesCodec>, Framed<TcpStream, LinesCodec>),
    Box<dyn std::error::Error>,
> {
    let (client, server) = create_mock().await?;
    let reader = Framed::new(client, LinesCodec::new());
    let server = Framed::new(server, LinesCodec::new());

    Ok((reader, server))
}

pub(crate) async fn create_daemon_mock(
) -> Result<(TorControlConnection, MockDaemon), Box<dyn std::error::Error>> {
    let (client, server) = create_mock().await?;
    Ok((
        TorControlConnection::with_stream(client),
        MockDaemon::new(server),
    ))
}

/// HMAC-SHA256 computed the way the daemon does it
pub(crate) fn daemon_hmac(key: &str, message: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

pub(crate) struct MockDaemon {
    server: Framed<TcpStream, LinesCodec>,
}

impl MockDaemon {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            server: Framed::new(stream, LinesCodec::new()),
        }
    }

    /// Next command line from the client, or `None` once it hangs up.
    pub(crate) async fn next_command(&mut self) -> Option<String> {
        match self.server.next().await {
            Some(Ok(line)) => Some(line),
            _ => None,
        }
    }

    pub(crate) async fn expect(&mut self, prefix: &str) -> String {
        let line = self
            .next_command()
            .await
            .unwrap_or_else(|| panic!("client hung up while waiting for {}", prefix));
        assert!(
            line.starts_with(prefix),
            "expected {}, got {}",
            prefix,
            line
        );
        line
    }

    pub(crate) async fn reply(&mut self, lines: &[&str]) {
        for line in lines {
            self.server.send(*line).await.unwrap();
        }
    }

    pub(crate) async fn serve_protocol_info(&mut self, methods: &str, version: &str) {
        self.expect("PROTOCOLINFO 1").await;
        let auth = format!(
            "250-AUTH METHODS={} COOKIEFILE=\"{}\"",
            methods, TEST_COOKIE_PATH
        );
        let version = format!("250-VERSION Tor=\"{}\"", version);
        self.reply(&["250-PROTOCOLINFO 1", &auth, &version, "250 OK"])
            .await;
    }

    /// Answer AUTHCHALLENGE with a proof over `cookie`, optionally flipping one bit of it.
    ///
    /// Returns the HMAC message so the caller can check the client's proof.
    pub(crate) async fn serve_challenge(
        &mut self,
        cookie: &[u8],
        flipped_bit: Option<usize>,
    ) -> Vec<u8> {
        let line = self.expect("AUTHCHALLENGE SAFECOOKIE ").await;
        let client_nonce = hex::decode(&line["AUTHCHALLENGE SAFECOOKIE ".len()..]).unwrap();
        assert_eq!(32, client_nonce.len());

        let message = [cookie, client_nonce.as_slice(), TEST_SERVER_NONCE.as_slice()].concat();
        let mut server_hash = daemon_hmac(
            "Tor safe cookie authentication server-to-controller hash",
            &message,
        );
        if let Some(bit) = flipped_bit {
            server_hash[bit / 8] ^= 1 << (bit % 8);
        }
        let reply = format!(
            "250 AUTHCHALLENGE SERVERHASH={} SERVERNONCE={}",
            hex::encode_upper(&server_hash),
            hex::encode_upper(TEST_SERVER_NONCE)
        );
        self.reply(&[&reply]).await;
        message
    }

    /// Check the client's AUTHENTICATE proof and accept it.
    pub(crate) async fn serve_authenticate(&mut self, message: &[u8]) {
        let line = self.expect("AUTHENTICATE ").await;
        let expected = daemon_hmac(
            "Tor safe cookie authentication controller-to-server hash",
            message,
        );
        assert_eq!(hex::encode(expected), &line["AUTHENTICATE ".len()..]);
        self.reply(&["250 OK"]).await;
    }

    pub(crate) async fn serve_safe_cookie(&mut self, version: &str) {
        self.serve_protocol_info("COOKIE,SAFECOOKIE", version).await;
        let message = self.serve_challenge(&TEST_COOKIE, None).await;
        self.serve_authenticate(&message).await;
    }
}
