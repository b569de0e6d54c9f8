use crate::error::TorError;
use futures::{SinkExt, StreamExt};
use lazy_static::lazy_static;
use log::trace;
use regex::Regex;
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    net::{TcpStream, ToSocketAddrs},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};

/// Longest reply line we are willing to buffer
pub const MAX_LINE_LENGTH: usize = 16 * 1024;

#[derive(Debug)]
pub struct ControlResponse {
    pub status_code: u16,
    pub reply: String,
}

impl ControlResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.status_code, 250 | 251)
    }
}

/// Read a single reply from the server.
///
/// Mid lines (`250-`) and data lines (`250+`, terminated by a lone `.`) are accumulated until the
/// end line (`250 `). The reply is the text of every line, with the status codes stripped, joined
/// by newlines.
async fn read_control_response<S: StreamExt<Item = Result<String, LinesCodecError>> + Unpin>(
    reader: &mut S,
) -> Result<ControlResponse, TorError> {
    lazy_static! {
        static ref REPLY_LINE_REGEX: Regex =
            Regex::new(r"^(?P<code>\d{3})(?P<separator>[ +-])(?P<reply_line>.*)$").unwrap();
    }

    let mut lines = Vec::new();
    loop {
        let line = read_line(reader).await?;
        let captures = match REPLY_LINE_REGEX.captures(&line) {
            Some(captures) => captures,
            None => {
                return Err(TorError::ProtocolError(format!(
                    "Unknown response: {}",
                    line
                )))
            }
        };
        let status_code = captures["code"]
            .parse::<u16>()
            .map_err(|error| TorError::ProtocolError(format!("Bad status code: {}", error)))?;
        lines.push(captures["reply_line"].to_string());

        match &captures["separator"] {
            "-" => {}
            "+" => loop {
                let data_line = read_line(reader).await?;
                if data_line == "." {
                    break;
                }
                // Leading dots are doubled on the wire
                if data_line.starts_with("..") {
                    lines.push(data_line[1..].to_string());
                } else {
                    lines.push(data_line);
                }
            },
            _ => {
                return Ok(ControlResponse {
                    status_code,
                    reply: lines.join("\n"),
                })
            }
        }
    }
}

pub(crate) async fn read_line<S: StreamExt<Item = Result<String, LinesCodecError>> + Unpin>(
    reader: &mut S,
) -> Result<String, TorError> {
    match reader.next().await {
        Some(Ok(line)) => Ok(line),
        Some(Err(error)) => Err(error.into()),
        None => Err(TorError::protocol_error("Unexpected EOF on stream")),
    }
}

fn connection_aborted() -> TorError {
    TorError::ConnectionError(std::io::Error::new(
        std::io::ErrorKind::ConnectionAborted,
        "control connection was shut down",
    ))
}

/// A single connection to a Tor control port.
///
/// Commands are strictly request/response: one command line goes out, one reply comes back. The
/// connection has no timeouts of its own; cancelling its shutdown token fails any in-flight dial,
/// read or write with [`std::io::ErrorKind::ConnectionAborted`].
pub struct TorControlConnection {
    reader: FramedRead<ReadHalf<TcpStream>, LinesCodec>,
    writer: FramedWrite<WriteHalf<TcpStream>, LinesCodec>,
    shutdown: CancellationToken,
}

impl TorControlConnection {
    pub async fn connect<A: ToSocketAddrs>(addrs: A) -> Result<Self, TorError> {
        Self::connect_with_shutdown(addrs, CancellationToken::new()).await
    }

    pub async fn connect_with_shutdown<A: ToSocketAddrs>(
        addrs: A,
        shutdown: CancellationToken,
    ) -> Result<Self, TorError> {
        let stream = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(connection_aborted()),
            stream = TcpStream::connect(addrs) => stream?,
        };
        Ok(Self::with_shutdown(stream, shutdown))
    }

    pub fn with_stream(stream: TcpStream) -> Self {
        Self::with_shutdown(stream, CancellationToken::new())
    }

    pub fn with_shutdown(stream: TcpStream, shutdown: CancellationToken) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer: FramedWrite::new(writer, LinesCodec::new()),
            shutdown,
        }
    }

    async fn exchange(&mut self, line: &str) -> Result<ControlResponse, TorError> {
        self.writer.send(line).await?;
        read_control_response(&mut self.reader).await
    }

    /// Send one command and wait for its reply.
    ///
    /// Any status other than 250/251 comes back as [`TorError::CommandRejected`].
    pub async fn send_command(
        &mut self,
        command: &str,
        arguments: Option<&str>,
    ) -> Result<ControlResponse, TorError> {
        let line = match arguments {
            None => command.to_string(),
            Some(arguments) => format!("{} {}", command, arguments),
        };
        if line.contains(|c| c == '\r' || c == '\n') {
            return Err(TorError::ProtocolError(format!(
                "Refusing to send {} command containing a line break",
                command
            )));
        }

        let shutdown = self.shutdown.clone();
        let control_response = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(connection_aborted()),
            control_response = self.exchange(&line) => control_response?,
        };
        trace!(
            "Sent {} command, got status code {}",
            command,
            control_response.status_code
        );

        if control_response.is_success() {
            Ok(control_response)
        } else {
            Err(TorError::CommandRejected {
                command: command.to_string(),
                status_code: control_response.status_code,
                reply: control_response.reply,
            })
        }
    }

    /// Shut down the write side and drop the socket.
    pub async fn close(mut self) -> Result<(), TorError> {
        self.writer.get_mut().shutdown().await?;
        Ok(())
    }
}
