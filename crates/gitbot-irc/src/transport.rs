//! TCP/TLS line transport for the IRC connection.

use std::sync::Arc;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;
use tracing::trace;

use gitbot_core::{errors::Error, Result};

trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

pub struct IrcTransport {
    reader: Lines<BufReader<ReadHalf<Box<dyn IoStream>>>>,
    writer: WriteHalf<Box<dyn IoStream>>,
}

impl IrcTransport {
    pub async fn connect(host: &str, port: u16, tls: bool) -> Result<Self> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Transport(format!("connect {host}:{port}: {e}")))?;

        let stream: Box<dyn IoStream> = if tls {
            let connector = TlsConnector::from(Arc::new(tls_client_config()));
            let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
                .map_err(|e| Error::Transport(format!("invalid server name {host}: {e}")))?;
            let tls_stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| Error::Transport(format!("TLS handshake with {host}: {e}")))?;
            Box::new(tls_stream)
        } else {
            Box::new(tcp)
        };

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self {
            reader: BufReader::new(read_half).lines(),
            writer: write_half,
        })
    }

    /// Next server line, or `None` once the peer closed the connection.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let line = self
            .reader
            .next_line()
            .await
            .map_err(|e| Error::Transport(format!("read: {e}")))?;
        if let Some(line) = &line {
            trace!(line = %line.trim_end(), "recv");
        }
        Ok(line)
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        // Credentials travel on AUTHENTICATE lines; keep them out of the log.
        let loggable = if line.starts_with("AUTHENTICATE ") {
            "AUTHENTICATE ***"
        } else {
            line
        };
        trace!(line = %loggable, "send");

        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("write: {e}")))?;
        self.writer
            .write_all(b"\r\n")
            .await
            .map_err(|e| Error::Transport(format!("write: {e}")))?;
        Ok(())
    }
}

fn tls_client_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}
