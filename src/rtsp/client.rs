//! Outbound control protocol client

use std::net::SocketAddr;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{NetworkError, Result};
use crate::rtsp::codec::{read_response, write_request};
use crate::rtsp::message::{Request, Response};

/// One control connection to a remote server
///
/// Every request is stamped with the next `CSeq` before it is written.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local: SocketAddr,
    remote: SocketAddr,
    cseq: u32,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        let (read_half, writer) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            local,
            remote,
            cseq: 0,
        })
    }

    /// Local end of the control connection
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Write a request without waiting for a reply; returns the `CSeq` used
    pub async fn write(&mut self, mut request: Request) -> Result<u32> {
        self.cseq += 1;
        request
            .headers
            .insert("CSeq".to_string(), self.cseq.to_string());
        write_request(&mut self.writer, &request)
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        Ok(self.cseq)
    }

    /// Write a request and read its response
    pub async fn send(&mut self, request: Request) -> Result<Response> {
        self.write(request).await?;
        Ok(read_response(&mut self.reader).await?)
    }
}
