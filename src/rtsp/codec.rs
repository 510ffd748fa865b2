//! Wire encoding for control protocol messages
//!
//! ```text
//! METHOD URI VERSION\r\n
//! Key: Value\r\n
//! ...
//! \r\n
//! <Content-Length bytes of body>
//! ```
//!
//! Reading is strict: a bad request line, a header without a colon or a
//! short body fails the whole message.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{MAX_BODY_SIZE, MAX_LINE_SIZE};
use crate::error::ProtocolError;
use crate::rtsp::message::{Headers, Method, Request, Response, Status};

const CONTENT_LENGTH: &str = "Content-Length";

/// Read one request from a buffered stream
pub async fn read_request<R>(reader: &mut R) -> Result<Request, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(ProtocolError::MalformedRequestLine(line));
    }

    let method: Method = parts[0].parse()?;
    let uri = parts[1].to_string();
    let protocol = parts[2].to_string();

    let headers = read_headers(reader).await?;
    let body = read_body(reader, &headers).await?;

    Ok(Request {
        method,
        uri,
        protocol,
        headers,
        body,
    })
}

/// Read one response from a buffered stream
pub async fn read_response<R>(reader: &mut R) -> Result<Response, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let mut parts = line.splitn(3, ' ');
    let protocol = parts.next().unwrap_or_default().to_string();
    let code = parts
        .next()
        .and_then(|code| code.trim().parse::<u16>().ok())
        .ok_or_else(|| ProtocolError::MalformedStatusLine(line.clone()))?;

    let headers = read_headers(reader).await?;
    let body = read_body(reader, &headers).await?;

    Ok(Response {
        status: Status::from_code(code),
        protocol,
        headers,
        body,
    })
}

/// Serialize a request to wire bytes
pub fn encode_request(request: &Request) -> Vec<u8> {
    let start = format!(
        "{} {} {}\r\n",
        request.method.as_str(),
        request.uri,
        request.protocol
    );
    encode_message(start, &request.headers, &request.body)
}

/// Serialize a response to wire bytes
pub fn encode_response(response: &Response) -> Vec<u8> {
    let start = format!(
        "{} {} {}\r\n",
        response.protocol,
        response.status.code(),
        response.status
    );
    encode_message(start, &response.headers, &response.body)
}

pub async fn write_request<W>(writer: &mut W, request: &Request) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_request(request)).await?;
    writer.flush().await
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_response(response)).await?;
    writer.flush().await
}

fn encode_message(start: String, headers: &Headers, body: &[u8]) -> Vec<u8> {
    let mut head = start;
    for (key, value) in headers {
        // Always recomputed from the body below
        if key == CONTENT_LENGTH {
            continue;
        }
        head.push_str(key);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if !body.is_empty() {
        head.push_str(&format!("{}: {}\r\n", CONTENT_LENGTH, body.len()));
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

async fn read_line<R>(reader: &mut R) -> Result<String, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(MAX_LINE_SIZE as u64)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if n == MAX_LINE_SIZE && !line.ends_with('\n') {
        return Err(ProtocolError::LineTooLong(MAX_LINE_SIZE));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn read_headers<R>(reader: &mut R) -> Result<Headers, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Headers::new();
    loop {
        let line = read_line(reader).await?;
        if line.trim().is_empty() {
            return Ok(headers);
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.clone()))?;
        headers.insert(key.trim().to_string(), value.trim().to_string());
    }
}

async fn read_body<R>(reader: &mut R, headers: &Headers) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(length) = headers.get(CONTENT_LENGTH) else {
        return Ok(Vec::new());
    };
    let length: usize = length
        .parse()
        .map_err(|_| ProtocolError::InvalidContentLength(length.clone()))?;
    if length > MAX_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge(length));
    }

    let mut body = vec![0u8; length];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(body),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::BodyTooShort { expected: length })
        }
        Err(e) => Err(e.into()),
    }
}
