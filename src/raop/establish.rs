//! Client side of the session handshake
//!
//! Used by the forwarding player to open a stream to a peer node and to
//! push out-of-band parameter changes to it.

use std::net::{IpAddr, SocketAddr};

use tracing::debug;

use crate::constants::{DEFAULT_CONTROL_PORT, DEFAULT_TIMING_PORT};
use crate::error::{NetworkError, Result};
use crate::rtsp::{Client, Method, PortSet, Request, Response, Session, Transport};
use crate::sdp::SessionDescription;

/// Identifier placed in the request URI, unique per exchange
fn session_id() -> String {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string()
}

fn request_uri(local_ip: IpAddr) -> String {
    format!("rtsp://{}/{}", local_ip, session_id())
}

fn check_status(method: Method, response: Response) -> Result<Response> {
    if !response.status.is_success() {
        return Err(NetworkError::ConnectionFailed(format!(
            "{} answered {} {}",
            method,
            response.status.code(),
            response.status
        ))
        .into());
    }
    Ok(response)
}

/// Run ANNOUNCE, SETUP and RECORD against a peer
///
/// The returned session is armed with the peer's data port; call
/// [`Session::start_sending`] to begin forwarding.
pub async fn establish_session(
    peer: IpAddr,
    rtsp_port: u16,
    description: &SessionDescription,
) -> Result<Session> {
    let mut client = Client::connect(SocketAddr::new(peer, rtsp_port)).await?;
    let local_ip = client.local_addr().ip();
    let uri = request_uri(local_ip);

    let announce = Request::new(Method::Announce, uri.clone())
        .with_body("application/sdp", description.to_string().into_bytes());
    check_status(Method::Announce, client.send(announce).await?)?;

    let offered = Transport {
        server_port: None,
        control_port: Some(DEFAULT_CONTROL_PORT),
        timing_port: Some(DEFAULT_TIMING_PORT),
    };
    let setup = Request::new(Method::Setup, uri.clone())
        .with_header("Transport", offered.request_header());
    let response = check_status(Method::Setup, client.send(setup).await?)?;

    let answered = Transport::parse(response.header("Transport").unwrap_or_default());
    let data_port = answered.server_port.ok_or_else(|| {
        NetworkError::InvalidTransport(format!("{} sent no server_port", peer))
    })?;

    let record = Request::new(Method::Record, uri).with_header("Range", "npt=0-");
    check_status(Method::Record, client.send(record).await?)?;

    let mut session = Session::new(description.clone());
    session.arm(
        PortSet {
            address: Some(peer),
            control: answered.control_port.unwrap_or_default(),
            timing: answered.timing_port.unwrap_or_default(),
            data: data_port,
        },
        PortSet {
            address: Some(local_ip),
            control: DEFAULT_CONTROL_PORT,
            timing: DEFAULT_TIMING_PORT,
            data: 0,
        },
    );
    debug!("Established session with {} (data port {})", peer, data_port);
    Ok(session)
}

/// Send one `SET_PARAMETER` over a fresh control connection
pub async fn send_control(peer: SocketAddr, content_type: &str, body: Vec<u8>) -> Result<Response> {
    let mut client = Client::connect(peer).await?;
    let request = Request::new(Method::SetParameter, request_uri(client.local_addr().ip()))
        .with_body(content_type, body);
    check_status(Method::SetParameter, client.send(request).await?)
}
