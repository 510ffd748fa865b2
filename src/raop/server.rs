//! Receiver control handlers
//!
//! Wires the control protocol server to sessions and a player. Session state
//! is keyed by the remote IP of the control connection, so a sender that
//! reconnects between requests still finds its session.
//!
//! ```text
//! OPTIONS ─▶ ANNOUNCE ─▶ SETUP ─▶ RECORD ─▶ SET_PARAMETER* ─▶ TEARDOWN
//!            (create)    (arm)    (receive + play)            (close)
//! ```

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::constants::AUDIO_LATENCY;
use crate::error::{CryptoError, Error, Result};
use crate::player::Player;
use crate::raop::crypto::{AesDecrypter, DeviceKey, HardwareAddr};
use crate::raop::{dmap, volume};
use crate::rtsp::{
    ConnectionInfo, Method, PortSet, Request, Response, Server, Session, Status, Transport,
};
use crate::sdp::SessionDescription;

/// Everything the receiver needs to know about itself
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub name: String,
    pub bind_address: IpAddr,
    pub rtsp_port: u16,
    pub data_port: u16,
    pub control_port: u16,
    pub timing_port: u16,
    pub hardware_address: HardwareAddr,
    pub device_key: Option<Arc<DeviceKey>>,
    pub verbose: bool,
}

impl ReceiverSettings {
    /// Resolve settings from configuration, loading the device key if set
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let device_key = match &config.crypto.private_key_path {
            Some(path) => Some(Arc::new(DeviceKey::load(path)?)),
            None => {
                warn!("No device key configured; challenges and encrypted streams are refused");
                None
            }
        };
        let hardware_address = match &config.crypto.hardware_address {
            Some(addr) => addr.parse()?,
            None => HardwareAddr::from_name(config.node_name()),
        };

        Ok(Self {
            name: config.name.clone(),
            bind_address: config.network.bind_address,
            rtsp_port: config.network.rtsp_port,
            data_port: config.network.data_port,
            control_port: config.network.control_port,
            timing_port: config.network.timing_port,
            hardware_address,
            device_key,
            verbose: config.verbose,
        })
    }
}

/// Streaming receiver: control handlers plus the per-sender session map
pub struct Receiver {
    settings: ReceiverSettings,
    name: RwLock<String>,
    advertising: AtomicBool,
    player: Arc<dyn Player>,
    sessions: Mutex<HashMap<IpAddr, Session>>,
}

impl Receiver {
    pub fn new(settings: ReceiverSettings, player: Arc<dyn Player>) -> Self {
        Self {
            name: RwLock::new(settings.name.clone()),
            settings,
            advertising: AtomicBool::new(true),
            player,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn player(&self) -> &Arc<dyn Player> {
        &self.player
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Rename the service shown to senders
    pub fn change_name(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidRequest("name must not be empty".to_string()));
        }
        info!("Service renamed to {}", name);
        *self.name.write() = name.to_string();
        Ok(())
    }

    /// Turn service advertisement on or off
    pub fn toggle_advertise(&self, advertise: bool) {
        info!("Advertising {}", if advertise { "enabled" } else { "disabled" });
        self.advertising.store(advertise, Ordering::Relaxed);
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::Relaxed)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Remote transport negotiated by the sender at `ip`
    pub fn remote_ports(&self, ip: IpAddr) -> Option<PortSet> {
        self.sessions.lock().get(&ip).map(|s| *s.remote_ports())
    }

    /// Control server with every handler registered
    pub fn server(self: &Arc<Self>) -> Server {
        let mut server = Server::new(self.settings.bind_address, self.settings.rtsp_port);
        server.set_verbose(self.settings.verbose);

        let handlers: [(Method, fn(&Receiver, &Request, &mut Response, &ConnectionInfo)); 8] = [
            (Method::Options, Receiver::handle_options),
            (Method::Announce, Receiver::handle_announce),
            (Method::Setup, Receiver::handle_setup),
            (Method::Record, Receiver::handle_record),
            (Method::SetParameter, Receiver::handle_set_parameter),
            (Method::GetParameter, Receiver::handle_get_parameter),
            (Method::Flush, Receiver::handle_flush),
            (Method::Teardown, Receiver::handle_teardown),
        ];
        for (method, handler) in handlers {
            let receiver = self.clone();
            server.add_handler(method, move |req, resp, conn| handler(&*receiver, req, resp, conn));
        }
        server
    }

    pub fn handle_options(&self, req: &Request, resp: &mut Response, conn: &ConnectionInfo) {
        resp.set_header("Public", Method::public_header());

        let Some(challenge) = req.header("Apple-Challenge") else {
            return;
        };
        let Some(key) = &self.settings.device_key else {
            debug!("Challenge from {} ignored, no device key", conn.remote);
            return;
        };
        match key.challenge_response(challenge, &self.settings.hardware_address, conn.local.ip()) {
            Ok(answer) => resp.set_header("Apple-Response", answer),
            Err(e) => warn!("Could not answer challenge from {}: {}", conn.remote, e),
        }
    }

    pub fn handle_announce(&self, req: &Request, resp: &mut Response, conn: &ConnectionInfo) {
        if req.header("Content-Type") != Some("application/sdp") {
            warn!("ANNOUNCE from {} without a session description", conn.remote);
            resp.status = Status::BAD_REQUEST;
            return;
        }

        let description = match SessionDescription::parse(&String::from_utf8_lossy(&req.body)) {
            Ok(description) => description,
            Err(e) => {
                warn!("Bad session description from {}: {}", conn.remote, e);
                resp.status = Status::BAD_REQUEST;
                return;
            }
        };

        let ip = conn.remote.ip();
        if let Some(mut previous) = self.sessions.lock().remove(&ip) {
            debug!("Replacing session for {}", ip);
            previous.close();
        }

        let mut session = Session::new(description.clone());
        if description.is_encrypted() {
            let decrypter = self
                .settings
                .device_key
                .as_ref()
                .ok_or(CryptoError::MissingKey)
                .and_then(|key| AesDecrypter::from_description(&description, key));
            match decrypter {
                Ok(decrypter) => session = session.with_decrypter(Arc::new(decrypter)),
                Err(e) => {
                    warn!("Cannot decrypt stream from {}: {}", conn.remote, e);
                    resp.status = Status::INTERNAL_SERVER_ERROR;
                    return;
                }
            }
        }

        info!(
            "New session from {} ({})",
            ip,
            description.rtpmap().unwrap_or("unknown codec")
        );
        self.sessions.lock().insert(ip, session);
    }

    pub fn handle_setup(&self, req: &Request, resp: &mut Response, conn: &ConnectionInfo) {
        let ip = conn.remote.ip();
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(&ip) else {
            warn!("SETUP from {} without ANNOUNCE", conn.remote);
            resp.status = Status::SESSION_NOT_FOUND;
            return;
        };

        let offered = Transport::parse(req.header("Transport").unwrap_or_default());
        let remote = PortSet {
            address: Some(ip),
            control: offered.control_port.unwrap_or_default(),
            timing: offered.timing_port.unwrap_or_default(),
            data: 0,
        };
        let local = PortSet {
            address: Some(self.settings.bind_address),
            control: self.settings.control_port,
            timing: self.settings.timing_port,
            data: self.settings.data_port,
        };
        session.arm(remote, local);
        let data_port = match session.bind_data_port() {
            Ok(port) => port,
            Err(e) => {
                warn!("Cannot reserve a data port for {}: {}", ip, e);
                resp.status = Status::INTERNAL_SERVER_ERROR;
                return;
            }
        };

        let answer = Transport {
            server_port: Some(data_port),
            control_port: Some(local.control),
            timing_port: Some(local.timing),
        };
        resp.set_header("Transport", answer.response_header());
        resp.set_header("Session", "1");
        resp.set_header("Audio-Jack-Status", "connected");
    }

    pub fn handle_record(&self, _req: &Request, resp: &mut Response, conn: &ConnectionInfo) {
        let ip = conn.remote.ip();
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(&ip) else {
            resp.status = Status::SESSION_NOT_FOUND;
            return;
        };

        if let Err(e) = session.start_receiving() {
            warn!("Cannot start receiving from {}: {}", ip, e);
            resp.status = Status::INTERNAL_SERVER_ERROR;
            return;
        }
        if let Some(stream) = session.take_stream() {
            self.player.play(stream);
        }
        resp.set_header("Audio-Latency", AUDIO_LATENCY);
    }

    pub fn handle_set_parameter(&self, req: &Request, resp: &mut Response, conn: &ConnectionInfo) {
        let content_type = req.header("Content-Type").unwrap_or_default();
        match content_type {
            "text/parameters" => {
                let body = String::from_utf8_lossy(&req.body);
                match volume::parse_parameter(&body) {
                    Some(value) => {
                        let normalized = volume::normalize(value);
                        debug!("Volume {} from {} -> {:.3}", value, conn.remote, normalized);
                        self.player.set_volume(normalized);
                    }
                    None => debug!("Ignoring parameters from {}: {}", conn.remote, body.trim()),
                }
            }
            "application/x-dmap-tagged" => {
                let info = dmap::parse(&req.body);
                self.player.set_track(
                    info.album.as_deref().unwrap_or_default(),
                    info.artist.as_deref().unwrap_or_default(),
                    info.title.as_deref().unwrap_or_default(),
                );
            }
            image if image.starts_with("image/") => {
                debug!("Album art from {} ({} bytes)", conn.remote, req.body.len());
                self.player.set_album_art(req.body.clone());
            }
            other => {
                debug!("Unsupported parameter type {:?} from {}", other, conn.remote);
                resp.status = Status::UNSUPPORTED_MEDIA_TYPE;
            }
        }
    }

    pub fn handle_get_parameter(&self, req: &Request, resp: &mut Response, _conn: &ConnectionInfo) {
        if String::from_utf8_lossy(&req.body).contains("volume") {
            let body = format!("volume: {:.6}\r\n", volume::denormalize(self.player.volume()));
            resp.set_header("Content-Type", "text/parameters");
            resp.body = body.into_bytes();
        }
    }

    pub fn handle_flush(&self, _req: &Request, _resp: &mut Response, conn: &ConnectionInfo) {
        debug!("Flush from {}", conn.remote);
    }

    pub fn handle_teardown(&self, _req: &Request, _resp: &mut Response, conn: &ConnectionInfo) {
        let ip = conn.remote.ip();
        match self.sessions.lock().remove(&ip) {
            Some(mut session) => {
                session.close();
                info!("Session from {} closed", ip);
            }
            None => debug!("TEARDOWN from {} with no session", ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySink;
    use crate::codec::CodecRegistry;
    use crate::player::{LocalPlayer, Track};
    use crate::raop::crypto::decode_unpadded;
    use crate::rtsp::Client;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey};
    use sha1::Sha1;
    use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
    use std::time::Duration;
    use tokio::net::TcpListener;

    const SDP: &str = "v=0\r\n\
        o=iTunes 3413821438 0 IN IP4 127.0.0.1\r\n\
        s=iTunes\r\n\
        c=IN IP4 127.0.0.1\r\n\
        t=0 0\r\n\
        m=audio 0 RTP/AVP 96\r\n\
        a=rtpmap:96 L16/44100/2\r\n";

    fn settings() -> ReceiverSettings {
        ReceiverSettings {
            name: "Test Speaker".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtsp_port: 0,
            data_port: 0,
            control_port: 6001,
            timing_port: 6002,
            hardware_address: "00:11:22:33:44:55".parse().unwrap(),
            device_key: None,
            verbose: false,
        }
    }

    fn receiver_with(settings: ReceiverSettings, sink: &MemorySink) -> Arc<Receiver> {
        let player = Arc::new(LocalPlayer::new(Box::new(sink.clone()), CodecRegistry::new()));
        Arc::new(Receiver::new(settings, player))
    }

    fn conn() -> ConnectionInfo {
        ConnectionInfo {
            local: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)), 5000),
            remote: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9)), 51000),
        }
    }

    fn call(
        handler: fn(&Receiver, &Request, &mut Response, &ConnectionInfo),
        receiver: &Receiver,
        req: &Request,
    ) -> Response {
        let mut resp = Response::for_request(req);
        handler(receiver, req, &mut resp, &conn());
        resp
    }

    fn announce(body: &str) -> Request {
        Request::new(Method::Announce, "rtsp://192.168.1.2/1")
            .with_body("application/sdp", body.as_bytes().to_vec())
    }

    #[test]
    fn test_setup_handshake() {
        let receiver = receiver_with(settings(), &MemorySink::new());
        let resp = call(Receiver::handle_announce, &receiver, &announce(SDP));
        assert_eq!(resp.status, Status::OK);

        let setup = Request::new(Method::Setup, "rtsp://192.168.1.2/1").with_header(
            "Transport",
            "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port=8888;timing_port=8889",
        );
        let resp = call(Receiver::handle_setup, &receiver, &setup);

        assert_eq!(resp.status, Status::OK);
        assert_eq!(resp.header("Session"), Some("1"));
        assert_eq!(resp.header("Audio-Jack-Status"), Some("connected"));
        let ports = receiver.remote_ports(conn().remote.ip()).unwrap();
        assert_eq!(ports.control, 8888);
        assert_eq!(ports.timing, 8889);
        let answered = Transport::parse(resp.header("Transport").unwrap());
        assert_eq!(answered.control_port, Some(6001));
        assert_eq!(answered.timing_port, Some(6002));
    }

    #[test]
    fn test_setup_falls_back_when_data_port_is_taken() {
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut settings = settings();
        settings.data_port = taken.local_addr().unwrap().port();
        let receiver = receiver_with(settings.clone(), &MemorySink::new());

        call(Receiver::handle_announce, &receiver, &announce(SDP));
        let setup = Request::new(Method::Setup, "rtsp://192.168.1.2/1")
            .with_header("Transport", "RTP/AVP/UDP;unicast;mode=record");
        let resp = call(Receiver::handle_setup, &receiver, &setup);

        assert_eq!(resp.status, Status::OK);
        let advertised = Transport::parse(resp.header("Transport").unwrap())
            .server_port
            .unwrap();
        assert_ne!(advertised, settings.data_port);
        assert_ne!(advertised, 0);
    }

    #[test]
    fn test_setup_without_announce() {
        let receiver = receiver_with(settings(), &MemorySink::new());
        let resp = call(
            Receiver::handle_setup,
            &receiver,
            &Request::new(Method::Setup, "rtsp://192.168.1.2/1"),
        );
        assert_eq!(resp.status, Status::SESSION_NOT_FOUND);
    }

    #[test]
    fn test_options_lists_methods() {
        let receiver = receiver_with(settings(), &MemorySink::new());
        let req = Request::new(Method::Options, "*")
            .with_header("CSeq", "1")
            .with_header("Apple-Challenge", "pcA82D4sdJrNcnSDBhYcCA");
        let resp = call(Receiver::handle_options, &receiver, &req);

        assert_eq!(resp.status, Status::OK);
        assert!(resp.header("Public").unwrap().contains("SET_PARAMETER"));
        assert_eq!(resp.header("Apple-Response"), None);
    }

    #[test]
    fn test_options_answers_challenge() {
        let mut rng = StdRng::seed_from_u64(21);
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = key.to_public_key();
        let mut settings = settings();
        settings.device_key = Some(Arc::new(DeviceKey::new(key)));
        let receiver = receiver_with(settings, &MemorySink::new());

        let req = Request::new(Method::Options, "*")
            .with_header("Apple-Challenge", "pcA82D4sdJrNcnSDBhYcCA");
        let resp = call(Receiver::handle_options, &receiver, &req);
        let signature = decode_unpadded(resp.header("Apple-Response").unwrap()).unwrap();

        let mut signed = decode_unpadded("pcA82D4sdJrNcnSDBhYcCA").unwrap();
        signed.extend_from_slice(&[192, 168, 1, 2]);
        signed.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        signed.resize(32, 0);
        public
            .verify(Pkcs1v15Sign::new_unprefixed(), &signed, &signature)
            .unwrap();

        let bad = Request::new(Method::Options, "*").with_header("Apple-Challenge", "AAAA");
        let resp = call(Receiver::handle_options, &receiver, &bad);
        assert_eq!(resp.status, Status::OK);
        assert_eq!(resp.header("Apple-Response"), None);
    }

    #[test]
    fn test_announce_errors() {
        let receiver = receiver_with(settings(), &MemorySink::new());

        let resp = call(Receiver::handle_announce, &receiver, &announce("v=zero\r\n"));
        assert_eq!(resp.status, Status::BAD_REQUEST);

        let encrypted = format!("{}a=rsaaeskey:AAAA\r\na=aesiv:AAAA\r\n", SDP);
        let resp = call(Receiver::handle_announce, &receiver, &announce(&encrypted));
        assert_eq!(resp.status, Status::INTERNAL_SERVER_ERROR);
        assert_eq!(receiver.session_count(), 0);
    }

    #[test]
    fn test_announce_unwraps_stream_key() {
        let mut rng = StdRng::seed_from_u64(23);
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let wrapped = key
            .to_public_key()
            .encrypt(&mut rng, Oaep::new::<Sha1>(), &[7u8; 16])
            .unwrap();
        let mut settings = settings();
        settings.device_key = Some(Arc::new(DeviceKey::new(key)));
        let receiver = receiver_with(settings, &MemorySink::new());

        let body = format!(
            "{}a=rsaaeskey:{}\r\na=aesiv:{}\r\n",
            SDP,
            STANDARD.encode(wrapped).trim_end_matches('='),
            STANDARD.encode([9u8; 16]).trim_end_matches('=')
        );
        let resp = call(Receiver::handle_announce, &receiver, &announce(&body));
        assert_eq!(resp.status, Status::OK);
        assert_eq!(receiver.session_count(), 1);
    }

    #[test]
    fn test_set_parameter_updates_player() {
        let receiver = receiver_with(settings(), &MemorySink::new());

        let volume = Request::new(Method::SetParameter, "rtsp://x/1")
            .with_body("text/parameters", b"volume: -15.000000\r\n".to_vec());
        call(Receiver::handle_set_parameter, &receiver, &volume);
        assert!((receiver.player().volume() - 0.5).abs() < 1e-9);

        let track = Track {
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            title: "Title".to_string(),
            artwork: Vec::new(),
        };
        let metadata = Request::new(Method::SetParameter, "rtsp://x/1")
            .with_body("application/x-dmap-tagged", dmap::encode(&track));
        call(Receiver::handle_set_parameter, &receiver, &metadata);

        let art = Request::new(Method::SetParameter, "rtsp://x/1")
            .with_body("image/jpeg", vec![0xff, 0xd8, 0xff]);
        call(Receiver::handle_set_parameter, &receiver, &art);

        let current = receiver.player().track();
        assert_eq!(current.title, "Title");
        assert_eq!(current.album, "Album");
        assert_eq!(current.artwork, vec![0xff, 0xd8, 0xff]);

        let unknown = Request::new(Method::SetParameter, "rtsp://x/1")
            .with_body("application/octet-stream", vec![1]);
        let resp = call(Receiver::handle_set_parameter, &receiver, &unknown);
        assert_eq!(resp.status, Status::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_get_parameter_reports_volume() {
        let receiver = receiver_with(settings(), &MemorySink::new());
        receiver.player().set_volume(0.0);
        let req = Request::new(Method::GetParameter, "rtsp://x/1")
            .with_body("text/parameters", b"volume\r\n".to_vec());
        let resp = call(Receiver::handle_get_parameter, &receiver, &req);
        assert_eq!(
            volume::parse_parameter(&String::from_utf8_lossy(&resp.body)),
            Some(volume::MUTE)
        );
    }

    #[test]
    fn test_teardown_removes_session() {
        let receiver = receiver_with(settings(), &MemorySink::new());
        call(Receiver::handle_announce, &receiver, &announce(SDP));
        assert_eq!(receiver.session_count(), 1);

        call(
            Receiver::handle_teardown,
            &receiver,
            &Request::new(Method::Teardown, "rtsp://x/1"),
        );
        assert_eq!(receiver.session_count(), 0);
    }

    #[test]
    fn test_change_name_and_advertise() {
        let receiver = receiver_with(settings(), &MemorySink::new());
        assert!(receiver.change_name("  ").is_err());
        receiver.change_name("Kitchen").unwrap();
        assert_eq!(receiver.name(), "Kitchen");

        receiver.toggle_advertise(false);
        assert!(!receiver.is_advertising());
    }

    #[tokio::test]
    async fn test_stream_plays_end_to_end() {
        let data_port = UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut settings = settings();
        settings.data_port = data_port;
        let sink = MemorySink::new();
        let receiver = receiver_with(settings, &sink);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(receiver.server().serve(listener));

        let mut client = Client::connect(addr).await.unwrap();
        assert_eq!(client.send(announce(SDP)).await.unwrap().status, Status::OK);
        let setup = Request::new(Method::Setup, "rtsp://127.0.0.1/1")
            .with_header("Transport", "RTP/AVP/UDP;unicast;control_port=8888;timing_port=8889");
        let resp = client.send(setup).await.unwrap();
        let server_port = Transport::parse(resp.header("Transport").unwrap()).server_port;
        assert_eq!(server_port, Some(data_port));
        let resp = client
            .send(Request::new(Method::Record, "rtsp://127.0.0.1/1"))
            .await
            .unwrap();
        assert_eq!(resp.header("Audio-Latency"), Some("2205"));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for packet in [[1u8, 0], [2, 0], [3, 0]] {
            sender.send_to(&packet, ("127.0.0.1", data_port)).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.len() < 6 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sink.contents(), vec![1, 0, 2, 0, 3, 0]);
    }
}
