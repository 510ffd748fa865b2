//! Control protocol benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lan_zone_audio::rtsp::read_request;
use lan_zone_audio::sdp::SessionDescription;

const OPTIONS: &[u8] = b"OPTIONS * RTSP/1.0\r\n\
    CSeq: 1\r\n\
    Apple-Challenge: 6pBkdcNFGRylDbjcjN+9Nw\r\n\
    User-Agent: iTunes/11.0.4\r\n\
    \r\n";

const SDP: &str = "v=0\r\n\
    o=iTunes 3413821438 0 IN IP4 192.168.1.10\r\n\
    s=iTunes\r\n\
    c=IN IP4 192.168.1.2\r\n\
    t=0 0\r\n\
    m=audio 0 RTP/AVP 96\r\n\
    a=rtpmap:96 AppleLossless\r\n\
    a=fmtp:96 352 0 16 40 10 14 2 255 0 0 44100\r\n";

fn read_request_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    c.bench_function("read_options_request", |b| {
        b.iter(|| {
            let mut reader = OPTIONS;
            black_box(runtime.block_on(read_request(&mut reader)).unwrap())
        })
    });
}

fn parse_sdp_benchmark(c: &mut Criterion) {
    c.bench_function("parse_announce_sdp", |b| {
        b.iter(|| black_box(SessionDescription::parse(black_box(SDP)).unwrap()))
    });
}

criterion_group!(benches, read_request_benchmark, parse_sdp_benchmark);
criterion_main!(benches);
