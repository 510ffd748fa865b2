//! DMAP tagged metadata
//!
//! Items are `code(4) length(u32 BE) data(length)`. Senders wrap the track
//! items in an 8 byte container header (`mlit` + length).

use crate::player::Track;

const HEADER_SIZE: usize = 8;

/// Fields extracted from a metadata body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub item_kind: Option<u8>,
}

/// Parse a `application/x-dmap-tagged` body
///
/// Unknown codes are skipped. A truncated item ends the walk.
pub fn parse(data: &[u8]) -> TrackInfo {
    let mut info = TrackInfo::default();
    let mut i = HEADER_SIZE;

    while i + HEADER_SIZE <= data.len() {
        let code = &data[i..i + 4];
        let len = u32::from_be_bytes([data[i + 4], data[i + 5], data[i + 6], data[i + 7]]) as usize;
        let start = i + HEADER_SIZE;
        let Some(value) = start.checked_add(len).and_then(|end| data.get(start..end)) else {
            break;
        };

        match code {
            b"minm" => info.title = Some(String::from_utf8_lossy(value).into_owned()),
            b"asar" => info.artist = Some(String::from_utf8_lossy(value).into_owned()),
            b"asal" => info.album = Some(String::from_utf8_lossy(value).into_owned()),
            b"mikd" => info.item_kind = value.first().copied(),
            _ => {}
        }

        i = start + len;
    }

    info
}

/// Encode a track as an `mlit` container
pub fn encode(track: &Track) -> Vec<u8> {
    let mut items = Vec::new();
    push_item(&mut items, b"minm", track.title.as_bytes());
    push_item(&mut items, b"asar", track.artist.as_bytes());
    push_item(&mut items, b"asal", track.album.as_bytes());

    let mut out = Vec::with_capacity(items.len() + HEADER_SIZE);
    push_item(&mut out, b"mlit", &items);
    out
}

fn push_item(out: &mut Vec<u8>, code: &[u8; 4], value: &[u8]) {
    out.extend_from_slice(code);
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}
