//! PCM volume adjustment

use std::borrow::Cow;

/// Scale 16-bit little-endian samples by `volume` (0 = silence, 1 = unity)
///
/// Unity volume returns the input untouched. A trailing odd byte is dropped
/// from adjusted output.
pub fn adjust_audio(raw: &[u8], volume: f64) -> Cow<'_, [u8]> {
    if volume == 1.0 {
        return Cow::Borrowed(raw);
    }

    let mut adjusted = Vec::with_capacity(raw.len());
    for bytes in raw.chunks_exact(2) {
        let sample = i16::from_le_bytes([bytes[0], bytes[1]]) as f64;
        let scaled = (sample * volume).clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        adjusted.extend_from_slice(&scaled.to_le_bytes());
    }
    Cow::Owned(adjusted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_unity_is_borrowed() {
        let raw = pcm(&[1, -1, 1000]);
        assert!(matches!(adjust_audio(&raw, 1.0), Cow::Borrowed(_)));
    }

    #[test]
    fn test_half_volume() {
        let raw = pcm(&[1000, -1000, 32767]);
        assert_eq!(adjust_audio(&raw, 0.5).into_owned(), pcm(&[500, -500, 16383]));
    }

    #[test]
    fn test_mute_and_clamp() {
        let raw = pcm(&[1234, i16::MIN]);
        assert_eq!(adjust_audio(&raw, 0.0).into_owned(), pcm(&[0, 0]));
        assert_eq!(
            adjust_audio(&pcm(&[20000, -20000]), 2.0).into_owned(),
            pcm(&[i16::MAX, i16::MIN])
        );
    }
}
