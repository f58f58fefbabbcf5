//! Codec header sniffing
//!
//! Reads just enough of the stream start to learn sample rate and channel
//! count before a decoder is built: the first MPEG audio frame header for
//! MP3, the Vorbis identification header for Ogg.

/// MPEG audio version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// Sample rates accepted for MP3 playback
pub const MP3_SAMPLE_RATES: [u32; 3] = [32000, 44100, 48000];

const MPEG1_RATES: [u32; 3] = [44100, 48000, 32000];
const MPEG2_RATES: [u32; 3] = [22050, 24000, 16000];
const MPEG25_RATES: [u32; 3] = [11025, 12000, 8000];

const MPEG1_L3_BITRATES: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const MPEG2_L3_BITRATES: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// A decoded MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp3FrameHeader {
    pub version: MpegVersion,
    /// 1, 2 or 3
    pub layer: u8,
    pub sample_rate: u32,
    pub channels: u16,
    /// kbit/s; 0 for layers other than III
    pub bitrate: u32,
    /// Frame length in bytes, known for layer III only
    pub frame_len: Option<usize>,
}

/// Parse a 4-byte MPEG audio frame header.
pub fn parse_mp3_header(bytes: [u8; 4]) -> Option<Mp3FrameHeader> {
    if bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
        return None;
    }

    let version = match (bytes[1] >> 3) & 0x03 {
        0b00 => MpegVersion::Mpeg25,
        0b10 => MpegVersion::Mpeg2,
        0b11 => MpegVersion::Mpeg1,
        _ => return None,
    };
    let layer = match (bytes[1] >> 1) & 0x03 {
        0b01 => 3,
        0b10 => 2,
        0b11 => 1,
        _ => return None,
    };

    let bitrate_idx = (bytes[2] >> 4) as usize;
    let rate_idx = ((bytes[2] >> 2) & 0x03) as usize;
    if bitrate_idx == 0 || bitrate_idx == 15 || rate_idx == 3 {
        return None;
    }
    let padding = ((bytes[2] >> 1) & 0x01) as usize;

    let sample_rate = match version {
        MpegVersion::Mpeg1 => MPEG1_RATES[rate_idx],
        MpegVersion::Mpeg2 => MPEG2_RATES[rate_idx],
        MpegVersion::Mpeg25 => MPEG25_RATES[rate_idx],
    };
    let channels = if bytes[3] >> 6 == 0b11 { 1 } else { 2 };

    let (bitrate, frame_len) = if layer == 3 {
        let (bitrate, factor) = match version {
            MpegVersion::Mpeg1 => (MPEG1_L3_BITRATES[bitrate_idx], 144),
            _ => (MPEG2_L3_BITRATES[bitrate_idx], 72),
        };
        let len = factor * bitrate as usize * 1000 / sample_rate as usize + padding;
        (bitrate, Some(len))
    } else {
        (0, None)
    };

    Some(Mp3FrameHeader {
        version,
        layer,
        sample_rate,
        channels,
        bitrate,
        frame_len,
    })
}

/// Length of a leading ID3v2 tag, if any.
fn id3v2_len(data: &[u8]) -> usize {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return 0;
    }
    // Syncsafe integer: 7 bits per byte
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | (b & 0x7F) as usize);
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}

/// Find the first plausible MPEG audio frame; returns its offset and header.
///
/// A candidate is confirmed by the frame that follows it when that frame
/// lies inside `data`.
pub fn find_mp3_frame(data: &[u8]) -> Option<(usize, Mp3FrameHeader)> {
    let start = id3v2_len(data);
    if data.len() < 4 || start > data.len() - 4 {
        return None;
    }

    for i in start..=data.len() - 4 {
        if data[i] != 0xFF {
            continue;
        }
        let Some(header) = parse_mp3_header([data[i], data[i + 1], data[i + 2], data[i + 3]])
        else {
            continue;
        };

        if let Some(len) = header.frame_len {
            let next = i + len;
            if next + 4 <= data.len() {
                let confirmed = parse_mp3_header([
                    data[next],
                    data[next + 1],
                    data[next + 2],
                    data[next + 3],
                ])
                .is_some_and(|h| h.version == header.version && h.sample_rate == header.sample_rate);
                if !confirmed {
                    continue;
                }
            }
        }
        return Some((i, header));
    }
    None
}

/// Fields of a Vorbis identification header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VorbisIdent {
    pub channels: u16,
    pub sample_rate: u32,
    /// Nominal bitrate in bit/s, when announced
    pub nominal_bitrate: Option<u32>,
}

/// Find the first Ogg page and parse the Vorbis identification packet in it.
pub fn find_vorbis_ident(data: &[u8]) -> Option<VorbisIdent> {
    let page = data.windows(4).position(|w| w == b"OggS")?;
    let header = data.get(page..page + 27)?;
    if header[4] != 0 {
        return None;
    }
    let segments = header[26] as usize;
    let payload = page + 27 + segments;
    let packet = data.get(payload..payload + 30)?;

    if packet[0] != 0x01 || &packet[1..7] != b"vorbis" {
        return None;
    }
    let le32 = |b: &[u8]| u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    if le32(&packet[7..11]) != 0 {
        return None;
    }
    let channels = packet[11] as u16;
    let sample_rate = le32(&packet[12..16]);
    if channels == 0 || sample_rate == 0 {
        return None;
    }
    let nominal = le32(&packet[20..24]) as i32;

    Some(VorbisIdent {
        channels,
        sample_rate,
        nominal_bitrate: (nominal > 0).then_some(nominal as u32),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `count` layer III frames with zeroed payloads.
    pub(crate) fn mp3_frames(header: [u8; 4], count: usize) -> Vec<u8> {
        let len = parse_mp3_header(header).unwrap().frame_len.unwrap();
        let mut frame = header.to_vec();
        frame.resize(len, 0);
        frame.repeat(count)
    }

    /// MPEG-1 layer III, 128 kbps, stereo, at the given rate index
    pub(crate) fn mpeg1_header(rate_idx: u8) -> [u8; 4] {
        [0xFF, 0xFB, 0x90 | (rate_idx << 2), 0x00]
    }

    /// First Ogg page carrying a Vorbis identification header
    pub(crate) fn vorbis_ident_page(channels: u8, rate: u32) -> Vec<u8> {
        let mut packet = vec![0x01];
        packet.extend_from_slice(b"vorbis");
        packet.extend_from_slice(&0u32.to_le_bytes());
        packet.push(channels);
        packet.extend_from_slice(&rate.to_le_bytes());
        packet.extend_from_slice(&0i32.to_le_bytes());
        packet.extend_from_slice(&128_000i32.to_le_bytes());
        packet.extend_from_slice(&0i32.to_le_bytes());
        packet.push(0xB8);
        packet.push(0x01);

        let mut page = b"OggS".to_vec();
        page.push(0); // version
        page.push(0x02); // beginning of stream
        page.extend_from_slice(&0u64.to_le_bytes());
        page.extend_from_slice(&1u32.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes()); // crc unchecked here
        page.push(1);
        page.push(packet.len() as u8);
        page.extend(packet);
        page
    }

    #[test]
    fn parses_mpeg1_layer3() {
        let h = parse_mp3_header(mpeg1_header(0)).unwrap();
        assert_eq!(h.version, MpegVersion::Mpeg1);
        assert_eq!(h.layer, 3);
        assert_eq!(h.sample_rate, 44100);
        assert_eq!(h.bitrate, 128);
        assert_eq!(h.channels, 2);
        assert_eq!(h.frame_len, Some(417));
    }

    #[test]
    fn parses_all_mpeg1_rates() {
        assert_eq!(parse_mp3_header(mpeg1_header(1)).unwrap().sample_rate, 48000);
        assert_eq!(parse_mp3_header(mpeg1_header(2)).unwrap().sample_rate, 32000);
    }

    #[test]
    fn parses_mpeg2_and_mono() {
        let h = parse_mp3_header([0xFF, 0xF3, 0x80, 0xC0]).unwrap();
        assert_eq!(h.version, MpegVersion::Mpeg2);
        assert_eq!(h.sample_rate, 22050);
        assert_eq!(h.bitrate, 64);
        assert_eq!(h.channels, 1);

        let h = parse_mp3_header([0xFF, 0xE3, 0x80, 0x00]).unwrap();
        assert_eq!(h.version, MpegVersion::Mpeg25);
        assert_eq!(h.sample_rate, 11025);
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(parse_mp3_header([0x00, 0xFB, 0x90, 0x00]).is_none());
        // reserved version
        assert!(parse_mp3_header([0xFF, 0xEB, 0x90, 0x00]).is_none());
        // free bitrate
        assert!(parse_mp3_header([0xFF, 0xFB, 0x00, 0x00]).is_none());
        // reserved sample rate
        assert!(parse_mp3_header([0xFF, 0xFB, 0x9C, 0x00]).is_none());
    }

    #[test]
    fn layer2_has_no_frame_len() {
        let h = parse_mp3_header([0xFF, 0xFD, 0x90, 0x00]).unwrap();
        assert_eq!(h.layer, 2);
        assert_eq!(h.frame_len, None);
    }

    #[test]
    fn finds_frame_after_garbage() {
        let mut data = vec![0x12, 0xFF, 0x00, 0xAB];
        data.extend(mp3_frames(mpeg1_header(0), 3));
        let (offset, header) = find_mp3_frame(&data).unwrap();
        assert_eq!(offset, 4);
        assert_eq!(header.sample_rate, 44100);
    }

    #[test]
    fn skips_id3_tag() {
        let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x05".to_vec();
        // Tag body contains a fake sync word
        data.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00, 0x00]);
        data.extend(mp3_frames(mpeg1_header(1), 2));
        let (offset, header) = find_mp3_frame(&data).unwrap();
        assert_eq!(offset, 15);
        assert_eq!(header.sample_rate, 48000);
    }

    #[test]
    fn unconfirmed_sync_is_skipped() {
        // Valid-looking header whose successor is garbage, then real frames
        let mut data = mpeg1_header(0).to_vec();
        data.resize(417 + 4, 0x55);
        let real_start = data.len();
        data.extend(mp3_frames(mpeg1_header(2), 2));
        let (offset, header) = find_mp3_frame(&data).unwrap();
        assert_eq!(offset, real_start);
        assert_eq!(header.sample_rate, 32000);
    }

    #[test]
    fn no_frame_in_noise() {
        assert!(find_mp3_frame(&[0u8; 1000]).is_none());
        assert!(find_mp3_frame(&[0xFF, 0xFB]).is_none());
    }

    #[test]
    fn vorbis_ident_parsed() {
        let page = vorbis_ident_page(2, 44100);
        let ident = find_vorbis_ident(&page).unwrap();
        assert_eq!(ident.channels, 2);
        assert_eq!(ident.sample_rate, 44100);
        assert_eq!(ident.nominal_bitrate, Some(128_000));
    }

    #[test]
    fn vorbis_ident_after_junk() {
        let mut data = vec![0u8; 10];
        data.extend(vorbis_ident_page(1, 22050));
        let ident = find_vorbis_ident(&data).unwrap();
        assert_eq!(ident.channels, 1);
        assert_eq!(ident.sample_rate, 22050);
    }

    #[test]
    fn vorbis_ident_rejects_other_codecs() {
        let mut page = vorbis_ident_page(2, 44100);
        let payload = 27 + 1;
        page[payload + 1..payload + 7].copy_from_slice(b"Opus__");
        assert!(find_vorbis_ident(&page).is_none());
    }

    #[test]
    fn vorbis_ident_truncated() {
        let page = vorbis_ident_page(2, 44100);
        assert!(find_vorbis_ident(&page[..40]).is_none());
    }
}
