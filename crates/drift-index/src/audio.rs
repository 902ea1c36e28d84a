//! Opportunistic audio metadata probing.
//!
//! The scan attaches bitrate, sample rate, duration, and a VBR flag to audio
//! files when the container header is readable. Probing never fails a file:
//! any parse problem simply yields `None` and the file is catalogued without
//! metadata.
//!
//! Only MP3 and FLAC are probed; everything else is catalogued as-is.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Audio properties extracted from a file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    /// Bitrate in kbit/s.
    pub bitrate: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Duration in whole seconds.
    pub duration_secs: u32,
    /// True for variable-bitrate streams.
    pub is_vbr: bool,
}

/// MPEG-1 Layer III bitrates, kbit/s, indexed by the 4-bit header field.
const MP3_BITRATES: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];

/// MPEG-1 sample rates, Hz, indexed by the 2-bit header field.
const MP3_SAMPLE_RATES: [u32; 4] = [44_100, 48_000, 32_000, 0];

/// Probe a file based on its extension.
///
/// Returns `None` for unsupported extensions and for any unreadable or
/// unparseable header.
pub fn probe(path: &Path, size: u64) -> Option<AudioInfo> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "mp3" => probe_mp3(path, size),
        "flac" => probe_flac(path, size),
        _ => None,
    }
}

/// Parse the first MPEG frame header, skipping any leading ID3v2 tag.
fn probe_mp3(path: &Path, size: u64) -> Option<AudioInfo> {
    let mut file = File::open(path).ok()?;
    let mut buf = vec![0u8; 64 * 1024];
    let read = file.read(&mut buf).ok()?;
    buf.truncate(read);

    let mut offset = 0usize;

    // ID3v2 header: "ID3", version, flags, then a 4-byte syncsafe size.
    if buf.len() >= 10 && &buf[0..3] == b"ID3" {
        let tag_size = ((buf[6] as usize) << 21)
            | ((buf[7] as usize) << 14)
            | ((buf[8] as usize) << 7)
            | (buf[9] as usize);
        offset = 10 + tag_size;
    }

    // Hunt for the frame sync within the buffered prefix.
    while offset + 4 <= buf.len() {
        if buf[offset] == 0xFF && (buf[offset + 1] & 0xE0) == 0xE0 {
            break;
        }
        offset += 1;
    }
    if offset + 4 > buf.len() {
        return None;
    }

    let header = &buf[offset..offset + 4];

    // MPEG-1 Layer III only; other versions are rare enough to skip.
    let version_bits = (header[1] >> 3) & 0x03;
    let layer_bits = (header[1] >> 1) & 0x03;
    if version_bits != 0b11 || layer_bits != 0b01 {
        return None;
    }

    let bitrate = MP3_BITRATES[(header[2] >> 4) as usize];
    let sample_rate = MP3_SAMPLE_RATES[((header[2] >> 2) & 0x03) as usize];
    if bitrate == 0 || sample_rate == 0 {
        return None;
    }

    // A Xing/Info block inside the first frame marks VBR and carries the
    // total frame count, which gives an exact duration.
    let side_info_len = 32; // MPEG-1, assume stereo side info
    let xing_offset = offset + 4 + side_info_len;
    let mut is_vbr = false;
    let mut duration_secs = 0u32;
    if xing_offset + 16 <= buf.len() {
        let tag = &buf[xing_offset..xing_offset + 4];
        if tag == b"Xing" || tag == b"Info" {
            is_vbr = tag == b"Xing";
            let flags = u32::from_be_bytes([
                buf[xing_offset + 4],
                buf[xing_offset + 5],
                buf[xing_offset + 6],
                buf[xing_offset + 7],
            ]);
            if flags & 0x1 != 0 {
                let frames = u32::from_be_bytes([
                    buf[xing_offset + 8],
                    buf[xing_offset + 9],
                    buf[xing_offset + 10],
                    buf[xing_offset + 11],
                ]);
                // 1152 samples per MPEG-1 Layer III frame.
                duration_secs = ((frames as u64 * 1152) / sample_rate as u64) as u32;
            }
        }
    }

    if duration_secs == 0 {
        duration_secs = ((size * 8) / (bitrate as u64 * 1000)) as u32;
    }

    let effective_bitrate = if is_vbr && duration_secs > 0 {
        ((size * 8) / (duration_secs as u64 * 1000)) as u32
    } else {
        bitrate
    };

    Some(AudioInfo {
        bitrate: effective_bitrate,
        sample_rate,
        duration_secs,
        is_vbr,
    })
}

/// Parse the FLAC STREAMINFO block.
fn probe_flac(path: &Path, size: u64) -> Option<AudioInfo> {
    let mut file = File::open(path).ok()?;
    let mut buf = [0u8; 4 + 4 + 34];
    file.read_exact(&mut buf).ok()?;

    if &buf[0..4] != b"fLaC" {
        return None;
    }
    // First metadata block must be STREAMINFO (type 0).
    if buf[4] & 0x7F != 0 {
        return None;
    }

    let info = &buf[8..];
    let sample_rate =
        ((info[10] as u32) << 12) | ((info[11] as u32) << 4) | ((info[12] as u32) >> 4);
    let total_samples = (((info[13] & 0x0F) as u64) << 32)
        | ((info[14] as u64) << 24)
        | ((info[15] as u64) << 16)
        | ((info[16] as u64) << 8)
        | (info[17] as u64);

    if sample_rate == 0 {
        return None;
    }

    let duration_secs = (total_samples / sample_rate as u64) as u32;
    let bitrate = if duration_secs > 0 {
        ((size * 8) / (duration_secs as u64 * 1000)) as u32
    } else {
        0
    };

    Some(AudioInfo {
        bitrate,
        sample_rate,
        duration_secs,
        // FLAC is inherently variable-rate.
        is_vbr: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(name_hint: &str, bytes: &[u8]) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(name_hint)
            .tempfile()
            .unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_probe_ignores_unknown_extensions() {
        let file = write_temp(".txt", b"not audio at all");
        assert!(probe(file.path(), 16).is_none());
    }

    #[test]
    fn test_probe_mp3_cbr_header() {
        // 0xFF 0xFB: MPEG-1 Layer III; 0x90 = 128 kbit/s, 44100 Hz.
        let mut bytes = vec![0xFF, 0xFB, 0x90, 0x00];
        bytes.extend_from_slice(&[0u8; 512]);
        let file = write_temp(".mp3", &bytes);

        let info = probe(file.path(), 1_000_000).unwrap();
        assert_eq!(info.bitrate, 128);
        assert_eq!(info.sample_rate, 44_100);
        assert!(!info.is_vbr);
        // 1,000,000 bytes at 128 kbit/s is 62 seconds.
        assert_eq!(info.duration_secs, 62);
    }

    #[test]
    fn test_probe_mp3_skips_id3v2() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ID3");
        bytes.extend_from_slice(&[0x03, 0x00, 0x00]); // version + flags
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x0A]); // syncsafe size 10
        bytes.extend_from_slice(&[0u8; 10]); // tag body
        bytes.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        bytes.extend_from_slice(&[0u8; 256]);
        let file = write_temp(".mp3", &bytes);

        let info = probe(file.path(), 500_000).unwrap();
        assert_eq!(info.bitrate, 128);
    }

    #[test]
    fn test_probe_mp3_garbage_is_none() {
        let file = write_temp(".mp3", &[0u8; 128]);
        assert!(probe(file.path(), 128).is_none());
    }

    #[test]
    fn test_probe_flac_streaminfo() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"fLaC");
        bytes.push(0x00); // STREAMINFO, not last
        bytes.extend_from_slice(&[0x00, 0x00, 0x22]); // block length 34
        let mut info = [0u8; 34];
        // Sample rate 44100 packed into 20 bits starting at byte 10.
        info[10] = 0x0A;
        info[11] = 0xC4;
        info[12] = 0x40;
        // Total samples: 44100 * 60 = 2,646,000 over the low 36 bits.
        let samples: u64 = 2_646_000;
        info[13] = ((samples >> 32) & 0x0F) as u8;
        info[14] = ((samples >> 24) & 0xFF) as u8;
        info[15] = ((samples >> 16) & 0xFF) as u8;
        info[16] = ((samples >> 8) & 0xFF) as u8;
        info[17] = (samples & 0xFF) as u8;
        bytes.extend_from_slice(&info);
        let file = write_temp(".flac", &bytes);

        let probed = probe(file.path(), 6_000_000).unwrap();
        assert_eq!(probed.sample_rate, 44_100);
        assert_eq!(probed.duration_secs, 60);
        assert!(probed.is_vbr);
        assert_eq!(probed.bitrate, 800); // 6 MB over 60 s
    }

    #[test]
    fn test_probe_truncated_flac_is_none() {
        let file = write_temp(".flac", b"fLaC");
        assert!(probe(file.path(), 4).is_none());
    }
}
