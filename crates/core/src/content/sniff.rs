//! Magic-number type sniffing.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

const SNIFF_LEN: usize = 32;

const HEIF_BRANDS: &[&[u8; 4]] = &[b"heic", b"heix", b"heim", b"heis", b"mif1", b"msf1"];

/// MIME type recognised from the leading bytes of a file.
pub fn sniff_bytes(bytes: &[u8]) -> Option<&'static str> {
    let starts = |magic: &[u8]| bytes.starts_with(magic);

    if starts(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if starts(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if starts(b"GIF87a") || starts(b"GIF89a") {
        return Some("image/gif");
    }
    if starts(b"II*\0") || starts(b"MM\0*") {
        return Some("image/tiff");
    }
    if starts(b"%PDF") {
        return Some("application/pdf");
    }
    if starts(b"ID3") || starts(&[0xFF, 0xFB]) || starts(&[0xFF, 0xF3]) || starts(&[0xFF, 0xF2])
    {
        return Some("audio/mpeg");
    }
    if starts(b"fLaC") {
        return Some("audio/flac");
    }
    if starts(b"OggS") {
        return Some("audio/ogg");
    }
    if starts(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/x-matroska");
    }
    if starts(b"RIFF") && bytes.len() >= 12 {
        return match &bytes[8..12] {
            b"WEBP" => Some("image/webp"),
            b"WAVE" => Some("audio/wav"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        };
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        let brand = &bytes[8..12];
        if HEIF_BRANDS.iter().any(|b| b.as_slice() == brand) {
            return Some("image/heic");
        }
        return match brand {
            b"qt  " => Some("video/quicktime"),
            b"M4A " => Some("audio/mp4"),
            _ => Some("video/mp4"),
        };
    }
    None
}

/// Read the head of a file and sniff its type. Unreadable files yield `None`.
pub async fn sniff_type(path: &Path) -> Option<&'static str> {
    let mut file = File::open(path).await.ok()?;
    let mut buffer = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        match file.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
    }
    sniff_bytes(&buffer[..filled])
}
