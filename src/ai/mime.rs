/// Sniffs an image MIME type from magic bytes, for wrapping base64 payloads
/// into data URIs. Unknown formats fall back to `image/png`.
pub fn detect_image_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => {
            tracing::warn!(
                "Unrecognized image header {:02X?}, assuming image/png",
                &bytes[..bytes.len().min(4)]
            );
            "image/png"
        }
    }
}
