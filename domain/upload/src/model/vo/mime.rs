use crate::exception::{UploadException, UploadResult};

/// Top-level family of a mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeCategory {
    Image,
    Video,
    Audio,
    Text,
    Application,
    Other,
}

impl MimeCategory {
    pub fn of(mime: &str) -> Self {
        match mime.split('/').next().unwrap_or_default() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "text" => Self::Text,
            "application" => Self::Application,
            _ => Self::Other,
        }
    }

    fn is_media(self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::Audio)
    }
}

/// Lowercases and drops parameters, `Image/PNG; q=1` becomes `image/png`.
pub fn normalize_mime(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

struct Signature {
    offset: usize,
    magic: &'static [u8],
    mime: &'static str,
}

const SIGNATURES: &[Signature] = &[
    Signature { offset: 0, magic: b"\x89PNG\r\n\x1a\n", mime: "image/png" },
    Signature { offset: 0, magic: b"\xff\xd8\xff", mime: "image/jpeg" },
    Signature { offset: 0, magic: b"GIF87a", mime: "image/gif" },
    Signature { offset: 0, magic: b"GIF89a", mime: "image/gif" },
    Signature { offset: 0, magic: b"II*\x00", mime: "image/tiff" },
    Signature { offset: 0, magic: b"MM\x00*", mime: "image/tiff" },
    Signature { offset: 0, magic: b"\x00\x00\x01\x00", mime: "image/x-icon" },
    Signature { offset: 0, magic: b"\x1a\x45\xdf\xa3", mime: "video/webm" },
    Signature { offset: 0, magic: b"FLV\x01", mime: "video/x-flv" },
    Signature { offset: 0, magic: b"ID3", mime: "audio/mpeg" },
    Signature { offset: 0, magic: b"\xff\xfb", mime: "audio/mpeg" },
    Signature { offset: 0, magic: b"\xff\xf3", mime: "audio/mpeg" },
    Signature { offset: 0, magic: b"\xff\xf2", mime: "audio/mpeg" },
    Signature { offset: 0, magic: b"OggS", mime: "audio/ogg" },
    Signature { offset: 0, magic: b"fLaC", mime: "audio/flac" },
    Signature { offset: 0, magic: b"%PDF-", mime: "application/pdf" },
    Signature { offset: 0, magic: b"PK\x03\x04", mime: "application/zip" },
    Signature { offset: 0, magic: b"PK\x05\x06", mime: "application/zip" },
    Signature { offset: 0, magic: b"\x1f\x8b", mime: "application/gzip" },
    Signature { offset: 0, magic: b"7z\xbc\xaf\x27\x1c", mime: "application/x-7z-compressed" },
    Signature { offset: 0, magic: b"Rar!\x1a\x07", mime: "application/vnd.rar" },
    Signature { offset: 0, magic: b"\x7fELF", mime: "application/x-executable" },
    Signature { offset: 0, magic: b"MZ", mime: "application/x-msdownload" },
];

fn starts_at(bytes: &[u8], offset: usize, magic: &[u8]) -> bool {
    bytes.get(offset..offset + magic.len()) == Some(magic)
}

fn detect_riff(bytes: &[u8]) -> Option<&'static str> {
    if !starts_at(bytes, 0, b"RIFF") {
        return None;
    }
    match bytes.get(8..12)? {
        b"WEBP" => Some("image/webp"),
        b"AVI " => Some("video/x-msvideo"),
        b"WAVE" => Some("audio/wav"),
        _ => None,
    }
}

fn detect_bmp(bytes: &[u8]) -> Option<&'static str> {
    // Reserved header bytes are zero, "BM" alone is too common in text.
    (starts_at(bytes, 0, b"BM") && bytes.get(6..10) == Some(&[0u8; 4][..])).then_some("image/bmp")
}

fn detect_iso_media(bytes: &[u8]) -> Option<&'static str> {
    if !starts_at(bytes, 4, b"ftyp") {
        return None;
    }
    Some(match bytes.get(8..12)? {
        b"qt  " => "video/quicktime",
        b"heic" | b"heix" | b"mif1" => "image/heic",
        b"avif" => "image/avif",
        b"M4A " => "audio/mp4",
        _ => "video/mp4",
    })
}

/// Infers the mime type from the leading bytes, `None` when no signature matches.
pub fn detect_mime(bytes: &[u8]) -> Option<&'static str> {
    detect_riff(bytes)
        .or_else(|| detect_iso_media(bytes))
        .or_else(|| detect_bmp(bytes))
        .or_else(|| {
            SIGNATURES
                .iter()
                .find(|s| starts_at(bytes, s.offset, s.magic))
                .map(|s| s.mime)
        })
}

fn canonical(mime: &str) -> &str {
    match mime {
        "application/x-zip-compressed" => "application/zip",
        "application/x-gzip" => "application/gzip",
        "application/x-rar-compressed" => "application/vnd.rar",
        "application/x-dosexec"
        | "application/vnd.microsoft.portable-executable"
        | "application/exe"
        | "application/x-msdos-program" => "application/x-msdownload",
        "image/jpg" => "image/jpeg",
        "audio/x-wav" | "audio/wave" => "audio/wav",
        "audio/mp3" => "audio/mpeg",
        other => other,
    }
}

/// Formats stored as a zip archive, detected as plain zip.
fn is_zip_container(mime: &str) -> bool {
    mime.starts_with("application/vnd.openxmlformats-officedocument.")
        || mime.starts_with("application/vnd.oasis.opendocument.")
        || matches!(
            mime,
            "application/epub+zip"
                | "application/java-archive"
                | "application/vnd.android.package-archive"
        )
}

/// Formats without a reliable signature.
pub fn is_text_like(mime: &str) -> bool {
    mime.starts_with("text/")
        || mime.ends_with("+json")
        || mime.ends_with("+xml")
        || matches!(
            mime,
            "application/json"
                | "application/xml"
                | "application/javascript"
                | "application/x-yaml"
                | "application/yaml"
                | "application/csv"
                | "application/x-ndjson"
        )
}

/// Validates the first bytes of an upload against its normalized declared mime type.
pub fn check_signature(declared: &str, head: &[u8]) -> UploadResult<()> {
    let declared = normalize_mime(declared);
    let detected = detect_mime(head);
    let accepted = match detected {
        Some(detected) => {
            let declared_category = MimeCategory::of(&declared);
            if declared_category.is_media() {
                declared_category == MimeCategory::of(detected)
            } else {
                let declared = canonical(&declared);
                declared == detected || (detected == "application/zip" && is_zip_container(declared))
            }
        }
        None => is_text_like(&declared),
    };
    if accepted {
        Ok(())
    } else {
        Err(UploadException::TypeMismatch {
            declared,
            detected: detected.map(ToOwned::to_owned),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";
    const EXE: &[u8] = b"MZ\x90\x00\x03\x00\x00\x00";

    #[test]
    fn detects_common_signatures() {
        assert_eq!(detect_mime(PNG), Some("image/png"));
        assert_eq!(detect_mime(b"\xff\xd8\xff\xe0\x00\x10JFIF"), Some("image/jpeg"));
        assert_eq!(detect_mime(b"RIFF\x24\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(detect_mime(b"RIFF\x24\x00\x00\x00WAVEfmt "), Some("audio/wav"));
        assert_eq!(detect_mime(b"\x00\x00\x00\x18ftypmp42"), Some("video/mp4"));
        assert_eq!(detect_mime(b"\x00\x00\x00\x14ftypqt  "), Some("video/quicktime"));
        assert_eq!(detect_mime(b"%PDF-1.7"), Some("application/pdf"));
        assert_eq!(detect_mime(EXE), Some("application/x-msdownload"));
        assert_eq!(detect_mime(b"BM\x36\x00\x0c\x00\x00\x00\x00\x00"), Some("image/bmp"));
        assert_eq!(detect_mime(b"BMW owners"), None);
        assert_eq!(detect_mime(b"hello world"), None);
        assert_eq!(detect_mime(b""), None);
    }

    #[test]
    fn media_types_match_by_category() {
        // Declared jpeg, actually png: both images.
        check_signature("image/jpeg", PNG).unwrap();
        check_signature("video/quicktime", b"\x00\x00\x00\x18ftypmp42").unwrap();
        assert!(check_signature("video/mp4", PNG).is_err());
    }

    #[test]
    fn executable_declared_as_image_is_rejected() {
        let err = check_signature("image/png", EXE).unwrap_err();
        match err {
            UploadException::TypeMismatch { declared, detected } => {
                assert_eq!(declared, "image/png");
                assert_eq!(detected.as_deref(), Some("application/x-msdownload"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn undetectable_content_needs_text_like_declaration() {
        check_signature("text/plain", b"plain words").unwrap();
        check_signature("application/json", b"{\"a\":1}").unwrap();
        check_signature("image/svg+xml", b"<svg xmlns=\"\"/>").unwrap();
        assert!(check_signature("image/png", b"plain words").is_err());
        assert!(check_signature("application/octet-stream", b"plain words").is_err());
    }

    #[test]
    fn application_types_need_exact_or_container_match() {
        check_signature("application/pdf", b"%PDF-1.4").unwrap();
        check_signature("application/x-zip-compressed", b"PK\x03\x04").unwrap();
        check_signature(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            b"PK\x03\x04",
        )
        .unwrap();
        assert!(check_signature("application/pdf", EXE).is_err());
        assert!(check_signature("text/plain", EXE).is_err());
    }

    #[test]
    fn declared_type_is_normalized() {
        assert_eq!(normalize_mime(" Image/PNG; charset=binary"), "image/png");
        check_signature("IMAGE/PNG", PNG).unwrap();
    }
}
