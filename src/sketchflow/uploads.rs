//! Upload handling and sidecar annotations.
//!
//! Uploads arrive as data URLs (`data:<media>;base64,<payload>`), are saved
//! under `<data_dir>/uploads/<random>.<ext>`, and are re-encoded to data
//! URLs when embedded into LLM content blocks. Each uploaded image may have
//! an adjacent `<name>.annotations.json` sidecar holding question dots
//! placed by the model.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sketchflow::session::FileType;

/// Upload decoding failure.
#[derive(Debug, Clone)]
pub struct UploadError(pub String);

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for UploadError {}

/// Decode a data URL into raw bytes, a file extension, and the file kind.
pub fn decode_data_url(data_url: &str) -> Result<(Vec<u8>, String, FileType), UploadError> {
    if !data_url.starts_with("data:") {
        return Err(UploadError("File must be a data URL.".to_string()));
    }
    let Some((header, b64)) = data_url.split_once(',') else {
        return Err(UploadError("Invalid data URL payload.".to_string()));
    };
    if b64.is_empty() {
        return Err(UploadError("Invalid data URL payload.".to_string()));
    }
    let media_type = header
        .split(';')
        .next()
        .unwrap_or("")
        .trim_start_matches("data:");
    let (ext, file_type) = match media_type {
        "image/png" => ("png", FileType::Image),
        "image/jpeg" => ("jpg", FileType::Image),
        "image/webp" => ("webp", FileType::Image),
        "image/gif" => ("gif", FileType::Image),
        "image/bmp" => ("bmp", FileType::Image),
        "application/pdf" => ("pdf", FileType::Pdf),
        other => {
            return Err(UploadError(format!("Unsupported media type: {}", other)));
        }
    };
    let raw = BASE64
        .decode(b64)
        .map_err(|e| UploadError(format!("Invalid base64 payload: {}", e)))?;
    Ok((raw, ext.to_string(), file_type))
}

/// Save an uploaded data URL under `<data_dir>/uploads/`.
///
/// Returns the path relative to `data_dir` and the detected file kind.
pub fn save_uploaded_file(
    data_url: &str,
    data_dir: &Path,
) -> Result<(String, FileType), Box<dyn Error + Send + Sync>> {
    let (raw, ext, file_type) = decode_data_url(data_url)?;
    let uploads_dir = data_dir.join("uploads");
    fs::create_dir_all(&uploads_dir)?;
    let filename = format!("{}.{}", uuid::Uuid::new_v4().simple(), ext);
    let path = uploads_dir.join(&filename);
    fs::write(&path, raw)?;
    Ok((format!("uploads/{}", filename), file_type))
}

/// Read a stored file and re-encode it as a data URL for LLM content
/// blocks.
pub fn file_to_data_url(path: &Path) -> Result<String, Box<dyn Error + Send + Sync>> {
    let media_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("pdf") => "application/pdf",
        _ => "image/png",
    };
    let raw = fs::read(path)?;
    Ok(format!("data:{};base64,{}", media_type, BASE64.encode(raw)))
}

/// Sidecar path for an image's annotations.
pub fn annotations_path(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    image_path.with_file_name(format!("{}.annotations.json", stem))
}

/// Load the annotation list for an image; missing or malformed sidecars
/// read as empty.
pub fn load_annotations(image_path: &Path) -> Vec<Value> {
    let path = annotations_path(image_path);
    match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

/// Persist the annotation list next to the image.
pub fn save_annotations(
    image_path: &Path,
    annotations: &[Value],
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let path = annotations_path(image_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(annotations)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_recognises_media_types() {
        let (raw, ext, file_type) = decode_data_url("data:image/png;base64,aGk=").unwrap();
        assert_eq!(raw, b"hi");
        assert_eq!(ext, "png");
        assert_eq!(file_type, FileType::Image);

        let (_, ext, file_type) = decode_data_url("data:application/pdf;base64,aGk=").unwrap();
        assert_eq!(ext, "pdf");
        assert_eq!(file_type, FileType::Pdf);

        assert!(decode_data_url("not-a-data-url").is_err());
        assert!(decode_data_url("data:text/plain;base64,aGk=").is_err());
    }

    #[test]
    fn save_and_reencode_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (rel_path, file_type) =
            save_uploaded_file("data:image/png;base64,aGk=", dir.path()).unwrap();
        assert!(rel_path.starts_with("uploads/"));
        assert!(rel_path.ends_with(".png"));
        assert_eq!(file_type, FileType::Image);

        let data_url = file_to_data_url(&dir.path().join(&rel_path)).unwrap();
        assert_eq!(data_url, "data:image/png;base64,aGk=");
    }

    #[test]
    fn annotations_sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("diagram.png");
        assert!(load_annotations(&image).is_empty());

        let entries = vec![json!({"id": "abcd1234", "type": "question", "x": 10, "y": 20})];
        save_annotations(&image, &entries).unwrap();
        assert_eq!(
            annotations_path(&image),
            dir.path().join("diagram.annotations.json")
        );
        assert_eq!(load_annotations(&image), entries);
    }
}
