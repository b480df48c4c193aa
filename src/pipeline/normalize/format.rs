use crate::models::InputFormat;

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Resolve the input format: declared media type first, then the filename
/// extension, then magic bytes. None = unsupported.
pub fn resolve_format(media_type: &str, filename: &str, bytes: &[u8]) -> Option<InputFormat> {
    from_media_type(media_type)
        .or_else(|| from_extension(filename))
        .or_else(|| from_magic_bytes(bytes))
}

fn from_media_type(media_type: &str) -> Option<InputFormat> {
    // Strip parameters such as "; charset=utf-8"
    let essence = media_type.split(';').next().unwrap_or("").trim();
    match essence {
        "application/pdf" | "application/x-pdf" => Some(InputFormat::Pdf),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            Some(InputFormat::Docx)
        }
        "text/plain" => Some(InputFormat::Text),
        _ => None,
    }
}

fn from_extension(filename: &str) -> Option<InputFormat> {
    let ext = filename.rsplit_once('.')?.1.to_lowercase();
    match ext.as_str() {
        "pdf" => Some(InputFormat::Pdf),
        "docx" => Some(InputFormat::Docx),
        "txt" | "text" => Some(InputFormat::Text),
        _ => None,
    }
}

fn from_magic_bytes(bytes: &[u8]) -> Option<InputFormat> {
    if bytes.starts_with(PDF_MAGIC) {
        return Some(InputFormat::Pdf);
    }
    // Any zip could be a DOCX; the container check happens during extraction.
    if bytes.starts_with(ZIP_MAGIC) {
        return Some(InputFormat::Docx);
    }
    None
}
