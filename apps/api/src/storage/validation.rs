use crate::errors::AppError;

const PDF_MAGIC: &[u8] = b"%PDF-";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Server-side checks applied to every uploaded file before it is stored.
pub fn validate_pdf(
    file_name: &str,
    content_type: Option<&str>,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<(), AppError> {
    if file_name.trim().is_empty() {
        return Err(AppError::Validation("file name is required".to_string()));
    }
    if !file_name.to_ascii_lowercase().ends_with(".pdf") {
        return Err(AppError::Validation(format!(
            "'{file_name}' is not a PDF file"
        )));
    }
    if let Some(ct) = content_type {
        let essence = ct.split(';').next().unwrap_or("").trim();
        if !essence.eq_ignore_ascii_case(PDF_CONTENT_TYPE) {
            return Err(AppError::Validation(format!(
                "content type must be {PDF_CONTENT_TYPE}, got '{ct}'"
            )));
        }
    }
    if bytes.is_empty() {
        return Err(AppError::Validation("file is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "file is {} bytes, the limit is {max_bytes}",
            bytes.len()
        )));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(AppError::Validation(
            "file content is not a PDF document".to_string(),
        ));
    }
    Ok(())
}
