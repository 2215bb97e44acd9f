use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::{error::ScreeningError, models::AnalysisRequest};

/// Decoded RGB image re-encoded as PNG, ready for the vision backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    png: Vec<u8>,
    width: u32,
    height: u32,
}

impl PreparedImage {
    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.png))
    }
}

/// Validate a request before any stage runs
pub fn validate(request: &AnalysisRequest) -> Result<PreparedImage, ScreeningError> {
    if let Some(patient) = &request.patient {
        patient.validate()?;
    }
    prepare_image(&request.image)
}

pub fn prepare_image(bytes: &[u8]) -> Result<PreparedImage, ScreeningError> {
    if bytes.is_empty() {
        return Err(ScreeningError::InvalidInput("no image provided".to_string()));
    }

    let decoded = image::load_from_memory(bytes).map_err(|e| {
        ScreeningError::InvalidInput(format!("image could not be decoded: {}", e))
    })?;

    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut png = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ScreeningError::InvalidInput(format!("image could not be re-encoded: {}", e)))?;

    Ok(PreparedImage {
        png,
        width: rgb.width(),
        height: rgb.height(),
    })
}
