// src/images.rs

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;

use crate::error::{ChatError, Result};
use crate::ids::generate_image_id;
use crate::types::{ContentBlock, ImageUrl};

/// Decode any supported raster image and re-encode it as a PNG data URI.
pub fn to_png_data_uri(bytes: &[u8]) -> Result<String> {
    let decoded = image::load_from_memory(bytes).map_err(|e| ChatError::Image(e.to_string()))?;
    let mut png = Cursor::new(Vec::new());
    decoded
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| ChatError::Image(e.to_string()))?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner())))
}

/// Payload bytes of a `data:<mime>;base64,` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let payload = uri
        .split_once(";base64,")
        .map(|(_, data)| data)
        .ok_or_else(|| ChatError::Image("not a base64 data URI".to_string()))?;
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ChatError::Image(e.to_string()))
}

/// File name without its last extension.
pub fn display_name(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(dot) => file_name[..dot].to_string(),
        None => file_name.to_string(),
    }
}

pub fn image_block(bytes: &[u8], file_name: &str) -> Result<ContentBlock> {
    Ok(ContentBlock::Image {
        image_url: ImageUrl {
            url: to_png_data_uri(bytes)?,
        },
        id: generate_image_id(),
        name: display_name(file_name),
    })
}

/// Append unless an attachment with the same data is already pending.
pub fn push_unique(pending: &mut Vec<ContentBlock>, block: ContentBlock) -> bool {
    let url = match &block {
        ContentBlock::Image { image_url, .. } => image_url.url.clone(),
        ContentBlock::Text { .. } => return false,
    };
    let duplicate = pending.iter().any(|existing| {
        matches!(existing, ContentBlock::Image { image_url, .. } if image_url.url == url)
    });
    if duplicate {
        tracing::debug!("[images] skipping duplicate attachment");
        return false;
    }
    pending.push(block);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn bmp_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(2, 2, Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Bmp).unwrap();
        out.into_inner()
    }

    #[test]
    fn reencodes_as_png() {
        let uri = to_png_data_uri(&bmp_bytes()).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        let png = decode_data_uri(&uri).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn rejects_non_images() {
        let err = to_png_data_uri(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ChatError::Image(_)));
    }

    #[test]
    fn duplicate_attachments_are_skipped() {
        let mut pending = Vec::new();
        let bytes = bmp_bytes();
        assert!(push_unique(&mut pending, image_block(&bytes, "cat.photo.bmp").unwrap()));
        assert!(!push_unique(&mut pending, image_block(&bytes, "again.bmp").unwrap()));
        assert_eq!(pending.len(), 1);
        match &pending[0] {
            ContentBlock::Image { name, id, .. } => {
                assert_eq!(name, "cat.photo");
                assert!(id.starts_with("img_"));
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn display_name_keeps_dotless_names() {
        assert_eq!(display_name("image"), "image");
        assert_eq!(display_name("a.b.png"), "a.b");
    }
}
