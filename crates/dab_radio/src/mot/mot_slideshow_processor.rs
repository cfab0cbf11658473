//! Upgrades image MOT entities into slideshow objects.
//!
//! Rasterising the image belongs to the host; the slideshow carries the raw
//! JPEG or PNG bytes plus the presentation metadata the UI needs.

use log::debug;

use crate::mot::mot_entities::{
    MotEntity, MotTime, MotTransportId, CONTENT_SUBTYPE_IMAGE_JFIF, CONTENT_SUBTYPE_IMAGE_PNG,
    CONTENT_TYPE_IMAGE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideshowImageFormat {
    Jpeg,
    Png,
}

#[derive(Debug, Clone)]
pub struct BasicSlideshow {
    pub transport_id: MotTransportId,
    pub name: String,
    pub image_format: SlideshowImageFormat,
    pub image_data: Vec<u8>,
    pub trigger_time: Option<MotTime>,
    pub expire_time: Option<MotTime>,
}

#[derive(Default)]
pub struct MotSlideshowProcessor;

impl MotSlideshowProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Returns the slideshow for image entities; other entities are left to
    /// the caller to surface raw.
    pub fn process_mot_entity(&self, entity: &MotEntity) -> Option<BasicSlideshow> {
        if entity.header.content_type != CONTENT_TYPE_IMAGE {
            return None;
        }
        let image_format = match entity.header.content_subtype {
            CONTENT_SUBTYPE_IMAGE_JFIF => SlideshowImageFormat::Jpeg,
            CONTENT_SUBTYPE_IMAGE_PNG => SlideshowImageFormat::Png,
            content_subtype => {
                debug!("image subtype {} is not a slideshow format", content_subtype);
                return None;
            },
        };
        Some(BasicSlideshow {
            transport_id: entity.transport_id,
            name: entity.header.content_name.clone(),
            image_format,
            image_data: entity.body.clone(),
            trigger_time: entity.header.trigger_time,
            expire_time: entity.header.expire_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::mot_entities::{parse_mot_header, build_mot_header, CONTENT_TYPE_TEXT};

    fn build_entity(content_type: u8, content_subtype: u16, name: &str, body: &[u8]) -> MotEntity {
        let header_buf = build_mot_header(body.len() as u32, content_type, content_subtype, name);
        MotEntity {
            transport_id: 7,
            header: parse_mot_header(&header_buf).unwrap(),
            body: body.to_vec(),
        }
    }

    #[test]
    fn jpeg_and_png_entities_become_slideshows() {
        let processor = MotSlideshowProcessor::new();
        let jpeg = build_entity(CONTENT_TYPE_IMAGE, CONTENT_SUBTYPE_IMAGE_JFIF, "now.jpg", b"\xFF\xD8jpeg");
        let png = build_entity(CONTENT_TYPE_IMAGE, CONTENT_SUBTYPE_IMAGE_PNG, "now.png", b"\x89PNGpng");

        let slideshow = processor.process_mot_entity(&jpeg).unwrap();
        assert_eq!(slideshow.image_format, SlideshowImageFormat::Jpeg);
        assert_eq!(slideshow.name, "now.jpg");
        assert_eq!(slideshow.image_data, b"\xFF\xD8jpeg");

        let slideshow = processor.process_mot_entity(&png).unwrap();
        assert_eq!(slideshow.image_format, SlideshowImageFormat::Png);
    }

    #[test]
    fn non_image_entities_are_surfaced_raw() {
        let processor = MotSlideshowProcessor::new();
        let text = build_entity(CONTENT_TYPE_TEXT, 0, "readme.txt", b"hello");
        assert!(processor.process_mot_entity(&text).is_none());
    }
}
