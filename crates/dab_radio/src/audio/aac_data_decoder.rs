//! Extracts programme associated data from AAC access units.
//!
//! Each DAB+ access unit opens with a data_stream_element whose payload is
//! the PAD field. The raw AAC bitstream itself goes to the external audio
//! decoder; only the DSE is unpacked here.

use log::debug;

use crate::pad::pad_processor::PadProcessor;

/// Syntactic element id of a data_stream_element.
const ID_DATA_STREAM_ELEMENT: u8 = 0b100;

#[derive(Default)]
pub struct AacDataDecoder {
    pad_processor: PadProcessor,
}

impl AacDataDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_pad_processor_mut(&mut self) -> &mut PadProcessor {
        &mut self.pad_processor
    }

    /// Unpacks the leading DSE of an access unit and feeds its PAD field to
    /// the PAD processor. Returns false when the unit carries no PAD.
    pub fn process_access_unit(&mut self, buf: &[u8]) -> bool {
        if buf.len() < 2 {
            return false;
        }
        // [id:3 | element_instance_tag:4 | data_byte_align_flag:1] [count:8]
        let element_id = buf[0] >> 5;
        if element_id != ID_DATA_STREAM_ELEMENT {
            return false;
        }

        let mut nb_pad_bytes = buf[1] as usize;
        let mut pad_offset = 2;
        if nb_pad_bytes == 255 {
            if buf.len() < 3 {
                return false;
            }
            nb_pad_bytes += buf[2] as usize;
            pad_offset = 3;
        }
        if buf.len() < pad_offset + nb_pad_bytes {
            debug!("data stream element announces {} PAD bytes but only {} remain", nb_pad_bytes, buf.len() - pad_offset);
            return false;
        }

        self.pad_processor.process_pad(&buf[pad_offset..pad_offset + nb_pad_bytes]);
        true
    }
}

/// Wraps a PAD field into a data stream element for tests and reference
/// tooling, prefixing the AU as a DAB+ encoder would.
pub fn build_data_stream_element(pad: &[u8]) -> Vec<u8> {
    let mut element = Vec::new();
    element.push(ID_DATA_STREAM_ELEMENT << 5);
    if pad.len() < 255 {
        element.push(pad.len() as u8);
    } else {
        element.push(255);
        element.push((pad.len() - 255) as u8);
    }
    element.extend_from_slice(pad);
    element
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::pad_dynamic_label::build_label_segment;
    use crate::pad::pad_processor::{build_pad_field, XPAD_APP_LABEL_START};
    use std::sync::{Arc, Mutex};

    #[test]
    fn label_travels_from_access_unit_to_callback() {
        let mut decoder = AacDataDecoder::new();
        let labels = Arc::new(Mutex::new(Vec::new()));
        decoder
            .get_pad_processor_mut()
            .get_dynamic_label_mut()
            .subscribe_label({
                let labels = labels.clone();
                move |label, _| labels.lock().unwrap().push(label.to_string())
            });

        let segment = build_label_segment(false, true, true, 0, 0, b"From the AU");
        let pad = build_pad_field(&[(XPAD_APP_LABEL_START, &segment)]);
        let mut access_unit = build_data_stream_element(&pad);
        // Audio payload follows the DSE
        access_unit.extend_from_slice(&[0x21, 0x43, 0x65]);

        assert!(decoder.process_access_unit(&access_unit));
        assert_eq!(labels.lock().unwrap().as_slice(), &["From the AU".to_string()]);
    }

    #[test]
    fn units_without_a_dse_are_skipped() {
        let mut decoder = AacDataDecoder::new();
        assert!(!decoder.process_access_unit(&[0x21, 0x43, 0x65, 0x87]));
        assert!(!decoder.process_access_unit(&[]));
    }

    #[test]
    fn truncated_dse_is_rejected() {
        let mut decoder = AacDataDecoder::new();
        let element = [ID_DATA_STREAM_ELEMENT << 5, 200];
        assert!(!decoder.process_access_unit(&element));
    }
}
