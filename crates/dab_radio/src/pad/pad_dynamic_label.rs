//! Dynamic label reassembly.
//!
//! Labels travel as up to eight segments of at most sixteen characters.
//! Segments are themselves fragmented across X-PAD subfields, each segment
//! carrying its own CRC. A toggle bit distinguishes consecutive labels so a
//! retuned receiver never stitches halves of different texts together.

use log::{debug, warn};

use crate::algorithms::crc16::validate_block;
use crate::constants::charsets::convert_label_to_utf8;

/// Maximum number of segments in one label.
const NB_MAX_SEGMENTS: usize = 8;
/// Clear display command code.
const COMMAND_CLEAR: u8 = 0b0001;

type LabelCallback = Box<dyn FnMut(&str, u8) + Send>;

#[derive(Default)]
pub struct PadDynamicLabel {
    fragment_buffer: Vec<u8>,
    segments: [Option<Vec<u8>>; NB_MAX_SEGMENTS],
    total_segments: Option<usize>,
    toggle_flag: Option<bool>,
    charset: u8,
    label_callbacks: Vec<LabelCallback>,
}

impl PadDynamicLabel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires with the completed label text and its announced charset.
    pub fn subscribe_label(&mut self, callback: impl FnMut(&str, u8) + Send + 'static) {
        self.label_callbacks.push(Box::new(callback));
    }

    /// Consumes one X-PAD subfield carrying a label segment fragment.
    pub fn process_fragment(&mut self, is_segment_start: bool, buf: &[u8]) {
        if is_segment_start {
            self.fragment_buffer.clear();
        } else if self.fragment_buffer.is_empty() {
            // Continuation without a start: the head of this segment was lost
            return;
        }
        self.fragment_buffer.extend_from_slice(buf);
        self.try_process_segment();
    }

    fn try_process_segment(&mut self) {
        if self.fragment_buffer.len() < 2 {
            return;
        }
        let prefix = self.fragment_buffer[0];
        let is_command = (prefix & 0b00010000) != 0;
        let nb_segment_bytes = match is_command {
            // Prefix and CRC only
            true => 4,
            false => {
                let nb_text_bytes = (prefix & 0b00001111) as usize + 1;
                2 + nb_text_bytes + 2
            },
        };
        if self.fragment_buffer.len() < nb_segment_bytes {
            return;
        }

        let segment = self.fragment_buffer[..nb_segment_bytes].to_vec();
        self.fragment_buffer.clear();
        if !validate_block(&segment) {
            debug!("dynamic label segment dropped on crc mismatch");
            return;
        }
        self.process_segment(&segment);
    }

    fn process_segment(&mut self, segment: &[u8]) {
        let prefix = segment[0];
        let toggle_flag = (prefix & 0b10000000) != 0;
        let is_first = (prefix & 0b01000000) != 0;
        let is_last = (prefix & 0b00100000) != 0;
        let is_command = (prefix & 0b00010000) != 0;

        // A toggled label is a different text: restart assembly
        if self.toggle_flag != Some(toggle_flag) {
            self.toggle_flag = Some(toggle_flag);
            self.segments = Default::default();
            self.total_segments = None;
        }

        if is_command {
            let command = prefix & 0b00001111;
            if command == COMMAND_CLEAR {
                self.segments = Default::default();
                self.total_segments = None;
                for callback in self.label_callbacks.iter_mut() {
                    callback("", self.charset);
                }
            } else {
                debug!("dynamic label command {} skipped", command);
            }
            return;
        }

        let segment_index = match is_first {
            true => {
                self.charset = segment[1] >> 4;
                0
            },
            false => ((segment[1] >> 4) & 0b0111) as usize,
        };
        if segment_index >= NB_MAX_SEGMENTS {
            warn!("dynamic label segment index {} out of range", segment_index);
            return;
        }

        let text = &segment[2..segment.len() - 2];
        self.segments[segment_index] = Some(text.to_vec());
        if is_last {
            self.total_segments = Some(segment_index + 1);
        }
        self.try_complete_label();
    }

    fn try_complete_label(&mut self) {
        let Some(total_segments) = self.total_segments else {
            return;
        };
        if !self.segments[..total_segments].iter().all(|segment| segment.is_some()) {
            return;
        }

        let mut label_bytes = Vec::new();
        for segment in self.segments[..total_segments].iter().flatten() {
            label_bytes.extend_from_slice(segment);
        }
        let label = convert_label_to_utf8(self.charset, &label_bytes);
        for callback in self.label_callbacks.iter_mut() {
            callback(&label, self.charset);
        }

        // The finished label stays stored; carousel repeats converge here
        // and notify again only after a toggle.
        self.segments = Default::default();
        self.total_segments = None;
    }
}

/// Builds label segments for tests and reference tooling: the prefix pair,
/// the text and the segment CRC.
pub fn build_label_segment(toggle_flag: bool, is_first: bool, is_last: bool, segment_index: usize, charset: u8, text: &[u8]) -> Vec<u8> {
    assert!(!text.is_empty() && text.len() <= 16);
    let mut segment = Vec::new();
    let mut prefix = ((toggle_flag as u8) << 7) | ((is_first as u8) << 6) | ((is_last as u8) << 5);
    prefix |= (text.len() - 1) as u8;
    segment.push(prefix);
    segment.push(match is_first {
        true => charset << 4,
        false => (segment_index as u8) << 4,
    });
    segment.extend_from_slice(text);
    crate::algorithms::crc16::append_crc16(&mut segment);
    segment
}
