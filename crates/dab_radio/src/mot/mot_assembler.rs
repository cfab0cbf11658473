//! Assembles one direction of a MOT object from data group segments.
//!
//! Segments can arrive in any order and are stored where they land in an
//! unordered buffer; the ordered object is reconstructed by walking the
//! segment table once every index in [0, N) has been received.

use log::warn;

#[derive(Debug, Default, Clone, Copy)]
struct Segment {
    unordered_index: usize,
    length: usize,
    is_received: bool,
}

#[derive(Debug, Default)]
pub struct MotAssembler {
    unordered_buffer: Vec<u8>,
    segments: Vec<Segment>,
    total_segments: Option<usize>,
}

impl MotAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.unordered_buffer.clear();
        self.segments.clear();
        self.total_segments = None;
    }

    /// Driven by the last segment indicator of the data group header.
    pub fn set_total_segments(&mut self, total_segments: usize) {
        if let Some(previous) = self.total_segments {
            if previous != total_segments {
                warn!("total segments changed from {} to {}, restarting assembly", previous, total_segments);
                self.reset();
            }
        }
        self.total_segments = Some(total_segments);
        if self.segments.len() < total_segments {
            self.segments.resize(total_segments, Segment::default());
        }
    }

    /// Stores a segment at the next free position of the unordered buffer.
    /// Returns false when the segment conflicts with one already received.
    pub fn add_segment(&mut self, segment_index: usize, buf: &[u8]) -> bool {
        if self.segments.len() <= segment_index {
            self.segments.resize(segment_index + 1, Segment::default());
        }

        let segment = &mut self.segments[segment_index];
        if segment.is_received {
            if segment.length != buf.len() {
                warn!("segment {} resent with length {} instead of {}", segment_index, buf.len(), segment.length);
                return false;
            }
            // Carousel repetition of a segment we already hold
            return true;
        }

        segment.unordered_index = self.unordered_buffer.len();
        segment.length = buf.len();
        segment.is_received = true;
        self.unordered_buffer.extend_from_slice(buf);
        true
    }

    /// True when every segment in [0, N) has been received.
    pub fn check_complete(&self) -> bool {
        match self.total_segments {
            Some(total_segments) => {
                self.segments.len() >= total_segments
                    && self.segments[..total_segments].iter().all(|segment| segment.is_received)
            },
            None => false,
        }
    }

    /// Reconstructs the ordered buffer by copying segments in index order.
    pub fn get_data(&self) -> Vec<u8> {
        let total_segments = self.total_segments.unwrap_or(0);
        let mut ordered_buffer = Vec::with_capacity(self.unordered_buffer.len());
        for segment in &self.segments[..total_segments] {
            let start = segment.unordered_index;
            ordered_buffer.extend_from_slice(&self.unordered_buffer[start..start + segment.length]);
        }
        ordered_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_segments_reconstruct_in_index_order() {
        let mut assembler = MotAssembler::new();
        assembler.set_total_segments(3);
        assert!(assembler.add_segment(2, b"C"));
        assert!(!assembler.check_complete());
        assert!(assembler.add_segment(0, b"A"));
        assert!(assembler.add_segment(1, b"B"));
        assert!(assembler.check_complete());
        assert_eq!(assembler.get_data(), b"ABC");
    }

    #[test]
    fn every_arrival_order_yields_identical_data() {
        let segments: [&[u8]; 4] = [b"alpha", b"beta", b"gamma", b"delta"];
        let orders: [[usize; 4]; 4] = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [2, 0, 3, 1],
            [1, 3, 0, 2],
        ];
        let mut outputs = Vec::new();
        for order in orders {
            let mut assembler = MotAssembler::new();
            assembler.set_total_segments(4);
            for index in order {
                assert!(assembler.add_segment(index, segments[index]));
            }
            assert!(assembler.check_complete());
            outputs.push(assembler.get_data());
        }
        for output in &outputs {
            assert_eq!(output, &outputs[0]);
            assert_eq!(output.as_slice(), b"alphabetagammadelta");
        }
    }

    #[test]
    fn repeated_segment_from_the_carousel_is_accepted() {
        let mut assembler = MotAssembler::new();
        assembler.set_total_segments(2);
        assert!(assembler.add_segment(0, b"same"));
        assert!(assembler.add_segment(0, b"same"));
        assert!(!assembler.add_segment(0, b"different!"));
        assert!(assembler.add_segment(1, b"tail"));
        assert_eq!(assembler.get_data(), b"sametail");
    }

    #[test]
    fn total_can_arrive_after_the_segments() {
        let mut assembler = MotAssembler::new();
        assert!(assembler.add_segment(1, b"B"));
        assert!(assembler.add_segment(0, b"A"));
        assert!(!assembler.check_complete());
        assembler.set_total_segments(2);
        assert!(assembler.check_complete());
        assert_eq!(assembler.get_data(), b"AB");
    }
}
