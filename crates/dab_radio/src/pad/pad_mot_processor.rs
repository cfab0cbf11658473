//! MOT data group reconstruction from the X-PAD slideshow channel.
//!
//! A data group length indicator announces how many bytes the next group
//! occupies, the next start subfield begins the group and continuation
//! subfields concatenate until the announced length is reached. The
//! completed group is decoded as an MSC data group and its segment handed
//! to the MOT engine.

use log::debug;

use crate::mot::mot_processor::MotProcessor;
use crate::pad::pad_data_group::{parse_msc_data_group, PadDataGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitLength,
    WaitStart,
    ReadData,
}

pub struct PadMotProcessor {
    state: State,
    data_group: PadDataGroup,
    mot_processor: MotProcessor,
}

impl Default for PadMotProcessor {
    fn default() -> Self {
        Self {
            state: State::WaitLength,
            data_group: PadDataGroup::default(),
            mot_processor: MotProcessor::new(),
        }
    }
}

impl PadMotProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_mot_processor_mut(&mut self) -> &mut MotProcessor {
        &mut self.mot_processor
    }

    /// Driven by the data group length indicator subfield.
    pub fn set_group_length(&mut self, length: usize) {
        match self.state {
            State::WaitLength => {
                self.data_group.reset();
                self.data_group.set_required_length(length);
                self.state = State::WaitStart;
            },
            State::WaitStart => {
                // Repeated indicator: take the most recent announcement
                self.data_group.set_required_length(length);
            },
            State::ReadData => {
                debug!("length indicator interrupted a data group, dropping it");
                self.data_group.reset();
                self.data_group.set_required_length(length);
                self.state = State::WaitStart;
            },
        }
    }

    /// Consumes one MOT X-PAD subfield.
    pub fn process_xpad(&mut self, is_start: bool, buf: &[u8]) {
        match self.state {
            State::WaitLength => {
                // Cannot size the group yet; wait for the next indicator
            },
            State::WaitStart => {
                if is_start {
                    self.data_group.consume(buf);
                    self.state = State::ReadData;
                    self.try_interpret();
                }
            },
            State::ReadData => {
                if is_start {
                    debug!("data group restarted before completion");
                    let required_length = self.data_group.get_required_length();
                    self.data_group.reset();
                    self.data_group.set_required_length(required_length);
                }
                self.data_group.consume(buf);
                self.try_interpret();
            },
        }
    }

    fn try_interpret(&mut self) {
        if !self.data_group.is_complete() {
            return;
        }
        if let Some((header, payload)) = parse_msc_data_group(self.data_group.get_buffer()) {
            match header.transport_id {
                Some(transport_id) => {
                    self.mot_processor.process_segment(
                        header.data_group_type,
                        transport_id,
                        header.segment_number,
                        header.is_last_segment,
                        payload,
                    );
                },
                None => debug!("data group without a transport id skipped"),
            }
        }
        self.data_group.reset();
        self.state = State::WaitLength;
    }
}
