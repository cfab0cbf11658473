//! DAB+ audio super frame processor.
//!
//! A super frame spans five logical frames of the subchannel. The first
//! frame opens with a firecode protected header describing the audio
//! configuration; the whole super frame is covered by a column interleaved
//! RS(120,110) outer code and carries a table of access unit start
//! pointers, each access unit trailing its own CRC.

use log::{debug, warn};

use crate::algorithms::crc16::validate_block;
use crate::algorithms::firecode_checker::FirecodeChecker;
use crate::algorithms::reed_solomon_decoder::{
    ReedSolomonDecoder, NB_SUPERFRAME_RS_CODEWORD_BYTES, NB_SUPERFRAME_RS_PARITY_BYTES,
};

/// Logical frames per super frame.
pub const NB_FRAMES_PER_SUPERFRAME: usize = 5;
/// Data bytes of one RS codeword column.
const NB_RS_DATA_BYTES: usize = NB_SUPERFRAME_RS_CODEWORD_BYTES - NB_SUPERFRAME_RS_PARITY_BYTES;

/// Audio configuration announced by the super frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperFrameHeader {
    pub sampling_rate: u32,
    pub is_sbr: bool,
    pub is_stereo: bool,
    pub is_ps: bool,
    pub mpeg_surround_config: u8,
    pub nb_aus: usize,
}

type SuperFrameBeginCallback = Box<dyn FnMut() + Send>;
type SuperFrameHeaderCallback = Box<dyn FnMut(SuperFrameHeader) + Send>;
type AccessUnitCallback = Box<dyn FnMut(usize, usize, &[u8]) + Send>;
type FirecodeErrorCallback = Box<dyn FnMut(usize) + Send>;
type RsErrorCallback = Box<dyn FnMut(usize, usize) + Send>;
type AccessUnitCrcErrorCallback = Box<dyn FnMut(usize, usize, u16, u16) + Send>;

pub struct AacFrameProcessor {
    firecode: FirecodeChecker,
    rs_decoder: ReedSolomonDecoder,
    superframe_buffer: Vec<u8>,
    rs_codeword: [u8; NB_SUPERFRAME_RS_CODEWORD_BYTES],
    curr_frame: usize,
    nb_frame_bytes: usize,
    nb_desync_frames: usize,
    prev_header: Option<SuperFrameHeader>,
    superframe_begin_callbacks: Vec<SuperFrameBeginCallback>,
    superframe_header_callbacks: Vec<SuperFrameHeaderCallback>,
    access_unit_callbacks: Vec<AccessUnitCallback>,
    firecode_error_callbacks: Vec<FirecodeErrorCallback>,
    rs_error_callbacks: Vec<RsErrorCallback>,
    access_unit_crc_error_callbacks: Vec<AccessUnitCrcErrorCallback>,
}

impl Default for AacFrameProcessor {
    fn default() -> Self {
        Self {
            firecode: FirecodeChecker::new(),
            rs_decoder: ReedSolomonDecoder::new(NB_SUPERFRAME_RS_PARITY_BYTES),
            superframe_buffer: Vec::new(),
            rs_codeword: [0u8; NB_SUPERFRAME_RS_CODEWORD_BYTES],
            curr_frame: 0,
            nb_frame_bytes: 0,
            nb_desync_frames: 0,
            prev_header: None,
            superframe_begin_callbacks: Vec::new(),
            superframe_header_callbacks: Vec::new(),
            access_unit_callbacks: Vec::new(),
            firecode_error_callbacks: Vec::new(),
            rs_error_callbacks: Vec::new(),
            access_unit_crc_error_callbacks: Vec::new(),
        }
    }
}

impl AacFrameProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires once per collected super frame before any of its error events.
    /// Stale error indicators are cleared here so they track the current
    /// super frame only.
    pub fn subscribe_superframe_begin(&mut self, callback: impl FnMut() + Send + 'static) {
        self.superframe_begin_callbacks.push(Box::new(callback));
    }

    /// Fires on the first valid header and again whenever it changes.
    pub fn subscribe_superframe_header(&mut self, callback: impl FnMut(SuperFrameHeader) + Send + 'static) {
        self.superframe_header_callbacks.push(Box::new(callback));
    }

    /// Fires for every access unit as (au_index, nb_aus, payload).
    pub fn subscribe_access_unit(&mut self, callback: impl FnMut(usize, usize, &[u8]) + Send + 'static) {
        self.access_unit_callbacks.push(Box::new(callback));
    }

    /// Fires with the number of frames skipped while hunting for alignment.
    pub fn subscribe_firecode_error(&mut self, callback: impl FnMut(usize) + Send + 'static) {
        self.firecode_error_callbacks.push(Box::new(callback));
    }

    /// Fires as (codeword_index, nb_codewords) for uncorrectable columns.
    pub fn subscribe_rs_error(&mut self, callback: impl FnMut(usize, usize) + Send + 'static) {
        self.rs_error_callbacks.push(Box::new(callback));
    }

    /// Fires as (au_index, nb_aus, crc_received, crc_calculated).
    pub fn subscribe_access_unit_crc_error(&mut self, callback: impl FnMut(usize, usize, u16, u16) + Send + 'static) {
        self.access_unit_crc_error_callbacks.push(Box::new(callback));
    }

    /// Consumes one logical frame of decoded subchannel bytes.
    pub fn process_frame(&mut self, buf: &[u8]) {
        if self.nb_frame_bytes != buf.len() {
            // Subchannel geometry settled or changed: restart alignment
            self.nb_frame_bytes = buf.len();
            self.superframe_buffer.clear();
            self.superframe_buffer.resize(buf.len()*NB_FRAMES_PER_SUPERFRAME, 0);
            self.curr_frame = 0;
        }

        // The super frame can only begin on a logical frame boundary, so
        // alignment is a hunt for the frame whose start passes the firecode.
        if self.curr_frame == 0 && !self.firecode.check(buf) {
            self.nb_desync_frames += 1;
            for callback in self.firecode_error_callbacks.iter_mut() {
                callback(self.nb_desync_frames);
            }
            return;
        }

        let frame_offset = self.curr_frame*self.nb_frame_bytes;
        self.superframe_buffer[frame_offset..frame_offset + buf.len()].copy_from_slice(buf);
        self.curr_frame += 1;

        if self.curr_frame == NB_FRAMES_PER_SUPERFRAME {
            self.nb_desync_frames = 0;
            self.curr_frame = 0;
            self.process_superframe();
        }
    }

    fn process_superframe(&mut self) {
        for callback in self.superframe_begin_callbacks.iter_mut() {
            callback();
        }

        // Byte j of codeword i sits at j*SI + i
        let nb_codewords = self.superframe_buffer.len()/NB_SUPERFRAME_RS_CODEWORD_BYTES;
        for codeword_index in 0..nb_codewords {
            for byte_index in 0..NB_SUPERFRAME_RS_CODEWORD_BYTES {
                self.rs_codeword[byte_index] = self.superframe_buffer[byte_index*nb_codewords + codeword_index];
            }
            match self.rs_decoder.correct(&mut self.rs_codeword) {
                Ok(nb_corrected) => {
                    if nb_corrected > 0 {
                        for byte_index in 0..NB_RS_DATA_BYTES {
                            self.superframe_buffer[byte_index*nb_codewords + codeword_index] = self.rs_codeword[byte_index];
                        }
                    }
                },
                // Uncorrectable columns are forwarded as received
                Err(()) => {
                    for callback in self.rs_error_callbacks.iter_mut() {
                        callback(codeword_index, nb_codewords);
                    }
                },
            }
        }

        let nb_data_bytes = nb_codewords*NB_RS_DATA_BYTES;
        if !self.firecode.check(&self.superframe_buffer) {
            // Correction failed to restore the header: resynchronise
            warn!("super frame header failed the firecode after correction");
            return;
        }

        let header = Self::parse_superframe_header(&self.superframe_buffer);
        if self.prev_header != Some(header) {
            self.prev_header = Some(header);
            for callback in self.superframe_header_callbacks.iter_mut() {
                callback(header);
            }
        }

        self.process_access_units(header, nb_data_bytes);
    }

    fn parse_superframe_header(buf: &[u8]) -> SuperFrameHeader {
        let descriptor = buf[2];
        let dac_rate = (descriptor & 0b01000000) != 0;
        let is_sbr = (descriptor & 0b00100000) != 0;
        let is_stereo = (descriptor & 0b00010000) != 0;
        let is_ps = (descriptor & 0b00001000) != 0;
        let mpeg_surround_config = descriptor & 0b00000111;

        let nb_aus = match (dac_rate, is_sbr) {
            (false, true) => 2,
            (true, true) => 3,
            (false, false) => 4,
            (true, false) => 6,
        };
        let sampling_rate = match dac_rate {
            true => 48_000,
            false => 32_000,
        };

        SuperFrameHeader {
            sampling_rate,
            is_sbr,
            is_stereo,
            is_ps,
            mpeg_surround_config,
            nb_aus,
        }
    }

    /// Number of bytes in the header: firecode, descriptor and the packed
    /// 12 bit access unit start table padded to a byte boundary.
    fn get_nb_header_bytes(nb_aus: usize) -> usize {
        3 + (12*(nb_aus - 1)).div_ceil(8)
    }

    fn process_access_units(&mut self, header: SuperFrameHeader, nb_data_bytes: usize) {
        let nb_aus = header.nb_aus;
        let nb_header_bytes = Self::get_nb_header_bytes(nb_aus);

        // Start pointer table: the first access unit begins at the header
        // boundary, the rest are 12 bit fields starting at byte 3.
        let mut au_starts = Vec::with_capacity(nb_aus + 1);
        au_starts.push(nb_header_bytes);
        for entry_index in 0..nb_aus - 1 {
            let bit_offset = 24 + entry_index*12;
            let byte_index = bit_offset/8;
            let value = match bit_offset % 8 {
                0 => ((self.superframe_buffer[byte_index] as usize) << 4)
                    | (self.superframe_buffer[byte_index + 1] >> 4) as usize,
                _ => (((self.superframe_buffer[byte_index] & 0x0F) as usize) << 8)
                    | self.superframe_buffer[byte_index + 1] as usize,
            };
            au_starts.push(value);
        }
        au_starts.push(nb_data_bytes);

        // Alignment check: the table must be strictly increasing and in range
        for window in au_starts.windows(2) {
            if window[0] + 2 > window[1] || window[1] > nb_data_bytes {
                warn!("access unit table is inconsistent: {:?}", au_starts);
                return;
            }
        }

        for au_index in 0..nb_aus {
            let au_buf = &self.superframe_buffer[au_starts[au_index]..au_starts[au_index + 1]];
            let payload = &au_buf[..au_buf.len() - 2];
            if !validate_block(au_buf) {
                let crc_received = u16::from_be_bytes([au_buf[au_buf.len() - 2], au_buf[au_buf.len() - 1]]);
                let crc_calculated = crate::algorithms::crc16::calculate_crc16(payload);
                debug!("au {}/{} crc mismatch {:04X}/{:04X}", au_index, nb_aus, crc_received, crc_calculated);
                for callback in self.access_unit_crc_error_callbacks.iter_mut() {
                    callback(au_index, nb_aus, crc_received, crc_calculated);
                }
            }
            // Forwarded regardless of the CRC outcome with the flag raised
            for callback in self.access_unit_callbacks.iter_mut() {
                callback(au_index, nb_aus, payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::crc16::append_crc16;
    use reed_solomon::Encoder;
    use std::sync::{Arc, Mutex};

    /// Builds a valid 120 byte super frame (one RS codeword, 8 kbit/s
    /// subchannel geometry) with 48kHz SBR stereo audio and three AUs.
    fn build_superframe(au_payloads: &[&[u8]; 3]) -> Vec<u8> {
        let firecode = FirecodeChecker::new();
        let nb_data_bytes = 110;
        let mut data = vec![0u8; nb_data_bytes];

        // dac_rate=1 sbr=1 stereo=1 ps=0
        data[2] = 0b01110000;

        let nb_header_bytes = AacFrameProcessor::get_nb_header_bytes(3);
        assert_eq!(nb_header_bytes, 6);
        let mut au_bufs: Vec<Vec<u8>> = Vec::new();
        for payload in au_payloads {
            let mut au = payload.to_vec();
            append_crc16(&mut au);
            au_bufs.push(au);
        }
        let au_start_1 = nb_header_bytes + au_bufs[0].len();
        let au_start_2 = au_start_1 + au_bufs[1].len();
        let total = au_start_2 + au_bufs[2].len();
        assert!(total <= nb_data_bytes, "Test access units overflow the super frame");

        // Pack the two 12 bit start pointers
        data[3] = (au_start_1 >> 4) as u8;
        data[4] = (((au_start_1 & 0x0F) << 4) | (au_start_2 >> 8)) as u8;
        data[5] = (au_start_2 & 0xFF) as u8;

        let mut offset = nb_header_bytes;
        for au in &au_bufs {
            data[offset..offset + au.len()].copy_from_slice(au);
            offset += au.len();
        }

        // The last access unit runs to the end of the data area, so pad the
        // tail of the final payload instead of leaving dead bytes.
        let tail_padding = nb_data_bytes - total;
        if tail_padding > 0 {
            // Rebuild the last AU spanning to the end
            let mut last_payload = au_payloads[2].to_vec();
            last_payload.resize(au_payloads[2].len() + tail_padding, 0x00);
            let mut last_au = last_payload;
            append_crc16(&mut last_au);
            data.truncate(au_start_2);
            data.extend_from_slice(&last_au);
        }

        // Firecode over the nine bytes following the parity word
        let parity = firecode.compute(&data[2..11]);
        data[0..2].copy_from_slice(&parity.to_be_bytes());

        // Outer RS(120,110) code
        let encoder = Encoder::new(NB_SUPERFRAME_RS_PARITY_BYTES);
        encoder.encode(&data).to_vec()
    }

    fn feed_in_frames(processor: &mut AacFrameProcessor, superframe: &[u8]) {
        for frame in superframe.chunks_exact(superframe.len()/NB_FRAMES_PER_SUPERFRAME) {
            processor.process_frame(frame);
        }
    }

    #[test]
    fn superframe_emits_header_and_access_units() {
        let mut processor = AacFrameProcessor::new();
        let headers = Arc::new(Mutex::new(Vec::new()));
        let access_units = Arc::new(Mutex::new(Vec::new()));
        processor.subscribe_superframe_header({
            let headers = headers.clone();
            move |header| headers.lock().unwrap().push(header)
        });
        processor.subscribe_access_unit({
            let access_units = access_units.clone();
            move |au_index, nb_aus, buf| access_units.lock().unwrap().push((au_index, nb_aus, buf.to_vec()))
        });

        let superframe = build_superframe(&[b"first-au-payload", b"second-au-payload", b"third"]);
        feed_in_frames(&mut processor, &superframe);

        let headers = headers.lock().unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0], SuperFrameHeader {
            sampling_rate: 48_000,
            is_sbr: true,
            is_stereo: true,
            is_ps: false,
            mpeg_surround_config: 0,
            nb_aus: 3,
        });

        let access_units = access_units.lock().unwrap();
        assert_eq!(access_units.len(), 3);
        for (au_index, (index, nb_aus, _)) in access_units.iter().enumerate() {
            assert_eq!(*index, au_index);
            assert_eq!(*nb_aus, 3);
        }
        assert_eq!(access_units[0].2, b"first-au-payload");
        assert_eq!(access_units[1].2, b"second-au-payload");
    }

    #[test]
    fn identical_headers_are_published_once() {
        let mut processor = AacFrameProcessor::new();
        let headers = Arc::new(Mutex::new(Vec::new()));
        processor.subscribe_superframe_header({
            let headers = headers.clone();
            move |header| headers.lock().unwrap().push(header)
        });

        let superframe = build_superframe(&[b"a", b"b", b"c"]);
        feed_in_frames(&mut processor, &superframe);
        feed_in_frames(&mut processor, &superframe);
        assert_eq!(headers.lock().unwrap().len(), 1);
    }

    #[test]
    fn misaligned_frames_raise_firecode_errors_until_lock() {
        let mut processor = AacFrameProcessor::new();
        let firecode_errors = Arc::new(Mutex::new(0usize));
        let access_units = Arc::new(Mutex::new(0usize));
        processor.subscribe_firecode_error({
            let firecode_errors = firecode_errors.clone();
            move |_| *firecode_errors.lock().unwrap() += 1
        });
        processor.subscribe_access_unit({
            let access_units = access_units.clone();
            move |_, _, _| *access_units.lock().unwrap() += 1
        });

        let superframe = build_superframe(&[b"a", b"b", b"c"]);
        let nb_frame_bytes = superframe.len()/NB_FRAMES_PER_SUPERFRAME;

        // Offset the stream by two logical frames
        processor.process_frame(&superframe[3*nb_frame_bytes..4*nb_frame_bytes]);
        processor.process_frame(&superframe[4*nb_frame_bytes..]);
        assert_eq!(*firecode_errors.lock().unwrap(), 2);

        // Now aligned: the full super frame decodes
        feed_in_frames(&mut processor, &superframe);
        assert_eq!(*access_units.lock().unwrap(), 3);
    }

    #[test]
    fn corrupted_access_unit_is_flagged_and_still_forwarded() {
        let mut processor = AacFrameProcessor::new();
        let crc_errors = Arc::new(Mutex::new(Vec::new()));
        let access_units = Arc::new(Mutex::new(0usize));
        processor.subscribe_access_unit_crc_error({
            let crc_errors = crc_errors.clone();
            move |au_index, _, _, _| crc_errors.lock().unwrap().push(au_index)
        });
        processor.subscribe_access_unit({
            let access_units = access_units.clone();
            move |_, _, _| *access_units.lock().unwrap() += 1
        });

        let mut superframe = build_superframe(&[b"first-au-payload", b"second-au-payload", b"third"]);
        // Corrupt more bytes of the first access unit than the outer code
        // can repair, leaving the firecode protected header intact. The CRC
        // fails but the unit is still delivered.
        for byte in superframe.iter_mut().skip(12).take(12) {
            *byte ^= 0x55;
        }
        feed_in_frames(&mut processor, &superframe);

        assert_eq!(*access_units.lock().unwrap(), 3);
        assert_eq!(crc_errors.lock().unwrap().as_slice(), &[0]);
    }
}
