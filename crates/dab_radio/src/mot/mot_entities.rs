//! Multimedia object transfer entities.
//!
//! A MOT object is described by a header (content type, name, timing
//! parameters) and carries an opaque body. Objects are distinguished on the
//! carousel by their 16 bit transport identifier.

use log::debug;

use crate::constants::charsets::convert_label_to_utf8;

pub type MotTransportId = u16;

/// Content types of the header core.
pub const CONTENT_TYPE_GENERAL: u8 = 0;
pub const CONTENT_TYPE_TEXT: u8 = 1;
pub const CONTENT_TYPE_IMAGE: u8 = 2;

/// Image content subtypes.
pub const CONTENT_SUBTYPE_IMAGE_GIF: u16 = 0;
pub const CONTENT_SUBTYPE_IMAGE_JFIF: u16 = 1;
pub const CONTENT_SUBTYPE_IMAGE_BMP: u16 = 2;
pub const CONTENT_SUBTYPE_IMAGE_PNG: u16 = 3;

/// Timestamp parameter in MOT UTC format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotTime {
    pub modified_julian_date: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub milliseconds: u16,
}

#[derive(Debug, Clone, Default)]
pub struct MotHeader {
    pub body_size: u32,
    pub header_size: u16,
    pub content_type: u8,
    pub content_subtype: u16,
    pub content_name: String,
    pub content_name_charset: u8,
    /// Presentation instant; None means present immediately.
    pub trigger_time: Option<MotTime>,
    pub expire_time: Option<MotTime>,
}

#[derive(Debug, Clone)]
pub struct MotEntity {
    pub transport_id: MotTransportId,
    pub header: MotHeader,
    pub body: Vec<u8>,
}

/// Decodes the header core and its extension parameters.
pub fn parse_mot_header(buf: &[u8]) -> Option<MotHeader> {
    let nb_core_bytes = 7;
    if buf.len() < nb_core_bytes {
        return None;
    }

    let body_size = ((buf[0] as u32) << 20)
        | ((buf[1] as u32) << 12)
        | ((buf[2] as u32) << 4)
        | ((buf[3] >> 4) as u32);
    let header_size = (((buf[3] & 0x0F) as u16) << 9)
        | ((buf[4] as u16) << 1)
        | ((buf[5] >> 7) as u16);
    let content_type = (buf[5] >> 1) & 0b00111111;
    let content_subtype = (((buf[5] & 1) as u16) << 8) | buf[6] as u16;

    if (header_size as usize) < nb_core_bytes || (header_size as usize) > buf.len() {
        return None;
    }

    let mut header = MotHeader {
        body_size,
        header_size,
        content_type,
        content_subtype,
        ..MotHeader::default()
    };

    // Extension parameters: [pli:2 | param_id:6] with a length form per pli
    let mut curr_byte = nb_core_bytes;
    let header_end = header_size as usize;
    while curr_byte < header_end {
        let descriptor = buf[curr_byte];
        let pli = descriptor >> 6;
        let param_id = descriptor & 0b00111111;
        curr_byte += 1;

        let nb_data_bytes = match pli {
            0 => 0,
            1 => 1,
            2 => 4,
            _ => {
                if curr_byte >= header_end {
                    return None;
                }
                let length_byte = buf[curr_byte];
                if (length_byte & 0b10000000) != 0 {
                    if curr_byte + 1 >= header_end {
                        return None;
                    }
                    let length = (((length_byte & 0b01111111) as usize) << 8) | buf[curr_byte + 1] as usize;
                    curr_byte += 2;
                    length
                } else {
                    curr_byte += 1;
                    length_byte as usize
                }
            },
        };
        if curr_byte + nb_data_bytes > header_end {
            return None;
        }
        let param_data = &buf[curr_byte..curr_byte + nb_data_bytes];
        curr_byte += nb_data_bytes;

        match param_id {
            // Content name: charset nibble then text
            0x0C => {
                if !param_data.is_empty() {
                    header.content_name_charset = param_data[0] >> 4;
                    header.content_name = convert_label_to_utf8(header.content_name_charset, &param_data[1..]);
                }
            },
            // Trigger time
            0x05 => header.trigger_time = parse_mot_time(param_data),
            // Expire time
            0x04 => header.expire_time = parse_mot_time(param_data),
            param_id => {
                debug!("mot header parameter {:#04X} skipped ({} bytes)", param_id, nb_data_bytes);
            },
        }
    }

    Some(header)
}

/// MOT UTC time: a validity flag, 17 bit MJD and short or long time form.
fn parse_mot_time(buf: &[u8]) -> Option<MotTime> {
    if buf.len() < 4 {
        return None;
    }
    let is_valid = (buf[0] & 0b10000000) != 0;
    if !is_valid {
        // Now: trigger immediately
        return None;
    }

    let modified_julian_date = (((buf[0] & 0b01111111) as u32) << 10)
        | ((buf[1] as u32) << 2)
        | ((buf[2] >> 6) as u32);
    let is_long_form = (buf[2] & 0b00001000) != 0;
    let hours = ((buf[2] & 0b00000111) << 2) | (buf[3] >> 6);
    let minutes = buf[3] & 0b00111111;

    let (seconds, milliseconds) = if is_long_form {
        if buf.len() < 6 {
            return None;
        }
        let seconds = buf[4] >> 2;
        let milliseconds = (((buf[4] & 0b00000011) as u16) << 8) | buf[5] as u16;
        (seconds, milliseconds)
    } else {
        (0, 0)
    };

    Some(MotTime {
        modified_julian_date,
        hours,
        minutes,
        seconds,
        milliseconds,
    })
}

#[cfg(test)]
pub(crate) fn build_mot_header(body_size: u32, content_type: u8, content_subtype: u16, content_name: &str) -> Vec<u8> {
    let mut name_param = vec![0u8];
    name_param.extend_from_slice(content_name.as_bytes());
    let header_size = 7 + 2 + name_param.len();

    let mut header = vec![0u8; 7];
    header[0] = (body_size >> 20) as u8;
    header[1] = (body_size >> 12) as u8;
    header[2] = (body_size >> 4) as u8;
    header[3] = (((body_size & 0x0F) as u8) << 4) | ((header_size >> 9) as u8);
    header[4] = (header_size >> 1) as u8;
    header[5] = (((header_size & 1) as u8) << 7) | (content_type << 1) | ((content_subtype >> 8) as u8);
    header[6] = content_subtype as u8;

    // Content name with a one byte length form
    header.push(0b11000000 | 0x0C);
    header.push(name_param.len() as u8);
    header.extend_from_slice(&name_param);
    header
}
