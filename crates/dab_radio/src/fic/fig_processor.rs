//! Fast information group parser.
//!
//! A FIB carries a 30 byte payload scanned as a stream of FIG headers until
//! a 0xFF delimiter, a type 7 end marker or length exhaustion. All bit
//! layout knowledge lives here; semantic values are handed to a FigHandler.
//! Any length overrun aborts the remainder of the FIB as a soft error and
//! the next FIB restarts cleanly.

use log::{debug, warn};

use crate::constants::subchannel_protection_tables::get_uep_profile;
use crate::database::dab_database_entities::{
    EnsembleDateTime, EnsembleIdentifier, ServiceIdentifier, Subchannel, SubchannelProtection,
    TransportMode,
};
use crate::fic::fig_handler::{ComponentGlobalDefinition, FigHandler, LabelEntity};

/// Number of payload bytes in a FIB ahead of its CRC.
pub const NB_FIB_PAYLOAD_BYTES: usize = 30;
/// Number of label text bytes in FIG type 1.
const NB_LABEL_BYTES: usize = 16;

#[derive(Debug, Clone, Copy)]
struct FigHeaderType0 {
    cn: bool,
    oe: bool,
    pd: bool,
}

pub struct FigProcessor;

impl FigProcessor {
    /// Scans one FIB payload and dispatches every FIG to the handler.
    pub fn process_fib(buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        assert!(buf.len() == NB_FIB_PAYLOAD_BYTES, "FIB payload must be {} bytes but got {}", NB_FIB_PAYLOAD_BYTES, buf.len());

        let mut curr_byte = 0;
        while curr_byte < NB_FIB_PAYLOAD_BYTES {
            let nb_remain_bytes = NB_FIB_PAYLOAD_BYTES - curr_byte;

            let header = buf[curr_byte];
            // delimiter byte
            if header == 0xFF {
                return;
            }

            let fig_type = (header & 0b11100000) >> 5;
            let fig_data_length_bytes = (header & 0b00011111) as usize;
            let fig_length_bytes = fig_data_length_bytes + 1;

            if fig_length_bytes > nb_remain_bytes {
                warn!("[{}] fig specified length overflows buffer ({}/{})", cif_index, fig_length_bytes, nb_remain_bytes);
                return;
            }

            let fig_buf = &buf[curr_byte + 1..curr_byte + fig_length_bytes];
            curr_byte += fig_length_bytes;

            match fig_type {
                // MCI and part of SI
                0 => Self::process_fig_type_0(fig_buf, cif_index, handler),
                // Short labels, part of SI
                1 => Self::process_fig_type_1(fig_buf, cif_index, handler),
                // Long labels, part of SI
                2 => Self::process_fig_type_2(fig_buf, cif_index, handler),
                // Conditional access
                6 => Self::process_fig_type_6(fig_buf, cif_index),
                // End of FIG packet. Padding of 0x00 may follow.
                7 => return,
                // reserved
                fig_type => {
                    warn!("[{}] Invalid fig type ({})", cif_index, fig_type);
                    return;
                },
            }
        }
    }

    fn process_fig_type_0(buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        if buf.is_empty() {
            return;
        }
        let descriptor = buf[0];
        let header = FigHeaderType0 {
            cn: (descriptor & 0b10000000) != 0,
            oe: (descriptor & 0b01000000) != 0,
            pd: (descriptor & 0b00100000) != 0,
        };
        let extension = descriptor & 0b00011111;
        let field_buf = &buf[1..];

        // The change notification bit marks data of the next configuration;
        // it only matters once FIG 0/7 advances the reconfiguration count.
        if header.cn {
            debug!("[{}] fig 0/{} describes the next configuration", cif_index, extension);
        }
        if header.oe {
            debug!("[{}] fig 0/{} describes another ensemble", cif_index, extension);
        }

        match extension {
            0 => Self::process_fig_type_0_ext_0(header, field_buf, cif_index, handler),
            1 => Self::process_fig_type_0_ext_1(header, field_buf, cif_index, handler),
            2 => Self::process_fig_type_0_ext_2(header, field_buf, cif_index, handler),
            3 => Self::process_fig_type_0_ext_3(header, field_buf, cif_index, handler),
            4 => Self::process_fig_type_0_ext_4(header, field_buf, cif_index, handler),
            6 => Self::process_fig_type_0_ext_6(header, field_buf, cif_index, handler),
            7 => Self::process_fig_type_0_ext_7(header, field_buf, cif_index, handler),
            8 => Self::process_fig_type_0_ext_8(header, field_buf, cif_index, handler),
            9 => Self::process_fig_type_0_ext_9(header, field_buf, cif_index, handler),
            10 => Self::process_fig_type_0_ext_10(header, field_buf, cif_index, handler),
            13 => Self::process_fig_type_0_ext_13(header, field_buf, cif_index, handler),
            14 => Self::process_fig_type_0_ext_14(header, field_buf, cif_index, handler),
            17 => Self::process_fig_type_0_ext_17(header, field_buf, cif_index, handler),
            21 => Self::process_fig_type_0_ext_21(header, field_buf, cif_index, handler),
            24 => Self::process_fig_type_0_ext_24(header, field_buf, cif_index, handler),
            extension => {
                debug!("[{}] fig 0/{} skipped", cif_index, extension);
            },
        }
    }

    /// Ensemble information.
    fn process_fig_type_0_ext_0(_header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        // The occurrence change byte is transmitted only around
        // reconfigurations, so both the 4 and 5 byte forms are accepted.
        if buf.len() != 4 && buf.len() != 5 {
            warn!("[{}] fig 0/0 Length doesn't match expectations ({})", cif_index, buf.len());
            return;
        }

        let id = EnsembleIdentifier::from_buffer(&buf[0..2]);
        let change_flags = (buf[2] & 0b11000000) >> 6;
        let alarm_flag = (buf[2] & 0b00100000) != 0;
        // CIF counter split into mod 20 and mod 250 halves
        let cif_upper = buf[2] & 0b00011111;
        let cif_lower = buf[3];
        let occurrence_change = match buf.len() {
            5 => Some(buf[4]),
            _ => None,
        };

        handler.on_ensemble(id, change_flags, alarm_flag, cif_upper, cif_lower, occurrence_change);
    }

    /// Subchannel for stream mode MSC.
    fn process_fig_type_0_ext_1(_header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let total_bytes = buf.len();
        let mut curr_byte = 0;
        while curr_byte < total_bytes {
            let data = &buf[curr_byte..];
            // Minimum length of the short form descriptor
            if data.len() < 3 {
                warn!("[{}] fig 0/1 Ended early ({})", cif_index, curr_byte);
                return;
            }

            let subchannel_id = (data[0] & 0b11111100) >> 2;
            let start_address = (((data[0] & 0b00000011) as u16) << 8) | data[1] as u16;

            let is_long_form = (data[2] & 0b10000000) != 0;
            let nb_data_bytes = if is_long_form { 4 } else { 3 };
            if nb_data_bytes > data.len() {
                warn!("[{}] fig 0/1 Long field cannot fit in remaining length", cif_index);
                return;
            }

            if !is_long_form {
                let table_switch = (data[2] & 0b01000000) != 0;
                let table_index = data[2] & 0b00111111;
                if table_switch {
                    warn!("[{}] fig 0/1 subchannel_id={} uses an unknown protection table switch", cif_index, subchannel_id);
                } else {
                    match get_uep_profile(table_index as usize) {
                        Ok(profile) => {
                            handler.on_subchannel(Subchannel {
                                id: subchannel_id,
                                start_address,
                                length_cu: profile.subchannel_size_cu as u16,
                                protection: SubchannelProtection::Uep { table_index },
                                fec_scheme: 0,
                            });
                        },
                        // Configuration error: the subchannel remains uncreated
                        Err(err) => warn!("[{}] fig 0/1 subchannel_id={} {}", cif_index, subchannel_id, err),
                    }
                }
            } else {
                let option = (data[2] & 0b01110000) >> 4;
                let protection_level = (data[2] & 0b00001100) >> 2;
                let subchannel_size = (((data[2] & 0b00000011) as u16) << 8) | data[3] as u16;
                handler.on_subchannel(Subchannel {
                    id: subchannel_id,
                    start_address,
                    length_cu: subchannel_size,
                    protection: SubchannelProtection::Eep { option, protection_level },
                    fec_scheme: 0,
                });
            }
            curr_byte += nb_data_bytes;
        }
    }

    /// Service and service components in stream mode.
    fn process_fig_type_0_ext_2(header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_service_id_bytes = if header.pd { 4 } else { 2 };
        let nb_header_bytes = nb_service_id_bytes + 1;

        let mut curr_index = 0;
        while curr_index < buf.len() {
            let service_buf = &buf[curr_index..];
            if nb_header_bytes > service_buf.len() {
                warn!("[{}] fig 0/2 Message not long enough for service header", cif_index);
                return;
            }

            let service_id = match header.pd {
                false => ServiceIdentifier::from_short_form(service_buf),
                true => ServiceIdentifier::from_long_form(service_buf),
            };

            let descriptor = service_buf[nb_service_id_bytes];
            let nb_service_components = (descriptor & 0b00001111) as usize;

            let nb_service_component_bytes = 2;
            let nb_length_bytes = nb_service_component_bytes*nb_service_components + nb_header_bytes;
            if nb_length_bytes > service_buf.len() {
                warn!("[{}] fig 0/2 Message not long enough for service components", cif_index);
                return;
            }

            let components_buf = &service_buf[nb_header_bytes..nb_length_bytes];
            for (index, component) in components_buf.chunks_exact(nb_service_component_bytes).enumerate() {
                let b0 = component[0];
                let b1 = component[1];
                let tmid = (b0 & 0b11000000) >> 6;
                let is_primary = (b1 & 0b00000010) != 0;
                let is_conditional_access = (b1 & 0b00000001) != 0;
                match tmid {
                    // MSC stream audio
                    0b00 => {
                        let audio_service_type = b0 & 0b00111111;
                        let subchannel_id = (b1 & 0b11111100) >> 2;
                        handler.on_service_component_stream(
                            service_id, index as u8, TransportMode::StreamAudio,
                            audio_service_type, subchannel_id, is_primary, is_conditional_access,
                        );
                    },
                    // MSC stream data
                    0b01 => {
                        let data_service_type = b0 & 0b00111111;
                        let subchannel_id = (b1 & 0b11111100) >> 2;
                        handler.on_service_component_stream(
                            service_id, index as u8, TransportMode::StreamData,
                            data_service_type, subchannel_id, is_primary, is_conditional_access,
                        );
                    },
                    // MSC packet data
                    0b11 => {
                        let global_id = (((b0 & 0b00111111) as u16) << 6) | ((b1 & 0b11111100) >> 2) as u16;
                        handler.on_service_component_packet(service_id, index as u8, global_id, is_primary, is_conditional_access);
                    },
                    tmid => {
                        warn!("[{}] fig 0/2 reserved tmid={}", cif_index, tmid);
                        return;
                    },
                }
            }

            curr_index += nb_length_bytes;
        }
    }

    /// Service components in packet mode.
    fn process_fig_type_0_ext_3(_header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_component_bytes = 7;
        if buf.len() % nb_component_bytes != 0 {
            warn!("[{}] fig 0/3 Field must be a multiple of {} bytes", cif_index, nb_component_bytes);
            return;
        }

        for component in buf.chunks_exact(nb_component_bytes) {
            let global_id = ((component[0] as u16) << 4) | ((component[1] & 0b11110000) >> 4) as u16;
            let is_data_group_transport = (component[2] & 0b10000000) == 0;
            let data_service_type = component[2] & 0b00111111;
            let subchannel_id = (component[3] & 0b11111100) >> 2;
            let packet_address = (((component[3] & 0b00000011) as u16) << 8) | component[4] as u16;
            let ca_organisation = u16::from_be_bytes([component[5], component[6]]);
            handler.on_packet_component_definition(
                global_id, subchannel_id, packet_address,
                data_service_type, is_data_group_transport, ca_organisation,
            );
        }
    }

    /// Service components in stream mode with conditional access.
    fn process_fig_type_0_ext_4(_header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_component_bytes = 3;
        if buf.len() % nb_component_bytes != 0 {
            warn!("[{}] fig 0/4 Field must be a multiple of {} bytes", cif_index, nb_component_bytes);
            return;
        }
        for component in buf.chunks_exact(nb_component_bytes) {
            let subchannel_id = component[0] & 0b00111111;
            let ca_organisation = u16::from_be_bytes([component[1], component[2]]);
            handler.on_component_conditional_access(subchannel_id, ca_organisation);
        }
    }

    /// Service linking information.
    fn process_fig_type_0_ext_6(header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_header_bytes = 2;
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            let b = &buf[curr_byte..];
            if b.len() < nb_header_bytes {
                warn!("[{}] fig 0/6 Insufficient length for header", cif_index);
                return;
            }

            let id_list_flag = (b[0] & 0b10000000) != 0;
            let is_active_link = (b[0] & 0b01000000) != 0;
            let is_hard_link = (b[0] & 0b00100000) != 0;
            let is_international = (b[0] & 0b00010000) != 0;
            let linkage_set_number = (((b[0] & 0b00001111) as u16) << 8) | b[1] as u16;

            // short data field without an id list
            if !id_list_flag {
                handler.on_service_linkage(linkage_set_number, is_active_link, is_hard_link, is_international, &[]);
                curr_byte += nb_header_bytes;
                continue;
            }

            if b.len() < nb_header_bytes + 1 {
                warn!("[{}] fig 0/6 Insufficient length for long header", cif_index);
                return;
            }
            let nb_ids = (b[2] & 0b00001111) as usize;
            let list_buf = &b[3..];

            // Three possible arrangements of the id list
            let (nb_entry_bytes, ids): (usize, Vec<u32>) = if !header.pd && !is_international {
                let nb_entry_bytes = 2;
                if nb_ids*nb_entry_bytes > list_buf.len() {
                    warn!("[{}] fig 0/6 Insufficient length for 16bit id list", cif_index);
                    return;
                }
                let ids = list_buf
                    .chunks_exact(nb_entry_bytes)
                    .take(nb_ids)
                    .map(|entry| u16::from_be_bytes([entry[0], entry[1]]) as u32)
                    .collect();
                (nb_entry_bytes, ids)
            } else if !header.pd && is_international {
                let nb_entry_bytes = 3;
                if nb_ids*nb_entry_bytes > list_buf.len() {
                    warn!("[{}] fig 0/6 Insufficient length for ecc id list", cif_index);
                    return;
                }
                let ids = list_buf
                    .chunks_exact(nb_entry_bytes)
                    .take(nb_ids)
                    .map(|entry| ((entry[0] as u32) << 16) | ((entry[1] as u32) << 8) | entry[2] as u32)
                    .collect();
                (nb_entry_bytes, ids)
            } else {
                let nb_entry_bytes = 4;
                if nb_ids*nb_entry_bytes > list_buf.len() {
                    warn!("[{}] fig 0/6 Insufficient length for 32bit id list", cif_index);
                    return;
                }
                let ids = list_buf
                    .chunks_exact(nb_entry_bytes)
                    .take(nb_ids)
                    .map(|entry| u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]))
                    .collect();
                (nb_entry_bytes, ids)
            };

            handler.on_service_linkage(linkage_set_number, is_active_link, is_hard_link, is_international, &ids);
            curr_byte += nb_header_bytes + 1 + nb_entry_bytes*nb_ids;
        }
    }

    /// Configuration information.
    fn process_fig_type_0_ext_7(_header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        if buf.len() != 2 {
            warn!("[{}] fig 0/7 Length doesn't match expectations ({})", cif_index, buf.len());
            return;
        }
        let nb_services = (buf[0] & 0b11111100) >> 2;
        let reconfiguration_count = (((buf[0] & 0b00000011) as u16) << 8) | buf[1] as u16;
        handler.on_configuration_information(nb_services, reconfiguration_count);
    }

    /// Service component global definition.
    fn process_fig_type_0_ext_8(header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_service_id_bytes = if header.pd { 4 } else { 2 };
        let nb_header_bytes = nb_service_id_bytes + 1;

        let mut curr_index = 0;
        while curr_index < buf.len() {
            let service_buf = &buf[curr_index..];
            if nb_header_bytes + 1 > service_buf.len() {
                warn!("[{}] fig 0/8 Message not long enough for header field", cif_index);
                return;
            }

            let service_id = match header.pd {
                false => ServiceIdentifier::from_short_form(service_buf),
                true => ServiceIdentifier::from_long_form(service_buf),
            };

            let descriptor = service_buf[nb_service_id_bytes];
            let ext_flag = (descriptor & 0b10000000) != 0;
            let component_id = descriptor & 0b00001111;

            let data_buf = &service_buf[nb_header_bytes..];
            let ls_flag = (data_buf[0] & 0b10000000) != 0;
            let nb_data_bytes = if ls_flag { 2 } else { 1 };
            // An 8 bit rfa field trails the definition when the extension flag is set
            let nb_rfa_bytes = if ext_flag { 1 } else { 0 };
            let nb_length_bytes = nb_header_bytes + nb_data_bytes + nb_rfa_bytes;
            if nb_length_bytes > service_buf.len() {
                warn!("[{}] fig 0/8 Message not long enough for tail data ({}/{})", cif_index, nb_length_bytes, service_buf.len());
                return;
            }

            let definition = if ls_flag {
                let global_id = (((data_buf[0] & 0b00001111) as u16) << 8) | data_buf[1] as u16;
                ComponentGlobalDefinition::GlobalId(global_id)
            } else {
                ComponentGlobalDefinition::Subchannel(data_buf[0] & 0b00111111)
            };
            handler.on_component_global_definition(service_id, component_id, definition);

            curr_index += nb_length_bytes;
        }
    }

    /// Country, local time offset and international table.
    fn process_fig_type_0_ext_9(_header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_header_bytes = 3;
        if buf.len() < nb_header_bytes {
            warn!("[{}] fig 0/9 Insufficient length for header", cif_index);
            return;
        }

        let ext_flag = (buf[0] & 0b10000000) != 0;
        let local_time_offset = Self::parse_local_time_offset(buf[0] & 0b00111111);
        let extended_country_code = buf[1];
        let international_table_id = buf[2];
        handler.on_country_lto(local_time_offset, extended_country_code, international_table_id);

        let extended_buf = &buf[nb_header_bytes..];
        if ext_flag == extended_buf.is_empty() {
            warn!("[{}] fig 0/9 Extended field does not match its flag ({})", cif_index, extended_buf.len());
            return;
        }

        // Subfields list services with an extended country code different
        // from the ensemble's.
        let nb_subfield_header_bytes = 2;
        let nb_service_id_bytes = 2;
        let mut curr_byte = 0;
        while curr_byte < extended_buf.len() {
            let subfield_buf = &extended_buf[curr_byte..];
            if subfield_buf.len() < nb_subfield_header_bytes {
                warn!("[{}] fig 0/9 Insufficient length for subfield header", cif_index);
                return;
            }
            let nb_services = ((subfield_buf[0] & 0b11000000) >> 6) as usize;
            let ecc = subfield_buf[1];

            let nb_list_bytes = nb_services*nb_service_id_bytes;
            if nb_subfield_header_bytes + nb_list_bytes > subfield_buf.len() {
                warn!("[{}] fig 0/9 Insufficient length for service id list", cif_index);
                return;
            }

            let service_ids: Vec<ServiceIdentifier> = subfield_buf[nb_subfield_header_bytes..]
                .chunks_exact(nb_service_id_bytes)
                .take(nb_services)
                .map(ServiceIdentifier::from_short_form)
                .collect();
            handler.on_service_ecc(ecc, &service_ids);

            curr_byte += nb_subfield_header_bytes + nb_list_bytes;
        }
    }

    /// Date and time.
    fn process_fig_type_0_ext_10(_header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        if buf.len() < 4 {
            warn!("[{}] fig 0/10 Insufficient length for minimum configuration ({})", cif_index, buf.len());
            return;
        }

        let modified_julian_date = (((buf[0] & 0b01111111) as u32) << 10)
            | ((buf[1] as u32) << 2)
            | ((buf[2] & 0b11000000) >> 6) as u32;
        let leap_second_indicator = (buf[2] & 0b00100000) != 0;
        let utc_flag = (buf[2] & 0b00001000) != 0;

        let nb_actual_bytes = if utc_flag { 6 } else { 4 };
        if nb_actual_bytes > buf.len() {
            warn!("[{}] fig 0/10 Insufficient length for long form UTC", cif_index);
            return;
        }

        let hours = ((buf[2] & 0b00000111) << 2) | ((buf[3] & 0b11000000) >> 6);
        let minutes = buf[3] & 0b00111111;

        // long form utc has seconds and milliseconds
        let (seconds, milliseconds) = if utc_flag {
            let seconds = (buf[4] & 0b11111100) >> 2;
            let milliseconds = (((buf[4] & 0b00000011) as u16) << 8) | buf[5] as u16;
            (seconds, milliseconds)
        } else {
            (0, 0)
        };

        handler.on_datetime(EnsembleDateTime {
            modified_julian_date,
            hours,
            minutes,
            seconds,
            milliseconds,
            leap_second_indicator,
        });
    }

    /// User application information.
    fn process_fig_type_0_ext_13(header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_service_id_bytes = if header.pd { 4 } else { 2 };
        let nb_header_bytes = nb_service_id_bytes + 1;

        let mut curr_index = 0;
        while curr_index < buf.len() {
            let entity_buf = &buf[curr_index..];
            if nb_header_bytes > entity_buf.len() {
                warn!("[{}] fig 0/13 Length not long enough for header data", cif_index);
                return;
            }

            let service_id = match header.pd {
                false => ServiceIdentifier::from_short_form(entity_buf),
                true => ServiceIdentifier::from_long_form(entity_buf),
            };

            let descriptor = entity_buf[nb_service_id_bytes];
            let component_id = (descriptor & 0b11110000) >> 4;
            let nb_user_apps = (descriptor & 0b00001111) as usize;

            let apps_buf = &entity_buf[nb_header_bytes..];
            let nb_app_header_bytes = 2;
            let mut curr_app_byte = 0;
            for _ in 0..nb_user_apps {
                let app_buf = &apps_buf[curr_app_byte..];
                if nb_app_header_bytes > app_buf.len() {
                    warn!("[{}] fig 0/13 Length not long enough for app header data", cif_index);
                    return;
                }

                let application_type = ((app_buf[0] as u16) << 3) | ((app_buf[1] & 0b11100000) >> 5) as u16;
                let nb_app_data_bytes = (app_buf[1] & 0b00011111) as usize;
                let nb_app_total_bytes = nb_app_header_bytes + nb_app_data_bytes;
                if nb_app_total_bytes > app_buf.len() {
                    warn!("[{}] fig 0/13 Length not long enough for app data", cif_index);
                    return;
                }

                let application_data = &app_buf[nb_app_header_bytes..nb_app_total_bytes];
                handler.on_user_application(service_id, component_id, application_type, application_data);

                curr_app_byte += nb_app_total_bytes;
            }

            curr_index += nb_header_bytes + curr_app_byte;
        }
    }

    /// FEC scheme for packet mode subchannels.
    fn process_fig_type_0_ext_14(_header: FigHeaderType0, buf: &[u8], _cif_index: usize, handler: &mut dyn FigHandler) {
        for byte in buf {
            let subchannel_id = (byte & 0b11111100) >> 2;
            let fec_scheme = byte & 0b00000011;
            handler.on_subchannel_fec(subchannel_id, fec_scheme);
        }
    }

    /// Programme type, with the revised language and closed caption layout.
    fn process_fig_type_0_ext_17(_header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_min_bytes = 4;
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            let b = &buf[curr_byte..];
            if b.len() < nb_min_bytes {
                warn!("[{}] fig 0/17 Remaining buffer doesn't have minimum bytes ({})", cif_index, b.len());
                return;
            }

            let service_id = ServiceIdentifier::from_short_form(b);
            let language_flag = (b[2] & 0b00100000) != 0;
            let cc_flag = (b[2] & 0b00010000) != 0;

            let nb_bytes = nb_min_bytes + language_flag as usize + cc_flag as usize;
            if b.len() < nb_bytes {
                warn!("[{}] fig 0/17 Insufficient bytes for language and caption fields", cif_index);
                return;
            }

            let mut data_index = 3;
            let language = language_flag.then(|| { let v = b[data_index]; data_index += 1; v });
            let closed_caption = cc_flag.then(|| { let v = b[data_index]; data_index += 1; v });
            let programme_type = b[data_index] & 0b00011111;

            handler.on_programme_type(service_id, programme_type, language, closed_caption);

            curr_byte += nb_bytes;
        }
    }

    /// Frequency information.
    fn process_fig_type_0_ext_21(_header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_block_header_bytes = 2;
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            let block_buf = &buf[curr_byte..];
            if nb_block_header_bytes > block_buf.len() {
                warn!("[{}] fig 0/21 Insufficient length for block header", cif_index);
                return;
            }
            let nb_fi_list_bytes = (block_buf[1] & 0b00011111) as usize;
            if nb_block_header_bytes + nb_fi_list_bytes > block_buf.len() {
                warn!("[{}] fig 0/21 Block overflows the field", cif_index);
                return;
            }

            let fi_lists_buf = &block_buf[nb_block_header_bytes..nb_block_header_bytes + nb_fi_list_bytes];
            if !Self::process_frequency_information_lists(fi_lists_buf, cif_index, handler) {
                return;
            }

            curr_byte += nb_block_header_bytes + nb_fi_list_bytes;
        }
    }

    fn process_frequency_information_lists(buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) -> bool {
        let nb_fi_list_header_bytes = 3;
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            let fi_list_buf = &buf[curr_byte..];
            if nb_fi_list_header_bytes > fi_list_buf.len() {
                warn!("[{}] fig 0/21 Insufficient length for fi list header", cif_index);
                return false;
            }

            let id = u16::from_be_bytes([fi_list_buf[0], fi_list_buf[1]]);
            let range_modulation = (fi_list_buf[2] & 0b11110000) >> 4;
            let is_continuous_output = (fi_list_buf[2] & 0b00001000) != 0;
            let nb_freq_list_bytes = (fi_list_buf[2] & 0b00000111) as usize;
            if nb_fi_list_header_bytes + nb_freq_list_bytes > fi_list_buf.len() {
                warn!("[{}] fig 0/21 Frequency list overflows the block", cif_index);
                return false;
            }
            let freq_list_buf = &fi_list_buf[nb_fi_list_header_bytes..nb_fi_list_header_bytes + nb_freq_list_bytes];

            match range_modulation {
                // Alternative DAB ensemble frequencies
                0b0000 => {
                    let nb_entry_bytes = 3;
                    if nb_freq_list_bytes % nb_entry_bytes != 0 {
                        warn!("[{}] fig 0/21 RM=0 list length is not a multiple of {}", cif_index, nb_entry_bytes);
                        return false;
                    }
                    let ensemble_id = EnsembleIdentifier::from_u16(id);
                    for entry in freq_list_buf.chunks_exact(nb_entry_bytes) {
                        let freq = (((entry[0] & 0b00000111) as u32) << 16)
                            | ((entry[1] as u32) << 8)
                            | entry[2] as u32;
                        let frequency_hz = freq*16_000;
                        handler.on_alternative_frequency(ensemble_id, frequency_hz, is_continuous_output);
                    }
                },
                // DRM service identifier with single byte frequencies
                0b0110 | 0b1000 => {
                    for entry in freq_list_buf {
                        debug!("[{}] fig 0/21 RM={} id={:04X} freq_code={}", cif_index, range_modulation, id, entry);
                    }
                },
                // FM service with RDS programme identifier
                0b1110 => {
                    let nb_entry_bytes = 3;
                    if nb_freq_list_bytes % nb_entry_bytes != 0 {
                        warn!("[{}] fig 0/21 RM=14 list length is not a multiple of {}", cif_index, nb_entry_bytes);
                        return false;
                    }
                    for entry in freq_list_buf.chunks_exact(nb_entry_bytes) {
                        debug!("[{}] fig 0/21 RM=14 id={:04X} entry={:02X}{:02X}{:02X}", cif_index, id, entry[0], entry[1], entry[2]);
                    }
                },
                range_modulation => {
                    warn!("[{}] fig 0/21 Unknown RM value ({})", cif_index, range_modulation);
                    return false;
                },
            }

            curr_byte += nb_fi_list_header_bytes + nb_freq_list_bytes;
        }
        true
    }

    /// Other ensemble services.
    fn process_fig_type_0_ext_24(header: FigHeaderType0, buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        let nb_service_id_bytes = if header.pd { 4 } else { 2 };
        let nb_header_bytes = nb_service_id_bytes + 1;

        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            let b = &buf[curr_byte..];
            if nb_header_bytes > b.len() {
                warn!("[{}] fig 0/24 Insufficient length for header bytes", cif_index);
                return;
            }

            let service_id = match header.pd {
                false => ServiceIdentifier::from_short_form(b),
                true => ServiceIdentifier::from_long_form(b),
            };

            let descriptor = b[nb_service_id_bytes];
            let nb_ensemble_ids = (descriptor & 0b00001111) as usize;
            let nb_ensemble_id_bytes = 2;
            let nb_list_bytes = nb_ensemble_id_bytes*nb_ensemble_ids;
            if nb_header_bytes + nb_list_bytes > b.len() {
                warn!("[{}] fig 0/24 Insufficient length for ensemble id list", cif_index);
                return;
            }

            let ensemble_ids: Vec<EnsembleIdentifier> = b[nb_header_bytes..]
                .chunks_exact(nb_ensemble_id_bytes)
                .take(nb_ensemble_ids)
                .map(EnsembleIdentifier::from_buffer)
                .collect();
            handler.on_other_ensemble_service(service_id, &ensemble_ids);

            curr_byte += nb_header_bytes + nb_list_bytes;
        }
    }

    /// Short labels.
    fn process_fig_type_1(buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        if buf.is_empty() {
            return;
        }
        let descriptor = buf[0];
        let charset = (descriptor & 0b11110000) >> 4;
        let extension = descriptor & 0b00000111;
        let field_buf = &buf[1..];

        // The label field is 16 characters plus a 2 byte character flag field
        let nb_label_tail_bytes = NB_LABEL_BYTES + 2;
        let (entity, label_buf) = match extension {
            // Ensemble label
            0 => {
                if field_buf.len() < 2 + nb_label_tail_bytes {
                    warn!("[{}] fig 1/0 Insufficient length for ensemble label", cif_index);
                    return;
                }
                (LabelEntity::Ensemble(EnsembleIdentifier::from_buffer(field_buf)), &field_buf[2..2 + NB_LABEL_BYTES])
            },
            // Programme service label
            1 => {
                if field_buf.len() < 2 + nb_label_tail_bytes {
                    warn!("[{}] fig 1/1 Insufficient length for service label", cif_index);
                    return;
                }
                (LabelEntity::Service(ServiceIdentifier::from_short_form(field_buf)), &field_buf[2..2 + NB_LABEL_BYTES])
            },
            // Service component label
            4 => {
                if field_buf.is_empty() {
                    return;
                }
                let pd = (field_buf[0] & 0b10000000) != 0;
                let component_id = field_buf[0] & 0b00001111;
                let nb_service_id_bytes = if pd { 4 } else { 2 };
                if field_buf.len() < 1 + nb_service_id_bytes + nb_label_tail_bytes {
                    warn!("[{}] fig 1/4 Insufficient length for component label", cif_index);
                    return;
                }
                let service_id = match pd {
                    false => ServiceIdentifier::from_short_form(&field_buf[1..]),
                    true => ServiceIdentifier::from_long_form(&field_buf[1..]),
                };
                let offset = 1 + nb_service_id_bytes;
                (LabelEntity::ServiceComponent(service_id, component_id), &field_buf[offset..offset + NB_LABEL_BYTES])
            },
            // Data service label
            5 => {
                if field_buf.len() < 4 + nb_label_tail_bytes {
                    warn!("[{}] fig 1/5 Insufficient length for data service label", cif_index);
                    return;
                }
                (LabelEntity::Service(ServiceIdentifier::from_long_form(field_buf)), &field_buf[4..4 + NB_LABEL_BYTES])
            },
            extension => {
                debug!("[{}] fig 1/{} skipped", cif_index, extension);
                return;
            },
        };

        handler.on_label(entity, charset, label_buf);
    }

    /// Long labels carried as UTF segments. Only the first segment is used;
    /// broadcasts repeat it continuously so nothing is lost by waiting.
    fn process_fig_type_2(buf: &[u8], cif_index: usize, handler: &mut dyn FigHandler) {
        if buf.is_empty() {
            return;
        }
        let descriptor = buf[0];
        let segment_index = (descriptor & 0b01110000) >> 4;
        let extension = descriptor & 0b00000111;
        let field_buf = &buf[1..];
        if segment_index != 0 {
            debug!("[{}] fig 2/{} segment {} skipped", cif_index, extension, segment_index);
            return;
        }

        use crate::constants::charsets::CHARSET_UTF8;
        match extension {
            0 => {
                if field_buf.len() < 2 {
                    warn!("[{}] fig 2/0 Insufficient length for ensemble label", cif_index);
                    return;
                }
                let entity = LabelEntity::Ensemble(EnsembleIdentifier::from_buffer(field_buf));
                handler.on_label(entity, CHARSET_UTF8, &field_buf[2..]);
            },
            1 => {
                if field_buf.len() < 2 {
                    warn!("[{}] fig 2/1 Insufficient length for service label", cif_index);
                    return;
                }
                let entity = LabelEntity::Service(ServiceIdentifier::from_short_form(field_buf));
                handler.on_label(entity, CHARSET_UTF8, &field_buf[2..]);
            },
            5 => {
                if field_buf.len() < 4 {
                    warn!("[{}] fig 2/5 Insufficient length for data service label", cif_index);
                    return;
                }
                let entity = LabelEntity::Service(ServiceIdentifier::from_long_form(field_buf));
                handler.on_label(entity, CHARSET_UTF8, &field_buf[4..]);
            },
            extension => {
                debug!("[{}] fig 2/{} skipped", cif_index, extension);
            },
        }
    }

    /// Conditional access. Parsed but not acted on.
    fn process_fig_type_6(buf: &[u8], cif_index: usize) {
        if buf.is_empty() {
            return;
        }
        let descriptor = buf[0];
        let ca_system_id = descriptor & 0b00000111;
        debug!("[{}] fig 6 ca_system_id={} L={}", cif_index, ca_system_id, buf.len());
    }

    /// Local time offsets are sign and magnitude in half hour steps.
    fn parse_local_time_offset(field: u8) -> i8 {
        let magnitude = (field & 0b00011111) as i8;
        match field & 0b00100000 {
            0 => magnitude,
            _ => -magnitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::dab_database_entities::Subchannel;

    #[derive(Default)]
    struct RecordingHandler {
        ensembles: Vec<(EnsembleIdentifier, u8, u8, Option<u8>)>,
        subchannels: Vec<Subchannel>,
        stream_components: Vec<(ServiceIdentifier, u8, TransportMode, u8, u8)>,
        datetimes: Vec<EnsembleDateTime>,
        labels: Vec<(LabelEntity, u8, Vec<u8>)>,
        user_applications: Vec<(ServiceIdentifier, u8, u16)>,
        programme_types: Vec<(ServiceIdentifier, u8, Option<u8>, Option<u8>)>,
    }

    impl FigHandler for RecordingHandler {
        fn on_ensemble(&mut self, id: EnsembleIdentifier, _change_flags: u8, _alarm_flag: bool, cif_upper: u8, cif_lower: u8, occurrence_change: Option<u8>) {
            self.ensembles.push((id, cif_upper, cif_lower, occurrence_change));
        }
        fn on_subchannel(&mut self, subchannel: Subchannel) {
            self.subchannels.push(subchannel);
        }
        fn on_service_component_stream(&mut self, service_id: ServiceIdentifier, component_index: u8, transport_mode: TransportMode, service_type: u8, subchannel_id: u8, _is_primary: bool, _is_conditional_access: bool) {
            self.stream_components.push((service_id, component_index, transport_mode, service_type, subchannel_id));
        }
        fn on_datetime(&mut self, datetime: EnsembleDateTime) {
            self.datetimes.push(datetime);
        }
        fn on_label(&mut self, entity: LabelEntity, charset: u8, label: &[u8]) {
            self.labels.push((entity, charset, label.to_vec()));
        }
        fn on_user_application(&mut self, service_id: ServiceIdentifier, component_id: u8, application_type: u16, _application_data: &[u8]) {
            self.user_applications.push((service_id, component_id, application_type));
        }
        fn on_programme_type(&mut self, service_id: ServiceIdentifier, programme_type: u8, language: Option<u8>, closed_caption: Option<u8>) {
            self.programme_types.push((service_id, programme_type, language, closed_caption));
        }
    }

    fn build_fib(figs: &[&[u8]]) -> Vec<u8> {
        let mut fib = Vec::new();
        for fig in figs {
            let (fig_type, data) = (fig[0], &fig[1..]);
            fib.push((fig_type << 5) | (data.len() as u8));
            fib.extend_from_slice(data);
        }
        fib.push(0xFF);
        fib.resize(NB_FIB_PAYLOAD_BYTES, 0x00);
        fib
    }

    #[test]
    fn fig_0_0_updates_the_ensemble() {
        // country 0xC, reference 0x012, cif counter 5|50
        let fib = build_fib(&[&[0, 0x00, 0xC0, 0x12, 0x05, 0x32]]);
        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);

        assert_eq!(handler.ensembles.len(), 1);
        let (id, cif_upper, cif_lower, occurrence_change) = handler.ensembles[0];
        assert_eq!(id, EnsembleIdentifier { country_id: 0xC, ensemble_reference: 0x012 });
        assert_eq!(cif_upper, 5);
        assert_eq!(cif_lower, 50);
        assert_eq!(occurrence_change, None);
    }

    #[test]
    fn fig_0_0_tolerates_the_occurrence_change_byte() {
        let fib = build_fib(&[&[0, 0x00, 0xC0, 0x12, 0x05, 0x32, 0x77]]);
        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);
        assert_eq!(handler.ensembles[0].3, Some(0x77));
    }

    #[test]
    fn fig_0_1_long_form_creates_an_eep_subchannel() {
        // subchannel 3, start 54, EEP 3-A, 6 CU
        let descriptor = [
            (3u8 << 2) | 0x00, 54,
            0b10001000, 6,
        ];
        let fib = build_fib(&[&[0, 0x01, descriptor[0], descriptor[1], descriptor[2], descriptor[3]]]);
        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);

        assert_eq!(handler.subchannels, vec![Subchannel {
            id: 3,
            start_address: 54,
            length_cu: 6,
            protection: SubchannelProtection::Eep { option: 0, protection_level: 2 },
            fec_scheme: 0,
        }]);
    }

    #[test]
    fn fig_0_1_short_form_takes_the_size_from_the_table() {
        // table index 2: 32 kbit/s protection level 3, 24 CU
        let fib = build_fib(&[&[0, 0x01, 2 << 2, 0x00, 0x02]]);
        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);
        assert_eq!(handler.subchannels.len(), 1);
        assert_eq!(handler.subchannels[0].length_cu, 24);
        assert_eq!(handler.subchannels[0].protection, SubchannelProtection::Uep { table_index: 2 });
    }

    #[test]
    fn fig_0_1_unknown_table_switch_leaves_subchannel_uncreated() {
        // the table switch selects a protection table this decoder doesn't know
        let fib = build_fib(&[&[0, 0x01, 1 << 2, 0x00, 0b01000010]]);
        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);
        assert!(handler.subchannels.is_empty());
    }

    #[test]
    fn fig_0_2_lists_stream_audio_components() {
        // service 0xC123 with one DAB+ stream audio component on subchannel 9
        let fib = build_fib(&[&[
            0, 0x02,
            0xC1, 0x23, 0x01,
            63, (9 << 2) | 0b10,
        ]]);
        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);

        assert_eq!(handler.stream_components.len(), 1);
        let (service_id, index, transport_mode, service_type, subchannel_id) = handler.stream_components[0];
        assert_eq!(service_id.country_id, 0xC);
        assert_eq!(service_id.service_reference, 0x123);
        assert_eq!(index, 0);
        assert_eq!(transport_mode, TransportMode::StreamAudio);
        assert_eq!(service_type, 63);
        assert_eq!(subchannel_id, 9);
    }

    #[test]
    fn fig_0_10_decodes_date_and_time() {
        // MJD 59776, 01:52 short form
        let mjd: u32 = 59776;
        let b0 = ((mjd >> 10) & 0x7F) as u8;
        let b1 = ((mjd >> 2) & 0xFF) as u8;
        let hours = 1u8;
        let minutes = 52u8;
        let b2 = (((mjd & 0b11) as u8) << 6) | ((hours >> 2) & 0b111);
        let b3 = ((hours & 0b11) << 6) | minutes;
        let fib = build_fib(&[&[0, 0x0A, b0, b1, b2, b3]]);

        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);
        assert_eq!(handler.datetimes.len(), 1);
        let datetime = handler.datetimes[0];
        assert_eq!(datetime.modified_julian_date, 59776);
        assert_eq!(datetime.hours, 1);
        assert_eq!(datetime.minutes, 52);
        assert_eq!(datetime.seconds, 0);
    }

    #[test]
    fn fig_0_13_announces_the_slideshow_application() {
        let fib = build_fib(&[&[
            0, 0x0D,
            0xC1, 0x23,
            0x01,              // component 0, one user app
            0x00, 0b01000000,  // application type 2, no data
        ]]);
        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);
        assert_eq!(handler.user_applications, vec![(
            ServiceIdentifier { country_id: 0xC, service_reference: 0x123, ecc: 0 },
            0,
            0x002,
        )]);
    }

    #[test]
    fn fig_0_17_prefers_the_language_caption_layout() {
        let fib = build_fib(&[&[
            0, 0x11,
            0xC1, 0x23,
            0b00110000,  // language and caption flags set
            0x08,        // language
            0x05,        // closed caption
            0x0A,        // programme type
        ]]);
        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);
        assert_eq!(handler.programme_types, vec![(
            ServiceIdentifier { country_id: 0xC, service_reference: 0x123, ecc: 0 },
            0x0A,
            Some(0x08),
            Some(0x05),
        )]);
    }

    #[test]
    fn fig_1_1_delivers_a_service_label() {
        let mut fig = vec![1u8, 0x01, 0xC1, 0x23];
        fig.extend_from_slice(b"Classic Rock    ");
        fig.extend_from_slice(&[0x00, 0x00]);
        let fib = build_fib(&[&fig]);

        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);
        assert_eq!(handler.labels.len(), 1);
        let (entity, charset, label) = &handler.labels[0];
        assert_eq!(*entity, LabelEntity::Service(ServiceIdentifier { country_id: 0xC, service_reference: 0x123, ecc: 0 }));
        assert_eq!(*charset, 0);
        assert_eq!(label, b"Classic Rock    ");
    }

    #[test]
    fn oversized_fig_aborts_the_rest_of_the_fib() {
        let mut fib = vec![0u8; NB_FIB_PAYLOAD_BYTES];
        // A type 0 FIG claiming 31 bytes of data near the end of the FIB
        fib[27] = 0b000_11111;
        let mut handler = RecordingHandler::default();
        FigProcessor::process_fib(&fib, 0, &mut handler);
        assert!(handler.ensembles.is_empty());
    }
}
