//! Interface between the FIG parser and the ensemble database.
//!
//! The parser owns all bit layout knowledge and hands semantic values to a
//! handler. The production handler is the database updater; tests plug in
//! recording handlers.

use crate::database::dab_database_entities::{
    EnsembleDateTime, EnsembleIdentifier, ServiceIdentifier, Subchannel, TransportMode,
};

/// Which entity a label FIG addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelEntity {
    Ensemble(EnsembleIdentifier),
    Service(ServiceIdentifier),
    ServiceComponent(ServiceIdentifier, u8),
}

/// Destination of a service component global definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentGlobalDefinition {
    Subchannel(u8),
    GlobalId(u16),
}

#[allow(unused_variables)]
pub trait FigHandler {
    fn on_ensemble(&mut self, id: EnsembleIdentifier, change_flags: u8, alarm_flag: bool, cif_upper: u8, cif_lower: u8, occurrence_change: Option<u8>) {}
    fn on_subchannel(&mut self, subchannel: Subchannel) {}
    fn on_subchannel_fec(&mut self, subchannel_id: u8, fec_scheme: u8) {}
    fn on_service_component_stream(&mut self, service_id: ServiceIdentifier, component_index: u8, transport_mode: TransportMode, service_type: u8, subchannel_id: u8, is_primary: bool, is_conditional_access: bool) {}
    fn on_service_component_packet(&mut self, service_id: ServiceIdentifier, component_index: u8, global_id: u16, is_primary: bool, is_conditional_access: bool) {}
    fn on_packet_component_definition(&mut self, global_id: u16, subchannel_id: u8, packet_address: u16, data_service_type: u8, is_data_group_transport: bool, ca_organisation: u16) {}
    fn on_component_conditional_access(&mut self, subchannel_id: u8, ca_organisation: u16) {}
    fn on_service_linkage(&mut self, linkage_set_number: u16, is_active_link: bool, is_hard_link: bool, is_international: bool, service_ids: &[u32]) {}
    fn on_configuration_information(&mut self, nb_services: u8, reconfiguration_count: u16) {}
    fn on_component_global_definition(&mut self, service_id: ServiceIdentifier, component_id: u8, definition: ComponentGlobalDefinition) {}
    fn on_country_lto(&mut self, local_time_offset: i8, extended_country_code: u8, international_table_id: u8) {}
    fn on_service_ecc(&mut self, extended_country_code: u8, service_ids: &[ServiceIdentifier]) {}
    fn on_datetime(&mut self, datetime: EnsembleDateTime) {}
    fn on_user_application(&mut self, service_id: ServiceIdentifier, component_id: u8, application_type: u16, application_data: &[u8]) {}
    fn on_programme_type(&mut self, service_id: ServiceIdentifier, programme_type: u8, language: Option<u8>, closed_caption: Option<u8>) {}
    fn on_alternative_frequency(&mut self, ensemble_id: EnsembleIdentifier, frequency_hz: u32, is_continuous_output: bool) {}
    fn on_other_ensemble_service(&mut self, service_id: ServiceIdentifier, ensemble_ids: &[EnsembleIdentifier]) {}
    fn on_label(&mut self, entity: LabelEntity, charset: u8, label: &[u8]) {}
}
