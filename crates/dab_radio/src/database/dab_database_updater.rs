//! Applies parsed FIGs to the ensemble database.
//!
//! Upsert semantics: each FIG mutates its entity and partial observations
//! converge to the full record over a few frames. When two FIGs in the same
//! CIF touch the same field the later one wins. A dirty flag coalesces an
//! update event per accepted FIB for the orchestration layer to forward.

use log::{debug, info};

use crate::constants::charsets::convert_label_to_utf8;
use crate::database::dab_database::DabDatabase;
use crate::database::dab_database_entities::{
    AlternativeFrequency, EnsembleDateTime, EnsembleIdentifier, ServiceIdentifier, Subchannel,
    TransportMode,
};
use crate::fic::fig_handler::{ComponentGlobalDefinition, FigHandler, LabelEntity};

#[derive(Debug, Default, Clone, Copy)]
pub struct DatabaseUpdaterStatistics {
    /// Handler invocations that changed the database.
    pub nb_updates: usize,
    /// Handler invocations that matched the stored record.
    pub nb_unchanged: usize,
}

#[derive(Default)]
pub struct DabDatabaseUpdater {
    database: DabDatabase,
    statistics: DatabaseUpdaterStatistics,
    is_dirty: bool,
    /// Set when FIG 0/7 reports a new reconfiguration count. Subchannel
    /// pipelines whose descriptors changed must be reseeded.
    is_configuration_changed: bool,
    /// Subchannels rewritten by the FIC since the last poll.
    changed_subchannels: Vec<u8>,
}

impl DabDatabaseUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_database(&self) -> &DabDatabase {
        &self.database
    }

    pub fn get_statistics(&self) -> DatabaseUpdaterStatistics {
        self.statistics
    }

    /// Clears and returns the coalesced update flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.is_dirty)
    }

    pub fn take_configuration_changed(&mut self) -> bool {
        std::mem::take(&mut self.is_configuration_changed)
    }

    pub fn take_changed_subchannels(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.changed_subchannels)
    }

    fn apply<T: PartialEq + Copy>(slot: &mut T, value: T, changed: &mut bool) {
        if *slot != value {
            *slot = value;
            *changed = true;
        }
    }

    fn account(&mut self, changed: bool) {
        if changed {
            self.statistics.nb_updates += 1;
            self.is_dirty = true;
        } else {
            self.statistics.nb_unchanged += 1;
        }
    }
}

impl FigHandler for DabDatabaseUpdater {
    fn on_ensemble(&mut self, id: EnsembleIdentifier, _change_flags: u8, alarm_flag: bool, cif_upper: u8, cif_lower: u8, _occurrence_change: Option<u8>) {
        let mut changed = false;
        let ensemble = &mut self.database.ensemble;
        Self::apply(&mut ensemble.id, id, &mut changed);
        Self::apply(&mut ensemble.alarm_flag, alarm_flag, &mut changed);
        // The CIF counter advances every frame; it refreshes the record
        // without counting as a database mutation.
        ensemble.cif_upper = cif_upper;
        ensemble.cif_lower = cif_lower;
        self.account(changed);
    }

    fn on_subchannel(&mut self, subchannel: Subchannel) {
        match self.database.get_subchannel_mut(subchannel.id) {
            Some(stored) => {
                // Preserve the FEC scheme learnt from FIG 0/14
                let updated = Subchannel { fec_scheme: stored.fec_scheme, ..subchannel };
                if *stored != updated {
                    info!("subchannel {} descriptor rewritten by the FIC", subchannel.id);
                    *stored = updated;
                    self.changed_subchannels.push(subchannel.id);
                    self.account(true);
                } else {
                    self.account(false);
                }
            },
            None => {
                self.database.insert_subchannel(subchannel);
                self.changed_subchannels.push(subchannel.id);
                self.account(true);
            },
        }
    }

    fn on_subchannel_fec(&mut self, subchannel_id: u8, fec_scheme: u8) {
        let mut changed = false;
        if let Some(subchannel) = self.database.get_subchannel_mut(subchannel_id) {
            Self::apply(&mut subchannel.fec_scheme, fec_scheme, &mut changed);
        }
        self.account(changed);
    }

    fn on_service_component_stream(&mut self, service_id: ServiceIdentifier, component_index: u8, transport_mode: TransportMode, service_type: u8, subchannel_id: u8, is_primary: bool, is_conditional_access: bool) {
        self.database.get_or_create_service(service_id);
        let component = self.database.get_or_create_service_component(service_id, component_index);
        let mut changed = false;
        Self::apply(&mut component.transport_mode, transport_mode, &mut changed);
        Self::apply(&mut component.service_type, service_type, &mut changed);
        Self::apply(&mut component.subchannel_id, subchannel_id, &mut changed);
        Self::apply(&mut component.is_primary, is_primary, &mut changed);
        Self::apply(&mut component.is_conditional_access, is_conditional_access, &mut changed);
        self.account(changed);
    }

    fn on_service_component_packet(&mut self, service_id: ServiceIdentifier, component_index: u8, global_id: u16, is_primary: bool, is_conditional_access: bool) {
        self.database.get_or_create_service(service_id);
        let component = self.database.get_or_create_service_component(service_id, component_index);
        let mut changed = false;
        Self::apply(&mut component.transport_mode, TransportMode::PacketData, &mut changed);
        Self::apply(&mut component.global_id, global_id, &mut changed);
        Self::apply(&mut component.is_primary, is_primary, &mut changed);
        Self::apply(&mut component.is_conditional_access, is_conditional_access, &mut changed);
        self.account(changed);
    }

    fn on_packet_component_definition(&mut self, global_id: u16, subchannel_id: u8, packet_address: u16, data_service_type: u8, _is_data_group_transport: bool, _ca_organisation: u16) {
        let mut changed = false;
        if let Some(component) = self.database.get_service_component_by_global_id_mut(global_id) {
            Self::apply(&mut component.subchannel_id, subchannel_id, &mut changed);
            Self::apply(&mut component.packet_address, packet_address, &mut changed);
            Self::apply(&mut component.service_type, data_service_type, &mut changed);
        } else {
            debug!("fig 0/3 definition for unknown packet component SCId={}", global_id);
        }
        self.account(changed);
    }

    fn on_component_conditional_access(&mut self, subchannel_id: u8, _ca_organisation: u16) {
        debug!("fig 0/4 conditional access on subchannel {}", subchannel_id);
        self.account(false);
    }

    fn on_service_linkage(&mut self, linkage_set_number: u16, is_active_link: bool, is_hard_link: bool, is_international: bool, service_ids: &[u32]) {
        let link = self.database.get_or_create_link_service(linkage_set_number);
        let mut changed = link.is_active_link != is_active_link
            || link.is_hard_link != is_hard_link
            || link.is_international != is_international;
        link.is_active_link = is_active_link;
        link.is_hard_link = is_hard_link;
        link.is_international = is_international;
        for id in service_ids {
            if !link.service_ids.contains(id) {
                link.service_ids.push(*id);
                changed = true;
            }
        }
        self.account(changed);
    }

    fn on_configuration_information(&mut self, nb_services: u8, reconfiguration_count: u16) {
        let mut changed = false;
        let ensemble = &mut self.database.ensemble;
        Self::apply(&mut ensemble.nb_services, nb_services, &mut changed);
        if ensemble.reconfiguration_count != reconfiguration_count {
            ensemble.reconfiguration_count = reconfiguration_count;
            self.is_configuration_changed = true;
            changed = true;
            info!("ensemble reconfiguration count advanced to {}", reconfiguration_count);
        }
        self.account(changed);
    }

    fn on_component_global_definition(&mut self, service_id: ServiceIdentifier, component_id: u8, definition: ComponentGlobalDefinition) {
        self.database.get_or_create_service(service_id);
        let component = self.database.get_or_create_service_component(service_id, component_id);
        let mut changed = false;
        match definition {
            ComponentGlobalDefinition::Subchannel(subchannel_id) => {
                Self::apply(&mut component.subchannel_id, subchannel_id, &mut changed);
            },
            ComponentGlobalDefinition::GlobalId(global_id) => {
                Self::apply(&mut component.global_id, global_id, &mut changed);
            },
        }
        self.account(changed);
    }

    fn on_country_lto(&mut self, local_time_offset: i8, extended_country_code: u8, international_table_id: u8) {
        let mut changed = false;
        let ensemble = &mut self.database.ensemble;
        Self::apply(&mut ensemble.local_time_offset, local_time_offset, &mut changed);
        Self::apply(&mut ensemble.extended_country_code, extended_country_code, &mut changed);
        Self::apply(&mut ensemble.international_table_id, international_table_id, &mut changed);
        self.account(changed);
    }

    fn on_service_ecc(&mut self, extended_country_code: u8, service_ids: &[ServiceIdentifier]) {
        let mut changed = false;
        for id in service_ids {
            let service = self.database.get_or_create_service(*id);
            if service.id.ecc != extended_country_code {
                service.id.ecc = extended_country_code;
                changed = true;
            }
        }
        self.account(changed);
    }

    fn on_datetime(&mut self, datetime: EnsembleDateTime) {
        let ensemble = &mut self.database.ensemble;
        let changed = ensemble.datetime != Some(datetime);
        ensemble.datetime = Some(datetime);
        self.account(changed);
    }

    fn on_user_application(&mut self, service_id: ServiceIdentifier, component_id: u8, application_type: u16, _application_data: &[u8]) {
        self.database.get_or_create_service(service_id);
        let component = self.database.get_or_create_service_component(service_id, component_id);
        let mut changed = false;
        if !component.user_application_types.contains(&application_type) {
            component.user_application_types.push(application_type);
            changed = true;
        }
        self.account(changed);
    }

    fn on_programme_type(&mut self, service_id: ServiceIdentifier, programme_type: u8, language: Option<u8>, closed_caption: Option<u8>) {
        let service = self.database.get_or_create_service(service_id);
        let mut changed = false;
        Self::apply(&mut service.programme_type, programme_type, &mut changed);
        if let Some(language) = language {
            Self::apply(&mut service.language, language, &mut changed);
        }
        if let Some(closed_caption) = closed_caption {
            Self::apply(&mut service.closed_caption, closed_caption, &mut changed);
        }
        self.account(changed);
    }

    fn on_alternative_frequency(&mut self, ensemble_id: EnsembleIdentifier, frequency_hz: u32, is_continuous_output: bool) {
        let entry = AlternativeFrequency { ensemble_id, frequency_hz, is_continuous_output };
        let frequencies = &mut self.database.ensemble.alternative_frequencies;
        if !frequencies.contains(&entry) {
            frequencies.push(entry);
            self.account(true);
        } else {
            self.account(false);
        }
    }

    fn on_other_ensemble_service(&mut self, service_id: ServiceIdentifier, ensemble_ids: &[EnsembleIdentifier]) {
        let service = self.database.get_or_create_service(service_id);
        let mut changed = false;
        for id in ensemble_ids {
            if !service.other_ensembles.contains(id) {
                service.other_ensembles.push(*id);
                changed = true;
            }
        }
        self.account(changed);
    }

    fn on_label(&mut self, entity: LabelEntity, charset: u8, label: &[u8]) {
        let label = convert_label_to_utf8(charset, label);
        let mut changed = false;
        match entity {
            LabelEntity::Ensemble(id) => {
                let ensemble = &mut self.database.ensemble;
                if ensemble.id == EnsembleIdentifier::default() {
                    ensemble.id = id;
                }
                if ensemble.label != label {
                    ensemble.label = label;
                    ensemble.label_charset = charset;
                    changed = true;
                }
            },
            LabelEntity::Service(id) => {
                let service = self.database.get_or_create_service(id);
                if service.label != label {
                    service.label = label;
                    service.label_charset = charset;
                    changed = true;
                }
            },
            LabelEntity::ServiceComponent(service_id, component_id) => {
                let component = self.database.get_or_create_service_component(service_id, component_id);
                if component.label != label {
                    component.label = label;
                    component.label_charset = charset;
                    changed = true;
                }
            },
        }
        self.account(changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::dab_database_entities::{SubchannelProtection, USER_APPLICATION_TYPE_SLIDESHOW};

    #[test]
    fn sequential_observations_converge_to_the_full_record() {
        let mut updater = DabDatabaseUpdater::new();
        let service_id = ServiceIdentifier { country_id: 0xC, service_reference: 0x123, ecc: 0 };

        updater.on_service_component_stream(service_id, 0, TransportMode::StreamAudio, 63, 9, true, false);
        updater.on_subchannel(Subchannel {
            id: 9,
            start_address: 0,
            length_cu: 6,
            protection: SubchannelProtection::Eep { option: 0, protection_level: 2 },
            fec_scheme: 0,
        });
        updater.on_label(LabelEntity::Service(service_id), 0, b"Jazz FM         ");
        updater.on_user_application(service_id, 0, USER_APPLICATION_TYPE_SLIDESHOW, &[]);
        assert_eq!(updater.get_statistics().nb_updates, 4);

        // Carousel repetition leaves the records untouched
        updater.on_user_application(service_id, 0, USER_APPLICATION_TYPE_SLIDESHOW, &[]);
        assert_eq!(updater.get_statistics().nb_unchanged, 1);

        let database = updater.get_database();
        let service = database.get_service(&service_id).unwrap();
        assert_eq!(service.label, "Jazz FM");
        let component = database.get_service_component(&service_id, 0).unwrap();
        assert_eq!(component.subchannel_id, 9);
        assert!(component.is_slideshow());
        assert!(database.get_subchannel(9).is_some());
    }

    #[test]
    fn dirty_flag_coalesces_and_clears() {
        let mut updater = DabDatabaseUpdater::new();
        let id = EnsembleIdentifier { country_id: 0xC, ensemble_reference: 0x012 };
        updater.on_ensemble(id, 0, false, 5, 50, None);
        assert!(updater.take_dirty());
        assert!(!updater.take_dirty());

        // Repeating the same FIG only advances the CIF counter
        updater.on_ensemble(id, 0, false, 5, 51, None);
        assert!(!updater.take_dirty());
        assert_eq!(updater.get_database().ensemble.cif_lower, 51);
    }

    #[test]
    fn reconfiguration_count_change_reseeds_pipelines() {
        let mut updater = DabDatabaseUpdater::new();
        updater.on_configuration_information(4, 1);
        assert!(updater.take_configuration_changed());
        updater.on_configuration_information(4, 1);
        assert!(!updater.take_configuration_changed());
        updater.on_configuration_information(4, 2);
        assert!(updater.take_configuration_changed());
    }

    #[test]
    fn rewritten_subchannel_descriptor_is_reported() {
        let mut updater = DabDatabaseUpdater::new();
        let subchannel = Subchannel {
            id: 4,
            start_address: 100,
            length_cu: 12,
            protection: SubchannelProtection::Eep { option: 0, protection_level: 2 },
            fec_scheme: 0,
        };
        updater.on_subchannel(subchannel);
        assert_eq!(updater.take_changed_subchannels(), vec![4]);

        // Same descriptor: nothing to report
        updater.on_subchannel(subchannel);
        assert!(updater.take_changed_subchannels().is_empty());

        // Moved subchannel: pipeline must be rebuilt
        updater.on_subchannel(Subchannel { start_address: 200, ..subchannel });
        assert_eq!(updater.take_changed_subchannels(), vec![4]);
    }

    #[test]
    fn later_fig_in_the_same_cif_wins() {
        let mut updater = DabDatabaseUpdater::new();
        let service_id = ServiceIdentifier { country_id: 1, service_reference: 5, ecc: 0 };
        updater.on_programme_type(service_id, 10, None, None);
        updater.on_programme_type(service_id, 12, Some(8), None);
        let service = updater.get_database().get_service(&service_id).unwrap();
        assert_eq!(service.programme_type, 12);
        assert_eq!(service.language, 8);
    }
}
