//! Keyed collection of ensemble entities.
//!
//! Single writer, many reader: the FIC thread mutates the database through
//! the updater while the UI and subchannel setup read snapshots behind a
//! shared lock owned by the radio orchestration.

use fxhash::FxHashMap;

use super::dab_database_entities::{
    LinkService, Ensemble, Service, ServiceComponent, ServiceIdentifier, Subchannel, SubchannelId,
};

#[derive(Debug, Default, Clone)]
pub struct DabDatabase {
    pub ensemble: Ensemble,
    services: FxHashMap<ServiceIdentifier, Service>,
    service_components: FxHashMap<(ServiceIdentifier, u8), ServiceComponent>,
    subchannels: FxHashMap<SubchannelId, Subchannel>,
    link_services: FxHashMap<u16, LinkService>,
}

impl DabDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_service(&mut self, id: ServiceIdentifier) -> &mut Service {
        self.services.entry(id).or_insert_with(|| Service { id, ..Service::default() })
    }

    pub fn get_service(&self, id: &ServiceIdentifier) -> Option<&Service> {
        self.services.get(id)
    }

    /// Services ordered by identifier for stable presentation.
    pub fn get_services(&self) -> Vec<&Service> {
        let mut services: Vec<&Service> = self.services.values().collect();
        services.sort_by_key(|service| service.id);
        services
    }

    pub fn get_or_create_service_component(&mut self, service_id: ServiceIdentifier, component_id: u8) -> &mut ServiceComponent {
        self.service_components
            .entry((service_id, component_id))
            .or_insert_with(|| ServiceComponent { service_id, component_id, ..ServiceComponent::default() })
    }

    pub fn get_service_component(&self, service_id: &ServiceIdentifier, component_id: u8) -> Option<&ServiceComponent> {
        self.service_components.get(&(*service_id, component_id))
    }

    pub fn get_service_components(&self, service_id: &ServiceIdentifier) -> Vec<&ServiceComponent> {
        let mut components: Vec<&ServiceComponent> = self
            .service_components
            .values()
            .filter(|component| component.service_id == *service_id)
            .collect();
        components.sort_by_key(|component| component.component_id);
        components
    }

    pub fn get_service_component_by_subchannel(&self, subchannel_id: SubchannelId) -> Option<&ServiceComponent> {
        self.service_components
            .values()
            .find(|component| component.subchannel_id == subchannel_id)
    }

    pub fn get_service_component_by_global_id(&self, global_id: u16) -> Option<&ServiceComponent> {
        self.service_components
            .values()
            .find(|component| component.global_id == global_id)
    }

    pub fn get_service_component_by_global_id_mut(&mut self, global_id: u16) -> Option<&mut ServiceComponent> {
        self.service_components
            .values_mut()
            .find(|component| component.global_id == global_id)
    }

    pub fn insert_subchannel(&mut self, subchannel: Subchannel) -> Option<Subchannel> {
        self.subchannels.insert(subchannel.id, subchannel)
    }

    pub fn get_subchannel(&self, id: SubchannelId) -> Option<&Subchannel> {
        self.subchannels.get(&id)
    }

    pub fn get_subchannel_mut(&mut self, id: SubchannelId) -> Option<&mut Subchannel> {
        self.subchannels.get_mut(&id)
    }

    pub fn get_subchannels(&self) -> Vec<&Subchannel> {
        let mut subchannels: Vec<&Subchannel> = self.subchannels.values().collect();
        subchannels.sort_by_key(|subchannel| subchannel.id);
        subchannels
    }

    pub fn get_or_create_link_service(&mut self, linkage_set_number: u16) -> &mut LinkService {
        self.link_services
            .entry(linkage_set_number)
            .or_insert_with(|| LinkService { linkage_set_number, ..LinkService::default() })
    }

    pub fn get_link_services(&self) -> Vec<&LinkService> {
        let mut links: Vec<&LinkService> = self.link_services.values().collect();
        links.sort_by_key(|link| link.linkage_set_number);
        links
    }
}
