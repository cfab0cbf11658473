//! Two level MOT assembly keyed by transport id.
//!
//! Each object owns a header assembler and a body assembler. Once both
//! directions complete, the header is decoded and the finished entity is
//! published. Stale transport ids are garbage collected so an endlessly
//! rotating carousel cannot grow the map without bound.

use fxhash::FxHashMap;
use log::{debug, warn};

use crate::mot::mot_assembler::MotAssembler;
use crate::mot::mot_entities::{parse_mot_header, MotEntity, MotTransportId};

/// MSC data group types carrying MOT segments.
pub const DATA_GROUP_TYPE_MOT_HEADER: u8 = 3;
pub const DATA_GROUP_TYPE_MOT_BODY: u8 = 4;

/// Transport ids retained before the oldest entry is collected.
pub const NB_TRANSPORT_ID_WINDOW: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MotAssemblyStatus {
    WaitingHeader,
    WaitingBody,
    Complete,
}

struct MotEntityAssembler {
    header: MotAssembler,
    body: MotAssembler,
    status: MotAssemblyStatus,
}

impl MotEntityAssembler {
    fn new() -> Self {
        Self {
            header: MotAssembler::new(),
            body: MotAssembler::new(),
            status: MotAssemblyStatus::WaitingHeader,
        }
    }
}

type EntityCallback = Box<dyn FnMut(&MotEntity) + Send>;

#[derive(Default)]
pub struct MotProcessor {
    assemblers: FxHashMap<MotTransportId, MotEntityAssembler>,
    arrival_order: Vec<MotTransportId>,
    entity_callbacks: Vec<EntityCallback>,
}

impl MotProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_entity(&mut self, callback: impl FnMut(&MotEntity) + Send + 'static) {
        self.entity_callbacks.push(Box::new(callback));
    }

    /// Consumes one MOT segment delivered by an MSC data group.
    pub fn process_segment(
        &mut self,
        data_group_type: u8,
        transport_id: MotTransportId,
        segment_number: u16,
        is_last_segment: bool,
        buf: &[u8],
    ) {
        if data_group_type != DATA_GROUP_TYPE_MOT_HEADER && data_group_type != DATA_GROUP_TYPE_MOT_BODY {
            debug!("data group type {} ignored by the MOT layer", data_group_type);
            return;
        }

        if !self.assemblers.contains_key(&transport_id) {
            self.assemblers.insert(transport_id, MotEntityAssembler::new());
            self.arrival_order.push(transport_id);
            self.collect_stale_entries();
        }
        let assembler = self.assemblers.get_mut(&transport_id).expect("Assembler was just inserted");

        let direction = match data_group_type {
            DATA_GROUP_TYPE_MOT_HEADER => &mut assembler.header,
            _ => &mut assembler.body,
        };
        if is_last_segment {
            direction.set_total_segments(segment_number as usize + 1);
        }
        if !direction.add_segment(segment_number as usize, buf) {
            warn!("transport_id={} conflicting segment {}, restarting object", transport_id, segment_number);
            direction.reset();
            return;
        }

        if assembler.status == MotAssemblyStatus::WaitingHeader && assembler.header.check_complete() {
            assembler.status = MotAssemblyStatus::WaitingBody;
        }
        if assembler.status == MotAssemblyStatus::WaitingBody && assembler.body.check_complete() {
            assembler.status = MotAssemblyStatus::Complete;
            let header_buf = assembler.header.get_data();
            let body = assembler.body.get_data();
            match parse_mot_header(&header_buf) {
                Some(header) => {
                    if header.body_size as usize != body.len() {
                        warn!("transport_id={} header announces {} body bytes but {} were assembled", transport_id, header.body_size, body.len());
                    }
                    let entity = MotEntity { transport_id, header, body };
                    for callback in self.entity_callbacks.iter_mut() {
                        callback(&entity);
                    }
                },
                None => warn!("transport_id={} header failed to decode", transport_id),
            }
        }
    }

    fn collect_stale_entries(&mut self) {
        while self.arrival_order.len() > NB_TRANSPORT_ID_WINDOW {
            let stale = self.arrival_order.remove(0);
            self.assemblers.remove(&stale);
            debug!("transport_id={} collected from the carousel window", stale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::mot_entities::{build_mot_header, CONTENT_SUBTYPE_IMAGE_JFIF, CONTENT_TYPE_IMAGE};
    use std::sync::{Arc, Mutex};

    fn collect_entities(processor: &mut MotProcessor) -> Arc<Mutex<Vec<MotEntity>>> {
        let entities = Arc::new(Mutex::new(Vec::new()));
        processor.subscribe_entity({
            let entities = entities.clone();
            move |entity| entities.lock().unwrap().push(entity.clone())
        });
        entities
    }

    #[test]
    fn header_and_body_segments_produce_an_entity() {
        let mut processor = MotProcessor::new();
        let entities = collect_entities(&mut processor);

        let body = b"jpeg-image-bytes".to_vec();
        let header = build_mot_header(body.len() as u32, CONTENT_TYPE_IMAGE, CONTENT_SUBTYPE_IMAGE_JFIF, "mount.jpg");

        // Body arrives before the header, segments out of order
        processor.process_segment(DATA_GROUP_TYPE_MOT_BODY, 42, 1, true, &body[8..]);
        processor.process_segment(DATA_GROUP_TYPE_MOT_BODY, 42, 0, false, &body[..8]);
        processor.process_segment(DATA_GROUP_TYPE_MOT_HEADER, 42, 0, true, &header);

        let entities = entities.lock().unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].transport_id, 42);
        assert_eq!(entities[0].header.content_name, "mount.jpg");
        assert_eq!(entities[0].body, body);
    }

    #[test]
    fn interleaved_transport_ids_assemble_independently() {
        let mut processor = MotProcessor::new();
        let entities = collect_entities(&mut processor);

        let body_a = b"object-a".to_vec();
        let body_b = b"object-b".to_vec();
        let header_a = build_mot_header(body_a.len() as u32, CONTENT_TYPE_IMAGE, CONTENT_SUBTYPE_IMAGE_JFIF, "a.jpg");
        let header_b = build_mot_header(body_b.len() as u32, CONTENT_TYPE_IMAGE, CONTENT_SUBTYPE_IMAGE_JFIF, "b.jpg");

        processor.process_segment(DATA_GROUP_TYPE_MOT_HEADER, 1, 0, true, &header_a);
        processor.process_segment(DATA_GROUP_TYPE_MOT_HEADER, 2, 0, true, &header_b);
        processor.process_segment(DATA_GROUP_TYPE_MOT_BODY, 2, 0, true, &body_b);
        processor.process_segment(DATA_GROUP_TYPE_MOT_BODY, 1, 0, true, &body_a);

        let entities = entities.lock().unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].header.content_name, "b.jpg");
        assert_eq!(entities[1].header.content_name, "a.jpg");
    }

    #[test]
    fn stale_transport_ids_are_garbage_collected() {
        let mut processor = MotProcessor::new();
        let entities = collect_entities(&mut processor);

        // A partial object that will age out of the window
        processor.process_segment(DATA_GROUP_TYPE_MOT_BODY, 1000, 0, false, b"partial");
        for transport_id in 0..NB_TRANSPORT_ID_WINDOW as u16 {
            processor.process_segment(DATA_GROUP_TYPE_MOT_BODY, transport_id, 0, false, b"filler");
        }

        // The evicted object lost its first segment, so completing it needs
        // every segment again from the fresh carousel rotation.
        let header = build_mot_header(8, CONTENT_TYPE_IMAGE, CONTENT_SUBTYPE_IMAGE_JFIF, "late.jpg");
        processor.process_segment(DATA_GROUP_TYPE_MOT_HEADER, 1000, 0, true, &header);
        processor.process_segment(DATA_GROUP_TYPE_MOT_BODY, 1000, 1, true, b"body");
        assert!(entities.lock().unwrap().is_empty());

        processor.process_segment(DATA_GROUP_TYPE_MOT_BODY, 1000, 0, false, b"late");
        let entities = entities.lock().unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].body, b"latebody");
    }
}
