pub mod pad_data_group;
pub mod pad_dynamic_label;
pub mod pad_mot_processor;
pub mod pad_processor;
