pub mod attribute;
pub mod engine;

pub use attribute::{parse_attributes, AttributeValue, GroupAttribute, GroupKey};
pub use engine::{group_frames, single_group, FrameGroup};
