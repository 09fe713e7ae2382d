use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::frame::Frame;

use super::attribute::{GroupAttribute, GroupKey};

/// Non-empty, ordered set of frames sharing one group key.
#[derive(Clone, Debug)]
pub struct FrameGroup {
    key: GroupKey,
    frames: Vec<Frame>,
}

impl FrameGroup {
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false: groups are only built around at least one frame.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

/// Partition `frames` by the values of `attributes`.
///
/// Frames keep their input order within a group and groups appear in order of
/// first occurrence. If any attribute in `uniform` takes more than one value
/// across the batch, nothing is returned: callers that need a single
/// homogeneous batch never see a partial grouping.
pub fn group_frames(
    frames: Vec<Frame>,
    attributes: &[GroupAttribute],
    uniform: &[GroupAttribute],
) -> Vec<FrameGroup> {
    if frames.is_empty() {
        return Vec::new();
    }

    for attr in uniform {
        let distinct: BTreeSet<_> = frames.iter().map(|f| attr.extract(f)).collect();
        if distinct.len() > 1 {
            warn!(
                attribute = %attr,
                values = distinct.len(),
                "Frames are not homogeneous, skipping batch"
            );
            return Vec::new();
        }
    }

    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<FrameGroup> = Vec::new();
    for frame in frames {
        let key = GroupKey::of(&frame, attributes);
        match index.get(&key) {
            Some(&i) => groups[i].frames.push(frame),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(FrameGroup {
                    key,
                    frames: vec![frame],
                });
            }
        }
    }
    groups
}

/// Group a batch that must be homogeneous in `attributes` and in frame shape.
///
/// Returns `None` when the batch is empty or diverges in any of them.
pub fn single_group(frames: Vec<Frame>, attributes: &[GroupAttribute]) -> Option<FrameGroup> {
    let mut uniform = attributes.to_vec();
    for shape in [GroupAttribute::Nx, GroupAttribute::Ny] {
        if !uniform.contains(&shape) {
            uniform.push(shape);
        }
    }
    group_frames(frames, attributes, &uniform).into_iter().next()
}
