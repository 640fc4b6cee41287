// ===========================================================================
// Identifier allocation for derived records
// ===========================================================================
use super::ids::{JointId, LineId, NodeId, TagId};
use crate::store::IdWatermarks;

/// Dispenses fresh identifiers for the tables stages add records to.
/// Station ids are only ever kept or dropped by merges.
/// Loaded records are observed first so derived records never collide with
/// identifiers already present in the store.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_node: u64,
    next_line: u64,
    next_joint: u64,
    next_tag: u64,
}

impl IdAllocator {
    pub fn observe_node(&mut self, id: NodeId) {
        self.next_node = self.next_node.max(id.0 + 1);
    }

    pub fn observe_line(&mut self, id: LineId) {
        self.next_line = self.next_line.max(id.0 + 1);
    }

    pub fn observe_joint(&mut self, id: JointId) {
        self.next_joint = self.next_joint.max(id.0 + 1);
    }

    pub fn observe_tag(&mut self, id: TagId) {
        self.next_tag = self.next_tag.max(id.0 + 1);
    }

    pub fn observe_watermarks(&mut self, marks: &IdWatermarks) {
        self.observe_node(NodeId(marks.node));
        self.observe_line(LineId(marks.line));
        self.observe_joint(JointId(marks.joint));
        self.observe_tag(TagId(marks.tag));
    }

    pub fn node(&mut self) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        NodeId(id)
    }

    pub fn line(&mut self) -> LineId {
        let id = self.next_line;
        self.next_line += 1;
        LineId(id)
    }

    pub fn joint(&mut self) -> JointId {
        let id = self.next_joint;
        self.next_joint += 1;
        JointId(id)
    }

    pub fn tag(&mut self) -> TagId {
        let id = self.next_tag;
        self.next_tag += 1;
        TagId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_ids_are_never_reissued() {
        let mut ids = IdAllocator::default();
        ids.observe_line(LineId(41));
        ids.observe_line(LineId(7));
        assert_eq!(ids.line(), LineId(42));
        assert_eq!(ids.line(), LineId(43));
        assert_eq!(ids.joint(), JointId(0));
    }
}
