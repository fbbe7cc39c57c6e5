//! Read-access tracking for parsed segments.
//!
//! A [`Coverage`] sits beside each segment's fields and records, through interior mutability,
//! which field numbers were read and which reads asked for a field that was never populated.
//! The template engine only holds shared references to the message tree, so the tracker uses
//! `RefCell` sets instead of requiring `&mut` access.

use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeSet;

/// Field read tracker for one segment.
#[derive(Debug, Default)]
pub struct Coverage {
    accessed: RefCell<BTreeSet<usize>>,
    invalid: RefCell<BTreeSet<usize>>,
}

impl Coverage {
    /// Records a read of a populated field.
    pub fn mark_accessed(&self, index: usize) {
        self.accessed.borrow_mut().insert(index);
    }

    /// Records a read of a field number past the populated fields.
    pub fn mark_invalid(&self, index: usize) {
        self.invalid.borrow_mut().insert(index);
    }

    pub fn is_accessed(&self, index: usize) -> bool {
        self.accessed.borrow().contains(&index)
    }

    /// Field numbers in `1..=field_count` that were never read.
    pub fn untouched(&self, field_count: usize) -> Vec<usize> {
        let accessed = self.accessed.borrow();
        (1..=field_count).filter(|i| !accessed.contains(i)).collect()
    }

    /// Field numbers that were requested but not populated, in ascending order.
    pub fn out_of_range(&self) -> Vec<usize> {
        self.invalid.borrow().iter().copied().collect()
    }
}

/// A segment with populated fields that no template read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedSegment {
    #[serde(rename = "type")]
    pub segment_type: String,
    /// 0-based position of the segment in the message.
    pub line: usize,
    pub field: Vec<UnusedField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedField {
    /// 1-based HL7 field number.
    pub index: usize,
    pub component: Vec<UnusedComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedComponent {
    /// 1-based HL7 component number.
    pub index: usize,
    pub value: String,
}

/// A segment on which a template asked for fields that were not populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidAccess {
    #[serde(rename = "type")]
    pub segment_type: String,
    pub line: usize,
    /// 1-based HL7 field numbers.
    pub field: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_excludes_accessed_fields() {
        let coverage = Coverage::default();
        coverage.mark_accessed(2);
        coverage.mark_accessed(4);
        assert_eq!(coverage.untouched(5), vec![1, 3, 5]);
        assert!(coverage.is_accessed(2));
        assert!(!coverage.is_accessed(3));
    }

    #[test]
    fn out_of_range_is_sorted_and_deduplicated() {
        let coverage = Coverage::default();
        coverage.mark_invalid(40);
        coverage.mark_invalid(12);
        coverage.mark_invalid(40);
        assert_eq!(coverage.out_of_range(), vec![12, 40]);
    }
}
