use serde::Serialize;
use std::collections::{
    BTreeMap,
    HashMap,
};
use std::hash::Hash;

/// Free text labels attached to entities, counted once per occurrence.
///
/// Labels are accumulated over posterior draws, so a count is the number of
/// draws that supported the label.
#[derive(Debug, Clone)]
pub struct HdpAnnotation<T> {
    items: HashMap<T, BTreeMap<String, usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationRecord<T> {
    pub entity: T,
    pub labels: BTreeMap<String, usize>,
}

impl<T> Default for HdpAnnotation<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<T: Hash + Eq + Clone> HdpAnnotation<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotate(&mut self, entity: &T, label: impl Into<String>) {
        *self
            .items
            .entry(entity.clone())
            .or_default()
            .entry(label.into())
            .or_insert(0) += 1;
    }

    pub fn get(&self, entity: &T) -> Option<&BTreeMap<String, usize>> {
        self.items.get(entity)
    }

    pub fn count(&self, entity: &T, label: &str) -> usize {
        self.items
            .get(entity)
            .and_then(|labels| labels.get(label))
            .copied()
            .unwrap_or(0)
    }

    /// Number of annotated entities.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, &BTreeMap<String, usize>)> {
        self.items.iter()
    }
}

impl<T: Hash + Eq + Clone + Ord> HdpAnnotation<T> {
    /// All entries ordered by entity.
    pub fn records(&self) -> Vec<AnnotationRecord<T>> {
        let mut out: Vec<AnnotationRecord<T>> = self
            .items
            .iter()
            .map(|(entity, labels)| AnnotationRecord {
                entity: entity.clone(),
                labels: labels.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.entity.cmp(&b.entity));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let mut annots: HdpAnnotation<u32> = HdpAnnotation::new();
        annots.annotate(&1, "M+H");
        annots.annotate(&1, "M+H");
        annots.annotate(&1, "M+Na");
        annots.annotate(&0, "M+H");
        assert_eq!(annots.len(), 2);
        assert_eq!(annots.count(&1, "M+H"), 2);
        assert_eq!(annots.count(&1, "M+K"), 0);
        let records = annots.records();
        assert_eq!(records[0].entity, 0);
        assert_eq!(records[1].labels.len(), 2);
    }
}
