use std::collections::BTreeMap;
use std::fmt;

use crate::config::EngineConfig;
use crate::error::ExpansionError;

/// Covariant/contravariant classification of an index position.
/// Models with a trivial field-space metric carry `None` throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variance {
    None,
    Covariant,
    Contravariant,
}

/// Range class of an abstract index.
///
/// Bare references use the letter convention (lowercase = field,
/// uppercase = phase space); index-dependent rules declare the class of
/// the labels introduced through their suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexClass {
    Field,
    PhaseSpace,
    Parameter,
}

impl IndexClass {
    pub fn for_label(label: char) -> Self {
        if label.is_ascii_uppercase() {
            IndexClass::PhaseSpace
        } else {
            IndexClass::Field
        }
    }

    pub fn range(&self, config: &EngineConfig) -> u32 {
        match self {
            IndexClass::Field => config.num_fields,
            IndexClass::PhaseSpace => 2 * config.num_fields,
            IndexClass::Parameter => config.num_params,
        }
    }
}

/// A declared abstract index within one half-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLiteral {
    pub label: char,
    /// Variance at the first occurrence; later occurrences may differ
    /// (that is the contraction pattern) and are tracked separately.
    pub variance: Variance,
    pub class: IndexClass,
    pub range: u32,
    /// True when any occurrence of the label is free.
    pub free: bool,
    /// Byte offset of the first declaration within the template line.
    pub declared_at: usize,
}

/// The canonical set of abstract indices declared by one half-line,
/// in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexDatabase {
    entries: Vec<IndexLiteral>,
}

impl IndexDatabase {
    pub fn new() -> Self {
        IndexDatabase::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: char) -> Option<&IndexLiteral> {
        self.entries.iter().find(|e| e.label == label)
    }

    pub fn contains(&self, label: char) -> bool {
        self.get(label).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexLiteral> {
        self.entries.iter()
    }

    /// The free indices, in declaration order; these are the ones an
    /// assignment set iterates over.
    pub fn free(&self) -> impl Iterator<Item = &IndexLiteral> {
        self.entries.iter().filter(|e| e.free)
    }

    /// Record one occurrence of `label`. Re-occurrence with the same
    /// range class merges: the index becomes free if any occurrence is
    /// free. A conflicting range class is a structured error tied to
    /// the re-declaration point.
    pub fn declare(
        &mut self,
        label: char,
        variance: Variance,
        free: bool,
        class: IndexClass,
        range: u32,
        offset: usize,
    ) -> Result<(), ExpansionError> {
        match self.entries.iter_mut().find(|e| e.label == label) {
            Some(existing) => {
                if existing.class != class {
                    return Err(ExpansionError::DuplicateIndex { label, offset });
                }
                existing.free |= free;
                Ok(())
            }
            None => {
                self.entries.push(IndexLiteral {
                    label,
                    variance,
                    class,
                    range,
                    free,
                    declared_at: offset,
                });
                Ok(())
            }
        }
    }

    /// Indices of `self` not present in `other` (RHS − LHS isolates
    /// the dummy indices the right side must enumerate itself).
    /// A shared label disagreeing in range class or canonical variance
    /// between the two sides is a structured error.
    pub fn difference(&self, other: &IndexDatabase) -> Result<IndexDatabase, ExpansionError> {
        let mut result = IndexDatabase::new();
        for entry in &self.entries {
            match other.get(entry.label) {
                Some(counterpart) => {
                    if counterpart.class != entry.class || counterpart.variance != entry.variance {
                        return Err(ExpansionError::IndexMismatch { label: entry.label });
                    }
                }
                None => result.entries.push(entry.clone()),
            }
        }
        Ok(result)
    }

    /// All concrete value assignments for the free indices, one map
    /// per combination. An empty database yields exactly one trivial
    /// assignment; a zero range yields none.
    pub fn assignments(&self) -> Vec<Assignment> {
        let mut set = vec![Assignment::new()];
        for literal in self.free() {
            let mut next = Vec::with_capacity(set.len() * literal.range as usize);
            for base in &set {
                for value in 0..literal.range {
                    let mut assignment = base.clone();
                    assignment.bind(literal.label, IndexValue::Numeric(value));
                    next.push(assignment);
                }
            }
            set = next;
        }
        set
    }

    /// The symbolic assignment used by the loop emitter: every free
    /// label maps to a loop variable named after itself.
    pub fn loop_assignment(&self) -> Assignment {
        let mut assignment = Assignment::new();
        for literal in self.free() {
            assignment.bind(literal.label, IndexValue::Loop(literal.label.to_string()));
        }
        assignment
    }
}

/// Concrete (or loop-symbolic) value taken by an abstract index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    Numeric(u32),
    Loop(String),
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Numeric(v) => write!(f, "{}", v),
            IndexValue::Loop(var) => write!(f, "{}", var),
        }
    }
}

/// One concrete mapping from index labels to values. Within one
/// assignment a label always maps to a single value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    values: BTreeMap<char, IndexValue>,
}

impl Assignment {
    pub fn new() -> Self {
        Assignment::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn bind(&mut self, label: char, value: IndexValue) {
        self.values.insert(label, value);
    }

    pub fn get(&self, label: char) -> Option<&IndexValue> {
        self.values.get(&label)
    }

    /// Union of two assignments over disjoint label sets; the sides
    /// have already been checked for structural compatibility.
    pub fn merged(&self, other: &Assignment) -> Assignment {
        let mut values = self.values.clone();
        for (label, value) in &other.values {
            values.insert(*label, value.clone());
        }
        Assignment { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::for_model(3, 2)
    }

    fn field_db(labels: &[char]) -> IndexDatabase {
        let cfg = config();
        let mut db = IndexDatabase::new();
        for &label in labels {
            let class = IndexClass::for_label(label);
            db.declare(label, Variance::None, true, class, class.range(&cfg), 0)
                .unwrap();
        }
        db
    }

    #[test]
    fn test_empty_database_yields_trivial_assignment() {
        let db = IndexDatabase::new();
        let set = db.assignments();
        assert_eq!(set.len(), 1);
        assert!(set[0].is_empty());
    }

    #[test]
    fn test_zero_range_yields_no_assignments() {
        let mut db = IndexDatabase::new();
        db.declare('a', Variance::None, true, IndexClass::Field, 0, 0)
            .unwrap();
        assert!(db.assignments().is_empty());
    }

    #[test]
    fn test_cardinality_is_product_of_ranges() {
        let db = field_db(&['a', 'b']);
        assert_eq!(db.assignments().len(), 9);

        // mixed classes: field (3) x phase space (6)
        let db = field_db(&['a', 'B']);
        assert_eq!(db.assignments().len(), 18);
    }

    #[test]
    fn test_assignment_values_are_consistent() {
        let db = field_db(&['a', 'b']);
        for assignment in db.assignments() {
            // every label bound exactly once, to a numeric value in range
            for label in ['a', 'b'] {
                match assignment.get(label) {
                    Some(IndexValue::Numeric(v)) => assert!(*v < 3),
                    other => panic!("unexpected binding {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_reoccurrence_merges_free_flag() {
        let mut db = IndexDatabase::new();
        db.declare('a', Variance::None, false, IndexClass::Field, 3, 0)
            .unwrap();
        db.declare('a', Variance::None, true, IndexClass::Field, 3, 5)
            .unwrap();
        assert_eq!(db.len(), 1);
        assert!(db.get('a').unwrap().free);
    }

    #[test]
    fn test_conflicting_class_is_duplicate_error() {
        let mut db = IndexDatabase::new();
        db.declare('a', Variance::None, true, IndexClass::Field, 3, 0)
            .unwrap();
        let err = db
            .declare('a', Variance::None, true, IndexClass::Parameter, 2, 7)
            .unwrap_err();
        assert_eq!(err, ExpansionError::DuplicateIndex { label: 'a', offset: 7 });
    }

    #[test]
    fn test_difference_removes_shared_labels() {
        let rhs = field_db(&['a', 'b']);
        let lhs = field_db(&['a']);
        let only = rhs.difference(&lhs).unwrap();
        assert_eq!(only.len(), 1);
        assert!(only.contains('b'));
    }

    #[test]
    fn test_difference_detects_variance_mismatch() {
        let mut lhs = IndexDatabase::new();
        lhs.declare('a', Variance::Contravariant, true, IndexClass::Field, 3, 0)
            .unwrap();
        let mut rhs = IndexDatabase::new();
        rhs.declare('a', Variance::Covariant, true, IndexClass::Field, 3, 0)
            .unwrap();
        let err = rhs.difference(&lhs).unwrap_err();
        assert_eq!(err, ExpansionError::IndexMismatch { label: 'a' });
    }

    #[test]
    fn test_loop_assignment_uses_labels_as_variables() {
        let db = field_db(&['a']);
        let assignment = db.loop_assignment();
        assert_eq!(assignment.get('a'), Some(&IndexValue::Loop("a".to_string())));
    }

    #[test]
    fn test_merged_assignments_are_disjoint_union() {
        let mut left = Assignment::new();
        left.bind('a', IndexValue::Numeric(1));
        let mut right = Assignment::new();
        right.bind('b', IndexValue::Numeric(2));
        let merged = left.merged(&right);
        assert_eq!(merged.get('a'), Some(&IndexValue::Numeric(1)));
        assert_eq!(merged.get('b'), Some(&IndexValue::Numeric(2)));
    }
}
