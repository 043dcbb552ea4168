//! Per-class confidence policy and the confidence gate.
//!
//! The gate is the first and cheapest filter in the pipeline. A detection that
//! fails it never reaches region refinement, face extraction, or the alert path.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::detect::Detection;

/// Threshold applied to class ids with no explicit policy entry.
pub const DEFAULT_THRESHOLD: f32 = 0.25;

/// Display name for class ids with no explicit policy entry.
pub const UNLISTED_CLASS_NAME: &str = "Unknown";

/// What a detector class means for the exam.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassRole {
    /// Annotated only.
    #[default]
    Benign,
    /// A held object (phone). The evidence box is expanded to find the holder's face.
    HeldObject,
    /// A person or posture. The box already contains identifiable features.
    Posture,
}

impl ClassRole {
    pub fn is_violation(self) -> bool {
        !matches!(self, ClassRole::Benign)
    }

    /// Role implied by the exam model's class names when none is configured.
    pub fn for_class_name(name: &str) -> Self {
        let name = name.trim();
        if name.eq_ignore_ascii_case("phone") {
            ClassRole::HeldObject
        } else if name.eq_ignore_ascii_case("cheating") {
            ClassRole::Posture
        } else {
            ClassRole::Benign
        }
    }
}

/// Policy for a single detector class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassPolicy {
    pub id: u32,
    pub name: String,
    pub threshold: f32,
    pub role: ClassRole,
}

impl ClassPolicy {
    pub fn new(id: u32, name: &str, threshold: f32, role: ClassRole) -> Self {
        Self {
            id,
            name: name.to_string(),
            threshold,
            role,
        }
    }
}

/// Immutable class-id -> policy table, validated at construction.
#[derive(Clone, Debug)]
pub struct PolicyTable {
    classes: BTreeMap<u32, ClassPolicy>,
    fallback: ClassPolicy,
}

impl PolicyTable {
    pub fn new(classes: Vec<ClassPolicy>, default_threshold: f32) -> Result<Self> {
        validate_threshold(default_threshold)
            .map_err(|e| anyhow!("default threshold: {}", e))?;

        let mut table = BTreeMap::new();
        for class in classes {
            validate_threshold(class.threshold)
                .map_err(|e| anyhow!("class {} ({}): {}", class.id, class.name, e))?;
            if class.name.trim().is_empty() {
                return Err(anyhow!("class {} has an empty display name", class.id));
            }
            let id = class.id;
            if table.insert(id, class).is_some() {
                return Err(anyhow!("class {} is configured more than once", id));
            }
        }

        if !table.values().any(|class| class.role.is_violation()) {
            return Err(anyhow!(
                "no class is configured as a violation (role held_object or posture)"
            ));
        }

        Ok(Self {
            classes: table,
            fallback: ClassPolicy::new(
                u32::MAX,
                UNLISTED_CLASS_NAME,
                default_threshold,
                ClassRole::Benign,
            ),
        })
    }

    /// The exam model's table: class0/class1 at 0.9, phone at 0.30, cheating at 0.50.
    pub fn exam_default() -> Self {
        Self {
            classes: default_classes()
                .into_iter()
                .map(|class| (class.id, class))
                .collect(),
            fallback: ClassPolicy::new(
                u32::MAX,
                UNLISTED_CLASS_NAME,
                DEFAULT_THRESHOLD,
                ClassRole::Benign,
            ),
        }
    }

    /// Policy for `class_id`, or the unlisted-class fallback.
    pub fn class(&self, class_id: u32) -> &ClassPolicy {
        self.classes.get(&class_id).unwrap_or(&self.fallback)
    }

    pub fn get(&self, class_id: u32) -> Option<&ClassPolicy> {
        self.classes.get(&class_id)
    }

    pub fn threshold_for(&self, class_id: u32) -> f32 {
        self.class(class_id).threshold
    }

    pub fn default_threshold(&self) -> f32 {
        self.fallback.threshold
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassPolicy> {
        self.classes.values()
    }

    /// Confidence gate for one detection.
    pub fn accept(&self, detection: &Detection) -> bool {
        accept(detection, self)
    }

    /// Class ids in `0..class_count` that fall back to the default threshold.
    pub fn uncovered(&self, class_count: u32) -> Vec<u32> {
        (0..class_count)
            .filter(|id| !self.classes.contains_key(id))
            .collect()
    }
}

/// Confidence gate: `confidence >= threshold_for(class_id)`.
///
/// NaN confidences never pass.
pub fn accept(detection: &Detection, policy: &PolicyTable) -> bool {
    detection.confidence >= policy.threshold_for(detection.class_id)
}

pub fn default_classes() -> Vec<ClassPolicy> {
    vec![
        ClassPolicy::new(0, "class0", 0.9, ClassRole::Benign),
        ClassPolicy::new(1, "class1", 0.9, ClassRole::Benign),
        ClassPolicy::new(2, "phone", 0.30, ClassRole::HeldObject),
        ClassPolicy::new(3, "cheating", 0.50, ClassRole::Posture),
    ]
}

fn validate_threshold(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(anyhow!("threshold must be within [0, 1] (got {})", threshold));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::BoundingBox;

    fn det(class_id: u32, confidence: f32) -> Detection {
        Detection {
            class_id,
            confidence,
            bbox: BoundingBox::new(0, 0, 10, 10),
        }
    }

    #[test]
    fn gate_uses_per_class_thresholds() {
        let policy = PolicyTable::exam_default();
        assert!(policy.accept(&det(2, 0.30)));
        assert!(policy.accept(&det(2, 0.35)));
        assert!(!policy.accept(&det(2, 0.29)));
        assert!(policy.accept(&det(3, 0.50)));
        assert!(!policy.accept(&det(3, 0.45)));
        assert!(!policy.accept(&det(0, 0.89)));
    }

    #[test]
    fn unlisted_classes_fall_back_to_default() {
        let policy = PolicyTable::exam_default();
        assert_eq!(policy.threshold_for(17), DEFAULT_THRESHOLD);
        assert_eq!(policy.class(17).name, UNLISTED_CLASS_NAME);
        assert_eq!(policy.class(17).role, ClassRole::Benign);
        assert!(policy.accept(&det(17, 0.25)));
        assert!(!policy.accept(&det(17, 0.24)));
    }

    #[test]
    fn nan_confidence_is_rejected() {
        let policy = PolicyTable::exam_default();
        assert!(!policy.accept(&det(2, f32::NAN)));
    }

    #[test]
    fn construction_validates_entries() {
        assert!(PolicyTable::new(default_classes(), 0.25).is_ok());
        assert!(PolicyTable::new(default_classes(), 1.5).is_err());
        assert!(PolicyTable::new(vec![ClassPolicy::new(0, "x", -0.1, ClassRole::Benign)], 0.25).is_err());
        assert!(PolicyTable::new(vec![ClassPolicy::new(0, " ", 0.5, ClassRole::Benign)], 0.25).is_err());
        let dup = vec![
            ClassPolicy::new(2, "phone", 0.3, ClassRole::HeldObject),
            ClassPolicy::new(2, "phone2", 0.4, ClassRole::HeldObject),
        ];
        assert!(PolicyTable::new(dup, 0.25).is_err());
    }

    #[test]
    fn table_without_violation_classes_is_rejected() {
        let benign = vec![
            ClassPolicy::new(0, "class0", 0.9, ClassRole::Benign),
            ClassPolicy::new(2, "phone", 0.3, ClassRole::Benign),
        ];
        let err = PolicyTable::new(benign, 0.25).unwrap_err();
        assert!(err.to_string().contains("violation"));
        assert!(PolicyTable::new(Vec::new(), 0.25).is_err());
    }

    #[test]
    fn roles_follow_exam_class_names() {
        assert_eq!(ClassRole::for_class_name("phone"), ClassRole::HeldObject);
        assert_eq!(ClassRole::for_class_name(" Cheating "), ClassRole::Posture);
        assert_eq!(ClassRole::for_class_name("class0"), ClassRole::Benign);
    }

    #[test]
    fn reports_uncovered_class_ids() {
        let policy = PolicyTable::exam_default();
        assert!(policy.uncovered(4).is_empty());
        assert_eq!(policy.uncovered(6), vec![4, 5]);
    }
}
