//! Dependency table for derived dosage fields.
//!
//! A derived field is recomputed whenever one of its upstream inputs
//! changes. A direct edit marks it overridden; the override lasts until an
//! upstream input changes again.

use serde::{Deserialize, Serialize};

use crate::models::DosageItem;

use super::calculator::{compute_anticipated_dose, compute_volume, parse_strict};

/// Editable fields of a [`DosageItem`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DosageField {
    Name,
    Route,
    DosageRange,
    AnticipatedDose,
    Concentration,
    Volume,
}

/// An input a derivation depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Field(DosageField),
    /// Patient weight, owned by the sheet rather than the row
    Weight,
}

/// Recompute a derived field. `None` means the inputs are not all present,
/// in which case the field keeps its current value.
pub type Recompute = fn(&DosageItem, Option<f64>) -> Option<String>;

/// One row of the dependency table.
pub struct Derivation {
    pub field: DosageField,
    pub derived_from: &'static [Upstream],
    pub recompute: Recompute,
}

/// Derivations in dependency order.
pub const DERIVATIONS: &[Derivation] = &[
    Derivation {
        field: DosageField::AnticipatedDose,
        derived_from: &[Upstream::Field(DosageField::DosageRange), Upstream::Weight],
        recompute: derive_anticipated_dose,
    },
    Derivation {
        field: DosageField::Volume,
        derived_from: &[
            Upstream::Field(DosageField::AnticipatedDose),
            Upstream::Field(DosageField::Concentration),
        ],
        recompute: derive_volume,
    },
];

fn derive_anticipated_dose(item: &DosageItem, weight_kg: Option<f64>) -> Option<String> {
    let weight = weight_kg?;
    if item.dosage_range.trim().is_empty() {
        return None;
    }
    Some(compute_anticipated_dose(&item.dosage_range, weight))
}

fn derive_volume(item: &DosageItem, _weight_kg: Option<f64>) -> Option<String> {
    parse_strict(&item.anticipated_dose)?;
    if item.concentration.trim().is_empty() {
        return None;
    }
    Some(compute_volume(&item.anticipated_dose, &item.concentration))
}

/// Whether `field` is computed by some derivation.
pub fn is_derived(field: DosageField) -> bool {
    DERIVATIONS.iter().any(|d| d.field == field)
}

/// Re-derive everything downstream of `changed`.
pub fn propagate(item: &mut DosageItem, changed: Upstream, weight_kg: Option<f64>) {
    let mut pending = vec![changed];

    while let Some(input) = pending.pop() {
        for derivation in DERIVATIONS
            .iter()
            .filter(|d| d.derived_from.contains(&input))
        {
            item.overridden.remove(&derivation.field);
            if let Some(value) = (derivation.recompute)(item, weight_kg) {
                item.store_field(derivation.field, value);
            }
            pending.push(Upstream::Field(derivation.field));
        }
    }
}

/// Apply every derivation in table order, skipping overridden fields.
pub fn refresh(item: &mut DosageItem, weight_kg: Option<f64>) {
    for derivation in DERIVATIONS {
        if item.overridden.contains(&derivation.field) {
            continue;
        }
        if let Some(value) = (derivation.recompute)(item, weight_kg) {
            item.store_field(derivation.field, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DosageCategory;

    #[test]
    fn test_table_shape() {
        assert!(is_derived(DosageField::AnticipatedDose));
        assert!(is_derived(DosageField::Volume));
        assert!(!is_derived(DosageField::DosageRange));
        assert!(!is_derived(DosageField::Concentration));
    }

    #[test]
    fn test_weight_change_cascades_to_volume() {
        let mut item = DosageItem::new(DosageCategory::Induction, "Propofol".into());
        item.dosage_range = "4-6".into();
        item.concentration = "10 mg/ml".into();

        propagate(&mut item, Upstream::Weight, Some(5.0));
        assert_eq!(item.anticipated_dose, "30.00");
        assert_eq!(item.volume, "3.00");
    }

    #[test]
    fn test_non_numeric_dose_keeps_volume() {
        let mut item = DosageItem::new(DosageCategory::Induction, "Propofol".into());
        item.concentration = "10 mg/ml".into();
        item.volume = "2".into();
        item.anticipated_dose = "to effect".into();

        propagate(&mut item, Upstream::Field(DosageField::AnticipatedDose), Some(5.0));
        assert_eq!(item.volume, "2");
    }

    #[test]
    fn test_zero_concentration_clears_volume() {
        let mut item = DosageItem::new(DosageCategory::Induction, "Propofol".into());
        item.anticipated_dose = "30".into();
        item.volume = "3.00".into();
        item.concentration = "0".into();

        propagate(&mut item, Upstream::Field(DosageField::Concentration), None);
        assert_eq!(item.volume, "");
    }
}
