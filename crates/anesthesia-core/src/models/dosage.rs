//! Anesthesia plan dosage rows and the weight-scaled fluid rate.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dosage::{self, DosageField, Upstream};

/// Section of the anesthesia plan a dosage row belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DosageCategory {
    Premedication,
    Induction,
    ConstantRateInfusion,
    OtherTechnique,
    LocalRegional,
}

/// One drug row in an anesthesia plan.
///
/// `anticipated_dose` and `volume` are derived from the other fields; see
/// [`crate::dosage::DERIVATIONS`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DosageItem {
    /// Plan section
    pub category: DosageCategory,
    /// Drug name
    pub name: String,
    /// Route of administration (e.g. "IV", "IM")
    pub route: Option<String>,
    /// Per-kg dosage range as typed (e.g. "0.05-0.2")
    pub dosage_range: String,
    /// Dose in mass units for this patient
    pub anticipated_dose: String,
    /// Drug concentration as typed (e.g. "10mg/ml")
    pub concentration: String,
    /// Volume to draw up
    pub volume: String,
    /// Derived fields the clinician has typed over
    #[serde(default)]
    pub overridden: BTreeSet<DosageField>,
}

impl DosageItem {
    /// Create an empty row for a drug.
    pub fn new(category: DosageCategory, name: String) -> Self {
        Self {
            category,
            name,
            route: None,
            dosage_range: String::new(),
            anticipated_dose: String::new(),
            concentration: String::new(),
            volume: String::new(),
            overridden: BTreeSet::new(),
        }
    }

    /// Read a text field.
    pub fn field(&self, field: DosageField) -> &str {
        match field {
            DosageField::Name => &self.name,
            DosageField::Route => self.route.as_deref().unwrap_or(""),
            DosageField::DosageRange => &self.dosage_range,
            DosageField::AnticipatedDose => &self.anticipated_dose,
            DosageField::Concentration => &self.concentration,
            DosageField::Volume => &self.volume,
        }
    }

    pub(crate) fn store_field(&mut self, field: DosageField, value: String) {
        match field {
            DosageField::Name => self.name = value,
            DosageField::Route => {
                self.route = if value.trim().is_empty() {
                    None
                } else {
                    Some(value)
                }
            }
            DosageField::DosageRange => self.dosage_range = value,
            DosageField::AnticipatedDose => self.anticipated_dose = value,
            DosageField::Concentration => self.concentration = value,
            DosageField::Volume => self.volume = value,
        }
    }

    /// Apply a clinician edit and re-derive whatever depends on it.
    pub fn edit(&mut self, field: DosageField, value: String, weight_kg: Option<f64>) {
        self.store_field(field, value);
        if dosage::is_derived(field) {
            self.overridden.insert(field);
        }
        dosage::propagate(self, Upstream::Field(field), weight_kg);
    }

    /// Whether the clinician has typed over a derived field.
    pub fn is_overridden(&self, field: DosageField) -> bool {
        self.overridden.contains(&field)
    }

    /// Re-apply every derivation except overridden fields.
    pub fn refresh(&mut self, weight_kg: Option<f64>) {
        dosage::refresh(self, weight_kg);
    }
}

/// Maintenance fluid rate: per-kg input, whole-patient output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FluidRate {
    /// mL/kg/hr as typed
    pub rate_per_kg_per_hour: String,
    /// mL/hr for this patient, 1 decimal
    pub hourly_rate: String,
}

impl FluidRate {
    fn recompute(&mut self, weight_kg: Option<f64>) {
        if let Some(weight) = weight_kg {
            if !self.rate_per_kg_per_hour.trim().is_empty() {
                self.hourly_rate =
                    dosage::compute_hourly_rate(&self.rate_per_kg_per_hour, weight);
            }
        }
    }
}

/// The drug table of one anesthesia plan, sharing one patient weight.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DosageSheet {
    /// Patient weight in kg
    pub weight_kg: Option<f64>,
    /// Drug rows in plan order
    pub items: Vec<DosageItem>,
    /// Fluid therapy row
    pub fluid: FluidRate,
}

impl DosageSheet {
    /// Create an empty sheet for a patient weight.
    pub fn new(weight_kg: Option<f64>) -> Self {
        Self {
            weight_kg,
            ..Self::default()
        }
    }

    /// Change the patient weight; every weight-derived field is recomputed.
    pub fn set_weight(&mut self, weight_kg: Option<f64>) {
        self.weight_kg = weight_kg;
        for item in &mut self.items {
            dosage::propagate(item, Upstream::Weight, weight_kg);
        }
        self.fluid.recompute(weight_kg);
    }

    /// Append a row, deriving its fields from the current weight.
    pub fn add_item(&mut self, mut item: DosageItem) -> usize {
        item.refresh(self.weight_kg);
        self.items.push(item);
        self.items.len() - 1
    }

    /// Edit a field on row `index`. Returns `None` if the row does not exist.
    pub fn edit_item(
        &mut self,
        index: usize,
        field: DosageField,
        value: String,
    ) -> Option<&DosageItem> {
        let weight_kg = self.weight_kg;
        let item = self.items.get_mut(index)?;
        item.edit(field, value, weight_kg);
        Some(item)
    }

    /// Remove row `index`.
    pub fn remove_item(&mut self, index: usize) -> Option<DosageItem> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    /// Set the per-kg fluid rate.
    pub fn set_fluid_rate(&mut self, rate_per_kg_per_hour: String) {
        self.fluid.rate_per_kg_per_hour = rate_per_kg_per_hour;
        self.fluid.recompute(self.weight_kg);
    }

    /// Items in one plan section.
    pub fn items_in(&self, category: DosageCategory) -> impl Iterator<Item = &DosageItem> {
        self.items.iter().filter(move |item| item.category == category)
    }
}
