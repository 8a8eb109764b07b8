//! Mapping from data-type tags to the field names of the typed view.
//!
//! The table is built once when the services are wired and shared
//! read-only afterwards. Tags without an entry are left out of typed
//! views.

use std::collections::HashMap;

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use verigate_store::{DataType, ResolvedData};

/// Tag → field-name lookup used to project data into a typed view.
#[derive(Debug, Clone)]
pub struct DataFieldTable {
    // Insertion order, which is also the field order of typed views.
    fields: Vec<(DataType, &'static str)>,
    by_type: HashMap<DataType, usize>,
}

impl DataFieldTable {
    /// An empty table; every tag is unmapped.
    pub fn empty() -> Self {
        Self {
            fields: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// The table covering every known data type.
    pub fn standard() -> Self {
        Self::empty()
            .with(DataType::BasicInformation, "basicInformation")
            .with(DataType::Activities, "activities")
            .with(DataType::AddressesByCredinform, "addressesByCredinform")
            .with(
                DataType::AddressesByUnifiedStateRegister,
                "addressesByUnifiedStateRegister",
            )
            .with(DataType::AffiliatedCompanies, "affiliatedCompanies")
            .with(DataType::ArbitrageStatistics, "arbitrageStatistics")
    }

    /// Map `data_type` to `field`, replacing any earlier mapping.
    pub fn with(mut self, data_type: DataType, field: &'static str) -> Self {
        match self.by_type.get(&data_type) {
            Some(&slot) => self.fields[slot].1 = field,
            None => {
                self.by_type.insert(data_type, self.fields.len());
                self.fields.push((data_type, field));
            }
        }
        self
    }

    pub fn field_name(&self, data_type: DataType) -> Option<&'static str> {
        self.by_type.get(&data_type).map(|&slot| self.fields[slot].1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Place each item under its mapped field. Unmapped tags are dropped;
    /// if a tag appears twice the later item wins.
    pub fn project(&self, items: &[ResolvedData]) -> TypedFields {
        let mut values = vec![None; self.fields.len()];
        for item in items {
            match self.by_type.get(&item.data_type) {
                Some(&slot) => values[slot] = Some(item.payload.clone()),
                None => tracing::debug!(data_type = %item.data_type, "no typed field for data type"),
            }
        }
        TypedFields {
            fields: self
                .fields
                .iter()
                .zip(values)
                .map(|(&(data_type, name), value)| TypedField { data_type, name, value })
                .collect(),
        }
    }
}

impl Default for DataFieldTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// One slot of a typed view.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedField {
    pub data_type: DataType,
    pub name: &'static str,
    /// Payload text, `None` if nothing was delivered for this type.
    pub value: Option<String>,
}

/// Every mapped field of a typed view, present or not.
///
/// Serializes as a JSON object with one key per field; absent fields are
/// `null`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedFields {
    fields: Vec<TypedField>,
}

impl TypedFields {
    /// Payload stored under the field called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .and_then(|field| field.value.as_deref())
    }

    /// Payload for `data_type`, if it is mapped and present.
    pub fn payload(&self, data_type: DataType) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.data_type == data_type)
            .and_then(|field| field.value.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypedField> {
        self.fields.iter()
    }
}

impl Serialize for TypedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(field.name, &field.value)?;
        }
        map.end()
    }
}
