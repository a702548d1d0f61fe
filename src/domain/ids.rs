// Formentry - Clinical Form Compiler and Submission Engine
// Copyright (c) 2025 Formentry Contributors
// Licensed under the MIT License

//! Domain identifier types with validation
//!
//! Persisted entities are addressed by positive integer ids wrapped in
//! newtypes so a concept id can never be passed where an obs id is expected.
//! Widget ids are strings of the form `w<n>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            #[doc = concat!("Creates a new ", $label, " id; zero is rejected")]
            pub fn new(id: u32) -> Result<Self, String> {
                if id == 0 {
                    return Err(concat!($label, " id must be positive").to_string());
                }
                Ok(Self(id))
            }

            /// Wraps a known positive constant
            #[allow(dead_code)]
            pub(crate) const fn from_raw(id: u32) -> Self {
                Self(id)
            }

            /// Returns the raw numeric value
            pub fn get(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw: u32 = s
                    .trim()
                    .parse()
                    .map_err(|_| format!(concat!("Invalid ", $label, " id: '{}'"), s))?;
                Self::new(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> u32 {
                id.0
            }
        }
    };
}

numeric_id!(
    /// Patient identifier
    PatientId,
    "patient"
);
numeric_id!(
    /// Concept identifier (questions, answers, grouping concepts)
    ConceptId,
    "concept"
);
numeric_id!(
    /// Encounter identifier
    EncounterId,
    "encounter"
);
numeric_id!(
    /// Observation identifier, stable across renders
    ObsId,
    "obs"
);
numeric_id!(
    /// Order identifier
    OrderId,
    "order"
);
numeric_id!(
    /// Drug identifier
    DrugId,
    "drug"
);
numeric_id!(
    /// Encounter type identifier
    EncounterTypeId,
    "encounter type"
);
numeric_id!(
    /// Location identifier
    LocationId,
    "location"
);
numeric_id!(
    /// Provider identifier
    ProviderId,
    "provider"
);
numeric_id!(
    /// Program identifier
    ProgramId,
    "program"
);
numeric_id!(
    /// Program workflow identifier
    WorkflowId,
    "workflow"
);
numeric_id!(
    /// Program workflow state identifier
    StateId,
    "state"
);
numeric_id!(
    /// Patient program (enrollment) identifier
    PatientProgramId,
    "patient program"
);

/// Widget identifier newtype wrapper
///
/// Binds one schema leaf to one submitted value. Allocated monotonically per
/// compile pass as `w1`, `w2`, ...
///
/// # Examples
///
/// ```
/// use formentry::domain::ids::WidgetId;
/// use std::str::FromStr;
///
/// let id = WidgetId::from_str("w12").unwrap();
/// assert_eq!(id.sequence(), 12);
/// assert_eq!(id.to_string(), "w12");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WidgetId(u32);

impl WidgetId {
    /// Creates the widget id with the given sequence number
    pub fn from_sequence(sequence: u32) -> Self {
        Self(sequence)
    }

    /// Returns the sequence number
    pub fn sequence(self) -> u32 {
        self.0
    }

    /// Name of a derived submission key (e.g. `w3_hours`)
    pub fn suffixed(self, suffix: &str) -> String {
        format!("{self}{suffix}")
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

impl FromStr for WidgetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('w')
            .ok_or_else(|| format!("Widget id must start with 'w', got '{s}'"))?;
        let sequence: u32 = digits
            .parse()
            .map_err(|_| format!("Invalid widget id: '{s}'"))?;
        if sequence == 0 {
            return Err("Widget id sequence must be positive".to_string());
        }
        Ok(Self(sequence))
    }
}

impl TryFrom<String> for WidgetId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WidgetId> for String {
    fn from(id: WidgetId) -> String {
        id.to_string()
    }
}

/// Monotonic widget id allocator for one compile pass
#[derive(Debug, Default)]
pub struct WidgetIdAllocator {
    last: u32,
}

impl WidgetIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next unused widget id
    pub fn next_id(&mut self) -> WidgetId {
        self.last += 1;
        WidgetId(self.last)
    }

    /// Number of ids handed out so far
    pub fn allocated(&self) -> u32 {
        self.last
    }
}
