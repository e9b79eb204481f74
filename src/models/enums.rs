use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serde uses the same string as the database column.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(CardioRisk {
    Low => "Low",
    Moderate => "Moderate",
});

str_enum!(EstimateBasis {
    Heuristic => "heuristic",
});

str_enum!(WeightsBasis {
    FineTuned => "fine_tuned",
    Unspecialized => "unspecialized",
});

/// Diabetic retinopathy severity grade, 0 (none) to 4 (proliferative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DrGrade {
    NoDr,
    Mild,
    Moderate,
    Severe,
    Proliferative,
}

impl DrGrade {
    pub const COUNT: usize = 5;

    pub const ALL: [DrGrade; Self::COUNT] = [
        DrGrade::NoDr,
        DrGrade::Mild,
        DrGrade::Moderate,
        DrGrade::Severe,
        DrGrade::Proliferative,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> u8 {
        match self {
            Self::NoDr => 0,
            Self::Mild => 1,
            Self::Moderate => 2,
            Self::Severe => 3,
            Self::Proliferative => 4,
        }
    }

    /// Clinical label shown to users and stored next to the grade.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoDr => "No DR (Normal)",
            Self::Mild => "Mild",
            Self::Moderate => "Moderate",
            Self::Severe => "Severe",
            Self::Proliferative => "Proliferative DR",
        }
    }

    pub fn is_normal(&self) -> bool {
        *self == Self::NoDr
    }
}

impl TryFrom<i64> for DrGrade {
    type Error = DatabaseError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(Self::from_index)
            .ok_or_else(|| DatabaseError::InvalidEnum {
                field: "DrGrade".into(),
                value: value.to_string(),
            })
    }
}

impl std::fmt::Display for DrGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
