use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declares a closed, snake_case string enum with `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

// Declared after the macro so submodules can use it.
pub mod classifier;
pub mod outcomes;

string_enum!(Stage {
    New => "new",
    Contacted => "contacted",
    Meeting => "meeting",
    Proposal => "proposal",
    Won => "won",
    Lost => "lost",
});

string_enum!(LeadType {
    Dealership => "dealership",
    Fleet => "fleet",
    TuroHost => "turo_host",
    Affiliate => "affiliate",
    SalesRep => "sales_rep",
    Custom => "custom",
});

string_enum!(ActivityType {
    Call => "call",
    Email => "email",
    Meeting => "meeting",
    Note => "note",
});

string_enum!(InteractionType {
    Call => "call",
    Email => "email",
    Meeting => "meeting",
    Other => "other",
});

impl InteractionType {
    pub fn activity_type(&self) -> ActivityType {
        match self {
            InteractionType::Call => ActivityType::Call,
            InteractionType::Email => ActivityType::Email,
            InteractionType::Meeting => ActivityType::Meeting,
            InteractionType::Other => ActivityType::Note,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub company_name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub lead_type: LeadType,
    pub stage: Stage,
    pub tier: Option<String>,
    pub estimated_revenue: Option<f64>,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub next_follow_up_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Bumped on every mutation; used for optimistic concurrency.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied on import or manual entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLead {
    pub company_name: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub lead_type: LeadType,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub estimated_revenue: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub lead_id: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub description: String,
    pub outcome: Option<String>,
    /// Seconds, calls only.
    pub duration: Option<u32>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
}
