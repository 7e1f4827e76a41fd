//! Cookie categories and their display metadata.
//!
//! The set of categories lives in one place: [`ConsentCategory::ALL`] plus the
//! [`CATEGORY_METADATA`] table. Preferences are stored as a map keyed by
//! category, so adding a category means adding a variant and a table row.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A cookie category a visitor can allow or refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentCategory {
    /// Required for the site to work. Always allowed.
    Essential,
    /// Usage statistics and performance measurement.
    Analytics,
    /// Advertising and campaign attribution.
    Marketing,
    /// Convenience features such as remembered settings.
    Functional,
}

impl ConsentCategory {
    /// All categories in display order.
    pub const ALL: [ConsentCategory; 4] = [
        ConsentCategory::Essential,
        ConsentCategory::Analytics,
        ConsentCategory::Marketing,
        ConsentCategory::Functional,
    ];

    /// Storage/JSON identifier of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentCategory::Essential => "essential",
            ConsentCategory::Analytics => "analytics",
            ConsentCategory::Marketing => "marketing",
            ConsentCategory::Functional => "functional",
        }
    }

    /// Whether the visitor may switch this category off.
    pub fn is_required(&self) -> bool {
        self.metadata().required
    }

    pub fn metadata(&self) -> &'static CategoryMetadata {
        // Table rows follow declaration order.
        &CATEGORY_METADATA[*self as usize]
    }
}

impl Display for ConsentCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cookie category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for ConsentCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsentCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Static presentation data for one category, rendered by the banner and the
/// preferences dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryMetadata {
    pub category: ConsentCategory,
    /// Display name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Example mechanisms covered by this category.
    pub examples: &'static [&'static str],
    /// Required categories are shown but cannot be switched off.
    pub required: bool,
}

pub static CATEGORY_METADATA: [CategoryMetadata; 4] = [
    CategoryMetadata {
        category: ConsentCategory::Essential,
        name: "Essential",
        description: "Needed for the website to function. They handle security, \
                      load balancing and remember the consent choice itself.",
        examples: &["Session management", "Security tokens", "Consent preferences"],
        required: true,
    },
    CategoryMetadata {
        category: ConsentCategory::Analytics,
        name: "Analytics",
        description: "Help us understand how visitors use the site so we can \
                      improve content and performance.",
        examples: &["Page views", "Performance metrics", "Traffic sources"],
        required: false,
    },
    CategoryMetadata {
        category: ConsentCategory::Marketing,
        name: "Marketing",
        description: "Used to measure campaigns and show relevant content on \
                      other platforms.",
        examples: &["Ad conversion tracking", "Retargeting pixels", "Campaign attribution"],
        required: false,
    },
    CategoryMetadata {
        category: ConsentCategory::Functional,
        name: "Functional",
        description: "Enable enhanced features and personalisation such as \
                      remembered settings and embedded content.",
        examples: &["Language preference", "Embedded videos", "Chat widgets"],
        required: false,
    },
];

/// The metadata table in display order.
pub fn category_metadata() -> &'static [CategoryMetadata] {
    &CATEGORY_METADATA
}
