// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub identifier: String,
    pub platform_product_identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub identifier: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub packages: Vec<Package>,
}

/// Offerings configured for an app user, as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offerings {
    #[serde(default)]
    pub current_offering_id: Option<String>,
    #[serde(default)]
    pub offerings: Vec<Offering>,
}

impl Offerings {
    pub fn current(&self) -> Option<&Offering> {
        let current = self.current_offering_id.as_deref()?;
        self.offering(current)
    }

    pub fn offering(&self, identifier: &str) -> Option<&Offering> {
        self.offerings
            .iter()
            .find(|offering| offering.identifier == identifier)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resolves_current_offering() {
        let offerings: Offerings = serde_json::from_value(json!({
            "current_offering_id": "default",
            "offerings": [
                { "identifier": "sale", "packages": [] },
                {
                    "identifier": "default",
                    "description": "Standard",
                    "packages": [
                        { "identifier": "$rc_monthly", "platform_product_identifier": "monthly" }
                    ]
                }
            ]
        }))
        .unwrap();

        let current = offerings.current().unwrap();
        assert_eq!(current.description, "Standard");
        assert_eq!(current.packages[0].platform_product_identifier, "monthly");
        assert!(offerings.offering("missing").is_none());
        assert!(Offerings::default().current().is_none());
    }
}
