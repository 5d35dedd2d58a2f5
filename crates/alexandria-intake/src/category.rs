// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Categories accepted when none are configured.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "techaro.anubis",
    "techaro.anubis.request-samples",
    "techaro.thoth",
];

/// Fixed set of categories known at startup. Uploads for anything else are
/// rejected before a batch is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRegistry {
    categories: Vec<String>,
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORIES.iter().copied())
    }
}

impl CategoryRegistry {
    /// Builds a registry from `categories`, trimming whitespace and dropping
    /// blanks and duplicates while keeping first-seen order.
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Vec::new();
        for category in categories {
            let category = category.as_ref().trim();
            if category.is_empty() || registry.iter().any(|known| known == category) {
                continue;
            }
            registry.push(category.to_string());
        }
        Self {
            categories: registry,
        }
    }

    #[must_use]
    pub fn contains(&self, category: &str) -> bool {
        self.categories.iter().any(|known| known == category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
