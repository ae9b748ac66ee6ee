//! Deterministic merging of per-batch category trees.

use std::collections::{BTreeMap, BTreeSet};

use nexus_shared::{CategoryStructure, MainCategory, Subcategory};

/// One batch's view of the taxonomy: main category to its subcategory names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialCategoryTree(pub BTreeMap<String, BTreeSet<String>>);

impl PartialCategoryTree {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, main: impl Into<String>, sub: Option<String>) {
        let subs = self.0.entry(main.into()).or_default();
        if let Some(sub) = sub {
            subs.insert(sub);
        }
    }
}

impl From<CategoryStructure> for PartialCategoryTree {
    fn from(structure: CategoryStructure) -> Self {
        let mut tree = Self::default();
        for main in structure.main_navigation {
            let subs = tree.0.entry(main.name).or_default();
            subs.extend(main.subcategories.into_iter().map(|s| s.name));
        }
        tree
    }
}

/// Union all partial trees.
///
/// Names compare by exact, case-sensitive equality. Main categories and
/// subcategories come out sorted ascending without duplicates, so the result
/// does not depend on the order batches finished in.
pub fn merge<I>(partials: I) -> CategoryStructure
where
    I: IntoIterator<Item = PartialCategoryTree>,
{
    let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for partial in partials {
        for (main, subs) in partial.0 {
            merged.entry(main).or_default().extend(subs);
        }
    }

    CategoryStructure {
        main_navigation: merged
            .into_iter()
            .map(|(name, subs)| MainCategory {
                name,
                subcategories: subs.into_iter().map(|name| Subcategory { name }).collect(),
            })
            .collect(),
    }
}
