//! # Catalog
//! Static product records and customer-service categories, both stored as flat JSON files.
//!
//! The product file maps a product name to its record:
//! ```json
//! {
//!     "TechPro Ultrabook": {
//!         "name": "TechPro Ultrabook",
//!         "category": "Computers and Laptops",
//!         "brand": "TechPro",
//!         "price": 799.99
//!     }
//! }
//! ```
//! Record order in the file is kept, so prompts built from a catalog are stable.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::utils::JsonMap;

/// One product record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warranty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Fields this struct does not know about, kept so rendering shows the whole record
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// One element of a classifier reply: either a whole category or a list of products.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mention {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<String>>,
}

impl Mention {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            products: None,
        }
    }

    pub fn products<S: Into<String>>(products: impl IntoIterator<Item=S>) -> Self {
        Self {
            category: None,
            products: Some(products.into_iter().map(Into::into).collect()),
        }
    }
}

/// Products keyed by name, in file order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<(String, Product)>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Load a product file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read product file {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("cannot parse product file {}", path.display()))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let records: JsonMap = serde_json::from_str(json)?;
        let mut catalog = Self::default();
        for (key, record) in records {
            let product: Product = serde_json::from_value(record)
                .with_context(|| format!("product {} is malformed", key))?;
            catalog.index.insert(key.clone(), catalog.products.len());
            catalog.products.push((key, product));
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn product_by_name(&self, name: &str) -> Option<&Product> {
        self.index.get(name).map(|&idx| &self.products[idx].1)
    }

    pub fn products_by_category(&self, category: &str) -> Vec<&Product> {
        self.products.iter()
            .map(|(_, product)| product)
            .filter(|product| product.category == category)
            .collect()
    }

    /// Keys of all products.
    pub fn product_names(&self) -> Vec<&str> {
        self.products.iter().map(|(key, _)| key.as_str()).collect()
    }

    /// Category to the names of its products, categories in order of first appearance.
    pub fn products_and_category(&self) -> JsonMap {
        let mut by_category = JsonMap::new();
        for (_, product) in &self.products {
            let names = by_category
                .entry(product.category.clone())
                .or_insert_with(|| serde_json::Value::Array(vec![]));
            if let serde_json::Value::Array(names) = names {
                names.push(product.name.clone().into());
            }
        }
        by_category
    }

    /// Plain-text list of allowed products, one `<category> category:` block per category.
    pub fn allowed_products_listing(&self) -> String {
        let mut blocks = Vec::new();
        for (category, names) in self.products_and_category() {
            let mut block = format!("{} category:", category);
            for name in names.as_array().into_iter().flatten().filter_map(|n| n.as_str()) {
                block.push('\n');
                block.push_str(name);
            }
            blocks.push(block);
        }
        blocks.join("\n\n")
    }

    /// Products referred to by the mentions, in mention order. Unknown names and empty mentions are skipped with a warning.
    pub fn mentioned_product_info(&self, mentions: &[Mention]) -> Vec<&Product> {
        let mut products = Vec::new();
        for mention in mentions {
            match mention {
                Mention { products: Some(names), .. } => {
                    for name in names {
                        match self.product_by_name(name) {
                            Some(product) => products.push(product),
                            None => warn!("Product '{}' not found", name),
                        }
                    }
                }
                Mention { category: Some(category), .. } => products.extend(self.products_by_category(category)),
                _ => warn!("Invalid object format: {:?}", mention),
            }
        }
        products
    }

    /// Mentioned products as 4-space indented JSON records, each followed by a newline.
    pub fn render_product_info(&self, mentions: &[Mention]) -> Result<String> {
        let mut output = String::new();
        for product in self.mentioned_product_info(mentions) {
            output.push_str(&to_pretty_json(product)?);
            output.push('\n');
        }
        Ok(output)
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Top-level customer-service categories and their sub-categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceCategories(pub BTreeMap<String, Vec<String>>);

impl Default for ServiceCategories {
    fn default() -> Self {
        let table = [
            ("Billing", &["Unsubscribe or upgrade", "Add a payment method", "Explanation for charge", "Dispute a charge"][..]),
            ("Technical Support", &["General troubleshooting", "Device compatibility", "Software updates"][..]),
            ("Account Management", &["Password reset", "Update personal information", "Close account", "Account security"][..]),
            ("General Inquiry", &["Product information", "Pricing", "Feedback", "Speak to a human"][..]),
        ];
        Self(table.iter()
            .map(|(category, subs)| (category.to_string(), subs.iter().map(|s| s.to_string()).collect()))
            .collect())
    }
}

impl ServiceCategories {
    /// Write the default categories to `path` and return them.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let categories = Self::default();
        categories.save(path)?;
        Ok(categories)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, serde_json::to_string(self)?)
            .with_context(|| format!("cannot write categories file {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read categories file {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn sub_categories(&self, category: &str) -> Option<&[String]> {
        self.0.get(category).map(Vec::as_slice)
    }
}
