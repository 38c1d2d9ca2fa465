use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A catalog item. Prices are exact decimals and survive the cache unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: BigDecimal,
}

impl Product {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, description: impl Into<String>, price: BigDecimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            sku: sku.into(),
            name: name.into(),
            description: description.into(),
            price,
        }
    }
}
