use anyhow::{Context, Result};
use shared::Product;
use std::path::Path;

/// Products offered for stock reservation.
#[derive(Debug, Clone)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// Loads a JSON array of products, e.g. `[{"itemId":1,"itemName":"...","price":50,"initialAvailableQuantity":4}]`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let products: Vec<Product> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
        Ok(Self::new(products))
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn get(&self, item_id: u32) -> Option<&Product> {
        self.products.iter().find(|product| product.item_id == item_id)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        let product = |item_id, item_name: &str, price, initial_available_quantity| Product {
            item_id,
            item_name: item_name.to_string(),
            price,
            initial_available_quantity,
        };

        Self::new(vec![
            product(1, "Suitcase 250", 50, 4),
            product(2, "Suitcase 450", 100, 10),
            product(3, "Suitcase 650", 350, 2),
            product(4, "Suitcase 1050", 550, 5),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_four_suitcases() {
        let catalog = Catalog::default();
        assert_eq!(catalog.products().len(), 4);
        let product = catalog.get(3).unwrap();
        assert_eq!(product.item_name, "Suitcase 650");
        assert_eq!(product.initial_available_quantity, 2);
        assert!(catalog.get(5).is_none());
    }

    #[test]
    fn catalog_loads_from_json_file() {
        let path = std::env::temp_dir().join(format!("catalog-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"[{"itemId":7,"itemName":"Duffel","price":20,"initialAvailableQuantity":1}]"#,
        )
        .unwrap();

        let catalog = Catalog::from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(catalog.get(7).unwrap().item_name, "Duffel");
    }

    #[test]
    fn missing_catalog_file_is_an_error() {
        let path = std::env::temp_dir().join("definitely-not-a-catalog.json");
        assert!(Catalog::from_path(&path).is_err());
    }
}
