//! 内存商品仓储
//!
//! 基于 DashMap，供本地开发（`storage.backend = "memory"`）和测试使用。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::ProductRepository;
use crate::error::{ProductError, Result};
use crate::models::{NewProduct, Product, Rating};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    product: Product,
}

/// 内存商品仓储
///
/// Clone 后共享同一份数据。分类查询按插入顺序返回。
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductRepository {
    data: Arc<DashMap<String, Entry>>,
    next_seq: Arc<AtomicU64>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入一条完整记录，测试中用于预置数据
    pub fn insert(&self, product: Product) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.data.insert(product.id.clone(), Entry { seq, product });
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Product)) -> Result<()> {
        let mut entry = self
            .data
            .get_mut(id)
            .ok_or_else(|| ProductError::not_found(id))?;
        f(&mut entry.product);
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn get(&self, id: &str) -> Result<Product> {
        self.data
            .get(id)
            .map(|e| e.product.clone())
            .ok_or_else(|| ProductError::not_found(id))
    }

    async fn get_by_category(&self, category: &str) -> Result<Vec<Product>> {
        let mut matched: Vec<Entry> = self
            .data
            .iter()
            .filter(|e| e.product.category == category)
            .map(|e| e.value().clone())
            .collect();
        matched.sort_by_key(|e| e.seq);
        Ok(matched.into_iter().map(|e| e.product).collect())
    }

    async fn create(&self, product: &NewProduct) -> Result<String> {
        let id = uuid::Uuid::now_v7().to_string();
        self.insert(product.clone().into_product(id.clone()));
        Ok(id)
    }

    async fn update(&self, product: &Product) -> Result<()> {
        self.modify(&product.id, |stored| {
            stored.name = product.name.clone();
            stored.brand = product.brand.clone();
            stored.price = product.price;
            stored.category = product.category.clone();
            stored.image = product.image.clone();
        })
    }

    async fn update_price(&self, id: &str, price: f64) -> Result<()> {
        self.modify(id, |stored| stored.price = price)
    }

    async fn update_rating(&self, id: &str, rating: Rating) -> Result<()> {
        self.modify(id, |stored| stored.rating = rating)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.data
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProductError::not_found(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone(name: &str) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            brand: "Samsung".to_string(),
            price: 800.0,
            category: "phones".to_string(),
            image: format!("{}.jpg", name.to_lowercase()),
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let repo = InMemoryProductRepository::new();
        let id = repo.create(&phone("Galaxy")).await.unwrap();

        let product = repo.get(&id).await.unwrap();
        assert_eq!(product.name, "Galaxy");
        assert_eq!(product.rating, Rating::default());
    }

    #[tokio::test]
    async fn test_category_preserves_insertion_order() {
        let repo = InMemoryProductRepository::new();
        for name in ["A", "B", "C"] {
            repo.create(&phone(name)).await.unwrap();
        }
        repo.create(&NewProduct {
            category: "laptops".to_string(),
            ..phone("X")
        })
        .await
        .unwrap();

        let names: Vec<_> = repo
            .get_by_category("phones")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(repo.get_by_category("tablets").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_rating() {
        let repo = InMemoryProductRepository::new();
        let id = repo.create(&phone("Galaxy")).await.unwrap();
        repo.update_rating(&id, Rating::new(4.5, 10).unwrap())
            .await
            .unwrap();

        let mut product = repo.get(&id).await.unwrap();
        product.name = "Galaxy S".to_string();
        product.rating = Rating::default();
        repo.update(&product).await.unwrap();

        let stored = repo.get(&id).await.unwrap();
        assert_eq!(stored.name, "Galaxy S");
        assert_eq!(stored.rating.customers, 10);
    }

    #[tokio::test]
    async fn test_missing_records_report_not_found() {
        let repo = InMemoryProductRepository::new();
        assert!(repo.get("nope").await.unwrap_err().is_not_found());
        assert!(repo.update_price("nope", 1.0).await.unwrap_err().is_not_found());
        assert!(repo.delete("nope").await.unwrap_err().is_not_found());
        assert!(
            repo.update_rating("nope", Rating::default())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let repo = InMemoryProductRepository::new();
        let id = repo.create(&phone("Galaxy")).await.unwrap();
        repo.delete(&id).await.unwrap();
        assert!(repo.get(&id).await.unwrap_err().is_not_found());
        assert!(repo.delete(&id).await.unwrap_err().is_not_found());
    }
}
