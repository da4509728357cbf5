//! 商品仓储

mod elasticsearch;
mod memory;
mod traits;

pub use elasticsearch::ElasticsearchProductRepository;
pub use memory::InMemoryProductRepository;
pub use traits::ProductRepository;

#[cfg(test)]
pub use traits::MockProductRepository;
