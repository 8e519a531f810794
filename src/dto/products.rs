use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Product;

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct CreateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub category: Option<String>,
    pub collection: Option<String>,
    pub brand: Option<String>,
    pub image: Option<String>,
    pub stock: Option<i32>,
    pub rating: Option<f64>,
    pub sizes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub category: Option<String>,
    pub collection: Option<String>,
    pub brand: Option<String>,
    pub image: Option<String>,
    pub stock: Option<i32>,
    pub rating: Option<f64>,
    pub sizes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DecrementStockRequest {
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductList {
    pub products: Vec<Product>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeletedCount {
    pub deleted: u64,
}
