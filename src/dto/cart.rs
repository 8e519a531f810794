use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    #[serde(alias = "productId")]
    pub product_id: Uuid,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartRequest {
    #[serde(alias = "productId")]
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartLine {
    pub id: Uuid,
    pub product: Product,
    pub quantity: i32,
    pub size: Option<String>,
    pub line_total: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub total_items: i64,
    pub subtotal: i64,
}
