use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct AddToWishlistRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WishlistEntry {
    pub id: Uuid,
    pub added_at: DateTime<Utc>,
    pub product: Product,
    pub category_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WishlistView {
    pub items: Vec<WishlistEntry>,
}
