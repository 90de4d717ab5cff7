use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Product, User};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_products: i64,
    pub total_orders: i64,
    /// Sum of delivered order totals, in cents.
    pub total_revenue: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct RecentOrder {
    pub id: Uuid,
    pub total_amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub customer_email: String,
    pub customer_first_name: String,
    pub customer_last_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Dashboard {
    pub stats: DashboardStats,
    pub recent_orders: Vec<RecentOrder>,
    pub low_stock_products: Vec<Product>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct InventoryAdjustRequest {
    /// Signed change applied to the current stock.
    pub delta: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LowStockList {
    pub items: Vec<Product>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserList {
    pub items: Vec<User>,
}
