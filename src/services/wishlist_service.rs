use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    db::DbPool,
    dto::wishlist::{AddToWishlistRequest, WishlistEntry, WishlistView},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Product, WishlistItem},
    response::{ApiResponse, Meta},
};

#[derive(FromRow)]
struct WishlistRow {
    wishlist_id: Uuid,
    added_at: DateTime<Utc>,
    #[sqlx(flatten)]
    product: Product,
    category_name: Option<String>,
}

pub async fn list_wishlist(
    pool: &DbPool,
    user: &AuthUser,
) -> AppResult<ApiResponse<WishlistView>> {
    let rows = sqlx::query_as::<_, WishlistRow>(
        r#"
        SELECT w.id AS wishlist_id, w.created_at AS added_at,
               p.id, p.category_id, p.name, p.description, p.price, p.stock, p.image_url,
               p.is_active, p.created_at, p.updated_at,
               c.name AS category_name
        FROM wishlist_items w
        JOIN products p ON p.id = w.product_id
        LEFT JOIN categories c ON c.id = p.category_id
        WHERE w.user_id = $1
        ORDER BY w.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(pool)
    .await?;

    let total = rows.len() as i64;
    let items = rows
        .into_iter()
        .map(|row| WishlistEntry {
            id: row.wishlist_id,
            added_at: row.added_at,
            product: row.product,
            category_name: row.category_name,
        })
        .collect();

    Ok(ApiResponse::success(
        "Wishlist",
        WishlistView { items },
        Some(Meta::new(1, total, total)),
    ))
}

pub async fn add_to_wishlist(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToWishlistRequest,
) -> AppResult<ApiResponse<WishlistItem>> {
    let product_exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE id = $1")
        .bind(payload.product_id)
        .fetch_optional(pool)
        .await?;

    if product_exists.is_none() {
        return Err(AppError::NotFoundMsg("Product not found".into()));
    }

    let inserted = sqlx::query_as::<_, WishlistItem>(
        r#"
        INSERT INTO wishlist_items (id, user_id, product_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, product_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(payload.product_id)
    .fetch_optional(pool)
    .await?;

    let item = match inserted {
        Some(item) => item,
        None => return Err(AppError::BadRequest("Product already in wishlist".into())),
    };

    audit::record(
        pool,
        Some(user.user_id),
        "wishlist_add",
        "wishlist_items",
        serde_json::json!({ "product_id": payload.product_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Added to wishlist",
        item,
        Some(Meta::empty()),
    ))
}

pub async fn remove_from_wishlist(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
        .bind(user.user_id)
        .bind(product_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFoundMsg("Item not found in wishlist".into()));
    }

    audit::record(
        pool,
        Some(user.user_id),
        "wishlist_remove",
        "wishlist_items",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;

    Ok(ApiResponse::message_only("Removed from wishlist"))
}
