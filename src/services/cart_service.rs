use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    db::DbPool,
    dto::cart::{AddToCartRequest, CartLine, CartView, UpdateCartItemRequest},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    pricing::PriceLine,
    response::{ApiResponse, Meta},
    validation::Validator,
};

#[derive(FromRow)]
struct CartWithProductRow {
    cart_id: Uuid,
    quantity: i32,
    product_id: Uuid,
    category_id: Option<Uuid>,
    name: String,
    description: Option<String>,
    price: i64,
    stock: i32,
    image_url: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CartWithProductRow> for CartLine {
    fn from(row: CartWithProductRow) -> Self {
        CartLine {
            id: row.cart_id,
            quantity: row.quantity,
            line_total: row.price * i64::from(row.quantity),
            product: Product {
                id: row.product_id,
                category_id: row.category_id,
                name: row.name,
                description: row.description,
                price: row.price,
                stock: row.stock,
                image_url: row.image_url,
                is_active: row.is_active,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        }
    }
}

#[derive(FromRow)]
struct UpsertedRow {
    #[sqlx(flatten)]
    item: CartItem,
    inserted: bool,
}

/// Quantity after adding `adding` to `in_cart`, or `None` when it would
/// exceed `stock` or overflow the `INTEGER` column.
fn merged_quantity(in_cart: i32, adding: i32, stock: i32) -> Option<i32> {
    in_cart
        .checked_add(adding)
        .filter(|quantity| *quantity <= stock)
}

pub async fn get_cart(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let rows = sqlx::query_as::<_, CartWithProductRow>(
        r#"
        SELECT ci.id AS cart_id, ci.quantity,
               p.id AS product_id, p.category_id, p.name, p.description, p.price, p.stock,
               p.image_url, p.is_active, p.created_at, p.updated_at
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(pool)
    .await?;

    let items: Vec<CartLine> = rows.into_iter().map(CartLine::from).collect();
    let total = items.iter().map(|line| line.line_total).sum();
    let count = items.len() as i64;

    Ok(ApiResponse::success(
        "Cart",
        CartView { items, total },
        Some(Meta::new(1, count, count)),
    ))
}

/// Adds a product to the cart, merging with an existing line.
/// Returns `true` alongside the item when a new line was created.
pub async fn add_to_cart(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<(bool, ApiResponse<CartItem>)> {
    Validator::new()
        .at_least("quantity", payload.quantity, 1)
        .finish()?;

    let mut tx = pool.begin().await?;

    // The product row lock serializes concurrent adds of the same product.
    let product: Option<(i32,)> =
        sqlx::query_as("SELECT stock FROM products WHERE id = $1 AND is_active FOR UPDATE")
            .bind(payload.product_id)
            .fetch_optional(&mut *tx)
            .await?;
    let (stock,) = match product {
        Some(p) => p,
        None => return Err(AppError::NotFoundMsg("Product not found".into())),
    };

    let existing: Option<(i32,)> =
        sqlx::query_as("SELECT quantity FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(user.user_id)
            .bind(payload.product_id)
            .fetch_optional(&mut *tx)
            .await?;
    let in_cart = existing.map_or(0, |(quantity,)| quantity);
    if merged_quantity(in_cart, payload.quantity, stock).is_none() {
        return Err(AppError::BadRequest("Insufficient stock".into()));
    }

    let upserted = sqlx::query_as::<_, UpsertedRow>(
        r#"
        INSERT INTO cart_items (user_id, product_id, quantity)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, product_id)
        DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity, updated_at = NOW()
        RETURNING id, user_id, product_id, quantity, created_at, updated_at, (xmax = 0) AS inserted
        "#,
    )
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(payload.quantity)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    audit::record(
        pool,
        Some(user.user_id),
        "cart_add",
        "cart_items",
        serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity }),
    )
    .await;

    let message = if upserted.inserted {
        "Added to cart"
    } else {
        "Cart updated"
    };
    Ok((
        upserted.inserted,
        ApiResponse::success(message, upserted.item, Some(Meta::empty())),
    ))
}

pub async fn update_cart_item(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartItem>> {
    Validator::new()
        .at_least("quantity", payload.quantity, 1)
        .finish()?;

    let mut tx = pool.begin().await?;

    let row: Option<(bool, i32)> = sqlx::query_as(
        r#"
        SELECT p.is_active, p.stock
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.id = $1 AND ci.user_id = $2
        FOR UPDATE OF ci
        "#,
    )
    .bind(id)
    .bind(user.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (is_active, stock) = match row {
        Some(r) => r,
        None => return Err(AppError::NotFoundMsg("Cart item not found".into())),
    };
    if !is_active {
        return Err(AppError::BadRequest("Product is no longer available".into()));
    }
    if payload.quantity > stock {
        return Err(AppError::BadRequest("Insufficient stock".into()));
    }

    let item = sqlx::query_as::<_, CartItem>(
        r#"
        UPDATE cart_items
        SET quantity = $3, updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user.user_id)
    .bind(payload.quantity)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    audit::record(
        pool,
        Some(user.user_id),
        "cart_update",
        "cart_items",
        serde_json::json!({ "cart_item_id": id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success("Cart updated", item, Some(Meta::empty())))
}

pub async fn remove_cart_item(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFoundMsg("Cart item not found".into()));
    }

    audit::record(
        pool,
        Some(user.user_id),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "cart_item_id": id }),
    )
    .await;

    Ok(ApiResponse::message_only("Removed from cart"))
}

pub async fn clear_cart(
    pool: &DbPool,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(pool)
        .await?;

    audit::record(
        pool,
        Some(user.user_id),
        "cart_clear",
        "cart_items",
        serde_json::json!({ "removed": result.rows_affected() }),
    )
    .await;

    Ok(ApiResponse::message_only("Cart cleared"))
}

/// Prices the caller's cart from the product rows, rejecting lines that
/// cannot currently be fulfilled.
pub async fn priced_lines(pool: &DbPool, user_id: Uuid) -> AppResult<Vec<PriceLine>> {
    let rows: Vec<(Uuid, String, i64, i32, i32, bool)> = sqlx::query_as(
        r#"
        SELECT p.id, p.name, p.price, p.stock, ci.quantity, p.is_active
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    rows.into_iter()
        .map(|(product_id, name, price, stock, quantity, is_active)| {
            if !is_active {
                return Err(AppError::BadRequest(format!(
                    "Product {name} is no longer available"
                )));
            }
            if stock < quantity {
                return Err(AppError::BadRequest(format!(
                    "Insufficient stock for {name}"
                )));
            }
            Ok(PriceLine {
                product_id,
                name,
                unit_price: price,
                quantity,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_quantity_respects_stock() {
        assert_eq!(merged_quantity(0, 2, 12), Some(2));
        assert_eq!(merged_quantity(2, 10, 12), Some(12));
        assert_eq!(merged_quantity(3, 10, 12), None);
    }

    #[test]
    fn merged_quantity_never_overflows() {
        assert_eq!(merged_quantity(1, i32::MAX, i32::MAX), None);
        assert_eq!(merged_quantity(i32::MAX, 1, 12), None);
    }
}
