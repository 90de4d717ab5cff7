use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    Set, SqlErr,
};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::reviews::{CreateReviewRequest, ProductReviews, ReviewWithAuthor, UpdateReviewRequest},
    entity::{
        products::Entity as Products,
        reviews::{ActiveModel, Column, Entity as Reviews},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Review,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
    validation::Validator,
};

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;

#[derive(FromRow)]
struct ReviewRow {
    #[sqlx(flatten)]
    review: Review,
    first_name: String,
    last_name: String,
}

/// Rounds a mean rating to one decimal place.
pub fn round_rating(average: f64) -> f64 {
    (average * 10.0).round() / 10.0
}

pub async fn list_product_reviews(
    state: &AppState,
    product_id: Uuid,
    pagination: Pagination,
) -> AppResult<ApiResponse<ProductReviews>> {
    let (page, limit, offset) = pagination.normalize(DEFAULT_PER_PAGE);

    let rows = sqlx::query_as::<_, ReviewRow>(
        r#"
        SELECT r.id, r.user_id, r.product_id, r.rating, r.comment, r.created_at, r.updated_at,
               u.first_name, u.last_name
        FROM reviews r
        JOIN users u ON u.id = r.user_id
        WHERE r.product_id = $1
        ORDER BY r.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(product_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let (total, average): (i64, Option<f64>) = sqlx::query_as(
        "SELECT COUNT(*), AVG(rating)::float8 FROM reviews WHERE product_id = $1",
    )
    .bind(product_id)
    .fetch_one(&state.pool)
    .await?;

    let items = rows
        .into_iter()
        .map(|row| ReviewWithAuthor {
            review: row.review,
            first_name: row.first_name,
            last_name: row.last_name,
        })
        .collect();

    let data = ProductReviews {
        items,
        average_rating: average.map(round_rating).unwrap_or(0.0),
        total_reviews: total,
    };
    Ok(ApiResponse::success(
        "Reviews",
        data,
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn create_review(
    state: &AppState,
    user: &AuthUser,
    payload: CreateReviewRequest,
) -> AppResult<ApiResponse<Review>> {
    Validator::new()
        .range("rating", payload.rating, MIN_RATING, MAX_RATING)
        .finish()?;

    let product_exists = Products::find_by_id(payload.product_id)
        .count(&state.orm)
        .await?
        > 0;
    if !product_exists {
        return Err(AppError::NotFoundMsg("Product not found".into()));
    }

    let (purchased,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM orders o
            JOIN order_items oi ON oi.order_id = o.id
            WHERE o.user_id = $1 AND oi.product_id = $2 AND o.status = 'delivered'
        )
        "#,
    )
    .bind(user.user_id)
    .bind(payload.product_id)
    .fetch_one(&state.pool)
    .await?;

    if !purchased {
        return Err(AppError::BadRequest(
            "You can only review products from your delivered orders".into(),
        ));
    }

    let already = Reviews::find()
        .filter(Column::UserId.eq(user.user_id))
        .filter(Column::ProductId.eq(payload.product_id))
        .count(&state.orm)
        .await?
        > 0;
    if already {
        return Err(AppError::BadRequest(
            "You have already reviewed this product".into(),
        ));
    }

    let review = ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        product_id: Set(payload.product_id),
        rating: Set(payload.rating),
        comment: Set(payload.comment),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await
    .map_err(|err| match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::BadRequest("You have already reviewed this product".into())
        }
        _ => AppError::from(err),
    })?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "review_create",
        "reviews",
        serde_json::json!({ "review_id": review.id, "product_id": review.product_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Review created",
        Review::from(review),
        Some(Meta::empty()),
    ))
}

pub async fn update_review(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateReviewRequest,
) -> AppResult<ApiResponse<Review>> {
    if let Some(rating) = payload.rating {
        Validator::new()
            .range("rating", rating, MIN_RATING, MAX_RATING)
            .finish()?;
    }

    let existing = Reviews::find_by_id(id)
        .filter(Column::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?;
    let existing = match existing {
        Some(r) => r,
        None => return Err(AppError::NotFoundMsg("Review not found".into())),
    };

    let mut active: ActiveModel = existing.into();
    if let Some(rating) = payload.rating {
        active.rating = Set(rating);
    }
    if let Some(comment) = payload.comment {
        active.comment = Set(Some(comment));
    }
    active.updated_at = Set(Utc::now().into());
    let review = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Review updated",
        Review::from(review),
        Some(Meta::empty()),
    ))
}

pub async fn delete_review(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = Reviews::delete_many()
        .filter(Column::Id.eq(id))
        .filter(Column::UserId.eq(user.user_id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFoundMsg("Review not found".into()));
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "review_delete",
        "reviews",
        serde_json::json!({ "review_id": id }),
    )
    .await;

    Ok(ApiResponse::message_only("Review deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_average_to_one_decimal() {
        assert_eq!(round_rating(4.0), 4.0);
        assert_eq!(round_rating(4.333_333), 4.3);
        assert_eq!(round_rating(4.25), 4.3);
        assert_eq!(round_rating(3.666_667), 3.7);
    }
}
