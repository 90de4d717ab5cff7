use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    sea_query::{Expr, extension::postgres::PgExpr},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::products::{CreateProductRequest, ProductDetail, ProductList, UpdateProductRequest},
    entity::{
        categories::{Column as CategoryCol, Entity as Categories},
        products::{ActiveModel, Column, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{CategorySummary, Product},
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
    validation::Validator,
};

pub const DEFAULT_PER_PAGE: i64 = 12;

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.normalize(DEFAULT_PER_PAGE);
    let mut condition = Condition::all().add(Column::IsActive.eq(true));

    if let Some(category_id) = query.category {
        condition = condition.add(Column::CategoryId.eq(category_id));
    }

    if let Some(search) = query.search.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern)),
        );
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let products = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let items = with_categories(&state.orm, products).await?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<ProductDetail>> {
    let product = Products::find_by_id(id)
        .filter(Column::IsActive.eq(true))
        .one(&state.orm)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFoundMsg("Product not found".into())),
    };

    let detail = with_categories(&state.orm, vec![product])
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)?;

    Ok(ApiResponse::success("Product", detail, Some(Meta::empty())))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<ProductDetail>> {
    ensure_admin(user)?;
    Validator::new()
        .required("name", &payload.name)
        .at_least("price", payload.price, 0)
        .at_least("stock", payload.stock, 0)
        .finish()?;

    if let Some(category_id) = payload.category_id {
        ensure_category_exists(state, category_id).await?;
    }

    let active = ActiveModel {
        id: Set(Uuid::new_v4()),
        category_id: Set(payload.category_id),
        name: Set(payload.name.trim().to_string()),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        image_url: Set(payload.image_url),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let product = active.insert(&state.orm).await.map_err(duplicate_name)?;

    tracing::info!(product_id = %product.id, "product created");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    let detail = single_detail(state, product).await?;
    Ok(ApiResponse::success(
        "Product created",
        detail,
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<ProductDetail>> {
    ensure_admin(user)?;

    let mut validator = Validator::new();
    validator.not_blank("name", payload.name.as_deref());
    if let Some(price) = payload.price {
        validator.at_least("price", price, 0);
    }
    if let Some(stock) = payload.stock {
        validator.at_least("stock", stock, 0);
    }
    validator.finish()?;

    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFoundMsg("Product not found".into())),
    };

    if let Some(category_id) = payload.category_id {
        ensure_category_exists(state, category_id).await?;
    }

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(stock);
    }
    if let Some(category_id) = payload.category_id {
        active.category_id = Set(Some(category_id));
    }
    if let Some(image_url) = payload.image_url {
        active.image_url = Set(Some(image_url));
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await.map_err(duplicate_name)?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    let detail = single_detail(state, product).await?;
    Ok(ApiResponse::success("Updated", detail, Some(Meta::empty())))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Products::delete_by_id(id)
        .exec(&state.orm)
        .await
        .map_err(|err| match err.sql_err() {
            Some(SqlErr::ForeignKeyConstraintViolation(_)) => AppError::BadRequest(
                "Product has been ordered and cannot be deleted; deactivate it instead".into(),
            ),
            _ => AppError::from(err),
        })?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFoundMsg("Product not found".into()));
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::message_only("Product deleted"))
}

/// Attaches category summaries to products with a single extra query.
pub(crate) async fn with_categories<C: ConnectionTrait>(
    conn: &C,
    products: Vec<ProductModel>,
) -> AppResult<Vec<ProductDetail>> {
    let mut ids: Vec<Uuid> = products.iter().filter_map(|p| p.category_id).collect();
    ids.sort();
    ids.dedup();

    let categories: HashMap<Uuid, CategorySummary> = if ids.is_empty() {
        HashMap::new()
    } else {
        Categories::find()
            .filter(CategoryCol::Id.is_in(ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|c| {
                (
                    c.id,
                    CategorySummary {
                        id: c.id,
                        name: c.name,
                    },
                )
            })
            .collect()
    };

    Ok(products
        .into_iter()
        .map(|model| {
            let category = model
                .category_id
                .and_then(|id| categories.get(&id).cloned());
            ProductDetail {
                product: Product::from(model),
                category,
            }
        })
        .collect())
}

async fn single_detail(state: &AppState, product: ProductModel) -> AppResult<ProductDetail> {
    with_categories(&state.orm, vec![product])
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)
}

async fn ensure_category_exists(state: &AppState, category_id: Uuid) -> AppResult<()> {
    let exists = Categories::find_by_id(category_id)
        .count(&state.orm)
        .await?
        > 0;
    if !exists {
        Validator::new()
            .push("category_id", "category does not exist")
            .finish()?;
    }
    Ok(())
}

fn duplicate_name(err: sea_orm::DbErr) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::BadRequest("A product with that name already exists".into())
        }
        _ => AppError::from(err),
    }
}
