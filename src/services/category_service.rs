use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    Set, SqlErr,
};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::categories::{
        CategoryList, CategoryWithCount, CreateCategoryRequest, UpdateCategoryRequest,
    },
    entity::{
        categories::{ActiveModel, Entity as Categories},
        products::{Column as ProductCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Category,
    response::{ApiResponse, Meta},
    state::AppState,
    validation::Validator,
};

#[derive(FromRow)]
struct CategoryCountRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    product_count: i64,
}

impl From<CategoryCountRow> for CategoryWithCount {
    fn from(row: CategoryCountRow) -> Self {
        Self {
            category: Category {
                id: row.id,
                name: row.name,
                description: row.description,
                image_url: row.image_url,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            product_count: row.product_count,
        }
    }
}

const CATEGORY_WITH_COUNT: &str = r#"
    SELECT c.id, c.name, c.description, c.image_url, c.created_at, c.updated_at,
           COUNT(p.id) AS product_count
    FROM categories c
    LEFT JOIN products p ON p.category_id = c.id AND p.is_active
"#;

pub async fn list_categories(state: &AppState) -> AppResult<ApiResponse<CategoryList>> {
    let rows = sqlx::query_as::<_, CategoryCountRow>(&format!(
        "{CATEGORY_WITH_COUNT} GROUP BY c.id ORDER BY c.name ASC"
    ))
    .fetch_all(&state.pool)
    .await?;

    let total = rows.len() as i64;
    let items = rows.into_iter().map(CategoryWithCount::from).collect();
    Ok(ApiResponse::success(
        "Categories",
        CategoryList { items },
        Some(Meta::new(1, total, total)),
    ))
}

pub async fn get_category(
    state: &AppState,
    id: Uuid,
) -> AppResult<ApiResponse<CategoryWithCount>> {
    let row = sqlx::query_as::<_, CategoryCountRow>(&format!(
        "{CATEGORY_WITH_COUNT} WHERE c.id = $1 GROUP BY c.id"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    let row = match row {
        Some(r) => r,
        None => return Err(AppError::NotFoundMsg("Category not found".into())),
    };
    Ok(ApiResponse::success(
        "Category",
        CategoryWithCount::from(row),
        Some(Meta::empty()),
    ))
}

pub async fn create_category(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;
    Validator::new().required("name", &payload.name).finish()?;

    let category = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name.trim().to_string()),
        description: Set(payload.description),
        image_url: Set(payload.image_url),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await
    .map_err(duplicate_name)?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "category_create",
        "categories",
        serde_json::json!({ "category_id": category.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category created",
        Category::from(category),
        Some(Meta::empty()),
    ))
}

pub async fn update_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;
    Validator::new()
        .not_blank("name", payload.name.as_deref())
        .finish()?;

    let existing = Categories::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(c) => c,
        None => return Err(AppError::NotFoundMsg("Category not found".into())),
    };

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(image_url) = payload.image_url {
        active.image_url = Set(Some(image_url));
    }
    active.updated_at = Set(Utc::now().into());
    let category = active.update(&state.orm).await.map_err(duplicate_name)?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "category_update",
        "categories",
        serde_json::json!({ "category_id": category.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category updated",
        Category::from(category),
        Some(Meta::empty()),
    ))
}

pub async fn delete_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let in_use = Products::find()
        .filter(ProductCol::CategoryId.eq(id))
        .count(&state.orm)
        .await?;
    if in_use > 0 {
        return Err(AppError::BadRequest(
            "Cannot delete a category that still has products".into(),
        ));
    }

    let result = Categories::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFoundMsg("Category not found".into()));
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "category_delete",
        "categories",
        serde_json::json!({ "category_id": id }),
    )
    .await;

    Ok(ApiResponse::message_only("Category deleted"))
}

fn duplicate_name(err: sea_orm::DbErr) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::BadRequest("Category name already exists".into())
        }
        _ => AppError::from(err),
    }
}
