use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, DatabaseTransaction, EntityTrait,
    FromQueryResult, JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait,
    Set, TransactionTrait,
    sea_query::{Expr, LockType},
};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{
        CreateOrderRequest, CustomerSummary, OrderDetail, OrderItemDetail, OrderList,
        ShippingAddressInput, UpdateOrderStatusRequest,
    },
    entity::{
        addresses::{ActiveModel as AddressActive, Column as AddressCol, Entity as Addresses},
        cart_items::{self, Column as CartCol, Entity as CartItems},
        order_items::ActiveModel as OrderItemActive,
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products},
        users::{Column as UserCol, Entity as Users},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Address, Order, OrderItem, OrderStatus, PaymentMethod},
    pricing::{self, PriceLine},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
    validation::Validator,
};

pub const DEFAULT_PER_PAGE: i64 = 10;

/// Everything needed to write an order and its side effects in one transaction.
#[derive(Debug, Clone)]
pub(crate) struct NewOrder {
    pub user_id: Uuid,
    pub address: ShippingAddressInput,
    pub lines: Vec<PriceLine>,
    pub total_amount: i64,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_intent_id: Option<String>,
    /// Payment already captured: floor stock at zero instead of refusing the order.
    pub clamp_stock: bool,
}

#[derive(FromRow)]
struct OrderItemRow {
    #[sqlx(flatten)]
    item: OrderItem,
    product_name: String,
    product_image: Option<String>,
}

pub fn validate_address(address: &ShippingAddressInput) -> AppResult<()> {
    Validator::new()
        .required("shipping_address.street_address", &address.street_address)
        .required("shipping_address.city", &address.city)
        .required("shipping_address.state", &address.state)
        .required("shipping_address.postal_code", &address.postal_code)
        .required("shipping_address.country", &address.country)
        .finish()
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = pagination.normalize(DEFAULT_PER_PAGE);

    let finder = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .order_by_desc(OrderCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let items = load_details(state, orders, false).await?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Orders", OrderList { items }, Some(meta)))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderDetail>> {
    let mut finder = Orders::find_by_id(id);
    if !user.is_admin() {
        finder = finder.filter(OrderCol::UserId.eq(user.user_id));
    }
    let order = finder.one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFoundMsg("Order not found".into())),
    };

    let detail = load_details(state, vec![order], user.is_admin())
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)?;

    Ok(ApiResponse::success("Order", detail, Some(Meta::empty())))
}

/// Turns the caller's cart into a `pending` manual order.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderDetail>> {
    validate_address(&payload.shipping_address)?;

    let txn = state.orm.begin().await?;

    #[derive(Debug, FromQueryResult)]
    struct CartProductRow {
        product_id: Uuid,
        quantity: i32,
        name: String,
        price: i64,
    }

    let rows = CartItems::find()
        .select_only()
        .column(CartCol::ProductId)
        .column(CartCol::Quantity)
        .column_as(ProdCol::Name, "name")
        .column_as(ProdCol::Price, "price")
        .join(JoinType::InnerJoin, cart_items::Relation::Products.def())
        .filter(CartCol::UserId.eq(user.user_id))
        .order_by_asc(CartCol::CreatedAt)
        .lock(LockType::Update)
        .into_model::<CartProductRow>()
        .all(&txn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let lines: Vec<PriceLine> = rows
        .into_iter()
        .map(|row| PriceLine {
            product_id: row.product_id,
            name: row.name,
            unit_price: row.price,
            quantity: row.quantity,
        })
        .collect();
    let total_amount = pricing::subtotal(&lines);

    let order = place_order(
        &txn,
        NewOrder {
            user_id: user.user_id,
            address: payload.shipping_address,
            lines,
            total_amount,
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::Manual,
            payment_intent_id: None,
            clamp_stock: false,
        },
    )
    .await?;

    txn.commit().await?;

    tracing::info!(order_id = %order.id, user_id = %user.user_id, total = order.total_amount, "order created");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_create",
        "orders",
        serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount }),
    )
    .await;

    let detail = load_details(state, vec![order], false)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)?;

    Ok(ApiResponse::success(
        "Order created",
        detail,
        Some(Meta::empty()),
    ))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let status = parse_admin_status(&payload.status)?;

    let existing = Orders::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(o) => o,
        None => return Err(AppError::NotFoundMsg("Order not found".into())),
    };
    let previous = existing.status.clone();

    let mut active: OrderActive = existing.into();
    active.status = Set(status.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    tracing::info!(order_id = %order.id, from = %previous, to = %status, "order status changed");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": order.id, "from": previous, "to": status.as_str() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order status updated",
        Order::from(order),
        Some(Meta::empty()),
    ))
}

pub fn parse_admin_status(value: &str) -> AppResult<OrderStatus> {
    match value.trim().parse::<OrderStatus>() {
        Ok(status) if status.is_admin_settable() => Ok(status),
        _ => Err(AppError::BadRequest(
            "Invalid status. Must be one of: pending, processing, shipped, delivered, cancelled"
                .into(),
        )),
    }
}

/// Writes address, order and items, adjusts stock and clears the user's cart.
/// Product rows are locked for the rest of the caller's transaction.
pub(crate) async fn place_order(
    txn: &DatabaseTransaction,
    new: NewOrder,
) -> AppResult<OrderModel> {
    let product_ids: Vec<Uuid> = new.lines.iter().map(|l| l.product_id).collect();
    let products: HashMap<Uuid, _> = Products::find()
        .filter(ProdCol::Id.is_in(product_ids))
        .lock(LockType::Update)
        .all(txn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut new_stock: Vec<(Uuid, i32)> = Vec::with_capacity(new.lines.len());
    let mut dropped: Vec<Uuid> = Vec::new();
    for line in &new.lines {
        let product = products.get(&line.product_id);
        let remaining = match product {
            Some(p) if new.clamp_stock => (p.stock - line.quantity).max(0),
            Some(p) if !p.is_active => {
                return Err(AppError::BadRequest(format!(
                    "Product {} is no longer available",
                    p.name
                )));
            }
            Some(p) if p.stock < line.quantity => {
                return Err(AppError::BadRequest(format!(
                    "Insufficient stock for {}",
                    p.name
                )));
            }
            Some(p) => p.stock - line.quantity,
            // A deleted product can only be skipped once payment is captured.
            None if new.clamp_stock => {
                dropped.push(line.product_id);
                continue;
            }
            None => {
                return Err(AppError::BadRequest(format!(
                    "Product {} is no longer available",
                    line.name
                )));
            }
        };
        new_stock.push((line.product_id, remaining));
    }

    let address = AddressActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(new.user_id),
        street_address: Set(new.address.street_address.trim().to_string()),
        city: Set(new.address.city.trim().to_string()),
        state: Set(new.address.state.trim().to_string()),
        postal_code: Set(new.address.postal_code.trim().to_string()),
        country: Set(new.address.country.trim().to_string()),
        is_default: Set(false),
        created_at: NotSet,
    }
    .insert(txn)
    .await?;

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(new.user_id),
        shipping_address_id: Set(Some(address.id)),
        total_amount: Set(new.total_amount),
        status: Set(new.status.as_str().to_string()),
        payment_method: Set(new.payment_method.as_str().to_string()),
        payment_intent_id: Set(new.payment_intent_id),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(txn)
    .await?;

    // total_amount stays what was charged even when lines are dropped; the
    // difference is settled out of band.
    if !dropped.is_empty() {
        tracing::warn!(
            order_id = %order.id,
            user_id = %new.user_id,
            dropped_products = ?dropped,
            "paid order lines skipped for deleted products"
        );
    }

    for line in &new.lines {
        if !products.contains_key(&line.product_id) {
            continue;
        }
        OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.unit_price),
            created_at: NotSet,
        }
        .insert(txn)
        .await?;
    }

    for (product_id, stock) in new_stock {
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::value(stock))
            .col_expr(ProdCol::UpdatedAt, Expr::value(Utc::now()))
            .filter(ProdCol::Id.eq(product_id))
            .exec(txn)
            .await?;
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(new.user_id))
        .exec(txn)
        .await?;

    Ok(order)
}

/// Attaches items (with product name and image), shipping address and
/// optionally the customer to each order.
pub(crate) async fn load_details(
    state: &AppState,
    orders: Vec<OrderModel>,
    with_customer: bool,
) -> AppResult<Vec<OrderDetail>> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let rows = sqlx::query_as::<_, OrderItemRow>(
        r#"
        SELECT oi.id, oi.order_id, oi.product_id, oi.quantity, oi.price, oi.created_at,
               p.name AS product_name, p.image_url AS product_image
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        WHERE oi.order_id = ANY($1)
        ORDER BY oi.created_at
        "#,
    )
    .bind(&order_ids)
    .fetch_all(&state.pool)
    .await?;

    let mut items: HashMap<Uuid, Vec<OrderItemDetail>> = HashMap::new();
    for row in rows {
        items.entry(row.item.order_id).or_default().push(OrderItemDetail {
            item: row.item,
            product_name: row.product_name,
            product_image: row.product_image,
        });
    }

    let address_ids: Vec<Uuid> = orders.iter().filter_map(|o| o.shipping_address_id).collect();
    let addresses: HashMap<Uuid, Address> = if address_ids.is_empty() {
        HashMap::new()
    } else {
        Addresses::find()
            .filter(AddressCol::Id.is_in(address_ids))
            .all(&state.orm)
            .await?
            .into_iter()
            .map(|a| (a.id, Address::from(a)))
            .collect()
    };

    let customers: HashMap<Uuid, CustomerSummary> = if with_customer {
        let user_ids: Vec<Uuid> = orders.iter().map(|o| o.user_id).collect();
        Users::find()
            .filter(UserCol::Id.is_in(user_ids))
            .all(&state.orm)
            .await?
            .into_iter()
            .map(|u| {
                (
                    u.id,
                    CustomerSummary {
                        id: u.id,
                        email: u.email,
                        first_name: u.first_name,
                        last_name: u.last_name,
                    },
                )
            })
            .collect()
    } else {
        HashMap::new()
    };

    Ok(orders
        .into_iter()
        .map(|model| {
            let shipping_address = model
                .shipping_address_id
                .and_then(|id| addresses.get(&id).cloned());
            let customer = customers.get(&model.user_id).cloned();
            let items = items.remove(&model.id).unwrap_or_default();
            OrderDetail {
                order: Order::from(model),
                items,
                shipping_address,
                customer,
            }
        })
        .collect())
}
