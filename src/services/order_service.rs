use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbBackend, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{
        CheckoutRequest, CreateOrderRequest, OrderList, OrderWithItems, UpdateOrderStatusRequest,
        UpdatePaymentStatusRequest,
    },
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Collection, Order, OrderItem, OrderStatus, PaymentStatus, parse_stored},
    pricing::{self, ValidatedLine},
    receipt::render_receipt,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{auth_service::find_user, product_service::apply_stock_decrement},
    state::AppState,
    validation::{normalize_email, optional, required, validate_email},
};

struct NewOrder {
    user_id: Option<Uuid>,
    user_name: String,
    user_email: String,
    user_phone: String,
    location: String,
}

/// Places an order from lines submitted by the storefront.
///
/// Every line is checked against the catalog inside one transaction: the
/// product must exist, the submitted price must match the current price,
/// and stock is decremented conditionally. Any failure rolls back the
/// whole order. Stored lines take their name and image from the catalog.
pub async fn create_order(
    state: &AppState,
    user: Option<&AuthUser>,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    const MISSING: &str = "Please provide user name, email, phone, and location";
    let user_name = required(payload.user_name.as_deref(), MISSING)?;
    let user_email = normalize_email(&required(payload.user_email.as_deref(), MISSING)?);
    let user_phone = required(payload.user_phone.as_deref(), MISSING)?;
    let location = required(payload.location.as_deref(), MISSING)?;
    validate_email(&user_email)?;

    let mut lines = pricing::validate_lines(payload.products.as_deref().unwrap_or_default())?;
    let total_amount = pricing::order_total(lines.iter().map(|l| (l.product_price, l.quantity)))?;
    let demand = pricing::stock_demand(&lines)?;

    let txn = state.orm.begin().await?;

    for (&product_id, &quantity) in &demand {
        let product = Products::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::BadRequest(format!("Product {product_id} not found")))?;
        for line in lines.iter_mut().filter(|l| l.product_id == product_id) {
            if product.price != line.product_price {
                return Err(AppError::BadRequest(format!(
                    "Price of {} has changed, please review your cart",
                    product.name
                )));
            }
            line.product_name = product.name.clone();
            line.product_image = product.image.clone();
            line.collection = parse_stored(&product.collection, line.collection);
        }
        apply_stock_decrement(&txn, product_id, quantity).await?;
    }

    let placed = insert_order(
        &txn,
        NewOrder {
            user_id: user.map(|u| u.user_id),
            user_name,
            user_email,
            user_phone,
            location,
        },
        &lines,
        total_amount,
    )
    .await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.map(|u| u.user_id),
        "order_create",
        "orders",
        serde_json::json!({ "order_id": placed.order.id, "total_amount": total_amount }),
    )
    .await;
    tracing::info!(order_id = %placed.order.id, total_amount, "order created");

    Ok(ApiResponse::success(
        "Order placed successfully!",
        placed,
        Some(Meta::empty()),
    ))
}

/// Turns the caller's server-side cart into an order and empties the cart.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    #[derive(Debug, FromQueryResult)]
    struct CartProductRow {
        product_id: Uuid,
        quantity: i32,
        name: String,
        price: i64,
        image: String,
        collection: String,
    }

    // Read before the transaction: a checkout holds one pool connection at a time.
    let profile = find_user(state, user.user_id).await?;
    let txn = state.orm.begin().await?;

    let rows = CartProductRow::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"
        SELECT ci.product_id, ci.quantity, p.name, p.price, p.image, p.collection
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY ci.product_id
        FOR UPDATE OF ci
        "#,
        [user.user_id.into()],
    ))
    .all(&txn)
    .await?;

    if rows.is_empty() {
        return Err(AppError::bad_request("Cart is empty"));
    }

    let lines: Vec<ValidatedLine> = rows
        .into_iter()
        .map(|row| ValidatedLine {
            product_id: row.product_id,
            product_name: row.name,
            product_price: row.price,
            product_image: row.image,
            quantity: row.quantity,
            collection: parse_stored(&row.collection, Collection::Men),
        })
        .collect();
    let total_amount = pricing::order_total(lines.iter().map(|l| (l.product_price, l.quantity)))?;

    for (&product_id, &quantity) in &pricing::stock_demand(&lines)? {
        apply_stock_decrement(&txn, product_id, quantity).await?;
    }

    let location = optional(payload.location.as_deref()).unwrap_or(profile.address);
    let user_phone = optional(payload.phone.as_deref()).unwrap_or(profile.phone);

    let placed = insert_order(
        &txn,
        NewOrder {
            user_id: Some(user.user_id),
            user_name: profile.name,
            user_email: profile.email,
            user_phone,
            location,
        },
        &lines,
        total_amount,
    )
    .await?;

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "checkout",
        "orders",
        serde_json::json!({ "order_id": placed.order.id, "total_amount": total_amount }),
    )
    .await;
    tracing::info!(order_id = %placed.order.id, total_amount, "checkout completed");

    Ok(ApiResponse::success(
        "Checkout success",
        placed,
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    list_matching(state, Condition::all(), query).await
}

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let profile = find_user(state, user.user_id).await?;
    let condition = Condition::any()
        .add(OrderCol::UserId.eq(user.user_id))
        .add(OrderCol::UserEmail.eq(profile.email));
    list_matching(state, condition, query).await
}

pub async fn list_orders_by_email(
    state: &AppState,
    user: &AuthUser,
    email: &str,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let email = normalize_email(&required(Some(email), "User email is required")?);
    if !user.is_admin() {
        let profile = find_user(state, user.user_id).await?;
        if profile.email != email {
            return Err(AppError::Forbidden);
        }
    }
    list_matching(state, Condition::all().add(OrderCol::UserEmail.eq(email)), query).await
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_visible_order(state, user, id).await?;
    let items = load_items(&state.orm, order.id).await?;
    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_receipt(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<String> {
    let order = find_visible_order(state, user, id).await?;
    let items = load_items(&state.orm, order.id).await?;
    Ok(render_receipt(&OrderWithItems {
        order: order_from_entity(order),
        items,
    }))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let status: OrderStatus = payload.status.parse()?;
    let order = find_order(state, id).await?;

    let mut active: OrderActive = order.into();
    active.order_status = Set(status.as_str().to_string());
    active.updated_at = Set(Utc::now().fixed_offset());
    let order = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": id, "status": status.as_str() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order status updated",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

pub async fn update_payment_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdatePaymentStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let status: PaymentStatus = payload.status.parse()?;
    let order = find_order(state, id).await?;

    let mut active: OrderActive = order.into();
    active.payment_status = Set(status.as_str().to_string());
    active.updated_at = Set(Utc::now().fixed_offset());
    let order = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "payment_status_update",
        "orders",
        serde_json::json!({ "order_id": id, "status": status.as_str() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Payment status updated",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

pub async fn delete_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Orders::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::not_found("Order"));
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_delete",
        "orders",
        serde_json::json!({ "order_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

async fn insert_order<C>(
    conn: &C,
    new: NewOrder,
    lines: &[ValidatedLine],
    total_amount: i64,
) -> AppResult<OrderWithItems>
where
    C: ConnectionTrait,
{
    let order_id = Uuid::new_v4();
    let now = Utc::now().fixed_offset();

    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(new.user_id),
        user_name: Set(new.user_name),
        user_email: Set(new.user_email),
        user_phone: Set(new.user_phone),
        location: Set(new.location),
        total_amount: Set(total_amount),
        order_status: Set(OrderStatus::Pending.as_str().to_string()),
        payment_status: Set(PaymentStatus::Pending.as_str().to_string()),
        invoice_number: Set(build_invoice_number(order_id)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            product_name: Set(line.product_name.clone()),
            product_price: Set(line.product_price),
            product_image: Set(line.product_image.clone()),
            quantity: Set(line.quantity),
            collection: Set(line.collection.as_str().to_string()),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
        items.push(order_item_from_entity(item));
    }

    Ok(OrderWithItems {
        order: order_from_entity(order),
        items,
    })
}

async fn list_matching(
    state: &AppState,
    mut condition: Condition,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    if let Some(status) = optional(query.status.as_deref()) {
        let status: OrderStatus = status.parse()?;
        condition = condition.add(OrderCol::OrderStatus.eq(status.as_str()));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let mut items_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    if !ids.is_empty() {
        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.is_in(ids))
            .order_by_asc(OrderItemCol::CreatedAt)
            .all(&state.orm)
            .await?;
        for item in items {
            items_by_order
                .entry(item.order_id)
                .or_default()
                .push(order_item_from_entity(item));
        }
    }

    let orders = orders
        .into_iter()
        .map(|order| {
            let items = items_by_order.remove(&order.id).unwrap_or_default();
            OrderWithItems {
                order: order_from_entity(order),
                items,
            }
        })
        .collect();

    Ok(ApiResponse::success(
        "Ok",
        OrderList { orders },
        Some(Meta::new(page, limit, total)),
    ))
}

async fn find_order(state: &AppState, id: Uuid) -> AppResult<OrderModel> {
    Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("Order"))
}

/// Admins see every order; customers see orders placed under their id or email.
/// Other people's orders report 404 rather than 403.
async fn find_visible_order(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<OrderModel> {
    let order = find_order(state, id).await?;
    if user.is_admin() || order.user_id == Some(user.user_id) {
        return Ok(order);
    }
    let profile = find_user(state, user.user_id).await?;
    if profile.email == order.user_email {
        return Ok(order);
    }
    Err(AppError::not_found("Order"))
}

async fn load_items<C>(conn: &C, order_id: Uuid) -> AppResult<Vec<OrderItem>>
where
    C: ConnectionTrait,
{
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();
    Ok(items)
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        user_name: model.user_name,
        user_email: model.user_email,
        user_phone: model.user_phone,
        location: model.location,
        total_amount: model.total_amount,
        order_status: parse_stored(&model.order_status, OrderStatus::Pending),
        payment_status: parse_stored(&model.payment_status, PaymentStatus::Pending),
        invoice_number: model.invoice_number,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name: model.product_name,
        product_price: model.product_price,
        product_image: model.product_image,
        quantity: model.quantity,
        collection: parse_stored(&model.collection, Collection::Men),
    }
}

fn build_invoice_number(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    let short = &suffix[..8];
    format!("INV-{}-{}", date, short.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_number_embeds_date_and_order_prefix() {
        let id = Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap();
        let invoice = build_invoice_number(id);
        let date = Utc::now().format("%Y%m%d").to_string();
        assert_eq!(invoice, format!("INV-{date}-A1B2C3D4"));
    }
}
