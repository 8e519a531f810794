use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{AddToCartRequest, CartLine, CartView, UpdateCartRequest},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::CartItem,
    pricing,
    response::{ApiResponse, Meta},
    services::product_service::ProductRow,
    state::AppState,
    validation::optional,
};

#[derive(FromRow)]
struct CartWithProductRow {
    cart_id: Uuid,
    quantity: i32,
    size: Option<String>,
    #[sqlx(flatten)]
    product: ProductRow,
}

pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let rows = sqlx::query_as::<_, CartWithProductRow>(
        r#"
        SELECT ci.id AS cart_id, ci.quantity, ci.size, p.*
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let view = build_view(rows)?;
    let meta = Meta::single_page(view.items.len());
    Ok(ApiResponse::success("OK", view, Some(meta)))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    let quantity = pricing::normalize_quantity(payload.quantity)?;
    ensure_product_exists(state, payload.product_id).await?;

    let cart_item = upsert_line(
        &state.pool,
        user.user_id,
        payload.product_id,
        quantity,
        optional(payload.size.as_deref()),
    )
    .await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        "cart_items",
        serde_json::json!({ "product_id": payload.product_id, "quantity": quantity }),
    )
    .await;

    Ok(ApiResponse::success("Added to cart", cart_item, None))
}

/// Sets the quantity of an existing line; zero removes it.
pub async fn update_cart_item(
    state: &AppState,
    user: &AuthUser,
    payload: UpdateCartRequest,
) -> AppResult<ApiResponse<Option<CartItem>>> {
    if payload.quantity < 0 {
        return Err(AppError::bad_request("Quantity cannot be negative"));
    }
    if payload.quantity == 0 {
        delete_line(state, user, payload.product_id).await?;
        return Ok(ApiResponse::success("Removed from cart", None, None));
    }
    let quantity = pricing::normalize_quantity(Some(payload.quantity))?;

    let cart_item = sqlx::query_as::<_, CartItem>(
        r#"
        UPDATE cart_items
        SET quantity = $3
        WHERE user_id = $1 AND product_id = $2
        RETURNING id, user_id, product_id, quantity, size, created_at
        "#,
    )
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(quantity)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Cart item"))?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        "cart_items",
        serde_json::json!({ "product_id": payload.product_id, "quantity": quantity }),
    )
    .await;

    Ok(ApiResponse::success("Cart updated", Some(cart_item), None))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    delete_line(state, user, product_id).await?;
    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_clear",
        "cart_items",
        serde_json::json!({ "removed": result.rows_affected() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart cleared",
        serde_json::json!({ "removed": result.rows_affected() }),
        Some(Meta::empty()),
    ))
}

/// Adds `quantity` to the caller's line for `product_id`, creating it if needed.
/// The increment happens in the database so concurrent adds are not lost.
/// A line never grows past `MAX_LINE_QUANTITY`.
pub(crate) async fn upsert_line<'e, E>(
    executor: E,
    user_id: Uuid,
    product_id: Uuid,
    quantity: i32,
    size: Option<String>,
) -> AppResult<CartItem>
where
    E: sqlx::PgExecutor<'e>,
{
    let quantity = pricing::normalize_quantity(Some(quantity))?;
    let cart_item = sqlx::query_as::<_, CartItem>(
        r#"
        INSERT INTO cart_items (id, user_id, product_id, quantity, size)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, product_id) DO UPDATE
        SET quantity = cart_items.quantity + EXCLUDED.quantity,
            size = COALESCE(EXCLUDED.size, cart_items.size)
        WHERE cart_items.quantity + EXCLUDED.quantity <= $6
        RETURNING id, user_id, product_id, quantity, size, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(product_id)
    .bind(quantity)
    .bind(size)
    .bind(pricing::MAX_LINE_QUANTITY)
    .fetch_optional(executor)
    .await?;

    cart_item.ok_or_else(|| {
        AppError::BadRequest(format!(
            "Cart quantity cannot exceed {}",
            pricing::MAX_LINE_QUANTITY
        ))
    })
}

pub(crate) async fn ensure_product_exists(state: &AppState, product_id: Uuid) -> AppResult<()> {
    let product_exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(&state.pool)
        .await?;
    if product_exist.is_none() {
        return Err(AppError::not_found("Product"));
    }
    Ok(())
}

async fn delete_line(state: &AppState, user: &AuthUser, product_id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM cart_items WHERE product_id = $1 AND user_id = $2")
        .bind(product_id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Cart item"));
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "product_id": product_id }),
    )
    .await;
    Ok(())
}

fn build_view(rows: Vec<CartWithProductRow>) -> AppResult<CartView> {
    let mut items = Vec::with_capacity(rows.len());
    let mut total_items: i64 = 0;
    for row in rows {
        let line_total = pricing::line_total(row.product.price, row.quantity)?;
        total_items += i64::from(row.quantity);
        items.push(CartLine {
            id: row.cart_id,
            product: row.product.into(),
            quantity: row.quantity,
            size: row.size,
            line_total,
        });
    }
    let subtotal = pricing::order_total(items.iter().map(|l| (l.product.price, l.quantity)))?;
    Ok(CartView {
        items,
        total_items,
        subtotal,
    })
}
