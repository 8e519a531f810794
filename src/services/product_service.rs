use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, Set,
};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::products::{
        CreateProductRequest, DecrementStockRequest, DeletedCount, ProductList,
        UpdateProductRequest,
    },
    entity::products::{ActiveModel, Column, Entity as Products, Model as ProductModel},
    error::{AppError, AppResult, is_unique_violation},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Collection, Product, parse_stored},
    response::{ApiResponse, Meta},
    routes::params::{Pagination, ProductQuery, ProductSortBy, SearchQuery, SortOrder},
    state::AppState,
    validation::{optional, required},
};

pub const DEFAULT_BRAND: &str = "VastraVerse";
pub const DEFAULT_SIZES: [&str; 6] = ["XS", "S", "M", "L", "XL", "XXL"];
pub const MAX_RATING: f64 = 5.0;

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let mut condition = Condition::all();

    if let Some(search) = optional(query.q.as_deref()) {
        condition = condition.add(search_condition(&search));
    }
    if let Some(category) = optional(query.category.as_deref()) {
        condition = condition.add(Expr::col(Column::Category).ilike(escape_like(&category)));
    }
    if let Some(collection) = optional(query.collection.as_deref()) {
        let collection: Collection = collection.parse()?;
        condition = condition.add(Column::Collection.eq(collection.as_str()));
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
        ProductSortBy::Rating => Column::Rating,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    paginate(state, finder, query.pagination(), "Products").await
}

pub async fn list_by_collection(
    state: &AppState,
    collection: &str,
    pagination: Pagination,
) -> AppResult<ApiResponse<ProductList>> {
    let collection: Collection = collection.parse()?;
    let finder = Products::find()
        .filter(Column::Collection.eq(collection.as_str()))
        .order_by_desc(Column::CreatedAt);
    let message = format!("{} products", collection);
    paginate(state, finder, pagination, &message).await
}

pub async fn list_by_category(
    state: &AppState,
    category: &str,
    pagination: Pagination,
) -> AppResult<ApiResponse<ProductList>> {
    let category = required(Some(category), "Category is required")?;
    let finder = Products::find()
        .filter(Expr::col(Column::Category).ilike(escape_like(&category)))
        .order_by_desc(Column::CreatedAt);
    paginate(state, finder, pagination, "Products").await
}

pub async fn search_products(
    state: &AppState,
    query: SearchQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let q = required(query.q.as_deref(), "Please provide a search query")?;

    let mut condition = Condition::all().add(search_condition(&q));
    if let Some(collection) = optional(query.collection.as_deref()) {
        let collection: Collection = collection.parse()?;
        condition = condition.add(Column::Collection.eq(collection.as_str()));
    }

    let finder = Products::find()
        .filter(condition)
        .order_by_desc(Column::CreatedAt);
    paginate(state, finder, query.pagination(), "Search results").await
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let product = find_product(state, id).await?;
    Ok(ApiResponse::success("Product", product_from_entity(product), None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let active = new_product(payload)?;

    let product = match active.insert(&state.orm).await {
        Ok(product) => product,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::bad_request("A product with this name already exists"));
        }
        Err(err) => return Err(err.into()),
    };

    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;
    tracing::info!(product_id = %product.id, "product created");

    Ok(ApiResponse::success(
        "Product created successfully",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let existing = find_product(state, id).await?;

    let mut active: ActiveModel = existing.into();
    apply_update(&mut active, payload)?;
    active.updated_at = Set(Utc::now().fixed_offset());

    let product = match active.update(&state.orm).await {
        Ok(product) => product,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::bad_request("A product with this name already exists"));
        }
        Err(err) => return Err(err.into()),
    };

    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product updated successfully",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Products::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::not_found("Product"));
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product deleted successfully",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Removes every catalog row. Orders keep their copied line items.
pub async fn delete_all_products(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<DeletedCount>> {
    ensure_admin(user)?;
    let result = Products::delete_many().exec(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_delete_all",
        "products",
        serde_json::json!({ "deleted": result.rows_affected }),
    )
    .await;
    tracing::warn!(deleted = result.rows_affected, "all products deleted");

    Ok(ApiResponse::success(
        "All products deleted successfully",
        DeletedCount {
            deleted: result.rows_affected,
        },
        Some(Meta::empty()),
    ))
}

pub async fn decrement_stock(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: DecrementStockRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    apply_stock_decrement(&state.orm, id, payload.quantity).await?;
    let product = find_product(state, id).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "stock_decrement",
        "products",
        serde_json::json!({ "product_id": id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success(
        "Stock updated",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

/// Decrements stock in one conditional statement, so concurrent callers can
/// never drive it below zero.
pub async fn apply_stock_decrement<C>(conn: &C, id: Uuid, quantity: i32) -> AppResult<()>
where
    C: ConnectionTrait,
{
    if quantity < 1 {
        return Err(AppError::bad_request("Quantity must be at least 1"));
    }

    let result = Products::update_many()
        .col_expr(Column::Stock, Expr::col(Column::Stock).sub(quantity))
        .col_expr(Column::UpdatedAt, Expr::current_timestamp().into())
        .filter(Column::Id.eq(id))
        .filter(Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let exists = Products::find_by_id(id).one(conn).await?.is_some();
        return Err(if exists {
            AppError::BadRequest(format!("Insufficient stock for product {id}"))
        } else {
            AppError::not_found("Product")
        });
    }

    tracing::debug!(product_id = %id, quantity, "stock decremented");
    Ok(())
}

pub(crate) async fn find_product(state: &AppState, id: Uuid) -> AppResult<ProductModel> {
    Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("Product"))
}

async fn paginate(
    state: &AppState,
    finder: Select<Products>,
    pagination: Pagination,
    message: &str,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = pagination.normalize();
    let total = finder.clone().count(&state.orm).await? as i64;

    let products = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    Ok(ApiResponse::success(
        message,
        ProductList { products },
        Some(Meta::new(page, limit, total)),
    ))
}

fn search_condition(search: &str) -> Condition {
    let pattern = format!("%{}%", escape_like(search));
    Condition::any()
        .add(Expr::col(Column::Name).ilike(pattern.clone()))
        .add(Expr::col(Column::Description).ilike(pattern.clone()))
        .add(Expr::col(Column::Category).ilike(pattern.clone()))
        .add(Expr::col(Column::Brand).ilike(pattern))
}

/// Escape LIKE wildcards so user input matches literally.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn validate_price(price: i64) -> AppResult<i64> {
    if price <= 0 {
        return Err(AppError::bad_request("Price must be greater than 0"));
    }
    Ok(price)
}

fn validate_stock(stock: i32) -> AppResult<i32> {
    if stock < 0 {
        return Err(AppError::bad_request("Stock cannot be negative"));
    }
    Ok(stock)
}

fn validate_rating(rating: f64) -> AppResult<f64> {
    if !(0.0..=MAX_RATING).contains(&rating) {
        return Err(AppError::bad_request("Rating must be between 0 and 5"));
    }
    Ok(rating)
}

fn normalize_sizes(sizes: Option<Vec<String>>) -> Vec<String> {
    let sizes: Vec<String> = sizes
        .unwrap_or_default()
        .iter()
        .filter_map(|s| optional(Some(s.as_str())))
        .collect();
    if sizes.is_empty() {
        DEFAULT_SIZES.iter().map(|s| s.to_string()).collect()
    } else {
        sizes
    }
}

pub(crate) fn new_product(payload: CreateProductRequest) -> AppResult<ActiveModel> {
    const MISSING: &str = "Name, description, price, category, collection, and image are required";
    let name = required(payload.name.as_deref(), MISSING)?;
    let description = required(payload.description.as_deref(), MISSING)?;
    let price = validate_price(payload.price.ok_or_else(|| AppError::bad_request(MISSING))?)?;
    let category = required(payload.category.as_deref(), MISSING)?;
    let collection: Collection = required(payload.collection.as_deref(), MISSING)?.parse()?;
    let image = required(payload.image.as_deref(), MISSING)?;
    let stock = validate_stock(payload.stock.unwrap_or(0))?;
    let rating = validate_rating(payload.rating.unwrap_or(0.0))?;
    let brand = optional(payload.brand.as_deref()).unwrap_or_else(|| DEFAULT_BRAND.to_string());

    let now = Utc::now().fixed_offset();
    Ok(ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        description: Set(description),
        price: Set(price),
        category: Set(category),
        collection: Set(collection.as_str().to_string()),
        brand: Set(brand),
        image: Set(image),
        stock: Set(stock),
        rating: Set(rating),
        sizes: Set(normalize_sizes(payload.sizes)),
        created_at: Set(now),
        updated_at: Set(now),
    })
}

fn apply_update(active: &mut ActiveModel, payload: UpdateProductRequest) -> AppResult<()> {
    if let Some(name) = optional(payload.name.as_deref()) {
        active.name = Set(name);
    }
    if let Some(description) = optional(payload.description.as_deref()) {
        active.description = Set(description);
    }
    if let Some(price) = payload.price {
        active.price = Set(validate_price(price)?);
    }
    if let Some(category) = optional(payload.category.as_deref()) {
        active.category = Set(category);
    }
    if let Some(collection) = optional(payload.collection.as_deref()) {
        let collection: Collection = collection.parse()?;
        active.collection = Set(collection.as_str().to_string());
    }
    if let Some(brand) = optional(payload.brand.as_deref()) {
        active.brand = Set(brand);
    }
    if let Some(image) = optional(payload.image.as_deref()) {
        active.image = Set(image);
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(validate_stock(stock)?);
    }
    if let Some(rating) = payload.rating {
        active.rating = Set(validate_rating(rating)?);
    }
    if payload.sizes.is_some() {
        active.sizes = Set(normalize_sizes(payload.sizes));
    }
    Ok(())
}

/// Product columns as selected by the raw cart and wishlist joins (`p.*`).
#[derive(Debug, FromRow)]
pub(crate) struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub category: String,
    pub collection: String,
    pub brand: String,
    pub image: String,
    pub stock: i32,
    pub rating: f64,
    pub sizes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            category: row.category,
            collection: parse_stored(&row.collection, Collection::Men),
            brand: row.brand,
            image: row.image,
            stock: row.stock,
            rating: row.rating,
            sizes: row.sizes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub(crate) fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        category: model.category,
        collection: parse_stored(&model.collection, Collection::Men),
        brand: model.brand,
        image: model.image,
        stock: model.stock,
        rating: model.rating,
        sizes: model.sizes,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::ActiveValue;

    use super::*;

    fn valid_payload() -> CreateProductRequest {
        CreateProductRequest {
            name: Some("Linen Shirt".into()),
            description: Some("Breathable summer shirt".into()),
            price: Some(149_900),
            category: Some("shirts".into()),
            collection: Some("Men".into()),
            brand: None,
            image: Some("https://cdn.example.com/linen.jpg".into()),
            stock: None,
            rating: None,
            sizes: None,
        }
    }

    #[test]
    fn new_product_applies_defaults() {
        let active = new_product(valid_payload()).unwrap();
        assert_eq!(active.stock, ActiveValue::Set(0));
        assert_eq!(active.rating, ActiveValue::Set(0.0));
        assert_eq!(active.brand, ActiveValue::Set(DEFAULT_BRAND.to_string()));
        assert_eq!(active.collection, ActiveValue::Set("men".to_string()));
        let expected: Vec<String> = DEFAULT_SIZES.iter().map(|s| s.to_string()).collect();
        assert_eq!(active.sizes, ActiveValue::Set(expected));
    }

    #[test]
    fn rejects_non_positive_price() {
        for price in [0, -1, -149_900] {
            let mut payload = valid_payload();
            payload.price = Some(price);
            let err = new_product(payload).unwrap_err();
            assert_eq!(err.to_string(), "Price must be greater than 0");
        }
    }

    #[test]
    fn rejects_missing_required_fields() {
        let mut payload = valid_payload();
        payload.image = Some("   ".into());
        assert!(matches!(new_product(payload), Err(AppError::BadRequest(_))));

        let mut payload = valid_payload();
        payload.price = None;
        assert!(matches!(new_product(payload), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn rejects_negative_stock_and_out_of_range_rating() {
        let mut payload = valid_payload();
        payload.stock = Some(-1);
        assert!(new_product(payload).is_err());

        let mut payload = valid_payload();
        payload.rating = Some(5.5);
        assert!(new_product(payload).is_err());
    }

    #[test]
    fn update_validates_only_provided_fields() {
        let mut active = new_product(valid_payload()).unwrap();
        apply_update(
            &mut active,
            UpdateProductRequest {
                price: Some(99_900),
                sizes: Some(vec![" M ".into(), "".into(), "L".into()]),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(active.price, ActiveValue::Set(99_900));
        assert_eq!(active.sizes, ActiveValue::Set(vec!["M".to_string(), "L".to_string()]));
        assert_eq!(active.name, ActiveValue::Set("Linen Shirt".to_string()));

        let err = apply_update(
            &mut active,
            UpdateProductRequest {
                price: Some(0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Price must be greater than 0");
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("kurta"), "kurta");
    }
}
