use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{AuthResponse, LoginRequest, ProfileResponse, RegisterRequest, UpdateProfileRequest},
        cart::{AddToCartRequest, CartLine, CartView, UpdateCartRequest},
        orders::{
            CheckoutRequest, CreateOrderRequest, OrderLineRequest, OrderList, OrderWithItems,
            UpdateOrderStatusRequest, UpdatePaymentStatusRequest,
        },
        products::{
            CreateProductRequest, DecrementStockRequest, DeletedCount, ProductList,
            UpdateProductRequest,
        },
        wishlist::{AddWishlistRequest, WishlistEntry, WishlistStatus, WishlistView},
    },
    models::{
        CartItem, Collection, Order, OrderItem, OrderStatus, PaymentStatus, Product, Role, User,
        WishlistItem,
    },
    response::{ApiResponse, Meta},
    routes::{auth, cart, health, orders, params, products, wishlist},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "VastraVerse API", description = "Fashion store backend"),
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::profile,
        auth::update_profile,
        products::list_products,
        products::search_products,
        products::list_by_category,
        products::list_by_collection,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        products::delete_all_products,
        products::decrement_stock,
        orders::create_order,
        orders::checkout,
        orders::list_orders,
        orders::list_my_orders,
        orders::list_orders_by_email,
        orders::get_order,
        orders::get_receipt,
        orders::update_order_status,
        orders::update_payment_status,
        orders::delete_order,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        wishlist::get_wishlist,
        wishlist::add_to_wishlist,
        wishlist::remove_from_wishlist,
        wishlist::toggle_wishlist,
        wishlist::is_in_wishlist,
        wishlist::move_to_cart,
        wishlist::clear_wishlist
    ),
    components(
        schemas(
            User,
            Role,
            Product,
            Collection,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            CartItem,
            WishlistItem,
            RegisterRequest,
            LoginRequest,
            UpdateProfileRequest,
            AuthResponse,
            ProfileResponse,
            CreateProductRequest,
            UpdateProductRequest,
            DecrementStockRequest,
            ProductList,
            DeletedCount,
            OrderLineRequest,
            CreateOrderRequest,
            CheckoutRequest,
            UpdateOrderStatusRequest,
            UpdatePaymentStatusRequest,
            OrderWithItems,
            OrderList,
            AddToCartRequest,
            UpdateCartRequest,
            CartLine,
            CartView,
            AddWishlistRequest,
            WishlistEntry,
            WishlistView,
            WishlistStatus,
            params::Pagination,
            params::ProductQuery,
            params::SearchQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<AuthResponse>,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<CartView>,
            ApiResponse<WishlistView>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Registration, login and profile"),
        (name = "Products", description = "Catalog browsing and admin product management"),
        (name = "Orders", description = "Order placement, history and admin status updates"),
        (name = "Cart", description = "Per-user shopping cart"),
        (name = "Wishlist", description = "Per-user wishlist"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route_group() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/auth/register",
            "/api/products/{id}/stock",
            "/api/orders/{id}/receipt",
            "/api/cart/update",
            "/api/wishlist/move-to-cart/{product_id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
