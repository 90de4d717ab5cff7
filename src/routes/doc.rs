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
        admin, auth as auth_dto, cart as cart_dto, categories as category_dto,
        orders as order_dto, payments as payment_dto, products, reviews as review_dto,
        wishlist as wishlist_dto,
    },
    error::{ErrorData, FieldError},
    models::{
        Address, CartItem, Category, CategorySummary, Order, OrderItem, Product, Review, User,
        WishlistItem,
    },
    payments::paypal::PaypalOrder,
    response::{ApiResponse, Meta},
    routes::{
        admin as admin_routes, auth, cart, categories, health, orders, params, payments,
        products as product_routes, reviews, wishlist,
    },
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
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::forgot_password,
        auth::reset_password,
        auth::verify_email,
        auth::resend_verification,
        auth::profile,
        auth::update_profile,
        product_routes::list_products,
        product_routes::get_product,
        product_routes::create_product,
        product_routes::update_product,
        product_routes::delete_product,
        categories::list_categories,
        categories::get_category,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_cart_item,
        cart::clear_cart,
        orders::list_orders,
        orders::get_order,
        orders::create_order,
        orders::update_order_status,
        reviews::list_product_reviews,
        reviews::create_review,
        reviews::update_review,
        reviews::delete_review,
        wishlist::list_wishlist,
        wishlist::add_to_wishlist,
        wishlist::remove_from_wishlist,
        payments::create_checkout_session,
        payments::session_status,
        payments::create_paypal_order,
        payments::capture_paypal_order,
        admin_routes::dashboard,
        admin_routes::list_all_orders,
        admin_routes::list_users,
        admin_routes::list_low_stock,
        admin_routes::adjust_inventory
    ),
    components(
        schemas(
            User,
            Category,
            CategorySummary,
            Product,
            CartItem,
            Address,
            Order,
            OrderItem,
            Review,
            WishlistItem,
            PaypalOrder,
            ErrorData,
            FieldError,
            Meta,
            auth_dto::RegisterRequest,
            auth_dto::LoginRequest,
            auth_dto::LoginResponse,
            auth_dto::RefreshRequest,
            auth_dto::RefreshResponse,
            auth_dto::LogoutRequest,
            auth_dto::ForgotPasswordRequest,
            auth_dto::ResetPasswordRequest,
            auth_dto::VerifyEmailRequest,
            auth_dto::ResendVerificationRequest,
            auth_dto::UpdateProfileRequest,
            products::CreateProductRequest,
            products::UpdateProductRequest,
            products::ProductDetail,
            products::ProductList,
            category_dto::CreateCategoryRequest,
            category_dto::UpdateCategoryRequest,
            category_dto::CategoryWithCount,
            category_dto::CategoryList,
            cart_dto::AddToCartRequest,
            cart_dto::UpdateCartItemRequest,
            cart_dto::CartLine,
            cart_dto::CartView,
            order_dto::ShippingAddressInput,
            order_dto::CreateOrderRequest,
            order_dto::UpdateOrderStatusRequest,
            order_dto::OrderItemDetail,
            order_dto::CustomerSummary,
            order_dto::OrderDetail,
            order_dto::OrderList,
            review_dto::CreateReviewRequest,
            review_dto::UpdateReviewRequest,
            review_dto::ReviewWithAuthor,
            review_dto::ProductReviews,
            wishlist_dto::AddToWishlistRequest,
            wishlist_dto::WishlistEntry,
            wishlist_dto::WishlistView,
            payment_dto::CreateCheckoutSessionRequest,
            payment_dto::CheckoutSessionResponse,
            payment_dto::SessionStatusResponse,
            payment_dto::CapturePaypalOrderRequest,
            payment_dto::PaypalCaptureResponse,
            admin::Dashboard,
            admin::DashboardStats,
            admin::RecentOrder,
            admin::InventoryAdjustRequest,
            admin::LowStockList,
            admin::UserList,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            params::LowStockQuery,
            ApiResponse<Product>,
            ApiResponse<products::ProductList>,
            ApiResponse<order_dto::OrderDetail>,
            ApiResponse<order_dto::OrderList>,
            ApiResponse<ErrorData>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication and profile endpoints"),
        (name = "Products", description = "Product catalog endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Reviews", description = "Product review endpoints"),
        (name = "Wishlist", description = "Wishlist endpoints"),
        (name = "Payments", description = "Card and wallet checkout endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
