use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::dto::orders::ShippingAddressInput;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateCheckoutSessionRequest {
    pub shipping_address: ShippingAddressInput,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSessionResponse {
    /// Secret the embedded checkout UI is mounted with.
    pub client_secret: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SessionStatusQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionStatusResponse {
    /// `open`, `complete` or `expired`.
    pub status: String,
    pub customer_email: Option<String>,
    /// Set once the paid session has a local order.
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CapturePaypalOrderRequest {
    pub shipping_address: ShippingAddressInput,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaypalCaptureResponse {
    pub status: String,
    pub order_id: Option<Uuid>,
}
