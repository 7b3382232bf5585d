use serde_json::Value;

use crate::models::{OrderCreationRequest, PricedOrderNotification};

// ============================================================================
// Event Codec - JSON wire format for inbound and outbound queue messages
// ============================================================================

const REQUIRED_FIELDS: [&str; 3] = ["products", "username", "orderId"];

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid price {price} for product at index {index}")]
    InvalidPrice { index: usize, price: f64 },

    #[error("Failed to encode notification: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Parse an inbound order creation event.
///
/// `null` counts as missing for the three required fields.
pub fn decode_order_request(payload: &[u8]) -> Result<OrderCreationRequest, CodecError> {
    let value: Value = serde_json::from_slice(payload).map_err(CodecError::Malformed)?;

    let object = value.as_object().ok_or(CodecError::NotAnObject)?;
    for field in REQUIRED_FIELDS {
        match object.get(field) {
            None | Some(Value::Null) => return Err(CodecError::MissingField(field)),
            Some(_) => {}
        }
    }

    let request: OrderCreationRequest =
        serde_json::from_value(value).map_err(CodecError::Malformed)?;

    if let Some((index, product)) = request
        .products
        .iter()
        .enumerate()
        .find(|(_, p)| p.unit_price() < 0.0)
    {
        return Err(CodecError::InvalidPrice {
            index,
            price: product.unit_price(),
        });
    }

    Ok(request)
}

pub fn encode_notification(notification: &PricedOrderNotification) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(notification).map_err(CodecError::Encode)
}
