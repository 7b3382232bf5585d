use crate::models::Product;

/// Sum of every line item's price. An empty order costs zero.
///
/// Total over all numeric inputs: negative or fractional prices are summed
/// as-is, rejecting them is the decoder's job.
pub fn compute_total(products: &[Product]) -> f64 {
    products.iter().map(Product::unit_price).sum()
}
