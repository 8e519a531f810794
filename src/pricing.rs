//! Order line validation and total computation.
//!
//! Amounts are integers in the smallest currency unit, so totals are exact.
//! All arithmetic is checked; an overflowing order is rejected rather than
//! wrapped.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::{
    dto::orders::OrderLineRequest,
    error::{AppError, AppResult},
    models::Collection,
};

/// A submitted order line after presence and range checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_price: i64,
    pub product_image: String,
    pub quantity: i32,
    pub collection: Collection,
}

/// Upper bound for one order line or cart line.
pub const MAX_LINE_QUANTITY: i32 = 1_000;

/// Missing quantities count as one unit.
pub fn normalize_quantity(quantity: Option<i32>) -> AppResult<i32> {
    let quantity = quantity.unwrap_or(1);
    if quantity < 1 {
        return Err(AppError::bad_request("Quantity must be at least 1"));
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(AppError::BadRequest(format!(
            "Quantity cannot exceed {MAX_LINE_QUANTITY}"
        )));
    }
    Ok(quantity)
}

/// Units requested per product, keyed and iterated in product id order.
/// Stock rows are locked in this order, so two orders over the same
/// products never wait on each other in a cycle.
pub fn stock_demand(lines: &[ValidatedLine]) -> AppResult<BTreeMap<Uuid, i32>> {
    let mut demand: BTreeMap<Uuid, i32> = BTreeMap::new();
    for line in lines {
        let units = demand.entry(line.product_id).or_insert(0);
        *units = units
            .checked_add(line.quantity)
            .ok_or_else(|| AppError::bad_request("Order quantity is too large"))?;
    }
    Ok(demand)
}

pub fn line_total(price: i64, quantity: i32) -> AppResult<i64> {
    price
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| AppError::bad_request("Order total is too large"))
}

/// Sum of `price * quantity` over every line.
pub fn order_total<I>(lines: I) -> AppResult<i64>
where
    I: IntoIterator<Item = (i64, i32)>,
{
    lines.into_iter().try_fold(0_i64, |acc, (price, quantity)| {
        acc.checked_add(line_total(price, quantity)?)
            .ok_or_else(|| AppError::bad_request("Order total is too large"))
    })
}

pub fn validate_lines(lines: &[OrderLineRequest]) -> AppResult<Vec<ValidatedLine>> {
    if lines.is_empty() {
        return Err(AppError::bad_request("Please provide at least one product"));
    }

    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| validate_line(idx, line))
        .collect()
}

fn validate_line(idx: usize, line: &OrderLineRequest) -> AppResult<ValidatedLine> {
    let position = idx + 1;
    let product_id = line
        .product_id
        .ok_or_else(|| AppError::BadRequest(format!("Product {position} is missing product_id")))?;
    let product_name = line
        .product_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Product {position} is missing product_name")))?
        .to_string();
    let product_price = line
        .product_price
        .ok_or_else(|| AppError::BadRequest(format!("Product {position} is missing product_price")))?;
    if product_price <= 0 {
        return Err(AppError::BadRequest(format!(
            "Product {position} must have a price greater than 0"
        )));
    }
    let quantity = normalize_quantity(line.quantity)?;
    let collection = line
        .collection
        .as_deref()
        .ok_or_else(|| AppError::BadRequest(format!("Product {position} is missing collection")))?
        .parse::<Collection>()?;

    Ok(ValidatedLine {
        product_id,
        product_name,
        product_price,
        product_image: line.product_image.clone().unwrap_or_default(),
        quantity,
        collection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price: i64, quantity: Option<i32>) -> OrderLineRequest {
        OrderLineRequest {
            product_id: Some(Uuid::new_v4()),
            product_name: Some("Kurta".into()),
            product_price: Some(price),
            product_image: None,
            quantity,
            collection: Some("men".into()),
        }
    }

    #[test]
    fn total_is_sum_of_price_times_quantity() {
        let total = order_total([(129_900, 2), (49_900, 1), (1_000, 7)]).unwrap();
        assert_eq!(total, 129_900 * 2 + 49_900 + 7_000);
    }

    #[test]
    fn empty_total_is_zero() {
        assert_eq!(order_total(std::iter::empty()).unwrap(), 0);
    }

    #[test]
    fn overflowing_total_is_rejected() {
        let err = order_total([(i64::MAX, 2)]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        let err = order_total([(i64::MAX, 1), (1, 1)]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn quantity_above_line_maximum_is_rejected() {
        assert_eq!(normalize_quantity(Some(MAX_LINE_QUANTITY)).unwrap(), MAX_LINE_QUANTITY);
        let err = normalize_quantity(Some(MAX_LINE_QUANTITY + 1)).unwrap_err();
        assert_eq!(err.to_string(), "Quantity cannot exceed 1000");
        assert!(normalize_quantity(Some(i32::MAX)).is_err());
    }

    #[test]
    fn demand_merges_duplicate_products_in_id_order() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let mut first = validate_lines(&[line(500, Some(2))]).unwrap().remove(0);
        first.product_id = b;
        let mut second = first.clone();
        second.product_id = a;
        second.quantity = 1;
        let mut third = first.clone();
        third.quantity = 4;

        let demand = stock_demand(&[first, second, third]).unwrap();
        assert_eq!(demand.into_iter().collect::<Vec<_>>(), vec![(a, 1), (b, 6)]);
    }

    #[test]
    fn missing_quantity_defaults_to_one() {
        let lines = validate_lines(&[line(500, None)]).unwrap();
        assert_eq!(lines[0].quantity, 1);
        assert_eq!(lines[0].product_image, "");
        assert_eq!(lines[0].collection, Collection::Men);
    }

    #[test]
    fn rejects_empty_product_list() {
        let err = validate_lines(&[]).unwrap_err();
        assert_eq!(err.to_string(), "Please provide at least one product");
    }

    #[test]
    fn rejects_non_positive_quantity_and_price() {
        assert!(validate_lines(&[line(500, Some(0))]).is_err());
        assert!(validate_lines(&[line(500, Some(-3))]).is_err());
        assert!(validate_lines(&[line(0, Some(1))]).is_err());
        assert!(validate_lines(&[line(-10, Some(1))]).is_err());
    }

    #[test]
    fn rejects_unknown_collection() {
        let mut bad = line(500, Some(1));
        bad.collection = Some("kids".into());
        let err = validate_lines(&[bad]).unwrap_err();
        assert!(err.to_string().starts_with("Invalid collection"));
    }

    #[test]
    fn reports_position_of_incomplete_line() {
        let mut incomplete = line(500, Some(1));
        incomplete.product_name = Some("  ".into());
        let err = validate_lines(&[line(100, None), incomplete]).unwrap_err();
        assert_eq!(err.to_string(), "Product 2 is missing product_name");
    }

    #[test]
    fn validated_lines_feed_the_total() {
        let lines = validate_lines(&[line(250, Some(4)), line(1_000, None)]).unwrap();
        let total = order_total(lines.iter().map(|l| (l.product_price, l.quantity))).unwrap();
        assert_eq!(total, 2_000);
    }
}
