use storefront_api::pricing::{PriceLine, format_amount, totals};
use uuid::Uuid;

fn line(unit_price: i64, quantity: i32) -> PriceLine {
    PriceLine {
        product_id: Uuid::new_v4(),
        name: "Item".into(),
        unit_price,
        quantity,
    }
}

#[test]
fn small_orders_pay_flat_shipping() {
    let t = totals(&[line(1_250, 2), line(999, 1)]);
    assert_eq!(t.subtotal, 3_499);
    assert_eq!(t.shipping, 999);
    // 8% of 34.99 = 2.7992 -> 2.80
    assert_eq!(t.tax, 280);
    assert_eq!(t.total, 3_499 + 999 + 280);
}

#[test]
fn threshold_subtotal_ships_free() {
    let t = totals(&[line(2_500, 2)]);
    assert_eq!(t.subtotal, 5_000);
    assert_eq!(t.shipping, 0);
    assert_eq!(t.tax, 400);
    assert_eq!(t.total, 5_400);

    let t = totals(&[line(4_999, 1)]);
    assert_eq!(t.shipping, 999);
}

#[test]
fn tax_rounds_half_up() {
    // 8% of 25, 31 and 32 cents is 2, 2.48 and 2.56 cents
    assert_eq!(totals(&[line(25, 1)]).tax, 2);
    assert_eq!(totals(&[line(31, 1)]).tax, 2);
    assert_eq!(totals(&[line(32, 1)]).tax, 3);
}

#[test]
fn amounts_format_with_two_decimals() {
    assert_eq!(format_amount(0), "0.00");
    assert_eq!(format_amount(5), "0.05");
    assert_eq!(format_amount(123_456), "1234.56");
    assert_eq!(format_amount(-1_050), "-10.50");
}
