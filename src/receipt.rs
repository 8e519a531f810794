use std::fmt::Write;

use crate::dto::orders::OrderWithItems;

const WIDTH: usize = 48;

/// Render an amount in paise as rupees, e.g. `129950` -> `Rs. 1,299.50`.
pub fn format_amount(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let rupees = (abs / 100).to_string();
    let paise = abs % 100;

    let mut grouped = String::with_capacity(rupees.len() + rupees.len() / 3);
    for (i, ch) in rupees.chars().enumerate() {
        if i > 0 && (rupees.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}Rs. {grouped}.{paise:02}")
}

/// Plain-text receipt for an order, one line item per row.
pub fn render_receipt(order: &OrderWithItems) -> String {
    let mut out = String::new();
    let rule = "-".repeat(WIDTH);
    let o = &order.order;

    let _ = writeln!(out, "{:^WIDTH$}", "VastraVerse");
    let _ = writeln!(out, "{:^WIDTH$}", "Order Receipt");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Invoice:  {}", o.invoice_number);
    let _ = writeln!(out, "Order ID: {}", o.id);
    let _ = writeln!(out, "Date:     {}", o.created_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(out, "Customer: {}", o.user_name);
    let _ = writeln!(out, "Email:    {}", o.user_email);
    let _ = writeln!(out, "Phone:    {}", o.user_phone);
    let _ = writeln!(out, "Ship to:  {}", o.location);
    let _ = writeln!(out, "{rule}");

    let mut item_count: i64 = 0;
    for item in &order.items {
        item_count += i64::from(item.quantity);
        let line_total = item.product_price.saturating_mul(i64::from(item.quantity));
        let _ = writeln!(out, "{} ({})", item.product_name, item.collection);
        let _ = writeln!(
            out,
            "  {} x {:<18}{:>width$}",
            item.quantity,
            format_amount(item.product_price),
            format_amount(line_total),
            width = WIDTH - 24,
        );
    }

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "{:<24}{:>24}",
        format!("Subtotal ({item_count} items):"),
        format_amount(o.total_amount)
    );
    let _ = writeln!(out, "{:<24}{:>24}", "Shipping:", "Free");
    let _ = writeln!(out, "{:<24}{:>24}", "Total Amount:", format_amount(o.total_amount));
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "Status: {} | Payment: {}",
        o.order_status, o.payment_status
    );
    out
}
