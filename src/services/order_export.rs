//! CSV export of the admin order list

use chrono::NaiveDate;
use crate::domain::aggregates::order::Order;
use crate::domain::value_objects::format_price;

pub const CSV_HEADER: [&str; 6] = ["Order Number", "Date", "Customer", "Total", "Status", "Payment Status"];

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn row<I: IntoIterator<Item = S>, S: AsRef<str>>(fields: I) -> String {
    fields.into_iter().map(|f| quote(f.as_ref())).collect::<Vec<_>>().join(",")
}

/// Header plus one row per order, every field quoted, rows separated by `\n`.
pub fn export_csv<'a>(orders: impl IntoIterator<Item = &'a Order>) -> String {
    let mut lines = vec![row(CSV_HEADER)];
    lines.extend(orders.into_iter().map(|o| {
        row([
            o.order_number().to_string(),
            o.created_at().format("%Y-%m-%d").to_string(),
            o.customer().full_name(),
            format_price(o.total(), o.currency()),
            o.status().to_string(),
            o.payment_status().to_string(),
        ])
    }));
    lines.join("\n")
}

pub fn csv_filename(date: NaiveDate) -> String {
    format!("orders-{}.csv", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::fixtures::{item, order};
    use rust_decimal::Decimal;

    #[test]
    fn test_one_line_per_order_plus_header() {
        let orders = vec![
            order("ORD-1", "Ada", "Lovelace", vec![item("A", Decimal::new(1899, 2), 2)]),
            order("ORD-2", "Grace \"Amazing\"", "Hopper", vec![item("B", Decimal::new(10, 0), 1)]),
        ];
        let csv = export_csv(&orders);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), orders.len() + 1);
        assert_eq!(lines[0], "\"Order Number\",\"Date\",\"Customer\",\"Total\",\"Status\",\"Payment Status\"");
        for line in &lines {
            assert!(line.starts_with('"') && line.ends_with('"'));
        }
        assert!(lines[1].starts_with("\"ORD-1\","));
        assert!(lines[1].ends_with(",\"Ada Lovelace\",\"€42.98\",\"pending\",\"pending\""));
        assert!(lines[2].contains("\"Grace \"\"Amazing\"\" Hopper\""));
    }

    #[test]
    fn test_six_fields_per_row() {
        let orders = vec![order("ORD-7", "Alan", "Turing", vec![item("C", Decimal::ONE, 3)])];
        let csv = export_csv(&orders);
        for line in csv.lines() {
            assert_eq!(line.split("\",\"").count(), 6);
        }
        assert_eq!(export_csv(Vec::<Order>::new().iter()).lines().count(), 1);
    }

    #[test]
    fn test_filename() {
        assert_eq!(csv_filename(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()), "orders-2026-10-16.csv");
    }
}
