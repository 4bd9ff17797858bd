use std::fs;
use std::path::{Path, PathBuf};

pub const INVOICE_TEMPLATE: &str = r#"<h1>Invoice {{id}}</h1>
<p>{{customer}}</p>
<p>Total {{formatCurrency amount currency}}</p>"#;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("write fixture");
    path
}

/// XML document with `count` `<invoice>` elements inside `<invoices>`.
pub fn invoices_xml(count: usize) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<invoices>\n");
    for i in 0..count {
        xml.push_str(&format!(
            "  <invoice id=\"INV-{i:03}\">\n    <customer>Customer {i}</customer>\n    \
             <amount>{}.50</amount>\n    <currency>EUR</currency>\n  </invoice>\n",
            100 + i
        ));
    }
    xml.push_str("</invoices>\n");
    xml
}

pub fn write_invoices_xml(dir: &Path, count: usize) -> PathBuf {
    write(dir, "invoices.xml", &invoices_xml(count))
}

/// JSON records wrapped in `{"records": [...]}`; record `fail_at` carries `"fail": true`.
pub fn write_records_json(dir: &Path, count: usize, fail_at: Option<usize>) -> PathBuf {
    let flags: Vec<bool> = (0..count).map(|i| fail_at == Some(i)).collect();
    write_flagged_records_json(dir, &flags)
}

/// One JSON record per flag; flagged records carry `"fail": true`.
pub fn write_flagged_records_json(dir: &Path, flags: &[bool]) -> PathBuf {
    let records: Vec<serde_json::Value> = flags
        .iter()
        .enumerate()
        .map(|(i, fail)| {
            serde_json::json!({
                "id": i,
                "customer": format!("Customer {i}"),
                "amount": 10.0 * (i as f64 + 1.0),
                "currency": "USD",
                "fail": fail,
            })
        })
        .collect();
    let body = serde_json::json!({ "records": records });
    write(dir, "records.json", &body.to_string())
}

pub fn write_template(dir: &Path, source: &str) -> PathBuf {
    write(dir, "invoice.hbs", source)
}
