//! Helpers available to every record template.
//!
//! Formatting (write text):
//! - `{{formatCurrency value [currency]}}`: `$1,234.50` style, currency defaults to USD
//! - `{{formatNumber value [decimals] [locale]}}`: Hungarian grouping by default
//! - `{{formatDate value [pattern]}}`: ISO date, or a `YYYY`/`MM`/`DD` pattern
//! - `{{lowercase s}}`, `{{uppercase s}}`, `{{json value}}`
//!
//! Values (usable as subexpressions, e.g. `{{#if (gt total 100)}}`):
//! - `multiply a b`
//! - `eq`, `ne`: loose equality, `1` equals `"1"`
//! - `gt`, `lt`, `gte`, `lte`: numeric comparison
//! - `and`, `or` (any number of arguments), `not`
//!
//! Values that are not numbers are passed through unchanged by the number and
//! currency formatters.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, JsonRender, Output, PathAndJson,
    RenderContext, RenderError, ScopedJson, html_escape,
};
use serde_json::Value as Json;

pub fn register(registry: &mut Handlebars<'static>) {
    registry.register_helper("formatCurrency", Box::new(format_currency_helper));
    registry.register_helper("formatNumber", Box::new(format_number_helper));
    registry.register_helper("formatDate", Box::new(format_date_helper));
    registry.register_helper("lowercase", Box::new(lowercase_helper));
    registry.register_helper("uppercase", Box::new(uppercase_helper));
    registry.register_helper("json", Box::new(json_helper));

    registry.register_helper("multiply", Box::new(Computed(multiply)));
    registry.register_helper("eq", Box::new(Computed(|a| Json::Bool(loose_eq(a)))));
    registry.register_helper("ne", Box::new(Computed(|a| Json::Bool(!loose_eq(a)))));
    registry.register_helper("gt", Box::new(Computed(|a| compare(a, |x, y| x > y))));
    registry.register_helper("lt", Box::new(Computed(|a| compare(a, |x, y| x < y))));
    registry.register_helper("gte", Box::new(Computed(|a| compare(a, |x, y| x >= y))));
    registry.register_helper("lte", Box::new(Computed(|a| compare(a, |x, y| x <= y))));
    registry.register_helper(
        "and",
        Box::new(Computed(|a| Json::Bool(a.iter().all(|v| truthy(v))))),
    );
    registry.register_helper(
        "or",
        Box::new(Computed(|a| Json::Bool(a.iter().any(|v| truthy(v))))),
    );
    registry.register_helper(
        "not",
        Box::new(Computed(|a| Json::Bool(!a.first().is_some_and(|v| truthy(v))))),
    );
}

/// A helper that produces a value instead of writing text, so it composes in
/// subexpressions. Missing arguments are `None`.
struct Computed(fn(&[Option<&Json>]) -> Json);

impl HelperDef for Computed {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let args: Vec<Option<&Json>> = h.params().iter().map(present).collect();
        Ok(ScopedJson::Derived((self.0)(&args)))
    }
}

fn present<'a>(param: &'a PathAndJson<'_>) -> Option<&'a Json> {
    if param.is_value_missing() {
        None
    } else {
        Some(param.value())
    }
}

fn param<'a>(h: &'a Helper, index: usize) -> Option<&'a Json> {
    h.param(index).and_then(present)
}

/// Numeric value the way loosely typed template data is usually meant: numbers,
/// numeric strings, booleans. Anything else is `None`.
pub fn to_number(value: Option<&Json>) -> Option<f64> {
    match value? {
        Json::Number(n) => n.as_f64(),
        Json::String(s) if s.trim().is_empty() => Some(0.0),
        Json::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        Json::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Json::Null => Some(0.0),
        Json::Array(_) | Json::Object(_) => None,
    }
}

fn truthy(value: &Option<&Json>) -> bool {
    match value {
        None | Some(Json::Null) => false,
        Some(Json::Bool(b)) => *b,
        Some(Json::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Some(Json::String(s)) => !s.is_empty(),
        Some(Json::Array(_) | Json::Object(_)) => true,
    }
}

/// Text form used for loose comparison and pass-through output.
pub fn display_value(value: Option<&Json>) -> String {
    match value {
        None | Some(Json::Null) => String::new(),
        Some(Json::String(s)) => s.clone(),
        Some(Json::Number(n)) => n.as_f64().map(display_number).unwrap_or_else(|| n.to_string()),
        Some(other) => other.render(),
    }
}

fn display_number(n: f64) -> String {
    if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else {
        // f64 Display already prints 3 for 3.0
        n.to_string()
    }
}

fn loose_eq(args: &[Option<&Json>]) -> bool {
    let a = args.first().copied().flatten();
    let b = args.get(1).copied().flatten();
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) if x == y => true,
        (Some(Json::Number(x)), Some(Json::Number(y))) => x.as_f64() == y.as_f64(),
        (Some(x @ (Json::String(_) | Json::Number(_) | Json::Bool(_))), Some(y))
        | (Some(x), Some(y @ (Json::String(_) | Json::Number(_) | Json::Bool(_)))) => {
            display_value(Some(x)) == display_value(Some(y))
        }
        _ => false,
    }
}

fn compare(args: &[Option<&Json>], op: fn(f64, f64) -> bool) -> Json {
    let a = to_number(args.first().copied().flatten());
    let b = to_number(args.get(1).copied().flatten());
    Json::Bool(matches!((a, b), (Some(a), Some(b)) if op(a, b)))
}

fn number_value(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Json::Number)
            .unwrap_or_else(|| Json::String("NaN".into()))
    }
}

fn multiply(args: &[Option<&Json>]) -> Json {
    match (
        to_number(args.first().copied().flatten()),
        to_number(args.get(1).copied().flatten()),
    ) {
        (Some(a), Some(b)) => number_value(a * b),
        _ => Json::String("NaN".into()),
    }
}

/// Rounds half away from zero, as currency and number formatting expect.
fn round_to(value: f64, decimals: usize) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn group_digits(digits: &str, separator: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 * separator.len());
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push_str(separator);
        }
        grouped.push(c);
    }
    grouped
}

struct NumberStyle {
    group: &'static str,
    decimal: &'static str,
}

const EN_STYLE: NumberStyle = NumberStyle { group: ",", decimal: "." };
const DE_STYLE: NumberStyle = NumberStyle { group: ".", decimal: "," };
const HU_STYLE: NumberStyle = NumberStyle { group: "\u{a0}", decimal: "," };

fn style_for(locale: &str) -> NumberStyle {
    let language = locale.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase();
    match language.as_str() {
        "en" => EN_STYLE,
        "de" | "nl" | "it" | "es" | "da" => DE_STYLE,
        _ => HU_STYLE,
    }
}

/// Formats `value` with a fixed number of decimals, or up to three
/// decimals when `decimals` is `None`.
fn format_decimal(value: f64, decimals: Option<usize>, style: &NumberStyle) -> String {
    let places = decimals.unwrap_or(3);
    let rounded = round_to(value.abs(), places);
    let mut text = format!("{rounded:.places$}");
    if decimals.is_none() && text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (text, None),
    };

    let mut out = String::new();
    if value < 0.0 && rounded != 0.0 {
        out.push('-');
    }
    out.push_str(&group_digits(&int_part, style.group));
    if let Some(frac) = frac_part {
        out.push_str(style.decimal);
        out.push_str(&frac);
    }
    out
}

pub fn format_currency(value: f64, currency: &str) -> String {
    let code = currency.to_ascii_uppercase();
    let (symbol, decimals) = match code.as_str() {
        "USD" => ("$".to_string(), 2),
        "EUR" => ("€".to_string(), 2),
        "GBP" => ("£".to_string(), 2),
        "JPY" => ("¥".to_string(), 0),
        "CAD" => ("CA$".to_string(), 2),
        "AUD" => ("A$".to_string(), 2),
        other => (format!("{other}\u{a0}"), 2),
    };
    let amount = format_decimal(value.abs(), Some(decimals), &EN_STYLE);
    let sign = if value < 0.0 && round_to(value.abs(), decimals) != 0.0 { "-" } else { "" };
    format!("{sign}{symbol}{amount}")
}

pub fn format_number(value: f64, decimals: Option<usize>, locale: &str) -> String {
    format_decimal(value, decimals, &style_for(locale))
}

fn parse_date(value: &Json) -> Option<NaiveDate> {
    match value {
        Json::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.date_naive()),
        Json::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.date_naive());
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(dt.date());
                }
            }
            ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d", "%Y.%m.%d."]
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        }
        _ => None,
    }
}

/// Formats a date with `YYYY`, `MM` and `DD` placeholders, ISO by default.
/// Returns `None` when `value` is not a recognizable date.
pub fn format_date(value: &Json, pattern: Option<&str>) -> Option<String> {
    let date = parse_date(value)?;
    Some(match pattern {
        Some(pattern) => pattern
            .replace("YYYY", &date.format("%Y").to_string())
            .replace("MM", &date.format("%m").to_string())
            .replace("DD", &date.format("%d").to_string()),
        None => date.format("%Y-%m-%d").to_string(),
    })
}

fn format_currency_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = param(h, 0);
    let currency = param(h, 1).and_then(|v| v.as_str()).unwrap_or("USD");
    let text = match to_number(value) {
        Some(n) => format_currency(n, currency),
        None => html_escape(&display_value(value)),
    };
    out.write(&text)?;
    Ok(())
}

fn format_number_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = param(h, 0);
    let decimals = param(h, 1).and_then(|v| v.as_u64()).map(|d| d.min(20) as usize);
    let locale = param(h, 2).and_then(|v| v.as_str()).unwrap_or("hu-HU");
    let text = match to_number(value) {
        Some(n) => format_number(n, decimals, locale),
        None => html_escape(&display_value(value)),
    };
    out.write(&text)?;
    Ok(())
}

fn format_date_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let Some(value) = param(h, 0).filter(|v| truthy(&Some(*v))) else {
        return Ok(());
    };
    let pattern = param(h, 1).and_then(|v| v.as_str());
    let text = format_date(value, pattern).unwrap_or_else(|| display_value(Some(value)));
    out.write(&html_escape(&text))?;
    Ok(())
}

fn lowercase_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&html_escape(&display_value(param(h, 0)).to_lowercase()))?;
    Ok(())
}

fn uppercase_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&html_escape(&display_value(param(h, 0)).to_uppercase()))?;
    Ok(())
}

/// Writes the value as raw JSON, for embedding data in scripts.
fn json_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let text = match param(h, 0).filter(|v| truthy(&Some(*v))) {
        Some(value) => serde_json::to_string(value).unwrap_or_default(),
        None => "[]".to_string(),
    };
    out.write(&text)?;
    Ok(())
}
