//! Derived values the presentation layer shows next to a task.

use std::sync::OnceLock;

use regex::Regex;

static PRICE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn price_pattern() -> Option<&'static Regex> {
    PRICE_PATTERN
        .get_or_init(|| Regex::new(r"\$?(\d{1,3}(?:,\d{3})+|\d+)(\.\d+)?").ok())
        .as_ref()
}

/// Render the first amount in a scraped price string as USD.
///
/// `"$450 OBO"` becomes `"$450.00"`; strings without a number are returned
/// unchanged and a missing price shows as `N/A`.
pub fn format_price(price: Option<&str>) -> String {
    let Some(price) = price.filter(|p| !p.is_empty()) else {
        return "N/A".to_string();
    };

    let amount = price_pattern().and_then(|re| re.captures(price)).and_then(|caps| {
        let whole = caps.get(1)?.as_str().replace(',', "");
        let fraction = caps.get(2).map_or("", |m| m.as_str());
        format!("{}{}", whole, fraction).parse::<f64>().ok()
    });

    match amount {
        Some(amount) => format_usd(amount),
        None => price.to_string(),
    }
}

/// `$1,234.50` style rendering
pub fn format_usd(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let (dollars, cents) = (cents / 100, cents % 100);

    let digits = dollars.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents)
}

/// Human wording for the server's remaining-time estimate (seconds)
pub fn format_time_remaining(seconds: Option<f64>) -> String {
    let seconds = match seconds {
        Some(s) if s > 0.0 => s,
        _ => return "Calculating...".to_string(),
    };

    if seconds < 60.0 {
        format!("{} seconds", seconds.round() as u64)
    } else if seconds < 3600.0 {
        format!("{} minutes", (seconds / 60.0).ceil() as u64)
    } else {
        format!("{} hours", (seconds / 3600.0).ceil() as u64)
    }
}

/// Whole-number percentage for 0.0-1.0 scores such as relevance
pub fn format_score(score: f64) -> String {
    format!("{}%", (score * 100.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_formatting() {
        assert_eq!(format_price(None), "N/A");
        assert_eq!(format_price(Some("")), "N/A");
        assert_eq!(format_price(Some("$450 OBO")), "$450.00");
        assert_eq!(format_price(Some("Only 19.5 dollars")), "$19.50");
        assert_eq!(format_price(Some("$1,250")), "$1,250.00");
        assert_eq!(format_price(Some("Free")), "Free");
    }

    #[test]
    fn usd_grouping() {
        assert_eq!(format_usd(0.0), "$0.00");
        assert_eq!(format_usd(999.999), "$1,000.00");
        assert_eq!(format_usd(1234567.5), "$1,234,567.50");
    }

    #[test]
    fn time_remaining_wording() {
        assert_eq!(format_time_remaining(None), "Calculating...");
        assert_eq!(format_time_remaining(Some(0.0)), "Calculating...");
        assert_eq!(format_time_remaining(Some(45.0)), "45 seconds");
        assert_eq!(format_time_remaining(Some(61.0)), "2 minutes");
        assert_eq!(format_time_remaining(Some(3600.0)), "1 hours");
        assert_eq!(format_time_remaining(Some(3601.0)), "2 hours");
    }

    #[test]
    fn score_percentage() {
        assert_eq!(format_score(0.874), "87%");
    }
}
