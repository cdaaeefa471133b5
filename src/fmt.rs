/// Format a float as a euro amount with thousands separators: €1,234.56
pub fn money(val: f64) -> String {
    let negative = val < 0.0;
    let cents = format!("{:.2}", val.abs());
    let (int_part, dec_part) = cents.split_once('.').unwrap_or((&cents, "00"));

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-\u{20ac}{with_commas}.{dec_part}")
    } else {
        format!("\u{20ac}{with_commas}.{dec_part}")
    }
}

/// Match score as a percentage, e.g. 0.95 -> "95%".
pub fn score(val: f64) -> String {
    format!("{:.0}%", val * 100.0)
}

/// First 8 characters of an id, enough to tell records apart in a table.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
