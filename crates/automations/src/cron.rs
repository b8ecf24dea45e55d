//! A bespoke 5-field cron validator. Not delegated to an existing crate:
//! the exact error message strings below are load-bearing for callers, and
//! no off-the-shelf cron parser emits this particular set of messages.

const FIELD_SPECS: [(&str, i64, i64); 5] =
    [("minute", 0, 59), ("hour", 0, 23), ("day", 1, 31), ("month", 1, 12), ("weekday", 0, 7)];

pub fn validate(schedule: &str) -> Result<(), String> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    if fields.len() != 5 {
        return Err("cron expression must have exactly 5 fields".to_string());
    }
    for (text, (name, min, max)) in fields.iter().zip(FIELD_SPECS.iter()) {
        validate_field(text, name, *min, *max)?;
    }
    Ok(())
}

fn validate_field(text: &str, name: &str, min: i64, max: i64) -> Result<(), String> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit() || "*/,-".contains(c)) {
        return Err(format!("invalid characters in {name} field: \"{text}\""));
    }
    for token in text.split(',') {
        validate_token(token, name, min, max)?;
    }
    Ok(())
}

fn validate_token(token: &str, name: &str, min: i64, max: i64) -> Result<(), String> {
    if token == "*" {
        return Ok(());
    }
    if let Some(step_str) = token.strip_prefix("*/") {
        let step: i64 = step_str.parse().map_err(|_| "invalid step value".to_string())?;
        let range = max - min + 1;
        if step < 1 || step > range {
            return Err("invalid step value".to_string());
        }
        return Ok(());
    }
    if let Some((a_str, b_str)) = token.split_once('-') {
        let a: i64 = a_str.parse().map_err(|_| format!("{name} value out of range"))?;
        let b: i64 = b_str.parse().map_err(|_| format!("{name} value out of range"))?;
        if a < min || a > max || b < min || b > max {
            return Err(format!("{name} value out of range"));
        }
        if a > b {
            return Err("range out of bounds".to_string());
        }
        return Ok(());
    }
    let n: i64 = token.parse().map_err(|_| format!("{name} value out of range"))?;
    if n < min || n > max {
        return Err(format!("{name} value out of range"));
    }
    Ok(())
}
