//! # Cron Trigger Expressions
//!
//! Validation and normalisation of standard 5-field cron expressions.
//!
//! ```text
//! ┌────────── minute        0-59
//! │ ┌──────── hour          0-23
//! │ │ ┌────── day of month  1-31
//! │ │ │ ┌──── month         1-12 or JAN-DEC
//! │ │ │ │ ┌── day of week   0-7 or SUN-SAT (0 and 7 are Sunday)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! Each field is a comma list of `*`, `*/step`, `n`, `a-b` or `a-b/step`.
//! Expressions are checked here at registration time so a bad trigger is
//! rejected to the caller instead of failing inside the scheduler loop.
//!
//! The timer backend wants a leading seconds field and reads numeric
//! weekdays differently between versions, so [`CronExpression::scheduler_form`]
//! prepends `0` and spells weekdays by name.

use std::fmt;

use crate::error::{CoreError, CoreResult};

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Numeric value of `names[0]`.
    name_base: u32,
}

const FIELDS: [FieldSpec; 5] = [
    FieldSpec { name: "minute", min: 0, max: 59, names: &[], name_base: 0 },
    FieldSpec { name: "hour", min: 0, max: 23, names: &[], name_base: 0 },
    FieldSpec { name: "day of month", min: 1, max: 31, names: &[], name_base: 0 },
    FieldSpec { name: "month", min: 1, max: 12, names: &MONTH_NAMES, name_base: 1 },
    FieldSpec { name: "day of week", min: 0, max: 7, names: &DAY_NAMES, name_base: 0 },
];

/// A validated 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    fields: Vec<String>,
}

impl CronExpression {
    /// Parses and validates an expression.
    pub fn parse(expression: &str) -> CoreResult<Self> {
        let fields: Vec<String> = expression
            .split_whitespace()
            .map(|f| f.to_uppercase())
            .collect();

        if fields.len() != 5 {
            return Err(CoreError::invalid_cron(
                expression,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        for (raw, spec) in fields.iter().zip(FIELDS.iter()) {
            validate_field(raw, spec)
                .map_err(|reason| CoreError::invalid_cron(expression, reason))?;
        }

        Ok(CronExpression { fields })
    }

    /// The normalised 5-field form.
    pub fn as_string(&self) -> String {
        self.fields.join(" ")
    }

    /// Six-field form for the timer backend: seconds pinned to 0 and
    /// weekdays spelled by name.
    pub fn scheduler_form(&self) -> String {
        let dow = self.fields[4]
            .split(',')
            .map(weekday_by_name)
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "0 {} {} {} {} {}",
            self.fields[0], self.fields[1], self.fields[2], self.fields[3], dow
        )
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

fn validate_field(raw: &str, spec: &FieldSpec) -> Result<(), String> {
    for part in raw.split(',') {
        if part.is_empty() {
            return Err(format!("empty list item in {} field", spec.name));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };

        if let Some(step) = step {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("invalid step '{}' in {} field", step, spec.name))?;
            if step == 0 || step > spec.max {
                return Err(format!("step {} out of range in {} field", step, spec.name));
            }
        }

        if range == "*" {
            continue;
        }

        match range.split_once('-') {
            Some((start, end)) => {
                let start = field_value(start, spec)?;
                let end = field_value(end, spec)?;
                if start > end {
                    return Err(format!(
                        "range {}-{} is reversed in {} field",
                        start, end, spec.name
                    ));
                }
            }
            None => {
                if step.is_some() {
                    return Err(format!(
                        "step requires '*' or a range in {} field",
                        spec.name
                    ));
                }
                field_value(range, spec)?;
            }
        }
    }
    Ok(())
}

fn field_value(token: &str, spec: &FieldSpec) -> Result<u32, String> {
    let value = match token.parse::<u32>() {
        Ok(v) => v,
        Err(_) => spec
            .names
            .iter()
            .position(|n| *n == token)
            .map(|idx| idx as u32 + spec.name_base)
            .ok_or_else(|| format!("invalid value '{}' in {} field", token, spec.name))?,
    };

    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} out of range {}-{} in {} field",
            value, spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}

fn day_name(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) => DAY_NAMES[n % 7].to_string(),
        Err(_) => token.to_string(),
    }
}

fn weekday_by_name(part: &str) -> String {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };
    let suffix = step.map(|s| format!("/{}", s)).unwrap_or_default();

    if range == "*" {
        return format!("*{}", suffix);
    }

    match range.split_once('-') {
        Some((start, end)) => {
            let start_is_sunday = matches!(start, "0" | "SUN");
            if end == "7" {
                if start_is_sunday {
                    return format!("*{}", suffix);
                }
                if step.is_none() {
                    // a-7 wraps onto Sunday: split into a-SAT plus SUN
                    return format!("{}-SAT,SUN", day_name(start));
                }
                return format!("{}-SAT{}", day_name(start), suffix);
            }
            format!("{}-{}{}", day_name(start), day_name(end), suffix)
        }
        None => day_name(range),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_expressions() {
        for expr in [
            "* * * * *",
            "*/15 * * * *",
            "0 2 * * *",
            "30 6 1,15 * MON-FRI",
            "0 0 1 jan *",
            "0 */4 * * 0",
            "5-10/5 8-17 * 1-12 1-5",
        ] {
            assert!(CronExpression::parse(expr).is_ok(), "{} should parse", expr);
        }
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in [
            "",
            "* * * *",
            "0 0 * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5/15 * * * *",
            "10-5 * * * *",
            "0 0 * * FUNDAY",
            "1,,2 * * * *",
        ] {
            assert!(CronExpression::parse(expr).is_err(), "{:?} should fail", expr);
        }
    }

    #[test]
    fn test_scheduler_form() {
        let expr = CronExpression::parse("30 6 * * 1-5").unwrap();
        assert_eq!(expr.scheduler_form(), "0 30 6 * * MON-FRI");

        let expr = CronExpression::parse("0 0 * * 0,7").unwrap();
        assert_eq!(expr.scheduler_form(), "0 0 0 * * SUN,SUN");

        let expr = CronExpression::parse("0 0 * * 5-7").unwrap();
        assert_eq!(expr.scheduler_form(), "0 0 0 * * FRI-SAT,SUN");

        let expr = CronExpression::parse("*/5 * * * *").unwrap();
        assert_eq!(expr.scheduler_form(), "0 */5 * * * *");
        assert_eq!(expr.to_string(), "*/5 * * * *");
    }
}
