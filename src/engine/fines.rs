use chrono::NaiveDate;

use crate::loan::FinePolicy;

/// Category names compare by Unicode lowercase, for both lookup and upsert.
pub fn same_category(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Daily rate for `category`: first case-insensitive policy match, else `default_rate`.
pub fn fine_rate_for(category: Option<&str>, policies: &[FinePolicy], default_rate: f64) -> f64 {
    let Some(category) = category else {
        return default_rate;
    };
    policies
        .iter()
        .find(|p| same_category(&p.category, category))
        .map(|p| p.fine_per_day)
        .unwrap_or(default_rate)
}

/// Whole calendar days `returned` falls after `due`; zero when on time.
pub fn days_late(due: NaiveDate, returned: NaiveDate) -> i64 {
    if returned > due {
        (returned - due).num_days()
    } else {
        0
    }
}

/// Fine for a copy due on `due` and returned on `returned` at `rate` per day.
pub fn fine_for(due: NaiveDate, returned: NaiveDate, rate: f64) -> f64 {
    match days_late(due, returned) {
        0 => 0.0,
        late => late as f64 * rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(category: &str, rate: f64) -> FinePolicy {
        FinePolicy {
            id: 1,
            category: category.to_string(),
            fine_per_day: rate,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn category_match_ignores_case() {
        let policies = vec![policy("Fiction", 5.0), policy("Reference", 20.0)];
        assert_eq!(fine_rate_for(Some("fiction"), &policies, 10.0), 5.0);
        assert_eq!(fine_rate_for(Some("REFERENCE"), &policies, 10.0), 20.0);
    }

    #[test]
    fn missing_or_unknown_category_uses_default() {
        let policies = vec![policy("Fiction", 5.0)];
        assert_eq!(fine_rate_for(None, &policies, 10.0), 10.0);
        assert_eq!(fine_rate_for(Some("Poetry"), &policies, 10.0), 10.0);
        assert_eq!(fine_rate_for(Some("Fiction"), &[], 10.0), 10.0);
    }

    #[test]
    fn non_ascii_categories_fold_case() {
        assert!(same_category("ÉTUDE", "étude"));
        assert!(!same_category("Étude", "Etude"));
        let policies = vec![policy("ÉTUDE", 3.0)];
        assert_eq!(fine_rate_for(Some("étude"), &policies, 10.0), 3.0);
    }

    #[test]
    fn first_matching_policy_wins() {
        let policies = vec![policy("Fiction", 5.0), policy("FICTION", 7.0)];
        assert_eq!(fine_rate_for(Some("fiction"), &policies, 10.0), 5.0);
    }

    #[test]
    fn fine_counts_whole_days_after_due() {
        assert_eq!(fine_for(date(2024, 1, 1), date(2024, 1, 5), 5.0), 20.0);
        assert_eq!(fine_for(date(2024, 1, 31), date(2024, 2, 2), 10.0), 20.0);
    }

    #[test]
    fn on_time_or_early_return_is_free() {
        assert_eq!(fine_for(date(2024, 1, 1), date(2024, 1, 1), 5.0), 0.0);
        assert_eq!(fine_for(date(2024, 1, 10), date(2024, 1, 2), 5.0), 0.0);
        assert_eq!(days_late(date(2024, 1, 10), date(2024, 1, 2)), 0);
    }
}
