//! Built-in filters. Filters evaluate in declared order;
//! the first rejection short-circuits the rest.

use std::sync::Mutex;

use regex::Regex;

use crate::model::WeatherEvent;
use crate::pipeline::dedup::DedupWindow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(String),
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }
}

pub trait Filter: Send + Sync {
    fn evaluate(&self, event: &WeatherEvent) -> FilterDecision;
}

/// Which named field a filter reads off a [`WeatherEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Cccc,
    AwipsId,
    ProductCategory,
    Wmo,
}

impl Attribute {
    fn read<'a>(&self, event: &'a WeatherEvent) -> &'a str {
        match self {
            Attribute::Cccc => &event.cccc,
            Attribute::AwipsId => &event.awips_id,
            Attribute::ProductCategory => &event.product_category,
            Attribute::Wmo => &event.wmo,
        }
    }
}

/// Equality / set-membership filter over a named attribute.
pub struct AttributeEqualityFilter {
    pub field: Attribute,
    pub allowed: std::collections::HashSet<String>,
}

impl Filter for AttributeEqualityFilter {
    fn evaluate(&self, event: &WeatherEvent) -> FilterDecision {
        if self.allowed.contains(self.field.read(event)) {
            FilterDecision::Accept
        } else {
            FilterDecision::Reject(format!("{:?} not in allowed set", self.field))
        }
    }
}

/// Regular-expression match over a named attribute.
pub struct RegexFilter {
    pub field: Attribute,
    pub pattern: Regex,
}

impl Filter for RegexFilter {
    fn evaluate(&self, event: &WeatherEvent) -> FilterDecision {
        if self.pattern.is_match(self.field.read(event)) {
            FilterDecision::Accept
        } else {
            FilterDecision::Reject(format!("{:?} did not match {}", self.field, self.pattern))
        }
    }
}

/// Implementer-supplied predicate.
pub struct FunctionFilter {
    pub name: String,
    pub predicate: Box<dyn Fn(&WeatherEvent) -> bool + Send + Sync>,
}

impl Filter for FunctionFilter {
    fn evaluate(&self, event: &WeatherEvent) -> FilterDecision {
        if (self.predicate)(event) {
            FilterDecision::Accept
        } else {
            FilterDecision::Reject(self.name.clone())
        }
    }
}

/// AND/OR/NOT combinator over other filters.
pub enum CompositeFilter {
    And(Vec<Box<dyn Filter>>),
    Or(Vec<Box<dyn Filter>>),
    Not(Box<dyn Filter>),
}

impl Filter for CompositeFilter {
    fn evaluate(&self, event: &WeatherEvent) -> FilterDecision {
        match self {
            CompositeFilter::And(filters) => {
                for filter in filters {
                    let decision = filter.evaluate(event);
                    if !decision.is_accept() {
                        return decision;
                    }
                }
                FilterDecision::Accept
            }
            CompositeFilter::Or(filters) => {
                let mut last_reject = FilterDecision::Reject("empty OR".to_string());
                for filter in filters {
                    let decision = filter.evaluate(event);
                    if decision.is_accept() {
                        return FilterDecision::Accept;
                    }
                    last_reject = decision;
                }
                last_reject
            }
            CompositeFilter::Not(inner) => {
                if inner.evaluate(event).is_accept() {
                    FilterDecision::Reject("negated filter matched".to_string())
                } else {
                    FilterDecision::Accept
                }
            }
        }
    }
}

/// Central duplicate-suppression filter: rejects events whose
/// fingerprint was seen within the dedup window, with reason `duplicate`.
pub struct DuplicateSuppressionFilter {
    window: Mutex<DedupWindow>,
}

impl DuplicateSuppressionFilter {
    pub fn new(config: &crate::config::DedupConfig) -> Self {
        Self {
            window: Mutex::new(DedupWindow::new(config)),
        }
    }
}

impl Filter for DuplicateSuppressionFilter {
    fn evaluate(&self, event: &WeatherEvent) -> FilterDecision {
        let mut window = self.window.lock().unwrap();
        if window.check_and_insert(event.fingerprint, event.received_at) {
            FilterDecision::Reject("duplicate".to_string())
        } else {
            FilterDecision::Accept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_event(cccc: &str, fingerprint: u64) -> WeatherEvent {
        WeatherEvent {
            event_id: uuid::Uuid::new_v4(),
            product_id: "p".to_string(),
            wmo: "WFUS53KTOP151830".to_string(),
            awips_id: "TORTOP".to_string(),
            cccc: cccc.to_string(),
            product_category: "TOR".to_string(),
            issued_at: Utc::now(),
            received_at: Utc::now(),
            text: String::new(),
            segments: Vec::new(),
            fingerprint,
        }
    }

    #[test]
    fn attribute_equality_rejects_unlisted_office() {
        let filter = AttributeEqualityFilter {
            field: Attribute::Cccc,
            allowed: ["KTOP".to_string()].into_iter().collect(),
        };
        assert!(filter.evaluate(&sample_event("KTOP", 1)).is_accept());
        assert!(!filter.evaluate(&sample_event("KBOU", 2)).is_accept());
    }

    #[test]
    fn duplicate_suppression_rejects_repeat_fingerprint() {
        let config = crate::config::DedupConfig {
            window_size: 100,
            window_seconds: 600,
        };
        let filter = DuplicateSuppressionFilter::new(&config);
        let event = sample_event("KTOP", 99);
        assert!(filter.evaluate(&event).is_accept());
        assert_eq!(
            filter.evaluate(&event),
            FilterDecision::Reject("duplicate".to_string())
        );
    }

    #[test]
    fn composite_not_inverts() {
        let inner = AttributeEqualityFilter {
            field: Attribute::Cccc,
            allowed: ["KTOP".to_string()].into_iter().collect(),
        };
        let not = CompositeFilter::Not(Box::new(inner));
        assert!(!not.evaluate(&sample_event("KTOP", 1)).is_accept());
        assert!(not.evaluate(&sample_event("KBOU", 2)).is_accept());
    }

    #[test]
    fn composite_or_accepts_if_any_matches() {
        let a = AttributeEqualityFilter {
            field: Attribute::Cccc,
            allowed: ["KTOP".to_string()].into_iter().collect(),
        };
        let b = AttributeEqualityFilter {
            field: Attribute::Cccc,
            allowed: ["KBOU".to_string()].into_iter().collect(),
        };
        let or = CompositeFilter::Or(vec![Box::new(a), Box::new(b)]);
        assert!(or.evaluate(&sample_event("KBOU", 1)).is_accept());
        assert!(!or.evaluate(&sample_event("KDEN", 2)).is_accept());
    }
}
