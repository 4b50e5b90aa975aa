//! Built-in transforms. Transforms are pure: they take an
//! event and produce one, never touching I/O or shared state.

use crate::model::WeatherEvent;

pub trait Transform: Send + Sync {
    fn apply(&self, event: WeatherEvent) -> WeatherEvent;
}

/// Passes the event through unchanged.
pub struct IdentityTransform;

impl Transform for IdentityTransform {
    fn apply(&self, event: WeatherEvent) -> WeatherEvent {
        event
    }
}

/// Remaps `product_category` through a lookup table, e.g. collapsing
/// related AWIPS prefixes into one reporting bucket. Categories absent
/// from the map pass through unchanged.
pub struct AttributeMapperTransform {
    pub product_category_map: std::collections::HashMap<String, String>,
}

impl Transform for AttributeMapperTransform {
    fn apply(&self, mut event: WeatherEvent) -> WeatherEvent {
        if let Some(mapped) = self.product_category_map.get(&event.product_category) {
            event.product_category = mapped.clone();
        }
        event
    }
}

/// Applies a function to one named field of the event.
pub struct PropertyTransformer {
    pub apply_fn: Box<dyn Fn(&mut WeatherEvent) + Send + Sync>,
}

impl Transform for PropertyTransformer {
    fn apply(&self, mut event: WeatherEvent) -> WeatherEvent {
        (self.apply_fn)(&mut event);
        event
    }
}

/// Composes transforms, applying each in order.
pub struct ChainTransform {
    pub stages: Vec<Box<dyn Transform>>,
}

impl Transform for ChainTransform {
    fn apply(&self, mut event: WeatherEvent) -> WeatherEvent {
        for stage in &self.stages {
            event = stage.apply(event);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_event() -> WeatherEvent {
        WeatherEvent {
            event_id: uuid::Uuid::new_v4(),
            product_id: "p".to_string(),
            wmo: "WFUS53KTOP151830".to_string(),
            awips_id: "TORTOP".to_string(),
            cccc: "KTOP".to_string(),
            product_category: "TOR".to_string(),
            issued_at: Utc::now(),
            received_at: Utc::now(),
            text: String::new(),
            segments: Vec::new(),
            fingerprint: 1,
        }
    }

    #[test]
    fn identity_passes_through() {
        let event = sample_event();
        let out = IdentityTransform.apply(event.clone());
        assert_eq!(out, event);
    }

    #[test]
    fn attribute_mapper_remaps_known_category() {
        let transform = AttributeMapperTransform {
            product_category_map: [("TOR".to_string(), "SEVERE".to_string())]
                .into_iter()
                .collect(),
        };
        let out = transform.apply(sample_event());
        assert_eq!(out.product_category, "SEVERE");
    }

    #[test]
    fn chain_applies_in_order() {
        let chain = ChainTransform {
            stages: vec![
                Box::new(PropertyTransformer {
                    apply_fn: Box::new(|e| e.product_category = "A".to_string()),
                }),
                Box::new(PropertyTransformer {
                    apply_fn: Box::new(|e| e.product_category.push('B')),
                }),
            ],
        };
        let out = chain.apply(sample_event());
        assert_eq!(out.product_category, "AB");
    }
}
