//! In-memory activity source.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::error::CalculationError;
use crate::core::store::ActivitySource;
use crate::emissions::model::Activity;

/// Activity source holding ingested activities in a map keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryActivitySource {
    activities: RwLock<HashMap<String, Activity>>,
}

impl InMemoryActivitySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one activity.
    pub fn insert(&self, activity: Activity) {
        self.activities.write().insert(activity.id.clone(), activity);
    }

    /// Add or replace several activities.
    pub fn extend(&self, activities: impl IntoIterator<Item = Activity>) {
        let mut map = self.activities.write();
        for activity in activities {
            map.insert(activity.id.clone(), activity);
        }
    }

    /// Remove an activity, returning it if present.
    pub fn remove(&self, activity_id: &str) -> Option<Activity> {
        self.activities.write().remove(activity_id)
    }

    /// Number of activities held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.activities.read().len()
    }

    /// Whether no activities are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activities.read().is_empty()
    }
}

impl FromIterator<Activity> for InMemoryActivitySource {
    fn from_iter<I: IntoIterator<Item = Activity>>(iter: I) -> Self {
        let source = Self::new();
        source.extend(iter);
        source
    }
}

#[async_trait]
impl ActivitySource for InMemoryActivitySource {
    async fn get_activity(&self, activity_id: &str) -> Result<Activity, CalculationError> {
        self.activities
            .read()
            .get(activity_id)
            .cloned()
            .ok_or_else(|| CalculationError::ActivityNotFound(activity_id.to_owned()))
    }
}
