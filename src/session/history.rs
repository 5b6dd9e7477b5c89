use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use super::SessionId;
use crate::domain::DispatchPlan;

/// Append-only list of the plans produced within one session.
#[derive(Debug, Default)]
pub struct SessionHistory {
    plans: Vec<DispatchPlan>,
}

impl SessionHistory {
    /// Appends and returns the new length.
    pub fn append(&mut self, plan: DispatchPlan) -> usize {
        self.plans.push(plan);
        self.plans.len()
    }

    pub fn plans(&self) -> &[DispatchPlan] {
        &self.plans
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Session id to history map. Each session has its own lock, so appends in one
/// session never wait on, or touch, another.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionHistory>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: &SessionId) -> Arc<Mutex<SessionHistory>> {
        if let Some(h) = self.sessions.read().get(id) {
            return Arc::clone(h);
        }
        let mut sessions = self.sessions.write();
        Arc::clone(sessions.entry(id.clone()).or_default())
    }

    /// Appends `plan` to the session and returns a snapshot of its history.
    pub fn append(&self, id: &SessionId, plan: DispatchPlan) -> Vec<DispatchPlan> {
        let handle = self.handle(id);
        let mut history = handle.lock();
        history.append(plan);
        history.plans().to_vec()
    }

    pub fn plans(&self, id: &SessionId) -> Vec<DispatchPlan> {
        self.sessions
            .read()
            .get(id)
            .map(|h| h.lock().plans().to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Utc};
    use uuid::Uuid;

    fn plan() -> DispatchPlan {
        DispatchPlan {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            window_start: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            window_intervals: 4,
            devices: Vec::new(),
        }
    }

    #[test]
    fn sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let a = SessionId::parse("a").unwrap();
        let b = SessionId::parse("b").unwrap();

        let first = plan();
        registry.append(&a, first.clone());
        let snapshot = registry.append(&a, plan());
        registry.append(&b, plan());

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, first.id);
        assert_eq!(registry.plans(&b).len(), 1);
        assert!(registry.plans(&SessionId::parse("c").unwrap()).is_empty());
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let registry = Arc::new(SessionRegistry::new());
        let id = SessionId::parse("busy").unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        registry.append(&id, plan());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.plans(&id).len(), 200);
    }
}
