//! Feature flags and the bet-area limit built on them.
//!
//! `FlagService` is an injected key/value store that broadcasts every change.
//! `AreaLimitController` listens for the area-limit flag and rebuilds its
//! promoter → permitted-room map off the caller's path.

use crate::errors::EngineResult;
use crate::games::types::BetType;
use crate::identity::PromoterDirectory;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const AREA_LIMIT_FLAG: &str = "bet_area_limit";

#[derive(Debug, Clone, PartialEq)]
pub struct FlagChange {
    pub key: String,
    pub value: Value,
}

pub struct FlagService {
    values: RwLock<HashMap<String, Value>>,
    tx: broadcast::Sender<FlagChange>,
}

impl FlagService {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            values: RwLock::new(HashMap::new()),
            tx,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok()?.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Store and notify; listeners react asynchronously
    pub fn set(&self, key: &str, value: Value) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.clone());
        }
        // No receivers is fine
        let _ = self.tx.send(FlagChange {
            key: key.to_string(),
            value,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlagChange> {
        self.tx.subscribe()
    }
}

impl Default for FlagService {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AreaLimitController {
    flags: Arc<FlagService>,
    promoters: Arc<dyn PromoterDirectory>,
    active: AtomicBool,
    permitted: RwLock<HashMap<String, BetType>>,
    /// Completed rebuilds, for callers that need to observe propagation
    generation: AtomicU64,
}

impl AreaLimitController {
    pub fn new(flags: Arc<FlagService>, promoters: Arc<dyn PromoterDirectory>) -> Self {
        Self {
            flags,
            promoters,
            active: AtomicBool::new(false),
            permitted: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether a user of `promoter_code` may bet in `bet_type`
    pub fn permits(&self, promoter_code: Option<&str>, bet_type: BetType) -> bool {
        if !self.is_active() {
            return true;
        }
        let Some(code) = promoter_code else {
            return false;
        };
        self.permitted
            .read()
            .map(|map| map.get(code) == Some(&bet_type))
            .unwrap_or(false)
    }

    /// Toggle the flag; returns before listeners have rebuilt
    pub fn update_room_limit(&self, enabled: bool) {
        tracing::info!(enabled, "Updating bet area limit");
        self.flags.set(AREA_LIMIT_FLAG, Value::Bool(enabled));
    }

    pub async fn rebuild(&self, enabled: bool) -> EngineResult<()> {
        if enabled {
            let map: HashMap<String, BetType> = self
                .promoters
                .promoters()
                .await?
                .into_iter()
                .map(|p| (p.code, p.bet_type))
                .collect();
            let rooms = map.len();
            if let Ok(mut permitted) = self.permitted.write() {
                *permitted = map;
            }
            self.active.store(true, Ordering::Release);
            tracing::info!(promoters = rooms, "Bet area limit active");
        } else {
            self.active.store(false, Ordering::Release);
            if let Ok(mut permitted) = self.permitted.write() {
                permitted.clear();
            }
            tracing::info!("Bet area limit inactive");
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Subscribe before returning so no change after this call is missed
    pub fn spawn_listener(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.flags.subscribe();
        tokio::spawn(async move {
            let initial = self.flags.get_bool(AREA_LIMIT_FLAG);
            if let Err(e) = self.rebuild(initial).await {
                tracing::error!(error = %e, "Initial area limit rebuild failed");
            }

            loop {
                let enabled = match rx.recv().await {
                    Ok(change) if change.key == AREA_LIMIT_FLAG => change.value.as_bool().unwrap_or(false),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Flag listener lagged, resyncing");
                        self.flags.get_bool(AREA_LIMIT_FLAG)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Err(e) = self.rebuild(enabled).await {
                    tracing::error!(error = %e, "Area limit rebuild failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Promoter;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedPromoters(Vec<Promoter>);

    #[async_trait]
    impl PromoterDirectory for FixedPromoters {
        async fn promoters(&self) -> EngineResult<Vec<Promoter>> {
            Ok(self.0.clone())
        }
    }

    async fn wait_for_generation(ctrl: &AreaLimitController, target: u64) {
        for _ in 0..200 {
            if ctrl.generation() >= target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("area limit never rebuilt");
    }

    #[tokio::test]
    async fn test_toggle_rebuilds_permissions() {
        let flags = Arc::new(FlagService::new());
        let promoters = Arc::new(FixedPromoters(vec![Promoter {
            code: "P1".to_string(),
            bet_type: BetType::Wingo3,
        }]));
        let ctrl = Arc::new(AreaLimitController::new(flags.clone(), promoters));
        let _listener = ctrl.clone().spawn_listener();
        wait_for_generation(&ctrl, 1).await;

        assert!(ctrl.permits(None, BetType::Wingo1));

        ctrl.update_room_limit(true);
        wait_for_generation(&ctrl, 2).await;
        assert!(ctrl.permits(Some("P1"), BetType::Wingo3));
        assert!(!ctrl.permits(Some("P1"), BetType::Wingo1));
        assert!(!ctrl.permits(Some("P2"), BetType::Wingo3));
        assert!(!ctrl.permits(None, BetType::Wingo3));

        ctrl.update_room_limit(false);
        wait_for_generation(&ctrl, 3).await;
        assert!(ctrl.permits(Some("P2"), BetType::Nine1));
    }

    #[tokio::test]
    async fn test_unrelated_flags_are_ignored() {
        let flags = Arc::new(FlagService::new());
        let ctrl = Arc::new(AreaLimitController::new(
            flags.clone(),
            Arc::new(FixedPromoters(Vec::new())),
        ));
        let _listener = ctrl.clone().spawn_listener();
        wait_for_generation(&ctrl, 1).await;

        flags.set("maintenance", Value::Bool(true));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ctrl.generation(), 1);
        assert!(!ctrl.is_active());
    }
}
