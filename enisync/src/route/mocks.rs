//! Stateful in-memory [`RouteOps`] for tests.
//!
//! Models rules and routes the way the kernel would (add appends, flush
//! removes everything matching) and records every call so tests can assert
//! both observable state and the absence of calls.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use super::ops::{DefaultRouteSpec, RouteOps, RouteOpsError, RuleSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddRule(RuleSpec),
    AddDefaultRoute(DefaultRouteSpec),
    CountRules(u32),
    FlushRules(u32),
    FlushRoutes(u32),
}

#[derive(Debug, Default)]
pub struct MockState {
    pub rules: Vec<RuleSpec>,
    pub routes: Vec<DefaultRouteSpec>,
    pub calls: Vec<Call>,
    /// Operation name that should fail with `PermissionDenied`.
    pub fail_on: Option<&'static str>,
}

/// Cloneable handle; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockRouteOps {
    state: Arc<Mutex<MockState>>,
}

impl MockRouteOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(operation: &'static str) -> Self {
        let ops = Self::new();
        ops.state().fail_on = Some(operation);
        ops
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Calls that change state, i.e. everything but queries.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::CountRules(_)))
            .collect()
    }

    pub fn rules_at(&self, priority: u32) -> Vec<RuleSpec> {
        self.state()
            .rules
            .iter()
            .filter(|r| r.priority == priority)
            .copied()
            .collect()
    }

    pub fn routes_in(&self, table: u32) -> Vec<DefaultRouteSpec> {
        self.state()
            .routes
            .iter()
            .filter(|r| r.table == table)
            .copied()
            .collect()
    }

    fn record(&self, call: Call, operation: &'static str) -> Result<MutexGuard<'_, MockState>, RouteOpsError> {
        let mut state = self.state();
        state.calls.push(call);
        if state.fail_on == Some(operation) {
            return Err(RouteOpsError::Io(io::Error::from(
                io::ErrorKind::PermissionDenied,
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl RouteOps for MockRouteOps {
    async fn add_rule(&self, rule: &RuleSpec) -> Result<(), RouteOpsError> {
        let mut state = self.record(Call::AddRule(*rule), "add_rule")?;
        state.rules.push(*rule);
        Ok(())
    }

    async fn add_default_route(&self, route: &DefaultRouteSpec) -> Result<(), RouteOpsError> {
        let mut state = self.record(Call::AddDefaultRoute(*route), "add_default_route")?;
        state.routes.push(*route);
        Ok(())
    }

    async fn count_rules(&self, priority: u32) -> Result<usize, RouteOpsError> {
        let state = self.record(Call::CountRules(priority), "count_rules")?;
        Ok(state.rules.iter().filter(|r| r.priority == priority).count())
    }

    async fn flush_rules(&self, priority: u32) -> Result<(), RouteOpsError> {
        let mut state = self.record(Call::FlushRules(priority), "flush_rules")?;
        state.rules.retain(|r| r.priority != priority);
        Ok(())
    }

    async fn flush_routes(&self, table: u32) -> Result<(), RouteOpsError> {
        let mut state = self.record(Call::FlushRoutes(table), "flush_routes")?;
        state.routes.retain(|r| r.table != table);
        Ok(())
    }
}
