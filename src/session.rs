// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Player Session Runner
//
// Binds a GrooveLayer to a trait store and a control sink. The store is only
// touched in `start` and `finish`; everything in between is window work.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::GrooveConfig;
use crate::degradation::EngineStatus;
use crate::emitter::{ControlSink, Emission};
use crate::ingest::IngestHandle;
use crate::latent::SlowTraits;
use crate::layer::{GrooveLayer, LayerError};
use crate::store::TraitStore;
use crate::types::{EngineContext, PerformanceEvent, SessionMeta};

pub struct PlayerSession<S: TraitStore, K: ControlSink> {
    layer: GrooveLayer,
    store: S,
    sink: K,
}

impl<S: TraitStore, K: ControlSink> PlayerSession<S, K> {
    /// Load the player's slow traits (defaults for a new player) and open
    /// the first window at `start_ms`.
    pub fn start(
        config: Arc<GrooveConfig>,
        meta: SessionMeta,
        mut store: S,
        sink: K,
        start_ms: u64,
    ) -> Result<Self, LayerError> {
        let slow = match store.load_trait_state(&meta.player_id)? {
            Some(traits) => traits,
            None => {
                info!(player_id = %meta.player_id, "no stored traits; starting from defaults");
                SlowTraits::default()
            }
        };
        let mut layer = GrooveLayer::with_shared_config(config, meta)?;
        layer.start_session(slow, start_ms)?;
        Ok(Self { layer, store, sink })
    }

    pub fn layer(&self) -> &GrooveLayer {
        &self.layer
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn handle(&self) -> IngestHandle {
        self.layer.ingest_handle()
    }

    pub fn push(&self, event: PerformanceEvent) {
        self.layer.push_event(event);
    }

    /// Close a window and publish its emission.
    pub fn boundary(
        &mut self,
        boundary_ms: u64,
        context: Option<&EngineContext>,
    ) -> Result<Emission, LayerError> {
        let emission = self.layer.close_window(boundary_ms, context)?;
        self.sink.publish(&emission);
        Ok(emission)
    }

    pub fn poll(&mut self, now_ms: u64) -> Option<Emission> {
        let emission = self.layer.poll(now_ms)?;
        self.sink.publish(&emission);
        Some(emission)
    }

    pub fn report_engine_status(&mut self, status: EngineStatus) {
        self.layer.report_engine_status(status);
    }

    /// End the session, publish the final emissions and persist the slow
    /// traits. Returns the store and sink for reuse.
    pub fn finish(
        mut self,
        now_ms: u64,
        context: Option<&EngineContext>,
    ) -> Result<(S, K), LayerError> {
        let end = self.layer.end_session(now_ms, context)?;
        for emission in &end.emissions {
            self.sink.publish(emission);
        }
        let player = &self.layer.meta().player_id;
        if let Err(e) = self.store.save_trait_state(player, &end.slow_traits) {
            warn!(player_id = %player, error = %e, "slow traits not saved");
            return Err(e.into());
        }
        Ok((self.store, self.sink))
    }
}
