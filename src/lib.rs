// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - streaming performance-to-accompaniment control loop

pub mod types;
pub mod config;
pub mod ingest;
pub mod window;
pub mod latent;
pub mod policy;
pub mod probe;
pub mod degradation;
pub mod emitter;
pub mod store;
pub mod layer;
pub mod session;

pub use types::*;
pub use config::GrooveConfig;
pub use degradation::EngineStatus;
pub use emitter::{ControlSink, Emission, JsonLinesSink};
pub use latent::{GrooveState, SlowTraits};
pub use layer::{GrooveLayer, LayerError, SessionEnd};
pub use session::PlayerSession;
pub use store::{JsonFileTraitStore, MemoryTraitStore, TraitStore};

use wasm_bindgen::prelude::*;

// ─── WASM Interface ──────────────────────────────────────────────────────────

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

#[wasm_bindgen]
impl GrooveLayer {
    /// `config` may be `null`/`undefined` for defaults or a partial config object.
    #[wasm_bindgen(constructor)]
    pub fn create(
        config: JsValue,
        player_id: &str,
        device_id: &str,
        session_id: &str,
    ) -> Result<GrooveLayer, JsValue> {
        #[cfg(target_arch = "wasm32")]
        std::panic::set_hook(Box::new(console_error_panic_hook::hook));

        let config: Option<GrooveConfig> = serde_wasm_bindgen::from_value(config).map_err(js_err)?;
        GrooveLayer::new(
            config.unwrap_or_default(),
            SessionMeta::new(player_id, device_id, session_id),
        )
        .map_err(js_err)
    }

    /// Start with stored traits (`null` for a new player).
    pub fn start(&mut self, slow_traits: JsValue, start_ms: f64) -> Result<(), JsValue> {
        let slow: Option<SlowTraits> = serde_wasm_bindgen::from_value(slow_traits).map_err(js_err)?;
        self.start_session(slow.unwrap_or_default(), start_ms as u64)
            .map_err(js_err)
    }

    pub fn push(&self, event: JsValue) -> Result<(), JsValue> {
        let event: PerformanceEvent = serde_wasm_bindgen::from_value(event).map_err(js_err)?;
        self.push_event(event);
        Ok(())
    }

    /// Close the current window; `context` may be `null`.
    pub fn boundary(&mut self, boundary_ms: f64, context: JsValue) -> Result<JsValue, JsValue> {
        let context: Option<EngineContext> = serde_wasm_bindgen::from_value(context).map_err(js_err)?;
        let emission = self
            .close_window(boundary_ms as u64, context.as_ref())
            .map_err(js_err)?;
        Ok(serde_wasm_bindgen::to_value(&emission).unwrap_or(JsValue::NULL))
    }

    pub fn poll_js(&mut self, now_ms: f64) -> JsValue {
        match self.poll(now_ms as u64) {
            Some(e) => serde_wasm_bindgen::to_value(&e).unwrap_or(JsValue::NULL),
            None => JsValue::NULL,
        }
    }

    /// `"applying"` or `"rejecting"`.
    pub fn engine_status(&mut self, status: JsValue) -> Result<(), JsValue> {
        let status: EngineStatus = serde_wasm_bindgen::from_value(status).map_err(js_err)?;
        self.report_engine_status(status);
        Ok(())
    }

    /// Returns `{ emissions, slow_traits }`; persist `slow_traits` host-side.
    pub fn finish(&mut self, now_ms: f64, context: JsValue) -> Result<JsValue, JsValue> {
        let context: Option<EngineContext> = serde_wasm_bindgen::from_value(context).map_err(js_err)?;
        let end = self.end_session(now_ms as u64, context.as_ref()).map_err(js_err)?;
        let payload = serde_json::json!({
            "emissions": end.emissions,
            "slow_traits": end.slow_traits,
        });
        Ok(serde_wasm_bindgen::to_value(&payload).unwrap_or(JsValue::NULL))
    }

    pub fn get_state(&self) -> JsValue {
        match self.state() {
            Some(state) => serde_wasm_bindgen::to_value(state).unwrap_or(JsValue::NULL),
            None => JsValue::NULL,
        }
    }
}
